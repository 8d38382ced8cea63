//! Tool layer: the trust context and the tools exposed to the model.

pub mod code_exec;
pub mod context;
pub mod middleware;
pub mod registry;

pub use code_exec::{render_outcome, ExecuteCodeTool};
pub use context::TrustContext;
pub use middleware::{validate_args, Audited, Timed, Validated};
pub use registry::ToolRegistry;
