//! `lmsguard-core`: shared building blocks of the trust boundary.
//!
//! Provides the sanitization policy (key and path classification), the
//! top-level error type, and the `Tool` trait implemented by everything the
//! model can call.

pub mod error;
pub mod policy;
pub mod traits;

pub use error::GuardError;
pub use policy::{
    classify_key, is_identity_endpoint, lists_user_records, mask_numeric_segments, FieldClass,
    ID_VISIBLE_CHARS, MASK, PII_KEYS, REDACTION_MARKER,
};
pub use traits::Tool;
