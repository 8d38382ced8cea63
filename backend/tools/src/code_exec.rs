use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use lmsguard_core::Tool;
use lmsguard_sandbox::ExecutionOutcome;
use serde_json::Value;

use crate::context::TrustContext;

/// Runs model-supplied code in the sandbox.
///
/// The result goes back to the model, so it is never de-anonymized.
pub struct ExecuteCodeTool {
    context: Arc<TrustContext>,
}

impl ExecuteCodeTool {
    pub fn new(context: Arc<TrustContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Tool for ExecuteCodeTool {
    fn name(&self) -> &str {
        "execute_code"
    }

    fn description(&self) -> &str {
        "Run a JavaScript (ES module) program in an isolated sandbox. The LMS API \
         URL and token are available as CANVAS_API_URL and CANVAS_API_TOKEN; other \
         network access is blocked. Returns status, stdout and stderr."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Program source to execute"
                }
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String> {
        let code = args["code"]
            .as_str()
            .ok_or_else(|| anyhow!("Missing 'code' argument"))?;
        let outcome = self.context.execute_code(code).await;
        Ok(render_outcome(&outcome))
    }
}

/// Plain-text rendering of an execution outcome.
pub fn render_outcome(outcome: &ExecutionOutcome) -> String {
    let mut text = format!(
        "Status: {} (sandbox: {}, {:.2}s",
        outcome.status.as_str(),
        outcome.sandbox_mode,
        outcome.duration_sec
    );
    if let Some(code) = outcome.exit_code {
        let _ = write!(text, ", exit code {code}");
    }
    text.push_str(")\n");
    if let Some(error) = &outcome.error {
        let _ = writeln!(text, "Error: {error}");
    }
    if !outcome.stdout.is_empty() {
        let _ = write!(text, "--- stdout ---\n{}", outcome.stdout);
        if !outcome.stdout.ends_with('\n') {
            text.push('\n');
        }
    }
    if !outcome.stderr.is_empty() {
        let _ = write!(text, "--- stderr ---\n{}", outcome.stderr);
        if !outcome.stderr.ends_with('\n') {
            text.push('\n');
        }
    }
    if outcome.truncated {
        text.push_str("[output truncated]\n");
    }
    text
}
