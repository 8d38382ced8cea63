use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// A capability the model can invoke through the tool-calling server.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name of the tool (e.g., "execute_code").
    fn name(&self) -> &str;

    /// Description for the model prompt.
    fn description(&self) -> &str;

    /// JSON Schema for the tool's parameters.
    fn parameters(&self) -> Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, args: Value) -> Result<String>;
}
