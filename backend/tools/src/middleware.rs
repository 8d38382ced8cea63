//! Tool middleware, composed explicitly at registration time.
//!
//! Each wrapper is itself a [`Tool`], so chains nest:
//! `Audited<Timed<Validated<T>>>`.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use lmsguard_core::{GuardError, Tool};
use lmsguard_logging::AuditLogger;
use serde_json::Value;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Argument validation
// ---------------------------------------------------------------------------

/// Check `args` against the `required` list and property `type`s of a JSON schema.
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), GuardError> {
    let empty = serde_json::Map::new();
    let object = match args {
        Value::Object(map) => map,
        Value::Null => &empty,
        other => {
            return Err(GuardError::InvalidArguments(format!(
                "expected an object, got {}",
                json_type(other)
            )))
        }
    };

    let required = schema["required"].as_array().map(Vec::as_slice).unwrap_or_default();
    for key in required.iter().filter_map(Value::as_str) {
        if object.get(key).map_or(true, Value::is_null) {
            return Err(GuardError::InvalidArguments(format!("missing required argument '{key}'")));
        }
    }

    if let Some(properties) = schema["properties"].as_object() {
        for (key, value) in object {
            let Some(expected) = properties.get(key).and_then(|p| p["type"].as_str()) else {
                continue;
            };
            if !value.is_null() && !type_matches(expected, value) {
                return Err(GuardError::InvalidArguments(format!(
                    "argument '{key}' must be {expected}, got {}",
                    json_type(value)
                )));
            }
        }
    }
    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        _ => true,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Wrappers
// ---------------------------------------------------------------------------

/// Rejects arguments that do not satisfy the tool's parameter schema.
pub struct Validated<T> {
    inner: T,
}

impl<T: Tool> Validated<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<T: Tool> Tool for Validated<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn parameters(&self) -> Value {
        self.inner.parameters()
    }

    async fn execute(&self, args: Value) -> Result<String> {
        validate_args(&self.inner.parameters(), &args)?;
        self.inner.execute(args).await
    }
}

/// Logs the duration and result of every call.
pub struct Timed<T> {
    inner: T,
}

impl<T: Tool> Timed<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<T: Tool> Tool for Timed<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn parameters(&self) -> Value {
        self.inner.parameters()
    }

    async fn execute(&self, args: Value) -> Result<String> {
        let started = Instant::now();
        let result = self.inner.execute(args).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => info!(tool = self.name(), duration_ms, "[Tools] Call finished"),
            Err(e) => warn!(tool = self.name(), duration_ms, error = %e, "[Tools] Call failed"),
        }
        result
    }
}

/// Emits one data-access audit event per call.
pub struct Audited<T> {
    inner: T,
    audit: Arc<AuditLogger>,
}

impl<T: Tool> Audited<T> {
    pub fn new(inner: T, audit: Arc<AuditLogger>) -> Self {
        Self { inner, audit }
    }
}

#[async_trait]
impl<T: Tool> Tool for Audited<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn parameters(&self) -> Value {
        self.inner.parameters()
    }

    async fn execute(&self, args: Value) -> Result<String> {
        let result = self.inner.execute(args).await;
        let status = if result.is_ok() { "success" } else { "error" };
        self.audit
            .log_data_access("TOOL", &format!("tools/{}", self.name()), status);
        result
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::context::tests::Capture;
    use lmsguard_config::AuditConfig;
    use serde_json::json;

    pub(crate) struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the message back"
        }

        fn parameters(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "message": {"type": "string"},
                    "times": {"type": "integer"}
                },
                "required": ["message"]
            })
        }

        async fn execute(&self, args: Value) -> Result<String> {
            let message = args["message"].as_str().unwrap_or_default();
            if message == "fail" {
                anyhow::bail!("asked to fail");
            }
            let times = args["times"].as_u64().unwrap_or(1) as usize;
            Ok(message.repeat(times))
        }
    }

    #[tokio::test]
    async fn validated_rejects_missing_and_mistyped_arguments() {
        let tool = Validated::new(Echo);
        let missing = tool.execute(json!({})).await.unwrap_err();
        assert!(missing.to_string().contains("missing required argument 'message'"));

        let mistyped = tool.execute(json!({"message": "hi", "times": "2"})).await.unwrap_err();
        assert!(mistyped.to_string().contains("'times' must be integer"));

        assert_eq!(tool.execute(json!({"message": "hi", "times": 2})).await.unwrap(), "hihi");
    }

    #[test]
    fn non_object_arguments_are_rejected() {
        let schema = Echo.parameters();
        assert!(validate_args(&schema, &json!("hi")).is_err());
        assert!(validate_args(&json!({}), &Value::Null).is_ok());
    }

    #[tokio::test]
    async fn timed_is_transparent() {
        let tool = Timed::new(Echo);
        assert_eq!(tool.name(), "echo");
        assert_eq!(tool.execute(json!({"message": "ok"})).await.unwrap(), "ok");
        assert!(tool.execute(json!({"message": "fail"})).await.is_err());
    }

    #[tokio::test]
    async fn audited_records_each_call() {
        let audit = Arc::new(AuditLogger::new());
        let mirror = Capture::default();
        audit.init_with_mirror(
            &AuditConfig {
                log_access_events: Some(true),
                log_execution_events: Some(false),
                log_dir: None,
            },
            Box::new(mirror.clone()),
        );
        let tool = Audited::new(Echo, audit);
        tool.execute(json!({"message": "ok"})).await.unwrap();
        tool.execute(json!({"message": "fail"})).await.unwrap_err();

        let events = mirror.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["endpoint"], "tools/echo");
        assert_eq!(events[0]["status"], "success");
        assert_eq!(events[1]["status"], "error");
    }
}
