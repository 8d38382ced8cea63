//! Tool registry.
//!
//! `register` wraps every tool in the standard chain
//! (`Audited<Timed<Validated<T>>>`) before storing it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{bail, Result};
use lmsguard_core::Tool;
use lmsguard_logging::AuditLogger;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::middleware::{Audited, Timed, Validated};

pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    audit: Arc<AuditLogger>,
}

impl ToolRegistry {
    pub fn new(audit: Arc<AuditLogger>) -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            audit,
        }
    }

    /// Register a tool behind validation, timing and auditing.
    /// A tool with the same name is replaced.
    pub fn register<T: Tool + 'static>(&self, tool: T) {
        let wrapped = Audited::new(Timed::new(Validated::new(tool)), Arc::clone(&self.audit));
        let name = wrapped.name().to_string();
        if self.write().insert(name.clone(), Arc::new(wrapped)).is_some() {
            warn!(tool = %name, "[Tools] Replacing existing tool");
        } else {
            debug!(tool = %name, "[Tools] Registered");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.read().get(name).cloned()
    }

    /// Registered tool names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// `{name, description, parameters}` for every tool, sorted by name.
    pub fn definitions(&self) -> Vec<Value> {
        let tools = self.read();
        let mut names: Vec<&String> = tools.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| {
                let tool = &tools[name];
                json!({
                    "name": tool.name(),
                    "description": tool.description(),
                    "parameters": tool.parameters(),
                })
            })
            .collect()
    }

    pub async fn execute(&self, name: &str, args: Value) -> Result<String> {
        let Some(tool) = self.get(name) else {
            bail!("Unknown tool '{name}'");
        };
        tool.execute(args).await
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<dyn Tool>>> {
        self.tools.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<dyn Tool>>> {
        self.tools.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
