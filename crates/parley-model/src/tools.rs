//! Tool registry and batch dispatch.
//!
//! The bridge knows nothing about what a tool does. It routes each call by
//! name, bounds it with a deadline, and always produces one response per
//! call it is responsible for.

use crate::config::ToolConfig;
use crate::error::ToolError;
use crate::protocol::{FunctionCall, FunctionDeclaration, FunctionResponse};
use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// A callable tool exposed to the model.
#[async_trait]
pub trait Tool: Send + Sync {
    fn declaration(&self) -> FunctionDeclaration;

    async fn call(&self, args: Value) -> Result<Value, ToolError>;
}

pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    provider_internal: HashSet<String>,
    call_timeout: Duration,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.tools.keys().collect();
        names.sort();
        f.debug_struct("ToolRegistry")
            .field("tools", &names)
            .field("provider_internal", &self.provider_internal)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(&ToolConfig::default())
    }
}

impl ToolRegistry {
    pub fn new(config: &ToolConfig) -> Self {
        Self {
            tools: HashMap::new(),
            provider_internal: config.provider_internal.iter().cloned().collect(),
            call_timeout: config.call_timeout(),
        }
    }

    /// Registers `tool` under its declared name, replacing any previous
    /// tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.declaration().name;
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "replacing previously registered tool");
        }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub fn is_provider_internal(&self, name: &str) -> bool {
        self.provider_internal.contains(name)
    }

    /// Declarations for the session setup, sorted by name.
    pub fn declarations(&self) -> Vec<FunctionDeclaration> {
        let mut decls: Vec<FunctionDeclaration> =
            self.tools.values().map(|t| t.declaration()).collect();
        decls.sort_by(|a, b| a.name.cmp(&b.name));
        decls
    }

    /// Runs a batch of calls concurrently.
    ///
    /// Returns one response per call, in call order, except for
    /// provider-internal tools which the service answers itself. A failing,
    /// panicking or slow tool yields an error payload for its own call only.
    pub async fn dispatch(&self, calls: Vec<FunctionCall>) -> Vec<FunctionResponse> {
        let futures = calls.into_iter().filter_map(|call| {
            if self.is_provider_internal(&call.name) {
                tracing::debug!(tool = %call.name, "skipping provider-internal tool call");
                return None;
            }
            let tool = self.tools.get(&call.name).cloned();
            let deadline = self.call_timeout;
            Some(async move {
                let Some(tool) = tool else {
                    tracing::warn!(tool = %call.name, call_id = %call.id, "model called unknown tool");
                    return FunctionResponse::failure(&call, format!("unknown tool: {}", call.name));
                };

                let args = call.args.clone();
                let handle = tokio::spawn(async move { tool.call(args).await });
                let abort = handle.abort_handle();
                match tokio::time::timeout(deadline, handle).await {
                    Ok(Ok(Ok(value))) => FunctionResponse::success(&call, value),
                    Ok(Ok(Err(e))) => {
                        tracing::warn!(tool = %call.name, call_id = %call.id, "tool call failed: {}", e);
                        FunctionResponse::failure(&call, e.to_string())
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(tool = %call.name, call_id = %call.id, "tool task aborted: {}", e);
                        FunctionResponse::failure(&call, "tool execution aborted")
                    }
                    Err(_) => {
                        abort.abort();
                        tracing::warn!(
                            tool = %call.name,
                            call_id = %call.id,
                            timeout_ms = deadline.as_millis() as u64,
                            "tool call timed out"
                        );
                        FunctionResponse::failure(
                            &call,
                            format!("tool timed out after {} ms", deadline.as_millis()),
                        )
                    }
                }
            })
        });

        join_all(futures).await
    }
}
