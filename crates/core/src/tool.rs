//! Tool traits — the abstraction over agent capabilities.
//!
//! Tools are what let the agent act on the network: list devices, read
//! running configurations, push configuration, query the knowledge base.
//!
//! Two seams live here:
//! - [`Tool`]: one capability, implemented in `dispatch-tools`.
//! - [`ToolInvoker`]: the client the agent loop talks to. It lists the
//!   catalog and invokes a tool by name under a timeout, returning a
//!   [`ToolOutcome`] value rather than an error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use crate::error::ToolError;

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content
    pub output: String,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// Outcome of one tool invocation through a [`ToolInvoker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    /// The tool produced a textual result.
    Ok(String),
    /// The tool did not answer within the timeout.
    TimedOut,
    /// The tool could not run or reported failure.
    Failed(String),
}

/// The core Tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g. "list_devices").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// The tool-invocation client used by the agent loop.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// The tool catalog as currently registered.
    async fn list_tools(&self) -> Vec<ToolDefinition>;

    /// Invoke `name` with `arguments`, giving up after `timeout`.
    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
        timeout: Duration,
    ) -> ToolOutcome;
}

/// A registry of in-process tools.
///
/// Tools are kept in name order so the catalog sent to the model is stable
/// between iterations.
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Get all tool definitions.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolInvoker for ToolRegistry {
    async fn list_tools(&self) -> Vec<ToolDefinition> {
        self.definitions()
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
        timeout: Duration,
    ) -> ToolOutcome {
        let Some(tool) = self.tools.get(name) else {
            return ToolOutcome::Failed(ToolError::NotFound(name.to_string()).to_string());
        };

        match tokio::time::timeout(timeout, tool.execute(arguments)).await {
            Ok(Ok(result)) if result.success => ToolOutcome::Ok(result.output),
            Ok(Ok(result)) => ToolOutcome::Failed(result.output),
            Ok(Err(e)) => ToolOutcome::Failed(e.to_string()),
            Err(_) => {
                debug!(tool = %name, timeout_secs = timeout.as_secs(), "Tool call timed out");
                ToolOutcome::TimedOut
            }
        }
    }
}
