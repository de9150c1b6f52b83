//! Knowledge base lookup — device documentation and SOPs.
//!
//! Replies from the knowledge service are passed through as-is, error
//! reports included: the model decides what to do with them.

use async_trait::async_trait;
use dispatch_core::error::ToolError;
use dispatch_core::knowledge::KnowledgeSource;
use dispatch_core::tool::{Tool, ToolResult};
use std::sync::Arc;

use crate::required_str;

pub struct FetchRelatedKnowledgeTool {
    source: Arc<dyn KnowledgeSource>,
}

impl FetchRelatedKnowledgeTool {
    pub fn new(source: Arc<dyn KnowledgeSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Tool for FetchRelatedKnowledgeTool {
    fn name(&self) -> &str {
        "fetch_related_knowledge"
    }

    fn description(&self) -> &str {
        "Query the knowledge base for Cisco device configuration documentation, topology \
         details, or standard operating procedures (SOPs). Always use this before generating \
         configuration and before calling push_configuration."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to look up, e.g. \"How to configure OSPF on Cisco IOS\""
                },
                "model_name": { "type": "string" },
                "topology_id": { "type": "string" }
            },
            "required": ["query", "model_name"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let query = required_str(&arguments, "query")?;
        let model = required_str(&arguments, "model_name")?;

        Ok(ToolResult::ok(self.source.query(query, model).await))
    }
}
