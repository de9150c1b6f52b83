//! Knowledge source trait — retrieval-augmented context.
//!
//! The knowledge service holds device documentation and SOPs. The agent
//! reaches it through the `fetch_related_knowledge` tool; the non-agent
//! chat modes stream direct answers from it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::Message;

/// Prefixes that mark a knowledge reply as an error report.
///
/// Such replies are informational: they are handed to the model like any
/// other tool output and never end a run.
pub const ERROR_PREFIXES: [&str; 2] = ["Error:", "Failed to reach"];

/// Whether a knowledge reply is an error report.
pub fn is_error_text(text: &str) -> bool {
    ERROR_PREFIXES.iter().any(|p| text.starts_with(p))
}

/// Retrieval mode of the knowledge service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    /// Graph + vector retrieval.
    #[default]
    Mix,
    /// Entity-local retrieval only.
    Local,
    /// Local + global graph retrieval.
    Hybrid,
}

impl RetrievalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mix => "mix",
            Self::Local => "local",
            Self::Hybrid => "hybrid",
        }
    }
}

/// A request for a directly streamed answer.
#[derive(Debug, Clone)]
pub struct AnswerRequest {
    pub query: String,
    pub model: String,
    pub mode: RetrievalMode,
    /// Recent conversation, oldest first
    pub history: Vec<Message>,
}

/// Receiving half of a streamed answer: text fragments in order.
pub type AnswerReceiver = mpsc::Receiver<Result<String, ProviderError>>;

#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch context relevant to `text` from the knowledge base of `model`.
    ///
    /// Never fails: problems are reported as text starting with one of
    /// [`ERROR_PREFIXES`].
    async fn query(&self, text: &str, model: &str) -> String;

    /// Stream an answer generated by the knowledge service itself.
    async fn stream_answer(&self, request: AnswerRequest) -> Result<AnswerReceiver, ProviderError> {
        Err(ProviderError::NotConfigured(format!(
            "Knowledge source '{}' cannot stream answers for model '{}'",
            self.name(),
            request.model
        )))
    }
}
