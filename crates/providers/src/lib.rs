//! LLM and knowledge service clients for Dispatch.
//!
//! Completion providers implement `dispatch_core::Provider`; the router
//! selects one per model. The knowledge client implements
//! `dispatch_core::KnowledgeSource`.

pub mod knowledge;
pub mod openai_compat;
pub mod router;

pub use knowledge::LightRagClient;
pub use openai_compat::OpenAiCompatProvider;
pub use router::{ProviderRouter, build_from_config, knowledge_from_config};
