//! # Dispatch Core
//!
//! Domain types, traits, and error definitions for the Dispatch
//! network-automation agent. This crate has **no framework dependencies**:
//! it defines the domain model that every other crate implements against.
//!
//! ## Seams
//!
//! Each external collaborator of the agent loop is a trait here:
//! - [`Provider`] — streamed chat completions
//! - [`ToolInvoker`] — tool catalog listing and invocation
//! - [`KnowledgeSource`] — retrieval-augmented context queries
//! - [`DeviceInventory`] / [`ConfigExecutor`] — the (simulated) network
//! - [`ChatStore`] — chat session persistence
//!
//! Implementations live in their respective crates, which keeps the agent
//! testable against scripted stand-ins.

pub mod error;
pub mod event;
pub mod knowledge;
pub mod message;
pub mod network;
pub mod provider;
pub mod store;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use knowledge::{AnswerRequest, KnowledgeSource, RetrievalMode};
pub use message::{Message, MessageToolCall, Role, SessionId};
pub use network::{ConfigExecutor, Device, DeviceConfig, DeviceInventory};
pub use provider::{FinishReason, Provider, ProviderRequest, StreamEvent, ToolCallDelta};
pub use store::{ChatMode, ChatSession, ChatStore, StoredMessage};
pub use tool::{Tool, ToolDefinition, ToolInvoker, ToolOutcome, ToolRegistry, ToolResult};
