//! The Dispatch agent loop.
//!
//! A run follows a **stream → dispatch → observe** cycle:
//!
//! 1. **Seed** the transcript: system prompt naming the topology, recent
//!    history, the operator's request
//! 2. **Stream** a completion, forwarding text and reasoning as it arrives
//! 3. **Dispatch** the requested tool calls one at a time, injecting the
//!    topology (and model for knowledge lookups) into their arguments
//! 4. **Observe**: append the results and go back to step 2
//!
//! The loop ends when the model answers without tool calls, the iteration
//! cap is reached, the operator cancels, or the model server fails.
//! Configuration pushes go through a per-device [`RetryLimiter`].

pub mod cancel;
pub mod decoder;
pub mod loop_runner;
pub mod prompt;
pub mod retry;
pub mod schema;
pub mod stream_event;
pub mod transcript;

#[cfg(test)]
mod test_helpers;

pub use cancel::{CancelGuard, CancellationRegistry};
pub use decoder::{DecodedTurn, DeltaDecoder, Fragment};
pub use loop_runner::{AgentLoop, AgentReport, AgentRun, RunOutcome};
pub use retry::RetryLimiter;
pub use schema::adapt_catalog;
pub use stream_event::AgentStreamEvent;
pub use transcript::Transcript;
