//! The LLM client contract: a single `complete` operation, structured
//! output negotiated per provider, and a small, stable error taxonomy. No
//! concrete wire protocol lives here — that is deliberately out of scope
//! and left to an adapter crate the caller supplies.

pub mod contract;
pub mod testing;

pub use contract::{
    CompletionRequest, CompletionResponse, LlmError, LlmHandle, OutputMode, PromptMessage, Role,
};
