//! Short-term memory: a rolling summary over conversation turns, isolated
//! per `MemoryKey`, with a background summarizer and a degrade-gracefully
//! failure state machine.

pub mod estimator;
pub mod memory;
pub mod state;
pub mod summarizer;
pub mod truncation;

pub use estimator::{DefaultEstimator, TokenEstimator};
pub use memory::{MemoryConfig, ShortTermMemory};
pub use state::{MemoryContext, MemoryHealth, MemoryState, MemoryStrategy};
pub use summarizer::{ConcatSummarizer, SummarizeError, Summarizer};
pub use truncation::cap_to_tokens;
