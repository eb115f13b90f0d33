//! Shared data model for the reactorflow orchestration runtime: the typed
//! message envelope, node policy, trajectory/action types, and session/task
//! types that every other crate in the workspace builds on.

pub mod envelope;
pub mod error;
pub mod policy;
pub mod session;
pub mod trace;
pub mod trajectory;

pub use envelope::{ErrorCode, FlowError, Headers, MessageEnvelope, Meta, Payload, StreamPhase, StreamingChunk};
pub use error::{Error, Result};
pub use policy::{NodePolicy, ValidateMode};
pub use session::{
    ContextPatch, MemoryKey, MergeStrategy, PartialMemoryKey, SessionContext, SteeringEvent,
    TaskState, TaskStatus, TaskType,
};
pub use trace::TraceEvent;
pub use trajectory::{Action, ConversationTurn, Outcome, ToolCall, Trajectory, TrajectoryDigest, TrajectoryStep};
