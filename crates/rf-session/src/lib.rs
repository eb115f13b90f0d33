//! Session manager, task registry, update broker, and steering inbox.

pub mod broker;
pub mod groups;
pub mod manager;
pub mod patch;
pub mod registry;
pub mod session_lock;
pub mod steering;

pub use broker::{Subscription, Update, UpdateBroker, UpdateType};
pub use groups::{CancelPropagation, CompletionPolicy, GroupState, TaskGroups};
pub use manager::{BackgroundTasksConfig, ContextDepth, SessionManager, SpawnGuardError};
pub use patch::{apply as apply_patch, route_steering_event, PatchError, PendingApprovals, SharedApprovals};
pub use registry::{RegistryError, TaskRegistry};
pub use session_lock::{SessionLock, SessionLockMap};
pub use steering::SteeringInbox;
