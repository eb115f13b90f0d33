//! The ReAct planner: queries an LLM for the next action against a bounded
//! iteration/hop/deadline/token budget, dispatches tool calls through a
//! flow runtime via the [`ToolInvoker`] seam, and supports pause/resume and
//! an optional critique-driven reflection pass before finishing.

pub mod budget;
pub mod pause;
pub mod planner;
pub mod prompt;
pub mod reflection;
pub mod tool_invoker;
pub mod tool_visibility;

pub use budget::{BudgetKind, BudgetLimits, BudgetTracker, BudgetsRemaining};
pub use pause::{fingerprint, PlannerPauseState};
pub use planner::{PlannerConfig, ReactPlanner, RunOutcome};
pub use prompt::{build_messages, compress_trajectory, render_trajectory, CompiledTrajectory};
pub use reflection::{critique, ReflectionConfig, ReflectionVerdict};
pub use tool_invoker::ToolInvoker;
pub use tool_visibility::ToolVisibilityPolicy;
