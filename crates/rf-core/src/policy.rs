//! Node policy: the retry/timeout/backoff/validation knobs attached to a
//! node at graph-assembly time.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidateMode {
    None,
    In,
    Out,
    Both,
}

impl ValidateMode {
    pub fn validates_input(self) -> bool {
        matches!(self, ValidateMode::In | ValidateMode::Both)
    }

    pub fn validates_output(self) -> bool {
        matches!(self, ValidateMode::Out | ValidateMode::Both)
    }
}

/// Per-node execution policy. `timeout_s` is advisory — the executor always
/// enforces `min(timeout_s, remaining deadline)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NodePolicy {
    pub validate: ValidateMode,
    pub timeout_s: Option<f64>,
    pub max_retries: u32,
    pub backoff_base: f64,
    pub backoff_mult: f64,
    pub max_backoff: f64,
    /// Explicit opt-in for this node to participate in a graph cycle
    /// (consulted during `FlowGraph` cycle validation).
    pub allow_cyclic: bool,
}

impl Default for NodePolicy {
    fn default() -> Self {
        Self {
            validate: ValidateMode::None,
            timeout_s: None,
            max_retries: 0,
            backoff_base: 0.1,
            backoff_mult: 2.0,
            max_backoff: 30.0,
            allow_cyclic: false,
        }
    }
}

impl NodePolicy {
    /// Backoff delay (seconds) before attempt `attempt` (0-indexed, the
    /// attempt about to be retried), capped by `max_backoff`.
    pub fn backoff_for_attempt(&self, attempt: u32) -> f64 {
        let raw = self.backoff_base * self.backoff_mult.powi(attempt as i32);
        raw.min(self.max_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let p = NodePolicy {
            backoff_base: 0.1,
            backoff_mult: 2.0,
            max_backoff: 0.3,
            ..Default::default()
        };
        assert!((p.backoff_for_attempt(0) - 0.1).abs() < 1e-9);
        assert!((p.backoff_for_attempt(1) - 0.2).abs() < 1e-9);
        // 0.1 * 2^2 = 0.4, capped to 0.3
        assert!((p.backoff_for_attempt(2) - 0.3).abs() < 1e-9);
    }

    #[test]
    fn validate_mode_flags() {
        assert!(ValidateMode::Both.validates_input());
        assert!(ValidateMode::Both.validates_output());
        assert!(ValidateMode::In.validates_input());
        assert!(!ValidateMode::In.validates_output());
        assert!(!ValidateMode::None.validates_input());
    }
}
