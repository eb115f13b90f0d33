//! Iteration/hop/deadline/token budgets, checked once per planner loop
//! iteration: once any ceiling is reached the run fails closed rather than
//! continuing past it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BudgetLimits {
    pub max_iters: u32,
    pub hop_budget: u64,
    pub deadline_s: Option<f64>,
    pub token_budget: u32,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self { max_iters: 25, hop_budget: 50, deadline_s: None, token_budget: 8000 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetKind {
    Iterations,
    Hops,
    Deadline,
    Tokens,
}

/// A snapshot of remaining budget, serialized into the pause state so resume
/// continues against the same ceilings rather than restarting them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BudgetsRemaining {
    pub iters_remaining: u32,
    pub hops_remaining: u64,
    pub tokens_remaining: u32,
    pub seconds_remaining: Option<f64>,
}

/// Tracks one run's consumption against [`BudgetLimits`]. `deadline_s` is
/// measured from `started_at`, not from the planner's construction, so a
/// resumed run's deadline reflects only the time it has actually run.
pub struct BudgetTracker {
    limits: BudgetLimits,
    started_at: DateTime<Utc>,
    iteration: u32,
}

impl BudgetTracker {
    pub fn new(limits: BudgetLimits, started_at: DateTime<Utc>) -> Self {
        Self { limits, started_at, iteration: 0 }
    }

    /// Resume a tracker whose `iteration` count survived a pause.
    pub fn resume(limits: BudgetLimits, started_at: DateTime<Utc>, iteration: u32) -> Self {
        Self { limits, started_at, iteration }
    }

    pub fn check(&self, hops_used: u64, tokens_used: u32, now: DateTime<Utc>) -> Result<(), BudgetKind> {
        if self.iteration >= self.limits.max_iters {
            return Err(BudgetKind::Iterations);
        }
        if hops_used >= self.limits.hop_budget {
            return Err(BudgetKind::Hops);
        }
        if let Some(deadline_s) = self.limits.deadline_s {
            if self.elapsed_secs(now) >= deadline_s {
                return Err(BudgetKind::Deadline);
            }
        }
        if tokens_used >= self.limits.token_budget {
            return Err(BudgetKind::Tokens);
        }
        Ok(())
    }

    pub fn advance_iteration(&mut self) {
        self.iteration += 1;
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn token_budget(&self) -> u32 {
        self.limits.token_budget
    }

    fn elapsed_secs(&self, now: DateTime<Utc>) -> f64 {
        (now - self.started_at).num_milliseconds().max(0) as f64 / 1000.0
    }

    pub fn remaining(&self, hops_used: u64, tokens_used: u32, now: DateTime<Utc>) -> BudgetsRemaining {
        BudgetsRemaining {
            iters_remaining: self.limits.max_iters.saturating_sub(self.iteration),
            hops_remaining: self.limits.hop_budget.saturating_sub(hops_used),
            tokens_remaining: self.limits.token_budget.saturating_sub(tokens_used),
            seconds_remaining: self.limits.deadline_s.map(|d| (d - self.elapsed_secs(now)).max(0.0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_iterations_reported_first() {
        let limits = BudgetLimits { max_iters: 1, ..Default::default() };
        let mut tracker = BudgetTracker::new(limits, Utc::now());
        tracker.advance_iteration();
        assert_eq!(tracker.check(0, 0, Utc::now()), Err(BudgetKind::Iterations));
    }

    #[test]
    fn hop_budget_exhaustion_is_detected() {
        let limits = BudgetLimits { hop_budget: 3, ..Default::default() };
        let tracker = BudgetTracker::new(limits, Utc::now());
        assert_eq!(tracker.check(3, 0, Utc::now()), Err(BudgetKind::Hops));
        assert!(tracker.check(2, 0, Utc::now()).is_ok());
    }

    #[test]
    fn deadline_exhaustion_uses_elapsed_time() {
        let limits = BudgetLimits { deadline_s: Some(1.0), ..Default::default() };
        let started = Utc::now() - chrono::Duration::seconds(2);
        let tracker = BudgetTracker::new(limits, started);
        assert_eq!(tracker.check(0, 0, Utc::now()), Err(BudgetKind::Deadline));
    }

    #[test]
    fn resumed_tracker_preserves_iteration_count() {
        let limits = BudgetLimits { max_iters: 5, ..Default::default() };
        let tracker = BudgetTracker::resume(limits, Utc::now(), 4);
        assert_eq!(tracker.iteration(), 4);
        assert!(tracker.check(0, 0, Utc::now()).is_ok());
    }
}
