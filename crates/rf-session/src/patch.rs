//! Context patch application.
//!
//! `apply` runs under the session's [`SessionLock`](crate::session_lock) so
//! divergence checks and the subsequent mutation are atomic with respect to
//! other patches and foreground turns on the same session.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rf_core::session::{ContextPatch, MergeStrategy, SessionContext, SteeringEvent};
use rf_core::trace::TraceEvent;
use tokio::sync::oneshot;

use crate::broker::{UpdateBroker, UpdateType};

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("approval channel closed before a decision was made")]
    ApprovalChannelClosed,
    #[error("patch was rejected: {0:?}")]
    Rejected(Option<String>),
}

/// A patch awaiting `HUMAN_GATED` approval, parked until an `Approve`/
/// `Reject` steering event arrives for its `task_id`. Mirrors an
/// `ApprovalStore` oneshot-per-request pattern, scoped to context patches.
struct PendingApproval {
    patch: ContextPatch,
    respond: oneshot::Sender<Result<(), Option<String>>>,
}

#[derive(Default)]
pub struct PendingApprovals {
    entries: Mutex<std::collections::HashMap<String, PendingApproval>>,
}

impl PendingApprovals {
    pub fn new() -> Self {
        Self::default()
    }

    fn park(&self, patch: ContextPatch) -> oneshot::Receiver<Result<(), Option<String>>> {
        let (tx, rx) = oneshot::channel();
        self.entries.lock().insert(
            patch.task_id.clone(),
            PendingApproval { patch, respond: tx },
        );
        rx
    }

    /// Resolve a pending approval by its `task_id`, delivering the decision
    /// to whichever caller is waiting on `apply`.
    pub fn resolve(&self, task_id: &str, decision: Result<(), Option<String>>) -> bool {
        if let Some(entry) = self.entries.lock().remove(task_id) {
            let _ = entry.respond.send(decision);
            true
        } else {
            false
        }
    }

    pub fn pending_task_ids(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }
}

/// Apply `patch` to `context` per the merge strategy, mutating `context` in
/// place and returning the (possibly updated) divergence flag.
///
/// `HUMAN_GATED` patches do not mutate `context` here: they park in
/// `approvals`, publish a notification on `broker`, and await an
/// `Approve`/`Reject` steering event (delivered via [`PendingApprovals::resolve`]
/// from wherever the session manager routes incoming `SteeringEvent`s). On
/// approval the patch is re-applied as `Append` (the only sensible default
/// once a human has signed off on its contents).
pub async fn apply(
    session_id: &str,
    context: &mut SessionContext,
    mut patch: ContextPatch,
    approvals: &PendingApprovals,
    broker: &UpdateBroker,
) -> Result<bool, PatchError> {
    patch.stamp_divergence(&context.hash);
    let divergent = patch.divergent.unwrap_or(false);

    match patch.merge_strategy {
        MergeStrategy::Append => {
            merge_append(context, &patch);
            emit_applied(session_id, &patch, divergent);
            Ok(divergent)
        }
        MergeStrategy::Replace => {
            merge_replace(context, &patch);
            emit_applied(session_id, &patch, divergent);
            Ok(divergent)
        }
        MergeStrategy::HumanGated => {
            let task_id = patch.task_id.clone();
            let rx = approvals.park(patch.clone());
            broker.publish(
                task_id.clone(),
                UpdateType::StatusChange,
                serde_json::json!({"awaiting_approval": true}),
            );

            match rx.await {
                Ok(Ok(())) => {
                    merge_append(context, &patch);
                    emit_applied(session_id, &patch, divergent);
                    Ok(divergent)
                }
                Ok(Err(reason)) => Err(PatchError::Rejected(reason)),
                Err(_) => Err(PatchError::ApprovalChannelClosed),
            }
        }
    }
}

/// Route an inbound steering event to a parked `HUMAN_GATED` approval, if it
/// is an `Approve`/`Reject` naming a pending patch. Returns `true` if it was
/// consumed this way.
pub fn route_steering_event(approvals: &PendingApprovals, event: &SteeringEvent) -> bool {
    match event {
        SteeringEvent::Approve { patch_task_id } => approvals.resolve(patch_task_id, Ok(())),
        SteeringEvent::Reject { patch_task_id, reason } => approvals.resolve(patch_task_id, Err(reason.clone())),
        _ => false,
    }
}

fn merge_append(context: &mut SessionContext, patch: &ContextPatch) {
    let mut facts: BTreeMap<String, serde_json::Value> =
        serde_json::from_value(context.llm_context.clone()).unwrap_or_default();
    for (k, v) in &patch.facts {
        facts.entry(k.clone()).or_insert_with(|| v.clone());
    }
    context.llm_context = serde_json::to_value(facts).unwrap_or(serde_json::json!({}));
    context.bump();
}

fn merge_replace(context: &mut SessionContext, patch: &ContextPatch) {
    let mut facts: BTreeMap<String, serde_json::Value> =
        serde_json::from_value(context.llm_context.clone()).unwrap_or_default();
    for (k, v) in &patch.facts {
        facts.insert(k.clone(), v.clone());
    }
    context.llm_context = serde_json::to_value(facts).unwrap_or(serde_json::json!({}));
    context.bump();
}

fn emit_applied(session_id: &str, patch: &ContextPatch, divergent: bool) {
    TraceEvent::PatchApplied {
        task_id: patch.task_id.clone(),
        session_id: session_id.to_owned(),
        divergent,
        merge_strategy: format!("{:?}", patch.merge_strategy),
    }
    .emit();
}

pub type SharedApprovals = Arc<PendingApprovals>;

#[cfg(test)]
mod tests {
    use super::*;

    fn patch(task_id: &str, strategy: MergeStrategy, source_hash: &str) -> ContextPatch {
        let mut facts = BTreeMap::new();
        facts.insert("k".to_string(), serde_json::json!("v"));
        ContextPatch {
            task_id: task_id.to_string(),
            source_version: 0,
            source_hash: source_hash.to_string(),
            merge_strategy: strategy,
            facts,
            artifacts: Vec::new(),
            payload: serde_json::json!({}),
            divergent: None,
        }
    }

    #[tokio::test]
    async fn append_bumps_version_and_sets_divergent() {
        let mut ctx = SessionContext::new(serde_json::json!({}), serde_json::json!({}));
        let stale_hash = "not-the-real-hash".to_string();
        let approvals = PendingApprovals::new();
        let broker = UpdateBroker::new(4);
        let divergent = apply("s1", &mut ctx, patch("t1", MergeStrategy::Append, &stale_hash), &approvals, &broker)
            .await
            .unwrap();
        assert!(divergent);
        assert_eq!(ctx.version, 1);
    }

    #[tokio::test]
    async fn matching_hash_is_not_divergent() {
        let ctx = SessionContext::new(serde_json::json!({}), serde_json::json!({}));
        let hash = ctx.hash.clone();
        let mut ctx = ctx;
        let approvals = PendingApprovals::new();
        let broker = UpdateBroker::new(4);
        let divergent = apply("s1", &mut ctx, patch("t1", MergeStrategy::Append, &hash), &approvals, &broker)
            .await
            .unwrap();
        assert!(!divergent);
    }

    #[tokio::test]
    async fn human_gated_waits_then_applies_on_approval() {
        let ctx = SessionContext::new(serde_json::json!({}), serde_json::json!({}));
        let hash = ctx.hash.clone();
        let approvals = Arc::new(PendingApprovals::new());
        let broker = UpdateBroker::new(4);

        let approvals2 = approvals.clone();
        let applier = tokio::spawn(async move {
            let mut ctx = ctx;
            let result = apply("s1", &mut ctx, patch("t1", MergeStrategy::HumanGated, &hash), &approvals2, &broker).await;
            (ctx, result)
        });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(approvals.resolve("t1", Ok(())));
        let (applied_ctx, result) = applier.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(applied_ctx.version, 1);
    }

    #[tokio::test]
    async fn human_gated_rejection_leaves_context_untouched() {
        let ctx = SessionContext::new(serde_json::json!({}), serde_json::json!({}));
        let hash = ctx.hash.clone();
        let approvals = Arc::new(PendingApprovals::new());
        let broker = UpdateBroker::new(4);

        let approvals2 = approvals.clone();
        let applier = tokio::spawn(async move {
            let mut ctx = ctx;
            let result = apply("s1", &mut ctx, patch("t1", MergeStrategy::HumanGated, &hash), &approvals2, &broker).await;
            (ctx, result)
        });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(approvals.resolve("t1", Err(Some("no".into()))));
        let (ctx, result) = applier.await.unwrap();
        assert!(matches!(result, Err(PatchError::Rejected(_))));
        assert_eq!(ctx.version, 0);
    }
}
