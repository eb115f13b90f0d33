//! The ReAct planner loop: a bounded, single-threaded cooperative
//! controller that queries an LLM for the next action, dispatches tool
//! calls, and enforces hop/deadline/token budgets.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rf_core::envelope::{ErrorCode, FlowError};
use rf_core::session::{MemoryKey, SteeringEvent};
use rf_core::trajectory::{Action, Outcome, ToolCall, Trajectory};
use rf_flow::{Catalog, CatalogFilter};
use rf_llm::{CompletionRequest, LlmError, LlmHandle, OutputMode, PromptMessage};
use rf_memory::{DefaultEstimator, ShortTermMemory, TokenEstimator};
use rf_session::{route_steering_event, PendingApprovals, SteeringInbox};
use rf_store::StateStore;

use crate::budget::{BudgetLimits, BudgetTracker};
use crate::pause::{fingerprint, PlannerPauseState};
use crate::prompt::{build_messages, compress_trajectory};
use crate::reflection::{critique, ReflectionConfig};
use crate::tool_invoker::ToolInvoker;
use crate::tool_visibility::ToolVisibilityPolicy;

/// The terminal outcome of one `run`/`resume` call.
#[derive(Debug)]
pub enum RunOutcome {
    Finish { answer: String, artifacts: Vec<String>, trajectory: Trajectory },
    Clarify { question: String, trajectory: Trajectory },
    Paused,
    Failed(FlowError),
}

pub struct PlannerConfig {
    pub system_prompt: String,
    pub repair_attempts: u32,
    pub reflection: ReflectionConfig,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self { system_prompt: String::new(), repair_attempts: 2, reflection: ReflectionConfig::default() }
    }
}

pub struct ReactPlanner {
    config: PlannerConfig,
    llm: Arc<dyn LlmHandle>,
    summarizer_llm: Option<Arc<dyn LlmHandle>>,
    critic_llm: Option<Arc<dyn LlmHandle>>,
    catalog: Arc<Catalog>,
    invoker: Arc<dyn ToolInvoker>,
    memory: Option<Arc<ShortTermMemory>>,
    store: Option<Arc<dyn StateStore>>,
    estimator: Arc<dyn TokenEstimator>,
}

impl ReactPlanner {
    pub fn new(config: PlannerConfig, llm: Arc<dyn LlmHandle>, catalog: Arc<Catalog>, invoker: Arc<dyn ToolInvoker>) -> Self {
        Self {
            config,
            llm,
            summarizer_llm: None,
            critic_llm: None,
            catalog,
            invoker,
            memory: None,
            store: None,
            estimator: Arc::new(DefaultEstimator),
        }
    }

    pub fn with_summarizer_llm(mut self, llm: Arc<dyn LlmHandle>) -> Self {
        self.summarizer_llm = Some(llm);
        self
    }

    pub fn with_critic_llm(mut self, llm: Arc<dyn LlmHandle>) -> Self {
        self.critic_llm = Some(llm);
        self
    }

    pub fn with_memory(mut self, memory: Arc<ShortTermMemory>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Start a fresh run, looping budget check, steering drain, prompt
    /// build, LLM call, and action dispatch until a terminal outcome.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        session_id: &str,
        trace_id: &str,
        goal: String,
        limits: BudgetLimits,
        memory_key: Option<MemoryKey>,
        tool_visibility: Option<ToolVisibilityPolicy>,
        steering: Arc<SteeringInbox>,
        approvals: Arc<PendingApprovals>,
    ) -> RunOutcome {
        let tracker = BudgetTracker::new(limits, Utc::now());
        self.run_loop(session_id, trace_id, goal, Trajectory::new(), tracker, memory_key, tool_visibility, steering, approvals).await
    }

    /// Resume a previously-paused run, hydrating from the state store under
    /// `(session_id, trace_id)` and replaying persisted steering events in
    /// order before the next LLM call.
    #[allow(clippy::too_many_arguments)]
    pub async fn resume(
        &self,
        session_id: &str,
        trace_id: &str,
        limits: BudgetLimits,
        memory_key: Option<MemoryKey>,
        tool_visibility: Option<ToolVisibilityPolicy>,
        steering: Arc<SteeringInbox>,
        approvals: Arc<PendingApprovals>,
    ) -> RunOutcome {
        let store = match &self.store {
            Some(s) => s.clone(),
            None => return RunOutcome::Failed(FlowError::new(ErrorCode::PermanentTool, trace_id, "no state store configured to resume from")),
        };

        let loaded = match store.load_pause(session_id, trace_id).await {
            Ok(Some(v)) => v,
            Ok(None) => return RunOutcome::Failed(FlowError::new(ErrorCode::PermanentTool, trace_id, "no paused state found")),
            Err(e) => return RunOutcome::Failed(FlowError::new(ErrorCode::PermanentTool, trace_id, e.to_string())),
        };
        let pause_state: PlannerPauseState = match serde_json::from_value(loaded) {
            Ok(s) => s,
            Err(e) => return RunOutcome::Failed(FlowError::new(ErrorCode::PermanentTool, trace_id, format!("corrupt pause state: {e}"))),
        };

        if let Ok(events) = store.replay_events(trace_id).await {
            for event in events {
                if let Ok(steering_event) = serde_json::from_value::<SteeringEvent>(event) {
                    steering.push(steering_event);
                }
            }
        }

        let resumed_iteration = limits.max_iters.saturating_sub(pause_state.budgets_remaining.iters_remaining);
        let tracker = BudgetTracker::resume(limits, Utc::now(), resumed_iteration);

        self.run_loop(session_id, trace_id, pause_state.query, pause_state.trajectory, tracker, memory_key, tool_visibility, steering, approvals)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_loop(
        &self,
        session_id: &str,
        trace_id: &str,
        mut goal: String,
        mut trajectory: Trajectory,
        mut tracker: BudgetTracker,
        memory_key: Option<MemoryKey>,
        tool_visibility: Option<ToolVisibilityPolicy>,
        steering: Arc<SteeringInbox>,
        approvals: Arc<PendingApprovals>,
    ) -> RunOutcome {
        let filter = tool_visibility.as_ref().map(|v| v.filter.clone()).unwrap_or_default();
        let mut last_prompt_fingerprint = String::new();

        loop {
            // 1. Check budgets.
            let hops_used = trajectory.hop_count();
            let tokens_used = self.estimator.estimate(&crate::prompt::render_trajectory(trajectory.steps())) as u32;
            let now = Utc::now();
            if let Err(kind) = tracker.check(hops_used, tokens_used, now) {
                rf_core::trace::TraceEvent::PlannerBudgetExhausted { trace_id: trace_id.to_owned(), iteration: tracker.iteration() }.emit();
                return RunOutcome::Failed(FlowError::new(ErrorCode::BudgetExhausted, trace_id, format!("{kind:?} budget exhausted")));
            }

            // 2. Drain steering inbox.
            for event in steering.drain() {
                match event {
                    SteeringEvent::Cancel => {
                        return RunOutcome::Failed(FlowError::new(ErrorCode::Cancelled, trace_id, "cancelled via steering"));
                    }
                    SteeringEvent::Pause => {
                        if let Some(store) = &self.store {
                            let state = PlannerPauseState {
                                query: goal.clone(),
                                trajectory: trajectory.clone(),
                                memory_state: None,
                                budgets_remaining: tracker.remaining(hops_used, tokens_used, now),
                                last_prompt_fingerprint: last_prompt_fingerprint.clone(),
                            };
                            if let Ok(value) = serde_json::to_value(&state) {
                                let _ = store.save_pause(session_id, trace_id, value).await;
                            }
                        }
                        return RunOutcome::Paused;
                    }
                    SteeringEvent::InjectContext { text } | SteeringEvent::UserMessage { text } => {
                        trajectory.push(
                            None,
                            Action::Call { tool_name: "steering:context".into(), args: serde_json::json!({"text": text}) },
                            Some(Outcome::Observation(serde_json::json!({"injected": true}))),
                            0,
                            vec![],
                            None,
                        );
                    }
                    SteeringEvent::Redirect { goal: new_goal } => {
                        goal = new_goal;
                    }
                    SteeringEvent::Approve { .. } | SteeringEvent::Reject { .. } => {
                        route_steering_event(&approvals, &event);
                    }
                    SteeringEvent::Prioritize { .. } | SteeringEvent::Resume => {}
                }
            }

            // 3. Build messages.
            let memory_block = match (&self.memory, &memory_key) {
                (Some(memory), Some(key)) => {
                    let ctx = memory.get_context(key).await;
                    ctx.summary
                }
                _ => None,
            };
            let catalog_prompt = self.catalog.render_prompt(&filter);
            let compiled =
                compress_trajectory(&trajectory, tracker.token_budget(), self.estimator.as_ref(), self.summarizer_llm.as_deref()).await;
            let messages = build_messages(&self.config.system_prompt, &catalog_prompt, memory_block.as_deref(), &goal, &compiled);
            last_prompt_fingerprint =
                fingerprint(&serde_json::to_string(&messages.iter().map(|m| &m.content).collect::<Vec<_>>()).unwrap_or_default());

            // 4. Call the LLM, repairing malformed JSON up to `repair_attempts` times.
            let action = match self.request_action(messages).await {
                Ok(action) => action,
                Err(_) => return RunOutcome::Failed(FlowError::new(ErrorCode::LlmParse, trace_id, "LLM did not return a valid structured action")),
            };

            // 5. Dispatch.
            let step_start = Instant::now();
            match action {
                Action::Finish { answer, artifacts } => {
                    let final_answer = self.reflect_if_enabled(&goal, answer, &mut trajectory).await;
                    trajectory.push(
                        None,
                        Action::Finish { answer: final_answer.clone(), artifacts: artifacts.clone() },
                        Some(Outcome::Observation(serde_json::json!({"finished": true}))),
                        step_start.elapsed().as_millis() as u64,
                        artifacts.clone(),
                        None,
                    );
                    return RunOutcome::Finish { answer: final_answer, artifacts, trajectory };
                }
                Action::Clarify { question } => {
                    trajectory.push(
                        None,
                        Action::Clarify { question: question.clone() },
                        None,
                        step_start.elapsed().as_millis() as u64,
                        vec![],
                        None,
                    );
                    return RunOutcome::Clarify { question, trajectory };
                }
                Action::Call { tool_name, args } => {
                    match self.dispatch_call(&tool_name, args.clone(), &filter, steering.as_ref()).await {
                        Ok(outcome) => {
                            trajectory.push(
                                None,
                                Action::Call { tool_name: tool_name.clone(), args },
                                Some(outcome),
                                step_start.elapsed().as_millis() as u64,
                                vec![],
                                Some(tool_name),
                            );
                        }
                        Err(()) => {
                            return RunOutcome::Failed(FlowError::new(ErrorCode::Cancelled, trace_id, "cancelled during tool dispatch"));
                        }
                    }
                }
                Action::Parallel { calls, join_tool } => {
                    match self.dispatch_parallel(calls.clone(), join_tool, &filter, trace_id, steering.as_ref()).await {
                        Ok(outcome) => {
                            trajectory.push(
                                None,
                                Action::Parallel { calls, join_tool: None },
                                Some(outcome),
                                step_start.elapsed().as_millis() as u64,
                                vec![],
                                None,
                            );
                        }
                        Err(()) => {
                            return RunOutcome::Failed(FlowError::new(ErrorCode::Cancelled, trace_id, "cancelled during parallel dispatch"));
                        }
                    }
                }
            }

            tracker.advance_iteration();
            rf_core::trace::TraceEvent::PlannerIteration { trace_id: trace_id.to_owned(), iteration: tracker.iteration(), hops_used: trajectory.hop_count() }
                .emit();
        }
    }

    async fn reflect_if_enabled(&self, goal: &str, answer: String, trajectory: &mut Trajectory) -> String {
        if !self.config.reflection.enabled {
            return answer;
        }
        let Some(critic) = &self.critic_llm else { return answer };

        let mut current = answer;
        for _ in 0..self.config.reflection.max_revisions {
            match critique(critic.as_ref(), goal, &current).await {
                Ok(verdict) if verdict.score >= self.config.reflection.quality_threshold => break,
                Ok(verdict) => {
                    trajectory.push(
                        None,
                        Action::Call { tool_name: "reflection:critique".into(), args: serde_json::json!({}) },
                        Some(Outcome::Observation(serde_json::json!({"score": verdict.score, "critique": verdict.critique}))),
                        0,
                        vec![],
                        None,
                    );
                    match self
                        .request_action(vec![PromptMessage::system(self.config.system_prompt.clone()), PromptMessage::user(format!(
                            "Revise this answer given the critique.\nAnswer: {current}\nCritique: {}",
                            verdict.critique
                        ))])
                        .await
                    {
                        Ok(Action::Finish { answer, .. }) => current = answer,
                        _ => break,
                    }
                }
                Err(_) => break,
            }
        }
        current
    }

    async fn request_action(&self, messages: Vec<PromptMessage>) -> Result<Action, LlmError> {
        let mut last_error = None;
        for attempt in 0..=self.config.repair_attempts {
            let mut req = CompletionRequest::new(messages.clone());
            if attempt > 0 {
                req.messages.push(PromptMessage::user(format!(
                    "Your previous response could not be parsed: {}. Respond again with valid JSON matching the action schema.",
                    last_error.as_ref().map(|e: &String| e.as_str()).unwrap_or("malformed output")
                )));
            }
            match self.llm.complete(req).await {
                Ok(resp) => match resp.structured_output {
                    Some(value) => match serde_json::from_value::<Action>(value) {
                        Ok(action) => return Ok(action),
                        Err(e) => last_error = Some(e.to_string()),
                    },
                    None => last_error = Some("empty structured output".to_string()),
                },
                Err(e) if e.is_retryable() => last_error = Some(e.to_string()),
                Err(e) => return Err(e),
            }
        }
        Err(LlmError::Parse(last_error.unwrap_or_else(|| "exhausted repair attempts".to_string())))
    }

    /// `Err(())` means the call was abandoned mid-flight because
    /// `steering` observed a cancel; the caller must not append a
    /// trajectory step and must fail the run instead.
    async fn dispatch_call(&self, tool_name: &str, args: serde_json::Value, filter: &CatalogFilter, steering: &SteeringInbox) -> Result<Outcome, ()> {
        match self.catalog.get(tool_name) {
            Some(entry) if filter.is_visible(entry) => {
                tokio::select! {
                    biased;
                    _ = steering.cancelled() => Err(()),
                    result = self.invoker.invoke(tool_name, args) => Ok(match result {
                        Ok(result) => Outcome::Observation(result),
                        Err(e) => Outcome::Error(e),
                    }),
                }
            }
            _ => Ok(Outcome::Error(FlowError::new(ErrorCode::RoutingInvalid, "", format!("tool '{tool_name}' is not visible or does not exist")))),
        }
    }

    /// Spawn one concurrent call per entry, collect by completion order,
    /// then optionally invoke `join_tool` with `{results, failures, count}`.
    /// Races the fan-out and the `join_tool` call against `steering`; a
    /// cancel observed mid-flight aborts every in-flight call and returns
    /// `Err(())` without ever invoking `join_tool`.
    async fn dispatch_parallel(
        &self,
        calls: Vec<ToolCall>,
        join_tool: Option<String>,
        filter: &CatalogFilter,
        trace_id: &str,
        steering: &SteeringInbox,
    ) -> Result<Outcome, ()> {
        let mut set = tokio::task::JoinSet::new();
        for call in calls {
            let catalog = self.catalog.clone();
            let invoker = self.invoker.clone();
            let filter = filter.clone();
            set.spawn(async move {
                let outcome = match catalog.get(&call.tool_name) {
                    Some(entry) if filter.is_visible(entry) => invoker.invoke(&call.tool_name, call.args.clone()).await,
                    _ => Err(FlowError::new(ErrorCode::RoutingInvalid, "", format!("tool '{}' is not visible or does not exist", call.tool_name))),
                };
                (call.tool_name, outcome)
            });
        }

        let mut results = Vec::new();
        let mut failures = Vec::new();
        loop {
            tokio::select! {
                biased;
                _ = steering.cancelled() => {
                    set.abort_all();
                    return Err(());
                }
                joined = set.join_next() => {
                    match joined {
                        Some(Ok((tool_name, Ok(value)))) => results.push(serde_json::json!({"tool_name": tool_name, "result": value})),
                        Some(Ok((tool_name, Err(e)))) => {
                            failures.push(serde_json::json!({"tool_name": tool_name, "error": e.message, "code": format!("{:?}", e.code)}))
                        }
                        Some(Err(_)) => failures.push(serde_json::json!({"tool_name": "unknown", "error": "join failed"})),
                        None => break,
                    }
                }
            }
        }

        let count = results.len() + failures.len();
        if let Some(join_tool) = join_tool {
            let joined_args = serde_json::json!({"results": results, "failures": failures, "count": count});
            return match self.catalog.get(&join_tool) {
                Some(entry) if filter.is_visible(entry) => {
                    tokio::select! {
                        biased;
                        _ = steering.cancelled() => Err(()),
                        result = self.invoker.invoke(&join_tool, joined_args) => Ok(match result {
                            Ok(value) => Outcome::Observation(value),
                            Err(e) => Outcome::Error(e),
                        }),
                    }
                }
                _ => Ok(Outcome::Error(FlowError::new(ErrorCode::RoutingInvalid, trace_id, format!("join tool '{join_tool}' is not visible")))),
            };
        }

        Ok(Outcome::Observation(serde_json::json!({"results": results, "failures": failures, "count": count})))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use rf_flow::{CatalogEntry, SideEffect};
    use rf_llm::testing::{ScriptedLlm, ScriptedStep};
    use rf_store::InMemoryStateStore;

    struct EchoInvoker;

    #[async_trait::async_trait]
    impl ToolInvoker for EchoInvoker {
        async fn invoke(&self, tool_name: &str, args: serde_json::Value) -> Result<serde_json::Value, FlowError> {
            Ok(serde_json::json!({"tool_name": tool_name, "echo": args}))
        }
    }

    /// Invokes successfully after `delay_ms`, counting calls to `"merge"`
    /// separately so tests can assert a join never happened.
    struct SlowInvoker {
        delay_ms: u64,
        join_calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl ToolInvoker for SlowInvoker {
        async fn invoke(&self, tool_name: &str, args: serde_json::Value) -> Result<serde_json::Value, FlowError> {
            if tool_name == "merge" {
                self.join_calls.fetch_add(1, Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            Ok(serde_json::json!({"tool_name": tool_name, "args": args}))
        }
    }

    fn catalog_with(names: &[&str]) -> Arc<Catalog> {
        let mut cat = Catalog::new();
        for name in names {
            cat.register(CatalogEntry {
                name: name.to_string(),
                description: format!("{name} tool"),
                tags: vec![],
                side_effects: SideEffect::Pure,
                input_schema: None,
                output_schema: None,
                aliases: vec![],
            });
        }
        Arc::new(cat)
    }

    fn planner(llm: ScriptedLlm) -> ReactPlanner {
        ReactPlanner::new(PlannerConfig::default(), Arc::new(llm), catalog_with(&["search"]), Arc::new(EchoInvoker))
    }

    #[tokio::test]
    async fn finish_action_ends_the_run() {
        let llm = ScriptedLlm::new(vec![ScriptedStep::Respond(serde_json::json!({"type": "finish", "answer": "done"}))]);
        let outcome = planner(llm)
            .run(
                "s1",
                "t1",
                "goal".into(),
                BudgetLimits::default(),
                None,
                None,
                Arc::new(SteeringInbox::new("t1", 8)),
                Arc::new(PendingApprovals::new()),
            )
            .await;
        match outcome {
            RunOutcome::Finish { answer, .. } => assert_eq!(answer, "done"),
            other => panic!("expected Finish, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn call_action_dispatches_then_finishes() {
        let llm = ScriptedLlm::new(vec![
            ScriptedStep::Respond(serde_json::json!({"type": "call", "tool_name": "search", "args": {"q": "rust"}})),
            ScriptedStep::Respond(serde_json::json!({"type": "finish", "answer": "found it"})),
        ]);
        let outcome = planner(llm)
            .run(
                "s1",
                "t2",
                "goal".into(),
                BudgetLimits::default(),
                None,
                None,
                Arc::new(SteeringInbox::new("t2", 8)),
                Arc::new(PendingApprovals::new()),
            )
            .await;
        match outcome {
            RunOutcome::Finish { trajectory, .. } => {
                assert_eq!(trajectory.len(), 2);
                assert!(!trajectory.steps()[0].is_error());
            }
            other => panic!("expected Finish, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unvisited_tool_name_is_a_routing_error() {
        let llm = ScriptedLlm::new(vec![
            ScriptedStep::Respond(serde_json::json!({"type": "call", "tool_name": "nope", "args": {}})),
            ScriptedStep::Respond(serde_json::json!({"type": "finish", "answer": "gave up"})),
        ]);
        let outcome = planner(llm)
            .run(
                "s1",
                "t3",
                "goal".into(),
                BudgetLimits::default(),
                None,
                None,
                Arc::new(SteeringInbox::new("t3", 8)),
                Arc::new(PendingApprovals::new()),
            )
            .await;
        match outcome {
            RunOutcome::Finish { trajectory, .. } => assert!(trajectory.steps()[0].is_error()),
            other => panic!("expected Finish, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn exhausted_iteration_budget_fails_before_any_llm_call() {
        let llm = ScriptedLlm::new(vec![]);
        let limits = BudgetLimits { max_iters: 0, ..Default::default() };
        let outcome = planner(llm)
            .run(
                "s1",
                "t4",
                "goal".into(),
                limits,
                None,
                None,
                Arc::new(SteeringInbox::new("t4", 8)),
                Arc::new(PendingApprovals::new()),
            )
            .await;
        assert!(matches!(outcome, RunOutcome::Failed(e) if e.code == ErrorCode::BudgetExhausted));
    }

    #[tokio::test]
    async fn clarify_action_returns_a_question() {
        let llm = ScriptedLlm::new(vec![ScriptedStep::Respond(serde_json::json!({"type": "clarify", "question": "which repo?"}))]);
        let outcome = planner(llm)
            .run(
                "s1",
                "t5",
                "goal".into(),
                BudgetLimits::default(),
                None,
                None,
                Arc::new(SteeringInbox::new("t5", 8)),
                Arc::new(PendingApprovals::new()),
            )
            .await;
        match outcome {
            RunOutcome::Clarify { question, .. } => assert_eq!(question, "which repo?"),
            other => panic!("expected Clarify, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn pause_event_persists_state_and_resume_continues_to_finish() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let steering = Arc::new(SteeringInbox::new("t6", 8));
        steering.push(SteeringEvent::Pause);

        let llm = ScriptedLlm::new(vec![]);
        let plan = ReactPlanner::new(PlannerConfig::default(), Arc::new(llm), catalog_with(&["search"]), Arc::new(EchoInvoker))
            .with_store(store.clone());

        let outcome = plan
            .run("s1", "t6", "goal".into(), BudgetLimits::default(), None, None, steering, Arc::new(PendingApprovals::new()))
            .await;
        assert!(matches!(outcome, RunOutcome::Paused));

        let resumed_llm = ScriptedLlm::new(vec![ScriptedStep::Respond(serde_json::json!({"type": "finish", "answer": "resumed"}))]);
        let resumed_plan = ReactPlanner::new(PlannerConfig::default(), Arc::new(resumed_llm), catalog_with(&["search"]), Arc::new(EchoInvoker))
            .with_store(store);
        let resumed_outcome = resumed_plan
            .resume("s1", "t6", BudgetLimits::default(), None, None, Arc::new(SteeringInbox::new("t6", 8)), Arc::new(PendingApprovals::new()))
            .await;
        match resumed_outcome {
            RunOutcome::Finish { answer, .. } => assert_eq!(answer, "resumed"),
            other => panic!("expected Finish, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_during_tool_dispatch_short_circuits_without_waiting() {
        let llm = ScriptedLlm::new(vec![ScriptedStep::Respond(serde_json::json!({"type": "call", "tool_name": "search", "args": {}}))]);
        let invoker: Arc<SlowInvoker> = Arc::new(SlowInvoker { delay_ms: 500, join_calls: Arc::new(AtomicUsize::new(0)) });
        let plan = ReactPlanner::new(PlannerConfig::default(), Arc::new(llm), catalog_with(&["search"]), invoker);

        let steering = Arc::new(SteeringInbox::new("t-cancel", 8));
        let steering_clone = steering.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            steering_clone.push(SteeringEvent::Cancel);
        });

        let before = Instant::now();
        let outcome = plan
            .run("s1", "t-cancel", "goal".into(), BudgetLimits::default(), None, None, steering, Arc::new(PendingApprovals::new()))
            .await;
        assert!(before.elapsed() < Duration::from_millis(200), "dispatch must not wait out the slow tool call");
        assert!(matches!(outcome, RunOutcome::Failed(e) if e.code == ErrorCode::Cancelled));
    }

    #[tokio::test]
    async fn cancel_during_parallel_fanout_skips_join_tool() {
        let llm = ScriptedLlm::new(vec![ScriptedStep::Respond(serde_json::json!({
            "type": "parallel",
            "calls": [{"tool_name": "search_a", "args": {}}, {"tool_name": "search_b", "args": {}}],
            "join_tool": "merge"
        }))]);
        let join_calls = Arc::new(AtomicUsize::new(0));
        let invoker: Arc<SlowInvoker> = Arc::new(SlowInvoker { delay_ms: 500, join_calls: join_calls.clone() });
        let plan =
            ReactPlanner::new(PlannerConfig::default(), Arc::new(llm), catalog_with(&["search_a", "search_b", "merge"]), invoker);

        let steering = Arc::new(SteeringInbox::new("t-parallel-cancel", 8));
        let steering_clone = steering.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            steering_clone.push(SteeringEvent::Cancel);
        });

        let before = Instant::now();
        let outcome = plan
            .run("s1", "t-parallel-cancel", "goal".into(), BudgetLimits::default(), None, None, steering, Arc::new(PendingApprovals::new()))
            .await;
        assert!(before.elapsed() < Duration::from_millis(200), "fan-out must abort rather than wait for in-flight calls");
        assert!(matches!(outcome, RunOutcome::Failed(e) if e.code == ErrorCode::Cancelled));
        assert_eq!(join_calls.load(Ordering::SeqCst), 0, "join_tool must never be invoked once cancellation wins the race");
    }
}
