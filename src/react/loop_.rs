//! 智能体主循环
//!
//! 中间件管线 -> ModelTurn -> ToolDispatch（按请求顺序逐个执行）-> 下一轮；
//! 终止条件：最终回答（Success）、计时器 Expired（BudgetExpired）、迭代上限（MaxIterationsExceeded）、
//! 模型能力失败（返回 Err(ModelInvocation)）。
//! 面向智能体的错误一律以工具结果文本回写，不会抛出循环。

use tokio::sync::mpsc::UnboundedSender;

use crate::core::{AgentError, LoopPhase, LoopState, RecoveryAction, RecoveryEngine, Termination};
use crate::memory::{Budget, ConversationTurn, Message, ToolCall};
use crate::middleware::{MiddlewarePipeline, StageEffect};
use crate::react::events::{preview, send_event, AgentEvent, ToolCallEvent};
use crate::react::Planner;
use crate::tools::{ToolContext, ToolExecutor, ToolKind};

/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;
/// 思考内容展示最大字符数
const THINKING_PREVIEW_CHARS: usize = 800;
/// 到期后未执行的工具调用的结果文本
pub const SKIPPED_RESULT: &str = "Error: skipped: time budget expired";
/// 纠正提示消息的 name
pub const RECOVERY_MESSAGE_NAME: &str = "recovery";

/// 一次循环调用的结果
#[derive(Debug)]
pub struct LoopResult {
    pub outcome: Termination,
    /// 最终回答，或到期/到上限时最后一条 assistant 文本（尽力输出）
    pub output: String,
    pub turn: ConversationTurn,
    pub tool_calls: Vec<ToolCallEvent>,
    pub iterations: usize,
    pub model_turns: u32,
    pub compactions: u32,
    pub nudges_sent: u32,
    pub tokens_estimate: usize,
}

/// 循环会话配置
pub struct AgentSession<'a> {
    pub planner: &'a Planner,
    pub executor: &'a ToolExecutor,
    pub pipeline: &'a MiddlewarePipeline,
    pub ctx: &'a ToolContext,
    pub max_iterations: usize,
    /// 可选：事件推送通道
    pub event_tx: Option<UnboundedSender<AgentEvent>>,
}

impl<'a> AgentSession<'a> {
    pub fn new(
        planner: &'a Planner,
        executor: &'a ToolExecutor,
        pipeline: &'a MiddlewarePipeline,
        ctx: &'a ToolContext,
    ) -> Self {
        Self {
            planner,
            executor,
            pipeline,
            ctx,
            max_iterations: 40,
            event_tx: None,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_event_tx(mut self, tx: Option<UnboundedSender<AgentEvent>>) -> Self {
        self.event_tx = tx;
        self
    }

    fn agent(&self) -> &str {
        &self.ctx.agent_id
    }
}

fn finish(
    session: &AgentSession<'_>,
    state: &mut LoopState,
    outcome: Termination,
    output: String,
    turn: ConversationTurn,
    tool_calls: Vec<ToolCallEvent>,
    budget: &Budget,
) -> LoopResult {
    state.enter(LoopPhase::Terminated(outcome));
    tracing::info!(
        agent = %session.agent(),
        outcome = ?outcome,
        iterations = state.iteration,
        model_turns = budget.model_turns,
        tokens = budget.tokens_consumed_estimate,
        elapsed_ms = (budget.elapsed_seconds * 1000.0) as u64,
        "agent loop terminated"
    );
    send_event(
        &session.event_tx,
        AgentEvent::Terminated {
            agent: session.agent().to_string(),
            outcome,
            iterations: state.iteration,
        },
    );
    LoopResult {
        outcome,
        output,
        turn,
        tool_calls,
        iterations: state.iteration,
        model_turns: budget.model_turns,
        compactions: budget.compactions,
        nudges_sent: budget.nudges_sent,
        tokens_estimate: budget.tokens_consumed_estimate,
    }
}

fn emit_effects(session: &AgentSession<'_>, state: &mut LoopState, effects: Vec<StageEffect>) {
    for effect in effects {
        if matches!(effect, StageEffect::Compacted { .. } | StageEffect::Truncated { .. }) {
            state.enter(LoopPhase::Compacting);
        }
        send_event(&session.event_tx, AgentEvent::from_effect(session.agent(), effect));
    }
}

fn best_effort_output(turn: &ConversationTurn) -> String {
    turn.last_assistant_text().unwrap_or_default().to_string()
}

/// 运行主循环直到终止
pub async fn run_agent_loop(
    session: &AgentSession<'_>,
    mut turn: ConversationTurn,
    budget: &mut Budget,
) -> Result<LoopResult, AgentError> {
    let recovery = RecoveryEngine::new();
    let mut state = LoopState::new(session.agent());
    let mut tool_log: Vec<ToolCallEvent> = Vec::new();

    loop {
        if state.iteration >= session.max_iterations {
            tracing::warn!(agent = %session.agent(), max = session.max_iterations, "iteration cap reached");
            let output = best_effort_output(&turn);
            return Ok(finish(
                session,
                &mut state,
                Termination::MaxIterationsExceeded,
                output,
                turn,
                tool_log,
                budget,
            ));
        }
        state.iteration += 1;
        send_event(
            &session.event_tx,
            AgentEvent::StepUpdate {
                agent: session.agent().to_string(),
                iteration: state.iteration,
                max_iterations: session.max_iterations,
            },
        );

        let effects = session.pipeline.run(&mut turn, budget).await;
        emit_effects(session, &mut state, effects);
        if budget.is_expired() {
            let output = best_effort_output(&turn);
            return Ok(finish(
                session,
                &mut state,
                Termination::BudgetExpired,
                output,
                turn,
                tool_log,
                budget,
            ));
        }

        state.enter(LoopPhase::ModelTurn);
        send_event(
            &session.event_tx,
            AgentEvent::Thinking {
                agent: session.agent().to_string(),
            },
        );
        let reply = match session.planner.next(&turn).await {
            Ok(reply) => reply,
            Err(llm_err) => {
                let err = AgentError::from(llm_err);
                match recovery.handle(&err) {
                    RecoveryAction::RetryWithPrompt(prompt) => {
                        tracing::warn!(agent = %session.agent(), error = %err, "malformed model output, retrying with prompt");
                        send_event(
                            &session.event_tx,
                            AgentEvent::Recovery {
                                agent: session.agent().to_string(),
                                action: "retry_with_prompt".to_string(),
                                detail: preview(&err.to_string(), OBSERVATION_PREVIEW_CHARS),
                            },
                        );
                        budget.record_model_turn();
                        turn.push(Message::user(prompt).with_name(RECOVERY_MESSAGE_NAME));
                        continue;
                    }
                    _ => {
                        tracing::warn!(agent = %session.agent(), error = %err, "model invocation failed");
                        send_event(&session.event_tx, AgentEvent::Error { text: err.to_string() });
                        state.enter(LoopPhase::Terminated(Termination::Error));
                        return Err(err);
                    }
                }
            }
        };
        budget.record_model_turn();

        let (prompt_tokens, completion_tokens, total_tokens) = session.planner.token_usage();
        if total_tokens > 0 {
            send_event(
                &session.event_tx,
                AgentEvent::TokenUsage {
                    prompt_tokens,
                    completion_tokens,
                    total_tokens,
                },
            );
        }

        if reply.is_final() {
            turn.push(Message::assistant(reply.content.clone()));
            return Ok(finish(
                session,
                &mut state,
                Termination::Success,
                reply.content,
                turn,
                tool_log,
                budget,
            ));
        }

        if !reply.content.trim().is_empty() {
            send_event(
                &session.event_tx,
                AgentEvent::ThinkingContent {
                    agent: session.agent().to_string(),
                    text: preview(&reply.content, THINKING_PREVIEW_CHARS),
                },
            );
        }
        turn.push(Message::assistant_with_calls(
            reply.content.clone(),
            reply.tool_calls.clone(),
        ));

        state.enter(LoopPhase::ToolDispatch);
        // 派发期间的计时提醒排在本轮全部结果之后，保持调用与结果相邻
        let mut deferred = ConversationTurn::new();
        for call in &reply.tool_calls {
            let effects = session.pipeline.dispatch_checkpoint(&mut deferred, budget);
            emit_effects(session, &mut state, effects);
            if budget.is_expired() {
                turn.push(Message::tool_result(&call.id, SKIPPED_RESULT));
                tool_log.push(skipped_event(session, call));
                continue;
            }
            let event = dispatch_one(session, &mut state, &mut turn, call).await;
            tool_log.push(event);
        }
        state.active_tool = None;
        for msg in deferred.into_messages() {
            turn.push(msg);
        }

        if budget.is_expired() {
            let output = best_effort_output(&turn);
            return Ok(finish(
                session,
                &mut state,
                Termination::BudgetExpired,
                output,
                turn,
                tool_log,
                budget,
            ));
        }
        state.enter(LoopPhase::Running);
    }
}

fn skipped_event(session: &AgentSession<'_>, call: &ToolCall) -> ToolCallEvent {
    tracing::info!(agent = %session.agent(), tool = %call.name, "tool call skipped, budget expired");
    ToolCallEvent {
        agent: session.agent().to_string(),
        call_id: call.id.clone(),
        tool: call.name.clone(),
        kind: session.executor.kind_of(&call.name),
        args: call.args.clone(),
        ok: false,
        skipped: true,
        result_preview: SKIPPED_RESULT.to_string(),
    }
}

async fn dispatch_one(
    session: &AgentSession<'_>,
    state: &mut LoopState,
    turn: &mut ConversationTurn,
    call: &ToolCall,
) -> ToolCallEvent {
    let kind = session.executor.kind_of(&call.name);
    if kind == Some(ToolKind::Delegate) {
        state.enter(LoopPhase::Delegating);
    } else {
        state.enter(LoopPhase::ToolDispatch);
    }
    state.active_tool = Some(call.name.clone());
    send_event(
        &session.event_tx,
        AgentEvent::ToolCall {
            agent: session.agent().to_string(),
            id: call.id.clone(),
            tool: call.name.clone(),
            args: call.args.clone(),
        },
    );

    let outcome = session.executor.execute_to_text(call, session.ctx).await;
    let result_preview = preview(&outcome.content, OBSERVATION_PREVIEW_CHARS);
    send_event(
        &session.event_tx,
        AgentEvent::Observation {
            agent: session.agent().to_string(),
            tool: call.name.clone(),
            ok: outcome.ok,
            preview: result_preview.clone(),
        },
    );
    turn.push(Message::tool_result(&call.id, outcome.content));

    ToolCallEvent {
        agent: session.agent().to_string(),
        call_id: call.id.clone(),
        tool: call.name.clone(),
        kind,
        args: call.args.clone(),
        ok: outcome.ok,
        skipped: false,
        result_preview,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{ArtifactStore, InMemoryPersistence, Tier};
    use crate::llm::{LlmClient, LlmError, ScriptedLlmClient};
    use crate::memory::{CharHeuristicEstimator, Role};
    use crate::middleware::{ContextBudgetGovernor, ElapsedTimeGovernor, ToolCallRepair};
    use crate::tools::{register_artifact_tools, ToolRegistry};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixture {
        llm: Arc<ScriptedLlmClient>,
        planner: Planner,
        executor: ToolExecutor,
        pipeline: MiddlewarePipeline,
        ctx: ToolContext,
    }

    fn fixture() -> Fixture {
        let llm = Arc::new(ScriptedLlmClient::new());
        let mut registry = ToolRegistry::new();
        register_artifact_tools(&mut registry);
        let planner = Planner::new(llm.clone() as Arc<dyn LlmClient>, "system", registry.specs());
        let executor = ToolExecutor::new(registry, 30);
        let pipeline = MiddlewarePipeline::standard(
            ToolCallRepair,
            ContextBudgetGovernor::new(
                llm.clone(),
                Arc::new(CharHeuristicEstimator::default()),
                0.8,
                6,
            ),
            ElapsedTimeGovernor::new(0.6, 0.85),
        );
        let store = Arc::new(ArtifactStore::new("t", Arc::new(InMemoryPersistence::new())));
        Fixture {
            llm,
            planner,
            executor,
            pipeline,
            ctx: ToolContext::new("lead", 0, store),
        }
    }

    fn seed() -> ConversationTurn {
        ConversationTurn::from_messages(vec![Message::user("Research tokio")])
    }

    #[tokio::test]
    async fn test_tool_then_final_answer() {
        let f = fixture();
        f.llm.push_calls(vec![ToolCall::new(
            "c1",
            "write_file",
            json!({"path": "notes.md", "content": "draft"}),
        )]);
        f.llm.push_text("All done.");
        let session = AgentSession::new(&f.planner, &f.executor, &f.pipeline, &f.ctx);
        let mut budget = Budget::new(100_000, Duration::from_secs(600));
        let result = run_agent_loop(&session, seed(), &mut budget).await.unwrap();

        assert_eq!(result.outcome, Termination::Success);
        assert_eq!(result.output, "All done.");
        assert_eq!(result.tool_calls.len(), 1);
        assert!(result.tool_calls[0].ok);
        assert_eq!(result.model_turns, 2);
        assert_eq!(f.ctx.artifacts.read(Tier::Ephemeral, "notes.md").await.unwrap(), "draft");
        let roles: Vec<Role> = result.turn.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
    }

    #[tokio::test]
    async fn test_stops_at_iteration_cap() {
        let f = fixture();
        for i in 0..10 {
            f.llm.push_calls(vec![ToolCall::new(format!("c{i}"), "ls", json!({}))]);
        }
        let session = AgentSession::new(&f.planner, &f.executor, &f.pipeline, &f.ctx).with_max_iterations(3);
        let mut budget = Budget::new(1_000_000, Duration::from_secs(600));
        let result = run_agent_loop(&session, seed(), &mut budget).await.unwrap();
        assert_eq!(result.outcome, Termination::MaxIterationsExceeded);
        assert_eq!(result.iterations, 3);
        assert_eq!(f.llm.calls(), 3);
    }

    #[tokio::test]
    async fn test_agent_facing_errors_do_not_end_loop() {
        let f = fixture();
        f.llm.push_calls(vec![
            ToolCall::new("c1", "read_file", json!({"path": "missing.md"})),
            ToolCall::new("c2", "no_such_tool", json!({})),
        ]);
        f.llm.push_text("Recovered.");
        let session = AgentSession::new(&f.planner, &f.executor, &f.pipeline, &f.ctx);
        let mut budget = Budget::new(100_000, Duration::from_secs(600));
        let result = run_agent_loop(&session, seed(), &mut budget).await.unwrap();
        assert_eq!(result.outcome, Termination::Success);
        let results: Vec<&Message> = result
            .turn
            .messages()
            .iter()
            .filter(|m| m.role == Role::Tool)
            .collect();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].tool_call_id.as_deref(), Some("c1"));
        assert!(results[0].content.starts_with("Error:"));
        assert!(results[1].content.contains("Unknown tool"));
    }

    #[tokio::test]
    async fn test_malformed_output_retries_with_prompt() {
        let f = fixture();
        f.llm.push_error(LlmError::MalformedOutput("{bad".into()));
        f.llm.push_text("Fine.");
        let session = AgentSession::new(&f.planner, &f.executor, &f.pipeline, &f.ctx);
        let mut budget = Budget::new(100_000, Duration::from_secs(600));
        let result = run_agent_loop(&session, seed(), &mut budget).await.unwrap();
        assert_eq!(result.outcome, Termination::Success);
        assert_eq!(result.iterations, 2);
        assert!(result
            .turn
            .messages()
            .iter()
            .any(|m| m.name.as_deref() == Some(RECOVERY_MESSAGE_NAME)));
    }

    #[tokio::test]
    async fn test_model_failure_is_hard_error() {
        let f = fixture();
        f.llm.push_error(LlmError::Network("connection refused".into()));
        let session = AgentSession::new(&f.planner, &f.executor, &f.pipeline, &f.ctx);
        let mut budget = Budget::new(100_000, Duration::from_secs(600));
        let err = run_agent_loop(&session, seed(), &mut budget).await.unwrap_err();
        assert!(matches!(err, AgentError::ModelInvocation(_)));
    }

    #[tokio::test]
    async fn test_zero_time_budget_expires_before_model_call() {
        let f = fixture();
        f.llm.push_text("never used");
        let session = AgentSession::new(&f.planner, &f.executor, &f.pipeline, &f.ctx);
        let mut budget = Budget::new(100_000, Duration::ZERO);
        let result = run_agent_loop(&session, seed(), &mut budget).await.unwrap();
        assert_eq!(result.outcome, Termination::BudgetExpired);
        assert_eq!(f.llm.calls(), 0);
        assert_eq!(result.output, "");
    }

    #[tokio::test]
    async fn test_events_published() {
        let f = fixture();
        f.llm.push_text("Done.");
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let session =
            AgentSession::new(&f.planner, &f.executor, &f.pipeline, &f.ctx).with_event_tx(Some(tx));
        let mut budget = Budget::new(100_000, Duration::from_secs(600));
        run_agent_loop(&session, seed(), &mut budget).await.unwrap();
        drop(session);
        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(serde_json::to_value(&ev).unwrap()["type"].as_str().unwrap().to_string());
        }
        assert_eq!(kinds, vec!["step_update", "thinking", "terminated"]);
    }
}
