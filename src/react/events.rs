//! 执行过程事件：用于日志、前端展示与调度汇总

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use crate::core::Termination;
use crate::memory::TimerPhase;
use crate::middleware::StageEffect;
use crate::react::subagent::Delegation;
use crate::tools::ToolKind;

/// 一次工具调用的记录（进入 ExecutionRecord 的 tool_call_log）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallEvent {
    pub agent: String,
    pub call_id: String,
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ToolKind>,
    pub args: Value,
    pub ok: bool,
    /// 因时间预算耗尽而未执行
    #[serde(default)]
    pub skipped: bool,
    pub result_preview: String,
}

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    StepUpdate {
        agent: String,
        iteration: usize,
        max_iterations: usize,
    },
    /// 正在调用 LLM
    Thinking { agent: String },
    ThinkingContent { agent: String, text: String },
    ToolCall {
        agent: String,
        id: String,
        tool: String,
        args: Value,
    },
    /// 工具返回（预览，避免过长）
    Observation {
        agent: String,
        tool: String,
        ok: bool,
        preview: String,
    },
    Recovery {
        agent: String,
        action: String,
        detail: String,
    },
    Compaction {
        agent: String,
        removed_messages: usize,
        tokens_before: usize,
        tokens_after: usize,
    },
    TimerNudge {
        agent: String,
        phase: TimerPhase,
        elapsed_seconds: f64,
    },
    /// 其它中间件效果（修复、截断、压缩失败）
    Middleware { agent: String, effect: StageEffect },
    DelegationStarted { role: String, brief_preview: String },
    /// 委派结束；成功时带完整委派记录，失败时 preview 为错误文本
    DelegationFinished {
        role: String,
        outcome: Option<Termination>,
        preview: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        delegation: Option<Delegation>,
    },
    BatchStarted { batch: usize, steps: Vec<usize> },
    BatchFinished { batch: usize, outcome: String },
    Terminated {
        agent: String,
        outcome: Termination,
        iterations: usize,
    },
    /// Token 使用统计（累计值）
    TokenUsage {
        prompt_tokens: u64,
        completion_tokens: u64,
        total_tokens: u64,
    },
    Error { text: String },
}

impl AgentEvent {
    /// 中间件效果 -> 事件
    pub fn from_effect(agent: &str, effect: StageEffect) -> Self {
        match effect {
            StageEffect::Compacted {
                removed_messages,
                tokens_before,
                tokens_after,
            } => AgentEvent::Compaction {
                agent: agent.to_string(),
                removed_messages,
                tokens_before,
                tokens_after,
            },
            StageEffect::TimerTransition {
                to, elapsed_seconds, ..
            } => AgentEvent::TimerNudge {
                agent: agent.to_string(),
                phase: to,
                elapsed_seconds,
            },
            other => AgentEvent::Middleware {
                agent: agent.to_string(),
                effect: other,
            },
        }
    }
}

pub fn send_event(tx: &Option<UnboundedSender<AgentEvent>>, ev: AgentEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}

/// 截断为预览文本
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let ev = AgentEvent::BatchStarted {
            batch: 1,
            steps: vec![1, 2],
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "batch_started");
        assert_eq!(json["steps"][1], 2);
    }

    #[test]
    fn test_effect_mapping() {
        let ev = AgentEvent::from_effect(
            "lead",
            StageEffect::TimerTransition {
                from: TimerPhase::Fresh,
                to: TimerPhase::Nudged,
                elapsed_seconds: 3.0,
            },
        );
        assert!(matches!(ev, AgentEvent::TimerNudge { phase: TimerPhase::Nudged, .. }));
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview("abcdef", 3), "abc...");
        assert_eq!(preview("abc", 3), "abc");
    }
}
