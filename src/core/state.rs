//! 编排循环的状态机
//!
//! Running -> {ModelTurn, ToolDispatch, Delegating, Compacting} -> Terminated(..)
//! Terminated 为终态；进入终态后的迁移请求被忽略。

use serde::{Deserialize, Serialize};

/// 循环终止方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// 模型给出不含工具调用的最终回答
    Success,
    /// 计时器到达 Expired，返回尽力输出
    BudgetExpired,
    /// 迭代上限兜底，按 BudgetExpired 同等对待
    MaxIterationsExceeded,
    /// 模型能力失败（重试后），批次失败
    Error,
}

impl Termination {
    /// 是否为“降级但有结果”的终止
    pub fn is_degraded(&self) -> bool {
        matches!(self, Termination::BudgetExpired | Termination::MaxIterationsExceeded)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "outcome", rename_all = "snake_case")]
pub enum LoopPhase {
    Running,
    ModelTurn,
    ToolDispatch,
    Delegating,
    Compacting,
    Terminated(Termination),
}

/// 循环内部状态快照
#[derive(Clone, Debug)]
pub struct LoopState {
    pub agent_id: String,
    pub phase: LoopPhase,
    pub iteration: usize,
    pub active_tool: Option<String>,
    history: Vec<LoopPhase>,
}

impl LoopState {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            phase: LoopPhase::Running,
            iteration: 0,
            active_tool: None,
            history: vec![LoopPhase::Running],
        }
    }

    pub fn enter(&mut self, phase: LoopPhase) {
        if self.is_terminated() || self.phase == phase {
            return;
        }
        tracing::debug!(agent = %self.agent_id, from = ?self.phase, to = ?phase, "loop phase");
        self.phase = phase;
        self.history.push(phase);
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.phase, LoopPhase::Terminated(_))
    }

    pub fn history(&self) -> &[LoopPhase] {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminated_is_final() {
        let mut state = LoopState::new("lead");
        state.enter(LoopPhase::ModelTurn);
        state.enter(LoopPhase::ModelTurn);
        state.enter(LoopPhase::Terminated(Termination::Success));
        state.enter(LoopPhase::ToolDispatch);
        assert_eq!(state.phase, LoopPhase::Terminated(Termination::Success));
        assert_eq!(
            state.history(),
            &[
                LoopPhase::Running,
                LoopPhase::ModelTurn,
                LoopPhase::Terminated(Termination::Success)
            ]
        );
    }

    #[test]
    fn test_degraded_outcomes() {
        assert!(Termination::BudgetExpired.is_degraded());
        assert!(Termination::MaxIterationsExceeded.is_degraded());
        assert!(!Termination::Success.is_degraded());
    }
}
