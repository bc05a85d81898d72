//! 中间件管线：每次模型调用之前按显式顺序改写工作上下文
//!
//! 顺序固定为 工具调用修复 -> 上下文预算压缩 -> 计时提醒。
//! 各阶段本身不持有运行状态，状态全部在 Budget 中，因此同一条管线可被子智能体复用。

pub mod compaction;
pub mod repair;
pub mod timer;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::memory::{Budget, ConversationTurn, TimerPhase};

pub use compaction::{ContextBudgetGovernor, SUMMARY_MESSAGE_NAME, TRUNCATION_MARKER_PREFIX};
pub use repair::{ToolCallRepair, PLACEHOLDER_RESULT};
pub use timer::{format_remaining, ElapsedTimeGovernor, TIMER_MESSAGE_NAME};

/// 单个阶段对上下文产生的影响（供事件与日志使用）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageEffect {
    Repaired {
        placeholders: usize,
        dropped: usize,
        reordered: bool,
    },
    Compacted {
        removed_messages: usize,
        tokens_before: usize,
        tokens_after: usize,
    },
    CompactionFailed {
        reason: String,
    },
    Truncated {
        omitted_chars: usize,
    },
    TimerTransition {
        from: TimerPhase,
        to: TimerPhase,
        elapsed_seconds: f64,
    },
}

/// 管线阶段：process(turn, budget) 原地改写
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process(&self, turn: &mut ConversationTurn, budget: &mut Budget) -> Vec<StageEffect>;
}

/// 显式有序的阶段列表，由编排器构造时传入
#[derive(Clone, Default)]
pub struct MiddlewarePipeline {
    stages: Vec<Arc<dyn Stage>>,
    timer: Option<Arc<ElapsedTimeGovernor>>,
}

impl MiddlewarePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// 计时器既作为管线阶段运行，也在每次工具派发前单独检查
    pub fn with_timer(mut self, timer: Arc<ElapsedTimeGovernor>) -> Self {
        self.stages.push(timer.clone());
        self.timer = Some(timer);
        self
    }

    /// 标准三段管线
    pub fn standard(
        repair: ToolCallRepair,
        compaction: ContextBudgetGovernor,
        timer: ElapsedTimeGovernor,
    ) -> Self {
        Self::new()
            .with_stage(Arc::new(repair))
            .with_stage(Arc::new(compaction))
            .with_timer(Arc::new(timer))
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// 模型调用前运行全部阶段
    pub async fn run(&self, turn: &mut ConversationTurn, budget: &mut Budget) -> Vec<StageEffect> {
        let mut effects = Vec::new();
        for stage in &self.stages {
            let produced = stage.process(turn, budget).await;
            if !produced.is_empty() {
                tracing::debug!(stage = stage.name(), effects = produced.len(), "middleware stage applied");
            }
            effects.extend(produced);
        }
        effects
    }

    /// 工具派发前的计时检查点；未配置计时器时只推进耗时
    pub fn dispatch_checkpoint(&self, turn: &mut ConversationTurn, budget: &mut Budget) -> Vec<StageEffect> {
        match &self.timer {
            Some(timer) => timer.check(turn, budget).into_iter().collect(),
            None => {
                budget.checkpoint();
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use crate::memory::CharHeuristicEstimator;

    #[test]
    fn test_standard_order() {
        let llm = Arc::new(ScriptedLlmClient::new());
        let pipeline = MiddlewarePipeline::standard(
            ToolCallRepair,
            ContextBudgetGovernor::new(llm, Arc::new(CharHeuristicEstimator::default()), 0.8, 6),
            ElapsedTimeGovernor::new(0.6, 0.85),
        );
        assert_eq!(
            pipeline.stage_names(),
            vec!["tool_call_repair", "context_budget", "elapsed_time"]
        );
    }
}
