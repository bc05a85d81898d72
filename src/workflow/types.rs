//! 工作流类型定义
//!
//! 计划步骤、资源引用与每批次的执行记录

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::Termination;
use crate::react::ToolCallEvent;

/// 步骤状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

/// 计划中的一个研究步骤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// 1 起始，计划内唯一且有序
    pub index: usize,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// 建议使用的工具
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub step_type: Option<String>,
    #[serde(default)]
    pub need_search: bool,
    #[serde(default)]
    pub status: StepStatus,
    /// 完成后记录的批次产出
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_res: Option<String>,
}

impl PlanStep {
    pub fn new(index: usize, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            index,
            title: title.into(),
            description: description.into(),
            tools: Vec::new(),
            step_type: None,
            need_search: false,
            status: StepStatus::Pending,
            execution_res: None,
        }
    }
}

/// 用户提供的本地资源文件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub uri: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// 批次结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum BatchOutcome {
    Success,
    BudgetExpired,
    MaxIterationsExceeded,
    Failed(String),
}

impl BatchOutcome {
    /// 降级但有结果的批次，报告中标注为部分研究
    pub fn is_partial(&self) -> bool {
        matches!(self, BatchOutcome::BudgetExpired | BatchOutcome::MaxIterationsExceeded)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, BatchOutcome::Failed(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            BatchOutcome::Success => "success",
            BatchOutcome::BudgetExpired => "budget_expired",
            BatchOutcome::MaxIterationsExceeded => "max_iterations_exceeded",
            BatchOutcome::Failed(_) => "failed",
        }
    }
}

impl From<Termination> for BatchOutcome {
    fn from(t: Termination) -> Self {
        match t {
            Termination::Success => BatchOutcome::Success,
            Termination::BudgetExpired => BatchOutcome::BudgetExpired,
            Termination::MaxIterationsExceeded => BatchOutcome::MaxIterationsExceeded,
            Termination::Error => BatchOutcome::Failed("model invocation failed".to_string()),
        }
    }
}

/// 每个批次一条执行记录，按批次顺序拼接后交给 Reporter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub step_indices: Vec<usize>,
    pub transcript_summary: String,
    pub artifacts_touched: Vec<String>,
    pub tool_call_log: Vec<ToolCallEvent>,
    pub outcome: BatchOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_step_deserializes_with_defaults() {
        let step: PlanStep = serde_json::from_str(r#"{"index": 1, "title": "Market size"}"#).unwrap();
        assert_eq!(step.status, StepStatus::Pending);
        assert!(step.tools.is_empty());
        assert!(step.execution_res.is_none());
    }

    #[test]
    fn test_outcome_from_termination() {
        assert_eq!(BatchOutcome::from(Termination::Success), BatchOutcome::Success);
        assert!(BatchOutcome::from(Termination::MaxIterationsExceeded).is_partial());
        assert!(BatchOutcome::from(Termination::Error).is_failed());
    }
}
