//! Reporter 交接：调度结束后把执行记录与原始问题、计划一起交给外部报告生成方

use async_trait::async_trait;
use serde::Serialize;

use crate::workflow::types::{ExecutionRecord, PlanStep};

pub const PARTIAL_MARKER: &str = "_Note: this section is based on partial research (the batch budget ran out)._";

#[derive(Debug, Clone, Serialize)]
pub struct ReportInput {
    pub user_query: String,
    pub steps: Vec<PlanStep>,
    pub records: Vec<ExecutionRecord>,
}

impl ReportInput {
    pub fn new(user_query: impl Into<String>, steps: Vec<PlanStep>, records: Vec<ExecutionRecord>) -> Self {
        Self {
            user_query: user_query.into(),
            steps,
            records,
        }
    }

    fn step_titles(&self, indices: &[usize]) -> String {
        indices
            .iter()
            .map(|i| {
                self.steps
                    .iter()
                    .find(|s| s.index == *i)
                    .map(|s| format!("{i}. {}", s.title))
                    .unwrap_or_else(|| i.to_string())
            })
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// 按批次顺序拼接产出；失败批次跳过，降级批次标注
    pub fn render_markdown(&self) -> String {
        let mut out = format!("# Research Findings\n\n**Question:** {}\n", self.user_query.trim());
        for record in &self.records {
            if record.outcome.is_failed() {
                continue;
            }
            out.push_str(&format!("\n## Steps {}\n\n", self.step_titles(&record.step_indices)));
            if record.outcome.is_partial() {
                out.push_str(PARTIAL_MARKER);
                out.push_str("\n\n");
            }
            out.push_str(record.transcript_summary.trim());
            out.push('\n');
        }
        let skipped: Vec<String> = self
            .records
            .iter()
            .filter(|r| r.outcome.is_failed())
            .map(|r| self.step_titles(&r.step_indices))
            .collect();
        if !skipped.is_empty() {
            out.push_str(&format!("\n_Not covered due to failures: {}_\n", skipped.join("; ")));
        }
        out
    }
}

/// 最终报告生成方（由宿主实现）
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn report(&self, input: &ReportInput) -> anyhow::Result<String>;
}

/// 直接输出拼接后的 Markdown
pub struct MarkdownReporter;

#[async_trait]
impl Reporter for MarkdownReporter {
    async fn report(&self, input: &ReportInput) -> anyhow::Result<String> {
        Ok(input.render_markdown())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::BatchOutcome;
    use chrono::Utc;

    fn record(indices: Vec<usize>, summary: &str, outcome: BatchOutcome) -> ExecutionRecord {
        ExecutionRecord {
            step_indices: indices,
            transcript_summary: summary.into(),
            artifacts_touched: vec![],
            tool_call_log: vec![],
            outcome,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_render_marks_partial_and_skips_failed() {
        let steps = vec![
            PlanStep::new(1, "A", ""),
            PlanStep::new(2, "B", ""),
            PlanStep::new(3, "C", ""),
            PlanStep::new(4, "D", ""),
        ];
        let input = ReportInput::new(
            "q",
            steps,
            vec![
                record(vec![1, 2], "alpha", BatchOutcome::Success),
                record(vec![3], "", BatchOutcome::Failed("down".into())),
                record(vec![4], "delta", BatchOutcome::BudgetExpired),
            ],
        );
        let md = MarkdownReporter.report(&input).await.unwrap();
        assert!(md.contains("## Steps 1. A; 2. B\n\nalpha"));
        assert!(md.contains(&format!("## Steps 4. D\n\n{PARTIAL_MARKER}\n\ndelta")));
        assert!(!md.contains("## Steps 3. C"));
        assert!(md.contains("Not covered due to failures: 3. C"));
    }
}
