//! 成对步骤调度器
//!
//! 待执行步骤按顺序两两成批（末尾奇数步单独成批），批次之间严格串行；
//! 每批调用一次编排器，Success 与降级终止都把步骤标记为 Completed，失败的批次记录后继续下一批。
//! 取消只在批次之间检查。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc::UnboundedSender;

use crate::core::{AgentError, BatchResult, SessionSupervisor};
use crate::react::{send_event, AgentEvent};
use crate::workflow::brief::compose_brief;
use crate::workflow::types::{BatchOutcome, ExecutionRecord, PlanStep, ResourceRef, StepStatus};

/// 执行单个批次 brief 的能力（由 DeepAgentOrchestrator 实现）
#[async_trait]
pub trait BatchRunner: Send + Sync {
    async fn run_batch(&self, brief: &str) -> Result<BatchResult, AgentError>;
}

/// 把 Pending 步骤的下标（在 steps 中的位置）按顺序两两分组
pub fn pair_pending(steps: &[PlanStep]) -> Vec<Vec<usize>> {
    let pending: Vec<usize> = steps
        .iter()
        .enumerate()
        .filter(|(_, s)| s.status == StepStatus::Pending)
        .map(|(i, _)| i)
        .collect();
    pending.chunks(2).map(|c| c.to_vec()).collect()
}

pub struct PairwiseScheduler {
    runner: Arc<dyn BatchRunner>,
    supervisor: SessionSupervisor,
    event_tx: Option<UnboundedSender<AgentEvent>>,
}

impl PairwiseScheduler {
    pub fn new(runner: Arc<dyn BatchRunner>) -> Self {
        Self {
            runner,
            supervisor: SessionSupervisor::new(),
            event_tx: None,
        }
    }

    pub fn with_supervisor(mut self, supervisor: SessionSupervisor) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn with_event_tx(mut self, tx: Option<UnboundedSender<AgentEvent>>) -> Self {
        self.event_tx = tx;
        self
    }

    pub fn supervisor(&self) -> &SessionSupervisor {
        &self.supervisor
    }

    /// 执行全部待执行步骤，返回按批次顺序排列的执行记录
    pub async fn run(
        &self,
        steps: &mut [PlanStep],
        resources: &[ResourceRef],
        user_query: &str,
    ) -> Vec<ExecutionRecord> {
        let batches = pair_pending(steps);
        let mut records = Vec::with_capacity(batches.len());
        tracing::info!(steps = steps.len(), batches = batches.len(), "scheduler started");

        for (batch_no, positions) in batches.iter().enumerate() {
            let batch_no = batch_no + 1;
            if self.supervisor.is_cancelled() {
                tracing::info!(batch = batch_no, "cancellation requested, no further batches");
                break;
            }

            for &p in positions {
                steps[p].status = StepStatus::InProgress;
            }
            let step_indices: Vec<usize> = positions.iter().map(|&p| steps[p].index).collect();
            let batch_steps: Vec<PlanStep> = positions.iter().map(|&p| steps[p].clone()).collect();
            let completed: Vec<PlanStep> = steps
                .iter()
                .filter(|s| s.status == StepStatus::Completed)
                .cloned()
                .collect();
            let brief = compose_brief(user_query, &batch_steps, &completed, resources);

            tracing::info!(batch = batch_no, step = ?step_indices, "batch started");
            send_event(
                &self.event_tx,
                AgentEvent::BatchStarted {
                    batch: batch_no,
                    steps: step_indices.clone(),
                },
            );

            let started_at = Utc::now();
            let record = match self.runner.run_batch(&brief).await {
                Ok(result) => {
                    let outcome = BatchOutcome::from(result.outcome);
                    let summary = result
                        .final_report
                        .filter(|r| !r.trim().is_empty())
                        .unwrap_or(result.output);
                    for &p in positions {
                        steps[p].status = StepStatus::Completed;
                        steps[p].execution_res = Some(summary.clone());
                    }
                    ExecutionRecord {
                        step_indices,
                        transcript_summary: summary,
                        artifacts_touched: result.artifacts_touched,
                        tool_call_log: result.tool_calls,
                        outcome,
                        started_at,
                        finished_at: Utc::now(),
                    }
                }
                Err(e) => {
                    tracing::warn!(batch = batch_no, error = %e, "batch failed, continuing with next batch");
                    for &p in positions {
                        steps[p].status = StepStatus::Pending;
                    }
                    ExecutionRecord {
                        step_indices,
                        transcript_summary: String::new(),
                        artifacts_touched: Vec::new(),
                        tool_call_log: Vec::new(),
                        outcome: BatchOutcome::Failed(e.to_string()),
                        started_at,
                        finished_at: Utc::now(),
                    }
                }
            };

            tracing::info!(
                batch = batch_no,
                outcome = record.outcome.label(),
                elapsed_ms = record.duration_ms(),
                tools = record.tool_call_log.len(),
                "batch finished"
            );
            send_event(
                &self.event_tx,
                AgentEvent::BatchFinished {
                    batch: batch_no,
                    outcome: record.outcome.label().to_string(),
                },
            );
            records.push(record);
        }

        records
    }
}
