//! 工作流模块
//!
//! 计划步骤成对分批、组装 brief、逐批调用编排器，最后把执行记录交给 Reporter。

pub mod brief;
pub mod reporter;
pub mod scheduler;
pub mod types;

pub use brief::compose_brief;
pub use reporter::{MarkdownReporter, ReportInput, Reporter};
pub use scheduler::{pair_pending, BatchRunner, PairwiseScheduler};
pub use types::{BatchOutcome, ExecutionRecord, PlanStep, ResourceRef, StepStatus};
