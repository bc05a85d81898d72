//! 核心编排层：错误与恢复、循环状态、会话监管、编排器

pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod session_supervisor;
pub mod state;

pub use error::{AgentError, RecoveryAction};
pub use orchestrator::{build_pipeline, create_llm_from_config, BatchResult, DeepAgentOrchestrator, LEAD_AGENT_ID};
pub use recovery::RecoveryEngine;
pub use session_supervisor::SessionSupervisor;
pub use state::{LoopPhase, LoopState, Termination};
