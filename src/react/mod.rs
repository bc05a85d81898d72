//! 认知层：Planner（提示与输出协议）、主循环、事件、专家子智能体

pub mod events;
pub mod loop_;
pub mod planner;
pub mod subagent;

pub use events::{send_event, AgentEvent, ToolCallEvent};
pub use loop_::{run_agent_loop, AgentSession, LoopResult};
pub use planner::{orchestrator_instructions, parse_model_output, Planner};
pub use subagent::{DelegateTool, Delegation, SpecialistRole, SubagentLimits};
