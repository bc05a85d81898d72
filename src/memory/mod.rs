//! 记忆层：工作上下文（消息序列）与批次预算

pub mod conversation;
pub mod token_budget;

pub use conversation::{ConversationTurn, Message, Role, ToolCall};
pub use token_budget::{
    Budget, CharHeuristicEstimator, MixedScriptEstimator, TimerPhase, TokenEstimator,
};
