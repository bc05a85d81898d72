//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供 Agent 循环决定是回写工具结果、重试提示还是终止批次。

use crate::core::{AgentError, RecoveryAction};

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::JsonParseError(raw) => RecoveryAction::RetryWithPrompt(format!(
                "Your previous output was not valid tool-call JSON: {raw}. \
                To call tools, output only one JSON object of the form \
                {{\"tool_calls\": [{{\"id\": \"call_1\", \"name\": \"tool_name\", \"args\": {{...}}}}]}}. \
                To finish, answer in plain text without JSON."
            )),
            AgentError::NotFound(_)
            | AgentError::AmbiguousEdit { .. }
            | AgentError::InvalidRole { .. }
            | AgentError::ToolExecutionFailed(_)
            | AgentError::ToolTimeout(_)
            | AgentError::UnknownTool(_)
            | AgentError::Persistence(_) => RecoveryAction::SurfaceToAgent(format!("Error: {err}")),
            AgentError::ModelInvocation(_) | AgentError::ConfigError(_) | AgentError::Cancelled => {
                RecoveryAction::Abort
            }
        }
    }

    /// 工具错误 -> 工具结果文本；不可恢复错误也以文本返回，避免工具层向外抛出
    pub fn tool_result_text(&self, err: &AgentError) -> String {
        match self.handle(err) {
            RecoveryAction::SurfaceToAgent(text) | RecoveryAction::RetryWithPrompt(text) => text,
            RecoveryAction::Abort => format!("Error: {err}"),
        }
    }
}
