//! Agent 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：面向智能体的错误（NotFound / AmbiguousEdit / InvalidRole / 工具失败）
//! 转为工具结果文本在循环内恢复；只有 ModelInvocation 会冒泡为批次失败。

use thiserror::Error;

use crate::llm::LlmError;

/// Agent 运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 产物路径不存在
    #[error("Artifact not found: {0}")]
    NotFound(String),

    /// edit 的 old 子串出现 0 次或多次
    #[error("Ambiguous edit in '{path}': expected exactly one occurrence, found {occurrences}")]
    AmbiguousEdit { path: String, occurrences: usize },

    #[error("Invalid role '{role}'; allowed roles are: {allowed}")]
    InvalidRole { role: String, allowed: String },

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// 模型输出无法解析为 Tool Call JSON
    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    /// 模型能力不可用（重试耗尽后），整批失败
    #[error("Model invocation failed: {0}")]
    ModelInvocation(#[source] LlmError),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Cancelled")]
    Cancelled,
}

impl AgentError {
    /// 是否可在循环内恢复（作为工具结果文本返回给模型）
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            AgentError::ModelInvocation(_) | AgentError::ConfigError(_) | AgentError::Cancelled
        )
    }
}

impl From<LlmError> for AgentError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::MalformedOutput(raw) => AgentError::JsonParseError(raw),
            other => AgentError::ModelInvocation(other),
        }
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 作为工具结果文本交还给模型，循环继续
    SurfaceToAgent(String),
    /// 将提示注入下一轮，让模型重试（如 JSON 格式错误）
    RetryWithPrompt(String),
    /// 终止当前批次
    Abort,
}
