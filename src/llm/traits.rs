//! LLM 能力抽象
//!
//! 模型被视为不透明能力：输入消息序列与工具集，输出一条消息（可能带工具调用请求）。
//! 同一能力还需支持 Summarize 模式，供上下文压缩使用。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::memory::{Message, ToolCall};

/// 暴露给模型的工具描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 调用模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvocationMode {
    /// 正常推理：可返回工具调用
    Act,
    /// 摘要：只返回文本，不提供工具
    Summarize,
}

/// 一次模型调用的输入
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub mode: InvocationMode,
}

impl ModelRequest {
    pub fn act(system: impl Into<String>, messages: Vec<Message>, tools: Vec<ToolSpec>) -> Self {
        Self {
            system: system.into(),
            messages,
            tools,
            mode: InvocationMode::Act,
        }
    }

    pub fn summarize(system: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            system: system.into(),
            messages,
            tools: Vec::new(),
            mode: InvocationMode::Summarize,
        }
    }
}

/// 模型输出：文本与零个或多个工具调用请求
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelReply {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

impl ModelReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: String::new(),
            tool_calls,
        }
    }

    /// 无工具调用即为最终回答
    pub fn is_final(&self) -> bool {
        self.tool_calls.is_empty()
    }
}

/// 模型调用错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("rate limited (retry after {retry_after_ms} ms)")]
    RateLimited { retry_after_ms: u64 },

    #[error("network error: {0}")]
    Network(String),

    #[error("API error (status {status:?}): {message}")]
    Api { status: Option<u16>, message: String },

    /// 输出不是合法的工具调用 JSON；循环内以纠正提示恢复
    #[error("malformed model output: {0}")]
    MalformedOutput(String),
}

impl LlmError {
    /// 限流、网络错误与 5xx 可重试
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } | LlmError::Network(_) => true,
            LlmError::Api { status, .. } => matches!(status, Some(s) if *s >= 500 || *s == 429),
            LlmError::MalformedOutput(_) => false,
        }
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn invoke(&self, request: &ModelRequest) -> Result<ModelReply, LlmError>;

    fn model_name(&self) -> &str {
        "unknown"
    }

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
