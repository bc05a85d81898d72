//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；支持 DeepSeek、OpenAI、自建代理等。
//! 工具调用走文本协议：工具清单拼入 system prompt，回复由 planner 解析。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::llm::{InvocationMode, LlmClient, LlmError, ModelReply, ModelRequest};
use crate::memory::{Message, Role};
use crate::react::planner::{parse_model_output, render_tool_calls, render_tool_protocol};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// 根据错误文本归类（与 HTTP 状态码、限流提示对应）
fn classify_error(text: String) -> LlmError {
    let lower = text.to_lowercase();
    if lower.contains("429") || lower.contains("rate limit") {
        LlmError::RateLimited { retry_after_ms: 0 }
    } else if ["500", "502", "503", "504"].iter().any(|code| lower.contains(code))
        || lower.contains("server error")
        || lower.contains("service unavailable")
    {
        LlmError::Api {
            status: Some(503),
            message: text,
        }
    } else if lower.contains("error sending request")
        || lower.contains("connection")
        || lower.contains("timed out")
    {
        LlmError::Network(text)
    } else {
        LlmError::Api {
            status: None,
            message: text,
        }
    }
}

fn build_err(e: impl std::fmt::Display) -> LlmError {
    LlmError::Api {
        status: None,
        message: format!("invalid request: {e}"),
    }
}

/// OpenAI 兼容客户端：持有 Client 与 model 名
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            usage: TokenUsage::new(),
        }
    }

    fn system_message(content: String) -> Result<ChatCompletionRequestMessage, LlmError> {
        Ok(ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(content)
                .build()
                .map_err(build_err)?,
        ))
    }

    fn user_message(content: String) -> Result<ChatCompletionRequestMessage, LlmError> {
        Ok(ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(content)
                .build()
                .map_err(build_err)?,
        ))
    }

    /// 转换为 API 消息：工具调用还原为协议 JSON，工具结果以 user 消息回传
    fn to_openai_messages(
        &self,
        request: &ModelRequest,
    ) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        let mut system = request.system.clone();
        if request.mode == InvocationMode::Act {
            system.push_str(&render_tool_protocol(&request.tools));
        }
        let mut out = vec![Self::system_message(system)?];
        for m in &request.messages {
            out.push(self.convert(m)?);
        }
        Ok(out)
    }

    fn convert(&self, m: &Message) -> Result<ChatCompletionRequestMessage, LlmError> {
        match m.role {
            Role::System => Self::system_message(m.content.clone()),
            Role::User => Self::user_message(m.content.clone()),
            Role::Tool => Self::user_message(format!(
                "Tool result ({}):\n{}",
                m.tool_call_id.as_deref().unwrap_or("unknown"),
                m.content
            )),
            Role::Assistant => {
                let content = if m.tool_calls.is_empty() {
                    m.content.clone()
                } else {
                    render_tool_calls(&m.content, &m.tool_calls)
                };
                Ok(ChatCompletionRequestMessage::Assistant(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(content)
                        .build()
                        .map_err(build_err)?,
                ))
            }
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn invoke(&self, request: &ModelRequest) -> Result<ModelReply, LlmError> {
        let api_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.to_openai_messages(request)?)
            .build()
            .map_err(build_err)?;

        let response = self
            .client
            .chat()
            .create(api_request)
            .await
            .map_err(|e| classify_error(e.to_string()))?;

        // 提取 token 使用统计
        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        match request.mode {
            InvocationMode::Summarize => Ok(ModelReply::text(content.trim())),
            InvocationMode::Act => parse_model_output(&content),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }
}
