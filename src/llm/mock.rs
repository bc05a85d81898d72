//! Mock 与脚本化 LLM 客户端（用于测试与无 API Key 的本地运行）
//!
//! - MockLlmClient：立即给出最终回答，便于本地跑通整个调度流程
//! - ScriptedLlmClient：按队列回放预设回复或错误，并记录收到的请求

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::llm::{InvocationMode, LlmClient, LlmError, ModelReply, ModelRequest};
use crate::memory::ToolCall;

/// Mock 客户端：对最近一条用户指令给出一句话回答
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn invoke(&self, request: &ModelRequest) -> Result<ModelReply, LlmError> {
        if request.mode == InvocationMode::Summarize {
            return Ok(ModelReply::text(format!(
                "Summary of {} earlier messages.",
                request.messages.len()
            )));
        }
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.is_user_instruction())
            .and_then(|m| m.content.lines().find(|l| !l.trim().is_empty()))
            .unwrap_or("(no input)");
        Ok(ModelReply::text(format!("Mock answer for: {}", last_user.trim())))
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 脚本化客户端：Act 请求依次弹出回复队列，Summarize 请求弹出摘要队列
#[derive(Default)]
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<Result<ModelReply, LlmError>>>,
    summaries: Mutex<VecDeque<Result<ModelReply, LlmError>>>,
    /// 回复队列为空时使用；未设置时返回空文本回答
    fallback: Mutex<Option<Result<ModelReply, LlmError>>>,
    requests: Mutex<Vec<ModelRequest>>,
    calls: AtomicUsize,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, reply: ModelReply) {
        lock(&self.replies).push_back(Ok(reply));
    }

    pub fn push_text(&self, text: impl Into<String>) {
        self.push_reply(ModelReply::text(text));
    }

    pub fn push_calls(&self, calls: Vec<ToolCall>) {
        self.push_reply(ModelReply::calls(calls));
    }

    pub fn push_error(&self, err: LlmError) {
        lock(&self.replies).push_back(Err(err));
    }

    pub fn push_summary(&self, text: impl Into<String>) {
        lock(&self.summaries).push_back(Ok(ModelReply::text(text)));
    }

    pub fn push_summary_error(&self, err: LlmError) {
        lock(&self.summaries).push_back(Err(err));
    }

    /// 回复队列耗尽后一直返回该结果
    pub fn set_fallback(&self, reply: Result<ModelReply, LlmError>) {
        *lock(&self.fallback) = Some(reply);
    }

    /// 总调用次数（含 Summarize）
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        lock(&self.requests).clone()
    }

    pub fn remaining(&self) -> usize {
        lock(&self.replies).len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn invoke(&self, request: &ModelRequest) -> Result<ModelReply, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.requests).push(request.clone());
        match request.mode {
            InvocationMode::Summarize => lock(&self.summaries)
                .pop_front()
                .unwrap_or_else(|| Ok(ModelReply::text("Summary of earlier work."))),
            InvocationMode::Act => {
                let next = lock(&self.replies).pop_front();
                match next {
                    Some(reply) => reply,
                    None => lock(&self.fallback)
                        .clone()
                        .unwrap_or_else(|| Ok(ModelReply::text(""))),
                }
            }
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}
