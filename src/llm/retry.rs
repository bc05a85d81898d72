//! 重试包装：对限流、网络与服务端错误做指数退避
//!
//! 重试耗尽后原错误返回给调用方，由编排层升级为 ModelInvocation。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::llm::{LlmClient, LlmError, ModelReply, ModelRequest};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// 第 attempt 次重试前的等待时间（attempt 从 0 开始）
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis((base as u64).min(self.max_delay_ms))
    }
}

pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    config: RetryConfig,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn invoke(&self, request: &ModelRequest) -> Result<ModelReply, LlmError> {
        let mut attempt = 0;
        loop {
            match self.inner.invoke(request).await {
                Ok(reply) => return Ok(reply),
                Err(e) if attempt < self.config.max_retries && e.is_retryable() => {
                    let delay = match &e {
                        LlmError::RateLimited { retry_after_ms } if *retry_after_ms > 0 => {
                            Duration::from_millis(*retry_after_ms)
                        }
                        _ => self.config.delay_for(attempt),
                    };
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying LLM request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}
