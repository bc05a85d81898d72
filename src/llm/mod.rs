//! LLM 层：能力抽象与实现（OpenAI 兼容 / DeepSeek / Mock / 脚本化）

pub mod deepseek;
pub mod mock;
pub mod openai;
pub mod retry;
pub mod traits;

pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::{OpenAiClient, TokenUsage};
pub use retry::{RetryConfig, RetryingLlmClient};
pub use traits::{InvocationMode, LlmClient, LlmError, ModelReply, ModelRequest, ToolSpec};
