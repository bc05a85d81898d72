//! 外部工具适配
//!
//! 搜索 / 抓取 / 代码执行由宿主提供，核心只看到 `call(name, args) -> result` 接口。
//! 失败以错误文本嵌入工具结果，让智能体在循环内自行重试或绕开。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::AgentError;
use crate::tools::{Tool, ToolContext, ToolKind};

/// 宿主提供的外部工具能力
#[async_trait]
pub trait ExternalTools: Send + Sync {
    async fn call(&self, name: &str, args: Value) -> Result<String, String>;
}

/// 把外部能力中的一个工具注册进 ToolRegistry
pub struct ExternalToolAdapter {
    name: String,
    description: String,
    schema: Value,
    backend: Arc<dyn ExternalTools>,
}

impl ExternalToolAdapter {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Value,
        backend: Arc<dyn ExternalTools>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            backend,
        }
    }
}

#[async_trait]
impl Tool for ExternalToolAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    fn kind(&self) -> ToolKind {
        ToolKind::External
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<String, AgentError> {
        self.backend
            .call(&self.name, args)
            .await
            .map_err(AgentError::ToolExecutionFailed)
    }
}
