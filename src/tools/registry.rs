//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute）。
//! 注册表是一张封闭的分派表：名称 -> (ToolKind, 处理者)，ToolKind 区分产物工具、委派工具与外部工具。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::artifacts::ArtifactStore;
use crate::core::AgentError;
use crate::llm::ToolSpec;

/// 工具类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// 产物存储（ls / read_file / write_file / edit_file）
    Artifact,
    /// 委派给专家子智能体
    Delegate,
    /// 搜索 / 抓取 / 代码执行等外部能力
    External,
}

/// 工具执行时可见的运行上下文
#[derive(Clone)]
pub struct ToolContext {
    /// 调用方标识（lead 或专家角色名），写入产物的 last_writer
    pub agent_id: String,
    /// 0 为顶层智能体，子智能体为 1
    pub depth: usize,
    pub artifacts: Arc<ArtifactStore>,
}

impl ToolContext {
    pub fn new(agent_id: impl Into<String>, depth: usize, artifacts: Arc<ArtifactStore>) -> Self {
        Self {
            agent_id: agent_id.into(),
            depth,
            artifacts,
        }
    }

    /// 派生子智能体上下文：共享产物存储，深度加一
    pub fn child(&self, agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            depth: self.depth + 1,
            artifacts: self.artifacts.clone(),
        }
    }
}

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::External
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, AgentError>;
}

/// 将 JSON 参数解析为工具自己的参数结构
pub fn parse_args<T: serde::de::DeserializeOwned>(tool: &str, args: Value) -> Result<T, AgentError> {
    serde_json::from_value(args)
        .map_err(|e| AgentError::ToolExecutionFailed(format!("invalid arguments for {tool}: {e}")))
}

/// 工具注册表：保持注册顺序，按名称分派
#[derive(Default, Clone)]
pub struct ToolRegistry {
    order: Vec<String>,
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    /// 同名工具后注册者覆盖先注册者，位置不变
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn kind_of(&self, name: &str) -> Option<ToolKind> {
        self.tools.get(name).map(|t| t.kind())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// 去掉某一类工具后的副本（子智能体的基础工具集不含委派）
    pub fn without_kind(&self, kind: ToolKind) -> Self {
        let mut out = Self::new();
        for name in &self.order {
            if let Some(tool) = self.tools.get(name) {
                if tool.kind() != kind {
                    out.register_arc(tool.clone());
                }
            }
        }
        out
    }

    /// 暴露给模型的工具描述（按注册顺序）
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect()
    }

    pub async fn execute(&self, name: &str, args: Value, ctx: &ToolContext) -> Result<String, AgentError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| AgentError::UnknownTool(name.to_string()))?;
        tool.execute(args, ctx).await
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
