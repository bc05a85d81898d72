//! 工具执行器
//!
//! 持有 ToolRegistry 与全局超时；每次调用输出结构化审计日志（JSON）。
//! 面向智能体的错误经 RecoveryEngine 转成 `Error: ...` 文本作为工具结果返回，从不抛出循环。
//! 委派工具不受单次超时约束，由子智能体自己的预算与迭代上限兜底。

use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::core::{AgentError, RecoveryEngine};
use crate::memory::ToolCall;
use crate::tools::{ToolContext, ToolKind, ToolRegistry};

/// 一次工具调用的结果文本
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub content: String,
    pub ok: bool,
}

pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
    recovery: RecoveryEngine,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
            recovery: RecoveryEngine::new(),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn kind_of(&self, name: &str) -> Option<ToolKind> {
        self.registry.kind_of(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    /// 执行指定工具；超时返回 ToolTimeout；输出 JSON 审计日志
    pub async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> Result<String, AgentError> {
        let start = Instant::now();
        let args_preview = args_preview(&call.args);
        let kind = self.registry.kind_of(&call.name);
        let fut = self.registry.execute(&call.name, call.args.clone(), ctx);
        let result = if kind == Some(ToolKind::Delegate) {
            fut.await
        } else {
            match timeout(self.timeout, fut).await {
                Ok(r) => r,
                Err(_) => Err(AgentError::ToolTimeout(call.name.clone())),
            }
        };

        let (ok, outcome): (bool, &str) = match &result {
            Ok(_) => (true, "ok"),
            Err(AgentError::ToolTimeout(_)) => (false, "timeout"),
            Err(_) => (false, "error"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": call.name,
            "agent": ctx.agent_id,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        result
    }

    /// 执行并把错误转成工具结果文本
    pub async fn execute_to_text(&self, call: &ToolCall, ctx: &ToolContext) -> ToolOutcome {
        match self.execute(call, ctx).await {
            Ok(content) => ToolOutcome { content, ok: true },
            Err(e) => ToolOutcome {
                content: self.recovery.tool_result_text(&e),
                ok: false,
            },
        }
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
