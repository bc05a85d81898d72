//! Deep Agent 编排器
//!
//! 每次 execute 是一次独立的批次运行：新的 Ephemeral 产物层（Durable 层按线程共享）、新的 Budget，
//! 顶层智能体可通过 delegate 工具调用专家子智能体。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;

use crate::artifacts::{ArtifactStore, DurablePersistence};
use crate::config::{AgentSection, AppConfig};
use crate::core::{AgentError, Termination};
use crate::llm::{create_deepseek_client, LlmClient, MockLlmClient, OpenAiClient, RetryingLlmClient};
use crate::memory::{Budget, CharHeuristicEstimator, ConversationTurn, Message};
use crate::middleware::{ContextBudgetGovernor, ElapsedTimeGovernor, MiddlewarePipeline, ToolCallRepair};
use crate::react::{
    orchestrator_instructions, run_agent_loop, AgentEvent, AgentSession, DelegateTool, Planner, SubagentLimits,
    ToolCallEvent,
};
use crate::tools::{register_artifact_tools, ExternalToolAdapter, ExternalTools, Tool, ToolContext, ToolExecutor, ToolRegistry};
use crate::workflow::BatchRunner;

/// 顶层智能体标识（写入产物的 last_writer）
pub const LEAD_AGENT_ID: &str = "lead";

/// 一次批次运行的结果
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub outcome: Termination,
    /// 最终回答或尽力输出
    pub output: String,
    pub tool_calls: Vec<ToolCallEvent>,
    pub artifacts_touched: Vec<String>,
    /// 本次运行中 final_report.md 的内容（如有）
    pub final_report: Option<String>,
    pub iterations: usize,
    pub compactions: u32,
    pub nudges_sent: u32,
}

/// 根据配置与环境变量选择 LLM 后端（DeepSeek / OpenAI 兼容 / Mock），真实后端外包一层重试
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let has_deepseek_key = std::env::var("DEEPSEEK_API_KEY").is_ok();
    let has_openai_key = std::env::var("OPENAI_API_KEY").is_ok();
    let use_deepseek = provider == "deepseek" && (has_deepseek_key || has_openai_key);
    let use_openai = provider == "openai" && has_openai_key;

    let inner: Arc<dyn LlmClient> = if use_deepseek {
        tracing::info!(model = %cfg.llm.model, "Using DeepSeek LLM");
        Arc::new(create_deepseek_client(
            Some(cfg.llm.model.as_str()),
            cfg.llm.base_url.as_deref(),
            None,
        ))
    } else if use_openai {
        tracing::info!(model = %cfg.llm.model, "Using OpenAI LLM");
        Arc::new(OpenAiClient::new(cfg.llm.base_url.as_deref(), &cfg.llm.model, None))
    } else {
        tracing::warn!(provider = %provider, "No API key set or provider is mock, using Mock LLM");
        return Arc::new(MockLlmClient);
    };
    Arc::new(RetryingLlmClient::new(inner, cfg.llm.retry.clone()))
}

/// 标准三段管线：修复 -> 上下文预算 -> 计时
pub fn build_pipeline(agent: &AgentSection, llm: Arc<dyn LlmClient>) -> MiddlewarePipeline {
    MiddlewarePipeline::standard(
        ToolCallRepair,
        ContextBudgetGovernor::new(
            llm,
            Arc::new(CharHeuristicEstimator::new(agent.chars_per_token)),
            agent.compaction_high_water_mark,
            agent.recency_window_turns,
        ),
        ElapsedTimeGovernor::new(agent.first_nudge_fraction, agent.final_warning_fraction),
    )
}

pub struct DeepAgentOrchestrator {
    agent: AgentSection,
    thread_id: String,
    tool_timeout_secs: u64,
    llm: Arc<dyn LlmClient>,
    persistence: Arc<dyn DurablePersistence>,
    /// 产物工具 + 外部工具；不含 delegate
    base_tools: ToolRegistry,
    pipeline: MiddlewarePipeline,
    event_tx: Option<UnboundedSender<AgentEvent>>,
}

impl DeepAgentOrchestrator {
    pub fn new(
        agent: AgentSection,
        llm: Arc<dyn LlmClient>,
        persistence: Arc<dyn DurablePersistence>,
    ) -> Result<Self, AgentError> {
        agent.validate()?;
        let mut base_tools = ToolRegistry::new();
        register_artifact_tools(&mut base_tools);
        let pipeline = build_pipeline(&agent, llm.clone());
        Ok(Self {
            agent,
            thread_id: "default".to_string(),
            tool_timeout_secs: 60,
            llm,
            persistence,
            base_tools,
            pipeline,
            event_tx: None,
        })
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = thread_id.into();
        self
    }

    pub fn with_tool_timeout(mut self, secs: u64) -> Self {
        self.tool_timeout_secs = secs;
        self
    }

    /// 注册一个外部工具（搜索 / 抓取 / 代码执行等）
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.base_tools.register_arc(tool);
        self
    }

    /// 把宿主提供的外部能力按名称注册为工具
    pub fn with_external_tool(
        self,
        name: &str,
        description: &str,
        schema: Value,
        backend: Arc<dyn ExternalTools>,
    ) -> Self {
        self.with_tool(Arc::new(ExternalToolAdapter::new(name, description, schema, backend)))
    }

    pub fn with_event_tx(mut self, tx: Option<UnboundedSender<AgentEvent>>) -> Self {
        self.event_tx = tx;
        self
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.base_tools.tool_names()
    }

    fn subagent_limits(&self) -> SubagentLimits {
        SubagentLimits {
            max_iterations: self.agent.subagent_max_iterations,
            time_limit: self.agent.subagent_time_limit(),
            token_ceiling: self.agent.token_ceiling,
            tool_timeout_secs: self.tool_timeout_secs,
        }
    }

    /// 顶层工具集：基础工具 + （启用时）delegate
    fn lead_tools(&self) -> ToolRegistry {
        let mut registry = self.base_tools.clone();
        if self.agent.delegation_enabled {
            registry.register(
                DelegateTool::new(
                    &self.base_tools,
                    self.llm.clone(),
                    self.pipeline.clone(),
                    self.subagent_limits(),
                )
                .with_event_tx(self.event_tx.clone()),
            );
        }
        registry
    }

    /// 执行一个批次 brief 直到终止
    pub async fn execute(&self, brief: &str) -> Result<BatchResult, AgentError> {
        let store = Arc::new(ArtifactStore::new(self.thread_id.clone(), self.persistence.clone()));
        let ctx = ToolContext::new(LEAD_AGENT_ID, 0, store.clone());

        let registry = self.lead_tools();
        let planner = Planner::new(
            self.llm.clone(),
            orchestrator_instructions(self.agent.delegation_enabled),
            registry.specs(),
        );
        let executor = ToolExecutor::new(registry, self.tool_timeout_secs);
        let session = AgentSession::new(&planner, &executor, &self.pipeline, &ctx)
            .with_max_iterations(self.agent.max_iterations_per_batch)
            .with_event_tx(self.event_tx.clone());

        let turn = ConversationTurn::from_messages(vec![Message::user(brief)]);
        let mut budget = Budget::new(self.agent.token_ceiling, self.agent.time_limit());
        let result = run_agent_loop(&session, turn, &mut budget).await?;

        let artifacts_touched = store.touched().await;
        let final_report = store.final_report().await;
        tracing::info!(
            outcome = ?result.outcome,
            iterations = result.iterations,
            compactions = result.compactions,
            nudges = result.nudges_sent,
            artifacts = artifacts_touched.len(),
            has_final_report = final_report.is_some(),
            "batch run finished"
        );
        Ok(BatchResult {
            outcome: result.outcome,
            output: result.output,
            tool_calls: result.tool_calls,
            artifacts_touched,
            final_report,
            iterations: result.iterations,
            compactions: result.compactions,
            nudges_sent: result.nudges_sent,
        })
    }
}

#[async_trait]
impl BatchRunner for DeepAgentOrchestrator {
    async fn run_batch(&self, brief: &str) -> Result<BatchResult, AgentError> {
        self.execute(brief).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{InMemoryPersistence, Tier, FINAL_REPORT_PATH};
    use crate::llm::ScriptedLlmClient;
    use crate::memory::ToolCall;
    use serde_json::json;

    fn orchestrator(llm: Arc<ScriptedLlmClient>, persistence: Arc<InMemoryPersistence>) -> DeepAgentOrchestrator {
        DeepAgentOrchestrator::new(AgentSection::default(), llm, persistence)
            .unwrap()
            .with_thread_id("t1")
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut agent = AgentSection::default();
        agent.token_ceiling = 0;
        let err = DeepAgentOrchestrator::new(
            agent,
            Arc::new(ScriptedLlmClient::new()),
            Arc::new(InMemoryPersistence::new()),
        )
        .err()
        .unwrap();
        assert!(matches!(err, AgentError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_final_report_and_tiers() {
        let llm = Arc::new(ScriptedLlmClient::new());
        let persistence = Arc::new(InMemoryPersistence::new());
        llm.push_calls(vec![
            ToolCall::new(
                "c1",
                "write_file",
                json!({"path": FINAL_REPORT_PATH, "content": "# Findings"}),
            ),
            ToolCall::new(
                "c2",
                "write_file",
                json!({"path": "memory.md", "content": "keep", "tier": "durable"}),
            ),
        ]);
        llm.push_text("Batch done.");
        let orch = orchestrator(llm.clone(), persistence.clone());
        let result = orch.execute("brief").await.unwrap();
        assert_eq!(result.outcome, Termination::Success);
        assert_eq!(result.final_report.as_deref(), Some("# Findings"));
        assert_eq!(
            result.artifacts_touched,
            vec!["ephemeral:final_report.md".to_string(), "durable:memory.md".to_string()]
        );
        let first = &llm.requests()[0];
        assert!(first.tools.iter().any(|t| t.name == "delegate"));

        // 下一批次：Ephemeral 层重置，Durable 层保留
        llm.push_calls(vec![ToolCall::new("c3", "ls", json!({}))]);
        llm.push_text("Second.");
        let second = orch.execute("brief 2").await.unwrap();
        assert!(second.final_report.is_none());
        let listing = &second.tool_calls[0].result_preview;
        assert!(listing.contains("memory.md"));
        assert!(!listing.contains("final_report.md"));
        let store = ArtifactStore::new("t1", persistence);
        assert_eq!(store.read(Tier::Durable, "memory.md").await.unwrap(), "keep");
    }

    #[tokio::test]
    async fn test_durable_report_not_reused_by_next_batch() {
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push_calls(vec![ToolCall::new(
            "w1",
            "write_file",
            json!({"path": FINAL_REPORT_PATH, "content": "BATCH ONE REPORT", "tier": "durable"}),
        )]);
        llm.push_text("batch one answer");
        llm.push_text("batch two answer");
        let orch = orchestrator(llm, Arc::new(InMemoryPersistence::new()));

        let first = orch.execute("brief 1").await.unwrap();
        assert_eq!(first.final_report.as_deref(), Some("BATCH ONE REPORT"));

        let second = orch.execute("brief 2").await.unwrap();
        assert_eq!(second.output, "batch two answer");
        assert!(second.final_report.is_none());
        assert!(second.artifacts_touched.is_empty());
    }

    #[tokio::test]
    async fn test_delegation_disabled_hides_tool() {
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push_text("ok");
        let mut agent = AgentSection::default();
        agent.delegation_enabled = false;
        let orch = DeepAgentOrchestrator::new(agent, llm.clone(), Arc::new(InMemoryPersistence::new())).unwrap();
        orch.execute("brief").await.unwrap();
        assert!(llm.requests()[0].tools.iter().all(|t| t.name != "delegate"));
    }
}
