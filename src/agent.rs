//! Headless 运行时
//!
//! 从配置构建 DeepAgentOrchestrator 与 PairwiseScheduler，对一份已接受的研究计划逐批执行，
//! 最后交给 Reporter 生成报告。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::artifacts::{DurablePersistence, FilePersistence, InMemoryPersistence};
use crate::config::{load_config, AppConfig};
use crate::core::{create_llm_from_config, DeepAgentOrchestrator, SessionSupervisor};
use crate::llm::LlmClient;
use crate::react::AgentEvent;
use crate::tools::CrawlTool;
use crate::workflow::{ExecutionRecord, PairwiseScheduler, PlanStep, ReportInput, Reporter, ResourceRef};

/// 计划文件（JSON）：研究问题、步骤与可选资源
#[derive(Debug, Clone, Deserialize)]
pub struct ResearchPlan {
    pub query: String,
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub resources: Vec<ResourceRef>,
}

/// 一次完整运行的结果
#[derive(Debug)]
pub struct RunReport {
    pub steps: Vec<PlanStep>,
    pub records: Vec<ExecutionRecord>,
    pub report: String,
}

pub fn load_plan(path: &Path) -> anyhow::Result<ResearchPlan> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read plan file {}", path.display()))?;
    let plan: ResearchPlan = serde_json::from_str(&raw)
        .with_context(|| format!("invalid plan JSON in {}", path.display()))?;
    anyhow::ensure!(!plan.steps.is_empty(), "plan {} has no steps", path.display());
    Ok(plan)
}

/// 加载配置并校验 [agent] 段；只有未显式指定配置文件时，加载失败才回退默认值
pub fn load_app_config(config_path: Option<PathBuf>) -> anyhow::Result<AppConfig> {
    let cfg = match config_path {
        Some(path) => load_config(Some(path.clone()))
            .with_context(|| format!("failed to load config file {}", path.display()))?,
        None => load_config(None).unwrap_or_else(|e| {
            tracing::warn!("Config load failed ({}), using defaults", e);
            AppConfig::default()
        }),
    };
    cfg.agent.validate().context("invalid [agent] configuration")?;
    Ok(cfg)
}

/// Durable 层后端：配置了 durable_dir 时落盘，否则仅在内存中
pub fn build_persistence(cfg: &AppConfig) -> Arc<dyn DurablePersistence> {
    match &cfg.storage.durable_dir {
        Some(dir) => {
            tracing::info!(dir = %dir.display(), "Using file-backed durable artifacts");
            Arc::new(FilePersistence::new(dir))
        }
        None => Arc::new(InMemoryPersistence::new()),
    }
}

pub fn build_orchestrator(
    cfg: &AppConfig,
    llm: Arc<dyn LlmClient>,
    persistence: Arc<dyn DurablePersistence>,
    event_tx: Option<UnboundedSender<AgentEvent>>,
) -> anyhow::Result<DeepAgentOrchestrator> {
    let mut orchestrator = DeepAgentOrchestrator::new(cfg.agent.clone(), llm, persistence)
        .context("failed to build orchestrator")?
        .with_thread_id(cfg.app.thread_id.clone())
        .with_tool_timeout(cfg.tools.tool_timeout_secs)
        .with_event_tx(event_tx);
    if cfg.tools.crawl.enabled {
        orchestrator = orchestrator.with_tool(Arc::new(CrawlTool::new(
            cfg.tools.crawl.allowed_domains.clone(),
            cfg.tools.crawl.timeout_secs,
            cfg.tools.crawl.max_result_chars,
        )));
    }
    tracing::info!(tools = ?orchestrator.tool_names(), "orchestrator ready");
    Ok(orchestrator)
}

/// 执行整份计划并生成报告
pub async fn run_plan(
    cfg: &AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    plan: ResearchPlan,
    supervisor: SessionSupervisor,
    reporter: &dyn Reporter,
    event_tx: Option<UnboundedSender<AgentEvent>>,
) -> anyhow::Result<RunReport> {
    let llm = llm.unwrap_or_else(|| create_llm_from_config(cfg));
    let persistence = build_persistence(cfg);
    let orchestrator = build_orchestrator(cfg, llm, persistence, event_tx.clone())?;
    let scheduler = PairwiseScheduler::new(Arc::new(orchestrator))
        .with_supervisor(supervisor)
        .with_event_tx(event_tx);

    let ResearchPlan {
        query,
        mut steps,
        resources,
    } = plan;
    let records = scheduler.run(&mut steps, &resources, &query).await;
    let input = ReportInput::new(query, steps.clone(), records.clone());
    let report = reporter.report(&input).await.context("reporter failed")?;
    Ok(RunReport {
        steps,
        records,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_plan() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"{{"query": "q", "steps": [{{"index": 1, "title": "A"}}, {{"index": 2, "title": "B", "tools": ["crawl"]}}]}}"#
        )
        .unwrap();
        let plan = load_plan(f.path()).unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[1].tools, vec!["crawl".to_string()]);
        assert!(plan.resources.is_empty());
    }

    #[test]
    fn test_load_plan_rejects_empty() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"{{"query": "q", "steps": []}}"#).unwrap();
        assert!(load_plan(f.path()).is_err());
    }

    fn toml_file(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(f, "{content}").unwrap();
        f
    }

    #[test]
    fn test_explicit_config_errors_are_reported() {
        let broken = toml_file("[agent\nmax_iterations_per_batch = ");
        let err = load_app_config(Some(broken.path().to_path_buf())).unwrap_err();
        assert!(err.to_string().contains("failed to load config file"));

        let missing = broken.path().with_file_name("no-such-config.toml");
        assert!(load_app_config(Some(missing)).is_err());
    }

    #[test]
    fn test_explicit_config_overrides_defaults() {
        let f = toml_file("[agent]\nmax_iterations_per_batch = 7\n");
        let cfg = load_app_config(Some(f.path().to_path_buf())).unwrap();
        assert_eq!(cfg.agent.max_iterations_per_batch, 7);
    }

    #[test]
    fn test_crawl_registered_when_enabled() {
        let mut cfg = AppConfig::default();
        cfg.tools.crawl.enabled = true;
        let orch = build_orchestrator(
            &cfg,
            Arc::new(crate::llm::MockLlmClient),
            Arc::new(InMemoryPersistence::new()),
            None,
        )
        .unwrap();
        assert!(orch.tool_names().contains(&"crawl".to_string()));
    }
}
