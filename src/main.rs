//! deep-research 命令行入口
//!
//! 用法：deep-research <plan.json> [--config <file>] [--out <report.md>] [--events]
//! Ctrl-C 在当前批次结束后停止后续批次。

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use deep_research::agent::{load_app_config, load_plan, run_plan};
use deep_research::core::SessionSupervisor;
use deep_research::observability;
use deep_research::workflow::MarkdownReporter;

#[derive(Parser, Debug)]
#[command(name = "deep-research")]
#[command(about = "Execute an accepted research plan batch by batch and print the report")]
#[command(version)]
struct Cli {
    /// 研究计划 JSON 文件
    plan: PathBuf,

    /// 配置文件（缺省时按 config/default.toml 查找）
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 报告输出路径（缺省打印到 stdout）
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// 以 JSON 行把事件输出到 stderr
    #[arg(long)]
    events: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let args = Cli::parse();
    let cfg = load_app_config(args.config)?;
    let plan = load_plan(&args.plan)?;

    let supervisor = SessionSupervisor::new();
    let on_signal = supervisor.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Ctrl-C received, stopping after the current batch");
            on_signal.cancel();
        }
    });

    let event_tx = if args.events {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(ev) = rx.recv().await {
                if let Ok(line) = serde_json::to_string(&ev) {
                    eprintln!("{line}");
                }
            }
        });
        Some(tx)
    } else {
        None
    };

    let result = run_plan(&cfg, None, plan, supervisor, &MarkdownReporter, event_tx)
        .await
        .context("research run failed")?;

    tracing::info!(
        batches = result.records.len(),
        failed = result.records.iter().filter(|r| r.outcome.is_failed()).count(),
        "run finished"
    );
    match args.out {
        Some(path) => std::fs::write(&path, &result.report)
            .with_context(|| format!("failed to write report to {}", path.display()))?,
        None => println!("{}", result.report),
    }
    Ok(())
}
