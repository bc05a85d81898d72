//! 专家子智能体与 delegate 工具
//!
//! 角色是封闭集合；每次委派构造只含角色指令与 brief 的独立上下文，
//! 复用同一条中间件管线，但拥有自己的 Budget 与计时状态。
//! 子智能体内不注册 delegate 工具，且 depth >= 1 时工具本身拒绝执行（深度固定为 1）。

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedSender;

use crate::core::{AgentError, Termination};
use crate::llm::LlmClient;
use crate::memory::{Budget, ConversationTurn, Message};
use crate::middleware::MiddlewarePipeline;
use crate::react::events::{preview, send_event, AgentEvent};
use crate::react::loop_::{run_agent_loop, AgentSession};
use crate::react::Planner;
use crate::tools::{parse_args, Tool, ToolContext, ToolExecutor, ToolKind, ToolRegistry};

const ALLOWED_ROLES: &str = "research, critique, strategist, synthesizer, architect, auditor";
const BRIEF_PREVIEW_CHARS: usize = 200;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialistRole {
    Research,
    Critique,
    Strategist,
    Synthesizer,
    Architect,
    Auditor,
}

impl SpecialistRole {
    pub const ALL: [SpecialistRole; 6] = [
        SpecialistRole::Research,
        SpecialistRole::Critique,
        SpecialistRole::Strategist,
        SpecialistRole::Synthesizer,
        SpecialistRole::Architect,
        SpecialistRole::Auditor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SpecialistRole::Research => "research",
            SpecialistRole::Critique => "critique",
            SpecialistRole::Strategist => "strategist",
            SpecialistRole::Synthesizer => "synthesizer",
            SpecialistRole::Architect => "architect",
            SpecialistRole::Auditor => "auditor",
        }
    }

    /// 给主智能体看的一句话说明
    pub fn description(&self) -> &'static str {
        match self {
            SpecialistRole::Research => {
                "Researches one focused topic in depth. Give it a single topic per call; \
                for several topics, delegate several times."
            }
            SpecialistRole::Critique => {
                "Critiques the current report draft (read it from final_report.md) and lists concrete improvements."
            }
            SpecialistRole::Strategist => {
                "Turns an ambiguous or broad request into precise, searchable research directives."
            }
            SpecialistRole::Synthesizer => {
                "Turns raw crawled material into relevance-scored insights with evidence, implications and open gaps."
            }
            SpecialistRole::Architect => {
                "Proposes high-leverage follow-up questions and counterfactual checks for the current findings."
            }
            SpecialistRole::Auditor => {
                "Audits findings for evidentiary strength, missing citations, quantitative accuracy and risk coverage."
            }
        }
    }

    /// 子智能体的 system prompt
    pub fn instructions(&self) -> String {
        let focus = match self {
            SpecialistRole::Research => {
                "You are a dedicated researcher. Investigate the topic in the brief thoroughly, \
                using the search and crawl tools when available. Your final answer is handed back verbatim, \
                so make it a detailed, self-contained report with sources for every claim."
            }
            SpecialistRole::Critique => {
                "You are a dedicated editor. Read final_report.md (and any notes the brief mentions) and critique it: \
                missing sections, unsupported claims, weak structure, unclear wording. \
                Do not rewrite the report yourself; answer with a prioritized list of fixes."
            }
            SpecialistRole::Strategist => {
                "You are a query strategist. Rewrite the request in the brief into a short list of precise, \
                unambiguous research directives with explicit scope, time range and success criteria."
            }
            SpecialistRole::Synthesizer => {
                "You are an insight synthesizer. From the material in the brief and the referenced artifacts, \
                extract insights, score each for relevance (high / medium / low), \
                and give the supporting evidence, its implications and the remaining gaps."
            }
            SpecialistRole::Architect => {
                "You are an exploration architect. Propose the follow-up investigations with the highest expected value, \
                including counterfactual checks that could overturn the current conclusions."
            }
            SpecialistRole::Auditor => {
                "You are an evidence auditor. Check each finding for evidentiary strength, missing or weak citations, \
                quantitative accuracy and unaddressed risks. Answer with a finding-by-finding verdict."
            }
        };
        format!(
            "{focus}\n\nYou only see the brief below, not the lead researcher's conversation. \
            You may read and write artifacts. You cannot delegate further. \
            When finished, reply in plain text without tool calls."
        )
    }
}

impl fmt::Display for SpecialistRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpecialistRole {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        let role = match normalized.as_str() {
            "research" | "research-agent" | "researcher" => SpecialistRole::Research,
            "critique" | "critique-agent" | "critic" => SpecialistRole::Critique,
            "strategist" | "query-strategist" => SpecialistRole::Strategist,
            "synthesizer" | "insight-synthesizer" => SpecialistRole::Synthesizer,
            "architect" | "exploration-architect" => SpecialistRole::Architect,
            "auditor" | "evidence-auditor" => SpecialistRole::Auditor,
            _ => {
                return Err(AgentError::InvalidRole {
                    role: s.to_string(),
                    allowed: ALLOWED_ROLES.to_string(),
                })
            }
        };
        Ok(role)
    }
}

/// 一次委派的记录；随 DelegationFinished 事件发出，output_report 写回父上下文
#[derive(Debug, Clone, Serialize)]
pub struct Delegation {
    pub role: SpecialistRole,
    pub input_brief: String,
    pub output_report: String,
}

/// 子智能体运行限制
#[derive(Debug, Clone, Copy)]
pub struct SubagentLimits {
    pub max_iterations: usize,
    pub time_limit: Duration,
    pub token_ceiling: usize,
    pub tool_timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
struct DelegateArgs {
    #[serde(alias = "subagent_type")]
    role: String,
    #[serde(alias = "description", alias = "input_brief")]
    brief: String,
}

pub struct DelegateTool {
    base_tools: ToolRegistry,
    llm: Arc<dyn LlmClient>,
    pipeline: MiddlewarePipeline,
    limits: SubagentLimits,
    event_tx: Option<UnboundedSender<AgentEvent>>,
    description: String,
}

impl DelegateTool {
    /// base_tools 中的委派类工具会被剔除
    pub fn new(
        base_tools: &ToolRegistry,
        llm: Arc<dyn LlmClient>,
        pipeline: MiddlewarePipeline,
        limits: SubagentLimits,
    ) -> Self {
        let mut description = String::from(
            "Delegate a self-contained sub-task to a specialist agent. \
            The specialist sees only the brief you write, so include all necessary context. Roles:\n",
        );
        for role in SpecialistRole::ALL {
            description.push_str(&format!("- {}: {}\n", role, role.description()));
        }
        Self {
            base_tools: base_tools.without_kind(ToolKind::Delegate),
            llm,
            pipeline,
            limits,
            event_tx: None,
            description,
        }
    }

    pub fn with_event_tx(mut self, tx: Option<UnboundedSender<AgentEvent>>) -> Self {
        self.event_tx = tx;
        self
    }

    async fn run_specialist(
        &self,
        role: SpecialistRole,
        brief: &str,
        ctx: &ToolContext,
    ) -> Result<(Termination, String), AgentError> {
        let child_ctx = ctx.child(role.as_str());
        let planner = Planner::new(self.llm.clone(), role.instructions(), self.base_tools.specs());
        let executor = ToolExecutor::new(self.base_tools.clone(), self.limits.tool_timeout_secs);
        let session = AgentSession::new(&planner, &executor, &self.pipeline, &child_ctx)
            .with_max_iterations(self.limits.max_iterations)
            .with_event_tx(self.event_tx.clone());
        let turn = ConversationTurn::from_messages(vec![Message::user(brief)]);
        let mut budget = Budget::new(self.limits.token_ceiling, self.limits.time_limit);

        let result = run_agent_loop(&session, turn, &mut budget)
            .await
            .map_err(|e| match e {
                AgentError::ModelInvocation(inner) => {
                    AgentError::ToolExecutionFailed(format!("specialist {role} failed: {inner}"))
                }
                other => other,
            })?;

        let output = if result.output.trim().is_empty() {
            format!("Specialist {role} finished ({:?}) without a textual answer.", result.outcome)
        } else {
            result.output
        };
        Ok((result.outcome, output))
    }
}

#[async_trait]
impl Tool for DelegateTool {
    fn name(&self) -> &str {
        "delegate"
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "role": {
                    "type": "string",
                    "enum": SpecialistRole::ALL.iter().map(|r| r.as_str()).collect::<Vec<_>>()
                },
                "brief": { "type": "string", "description": "Self-contained task description for the specialist" }
            },
            "required": ["role", "brief"]
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Delegate
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, AgentError> {
        if ctx.depth >= 1 {
            return Err(AgentError::ToolExecutionFailed(
                "delegation is not available inside a specialist".to_string(),
            ));
        }
        let args: DelegateArgs = parse_args(self.name(), args)?;
        let role: SpecialistRole = args.role.parse()?;
        let brief = args.brief.trim();
        if brief.is_empty() {
            return Err(AgentError::ToolExecutionFailed("brief must not be empty".to_string()));
        }

        tracing::info!(role = %role, parent = %ctx.agent_id, "delegation started");
        send_event(
            &self.event_tx,
            AgentEvent::DelegationStarted {
                role: role.to_string(),
                brief_preview: preview(brief, BRIEF_PREVIEW_CHARS),
            },
        );

        let (outcome, output) = match self.run_specialist(role, brief, ctx).await {
            Ok(done) => done,
            Err(e) => {
                tracing::warn!(role = %role, error = %e, "delegation failed");
                send_event(
                    &self.event_tx,
                    AgentEvent::DelegationFinished {
                        role: role.to_string(),
                        outcome: None,
                        preview: preview(&e.to_string(), BRIEF_PREVIEW_CHARS),
                        delegation: None,
                    },
                );
                return Err(e);
            }
        };

        let delegation = Delegation {
            role,
            input_brief: brief.to_string(),
            output_report: output,
        };
        tracing::info!(
            role = %delegation.role,
            brief_chars = delegation.input_brief.chars().count(),
            report_chars = delegation.output_report.chars().count(),
            "delegation finished"
        );
        send_event(
            &self.event_tx,
            AgentEvent::DelegationFinished {
                role: role.to_string(),
                outcome: Some(outcome),
                preview: preview(&delegation.output_report, BRIEF_PREVIEW_CHARS),
                delegation: Some(delegation.clone()),
            },
        );
        Ok(delegation.output_report)
    }
}
