//! 产物工具：ls / read_file / write_file / edit_file
//!
//! 对智能体暴露 ArtifactStore；tier 参数默认为 ephemeral。
//! read_file 以 `cat -n` 形式分页输出；edit_file 默认要求 old_string 恰好出现一次。

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::artifacts::Tier;
use crate::core::AgentError;
use crate::tools::{parse_args, Tool, ToolContext, ToolKind};

const DEFAULT_READ_LIMIT: usize = 2000;
const MAX_LINE_CHARS: usize = 2000;
pub const EMPTY_FILE_REMINDER: &str = "System reminder: File exists but has empty contents";

fn parse_tier(tier: Option<&str>) -> Result<Tier, AgentError> {
    tier.unwrap_or("ephemeral").parse()
}

fn tier_schema() -> Value {
    json!({
        "type": "string",
        "enum": ["ephemeral", "durable"],
        "description": "ephemeral (default): scratch space for this run; durable: kept across runs of this thread"
    })
}

/// `cat -n` 风格输出：行号右对齐 6 位 + Tab；超长行截断
pub fn render_numbered(content: &str, offset: usize, limit: usize) -> Result<String, AgentError> {
    if content.trim().is_empty() {
        return Ok(EMPTY_FILE_REMINDER.to_string());
    }
    let lines: Vec<&str> = content.lines().collect();
    if offset >= lines.len() {
        return Err(AgentError::ToolExecutionFailed(format!(
            "Line offset {offset} exceeds file length ({} lines)",
            lines.len()
        )));
    }
    let end = offset.saturating_add(limit).min(lines.len());
    let rendered: Vec<String> = lines[offset..end]
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let line: String = line.chars().take(MAX_LINE_CHARS).collect();
            format!("{:6}\t{}", offset + i + 1, line)
        })
        .collect();
    Ok(rendered.join("\n"))
}

#[derive(Debug, Deserialize)]
struct LsArgs {
    #[serde(default)]
    tier: Option<String>,
}

/// 列出产物路径
pub struct LsTool;

#[async_trait]
impl Tool for LsTool {
    fn name(&self) -> &str {
        "ls"
    }

    fn description(&self) -> &str {
        "List artifact paths. Without a tier, lists both tiers."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "tier": tier_schema() },
            "required": []
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Artifact
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, AgentError> {
        let args: LsArgs = parse_args(self.name(), args)?;
        let out = match args.tier.as_deref() {
            Some(tier) => json!(ctx.artifacts.list(parse_tier(Some(tier))?).await?),
            None => json!({
                "ephemeral": ctx.artifacts.list(Tier::Ephemeral).await?,
                "durable": ctx.artifacts.list(Tier::Durable).await?,
            }),
        };
        Ok(out.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ReadArgs {
    #[serde(alias = "file_path")]
    path: String,
    #[serde(default)]
    tier: Option<String>,
    #[serde(default)]
    offset: usize,
    #[serde(default)]
    limit: Option<usize>,
}

/// 读取产物（分页）
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read an artifact with line numbers. Use offset/limit to page through long files."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "tier": tier_schema(),
                "offset": { "type": "integer", "description": "0-based first line" },
                "limit": { "type": "integer", "description": "max lines, default 2000" }
            },
            "required": ["path"]
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Artifact
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, AgentError> {
        let args: ReadArgs = parse_args(self.name(), args)?;
        let tier = parse_tier(args.tier.as_deref())?;
        let content = ctx.artifacts.read(tier, &args.path).await?;
        render_numbered(&content, args.offset, args.limit.unwrap_or(DEFAULT_READ_LIMIT))
    }
}

#[derive(Debug, Deserialize)]
struct WriteArgs {
    #[serde(alias = "file_path")]
    path: String,
    content: String,
    #[serde(default)]
    tier: Option<String>,
}

/// 创建或覆盖产物
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite an artifact."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string" },
                "tier": tier_schema()
            },
            "required": ["path", "content"]
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Artifact
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, AgentError> {
        let args: WriteArgs = parse_args(self.name(), args)?;
        let tier = parse_tier(args.tier.as_deref())?;
        ctx.artifacts
            .write(tier, &args.path, &args.content, &ctx.agent_id)
            .await?;
        Ok(format!("Updated file {} ({tier})", args.path))
    }
}

#[derive(Debug, Deserialize)]
struct EditArgs {
    #[serde(alias = "file_path")]
    path: String,
    #[serde(alias = "old")]
    old_string: String,
    #[serde(alias = "new")]
    new_string: String,
    #[serde(default)]
    replace_all: bool,
    #[serde(default)]
    tier: Option<String>,
}

/// 精确替换产物中的字符串
pub struct EditFileTool;

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace old_string with new_string in an existing artifact. old_string must occur exactly once \
        unless replace_all is true."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "old_string": { "type": "string" },
                "new_string": { "type": "string" },
                "replace_all": { "type": "boolean", "default": false },
                "tier": tier_schema()
            },
            "required": ["path", "old_string", "new_string"]
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Artifact
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, AgentError> {
        let args: EditArgs = parse_args(self.name(), args)?;
        let tier = parse_tier(args.tier.as_deref())?;
        let outcome = ctx
            .artifacts
            .edit(
                tier,
                &args.path,
                &args.old_string,
                &args.new_string,
                args.replace_all,
                &ctx.agent_id,
            )
            .await?;
        if args.replace_all {
            Ok(format!(
                "Successfully replaced {} instance(s) of the string in '{}'",
                outcome.replacements, args.path
            ))
        } else {
            Ok(format!("Successfully replaced string in '{}'", args.path))
        }
    }
}
