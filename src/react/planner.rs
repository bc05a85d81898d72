//! Planner：提示拼装与模型输出解析
//!
//! 文本协议：纯文本聊天后端以 JSON 表达工具调用，支持两种形式：
//! - `{"tool_calls": [{"id": "call_1", "name": "read_file", "args": {...}}]}`
//! - `{"tool": "read_file", "args": {...}}`
//!
//! 可包在 ```json 代码块中；不含 JSON 的回复视为最终回答。

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::llm::{LlmClient, LlmError, ModelReply, ModelRequest, ToolSpec};
use crate::memory::{ConversationTurn, ToolCall};
use crate::tools::schema::tool_call_schema_json;

#[derive(Debug, Deserialize)]
struct RawCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(alias = "tool")]
    name: String,
    #[serde(default, alias = "arguments")]
    args: Value,
}

/// 生成工具调用 id（模型未给出时）
pub fn new_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

/// 候选 JSON 块
struct JsonBlock<'a> {
    /// JSON 之前的文本
    preamble: &'a str,
    body: &'a str,
    /// 整条回复只有这一个块（没有前后文）
    standalone: bool,
}

fn extract_json_block(text: &str) -> Option<JsonBlock<'_>> {
    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        let (body, after) = match rest.find("```") {
            Some(end) => (&rest[..end], &rest[end + 3..]),
            None => (rest, ""),
        };
        let preamble = &text[..start];
        return Some(JsonBlock {
            preamble,
            body: body.trim(),
            standalone: preamble.trim().is_empty() && after.trim().is_empty(),
        });
    }
    if text.starts_with('{') {
        return Some(JsonBlock {
            preamble: "",
            body: text,
            standalone: true,
        });
    }
    None
}

fn malformed(err: impl std::fmt::Display, raw: &str) -> LlmError {
    let preview: String = raw.chars().take(200).collect();
    LlmError::MalformedOutput(format!("{err}: {preview}"))
}

/// 解析模型文本输出为 ModelReply
pub fn parse_model_output(output: &str) -> Result<ModelReply, LlmError> {
    let trimmed = output.trim();
    let Some(block) = extract_json_block(trimmed) else {
        return Ok(ModelReply::text(trimmed));
    };
    let (preamble, json_str) = (block.preamble, block.body);

    // 正文中夹带的示例 JSON 不是工具调用；只有整条回复就是 JSON 时解析失败才算格式错误
    let value: Value = match serde_json::from_str(json_str) {
        Ok(value) => value,
        Err(_) if !block.standalone => return Ok(ModelReply::text(trimmed)),
        Err(e) => return Err(malformed(e, json_str)),
    };

    let raw_calls: Vec<RawCall> = if let Some(calls) = value.get("tool_calls") {
        serde_json::from_value(calls.clone()).map_err(|e| malformed(e, json_str))?
    } else if value.get("tool").is_some() || (value.get("name").is_some() && value.get("args").is_some()) {
        vec![serde_json::from_value(value).map_err(|e| malformed(e, json_str))?]
    } else {
        // 普通 JSON 内容（非工具调用）按最终回答处理
        return Ok(ModelReply::text(trimmed));
    };

    let tool_calls: Vec<ToolCall> = raw_calls
        .into_iter()
        .filter(|c| !c.name.trim().is_empty())
        .map(|c| ToolCall {
            id: c
                .id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(new_call_id),
            name: c.name.trim().to_string(),
            args: if c.args.is_null() { json!({}) } else { c.args },
        })
        .collect();

    if tool_calls.is_empty() {
        return Ok(ModelReply::text(trimmed));
    }
    Ok(ModelReply {
        content: preamble.trim().to_string(),
        tool_calls,
    })
}

/// 将 assistant 的工具调用还原为协议文本（发回文本后端时使用）
pub fn render_tool_calls(content: &str, calls: &[ToolCall]) -> String {
    let payload = json!({
        "tool_calls": calls
            .iter()
            .map(|c| json!({ "id": c.id, "name": c.name, "args": c.args }))
            .collect::<Vec<_>>()
    });
    if content.trim().is_empty() {
        payload.to_string()
    } else {
        format!("{}\n```json\n{}\n```", content.trim(), payload)
    }
}

/// 工具清单与调用格式说明，拼在 system prompt 之后
pub fn render_tool_protocol(tools: &[ToolSpec]) -> String {
    if tools.is_empty() {
        return String::new();
    }
    let mut out = String::from("\n\n## Available tools\n");
    for tool in tools {
        out.push_str(&format!(
            "- {}: {}\n  parameters: {}\n",
            tool.name, tool.description, tool.parameters
        ));
    }
    out.push_str(
        "\n## Tool call format\n\
        To call tools, reply with only one JSON object (optionally in a ```json block):\n\
        {\"tool_calls\": [{\"id\": \"call_1\", \"name\": \"tool_name\", \"args\": {...}}]}\n\
        Calls are executed in order. When you are done, reply in plain text without JSON.\n\
        JSON schema of a single call:\n",
    );
    out.push_str(&tool_call_schema_json());
    out
}

/// 主研究智能体的基础指令
pub fn orchestrator_instructions(delegation_enabled: bool) -> String {
    let mut text = String::from(
        "You are the lead researcher executing an accepted research plan.\n\
        Work through the steps of the current batch using the available tools.\n\
        Keep working notes in artifacts (write_file / edit_file) instead of repeating them in chat; \
        use tier \"durable\" only for material that must survive later runs.\n\
        When the batch is complete, write the consolidated findings to `final_report.md` \
        and answer with a short plain-text summary.",
    );
    if delegation_enabled {
        text.push_str(
            "\nFor focused sub-tasks, call the `delegate` tool with one specialist role and a self-contained brief; \
            the specialist sees only that brief, not this conversation.",
        );
    }
    text
}

/// Planner：持有 LLM、system prompt 与工具集，按当前上下文发起一次模型调用
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
    tools: Vec<ToolSpec>,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>, tools: Vec<ToolSpec>) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
            tools,
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn tools(&self) -> &[ToolSpec] {
        &self.tools
    }

    /// 获取 LLM 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    pub async fn next(&self, turn: &ConversationTurn) -> Result<ModelReply, LlmError> {
        let request = ModelRequest::act(
            self.system_prompt.clone(),
            turn.messages().to_vec(),
            self.tools.clone(),
        );
        self.llm.invoke(&request).await
    }
}
