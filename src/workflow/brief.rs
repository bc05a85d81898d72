//! 批次 brief 拼装

use crate::workflow::types::{PlanStep, ResourceRef};

/// 原始研究问题的最大字符数
pub const MAX_USER_QUERY_CHARS: usize = 6000;
/// 已完成步骤结论在 brief 中的最大字符数
pub const MAX_STEP_DETAIL_CHARS: usize = 600;

pub const LOCAL_SEARCH_REMINDER: &str =
    "You MUST use the **local_search_tool** to retrieve the information from the resource files.";

pub const CITATION_REMINDER: &str = "IMPORTANT: Track all sources and include a References section at the end \
using link reference format. Include an empty line between each citation.";

fn truncate_with_marker(text: &str, max_chars: usize, marker: &str) -> String {
    if text.chars().count() > max_chars {
        format!("{}{}", text.chars().take(max_chars).collect::<String>(), marker)
    } else {
        text.to_string()
    }
}

fn render_step(step: &PlanStep) -> String {
    let mut out = format!("## Step {}: {}\n", step.index, step.title);
    if !step.description.trim().is_empty() {
        out.push_str(step.description.trim());
        out.push('\n');
    }
    if let Some(step_type) = &step.step_type {
        out.push_str(&format!("- Step type: {step_type}\n"));
    }
    if step.need_search {
        out.push_str("- Requires search: true\n");
    }
    if !step.tools.is_empty() {
        out.push_str(&format!("- Suggested tools: {}\n", step.tools.join(", ")));
    }
    out
}

/// 组装一个批次的 brief
///
/// `completed` 为此前批次已完成的步骤，其结论截断后作为背景。
pub fn compose_brief(
    user_query: &str,
    batch: &[PlanStep],
    completed: &[PlanStep],
    resources: &[ResourceRef],
) -> String {
    let query = user_query.trim();
    let query = if query.is_empty() {
        "(No direct user message captured.)".to_string()
    } else {
        truncate_with_marker(query, MAX_USER_QUERY_CHARS, "\n\n...[truncated]")
    };

    let mut sections = vec![format!("# Original Research Brief\n\n{query}")];

    let finished: Vec<String> = completed
        .iter()
        .filter_map(|s| {
            let res = s.execution_res.as_deref()?.trim();
            if res.is_empty() {
                return None;
            }
            Some(format!(
                "## Completed Step {}: {}\n\n<finding>\n{}\n</finding>",
                s.index,
                s.title,
                truncate_with_marker(res, MAX_STEP_DETAIL_CHARS, "...")
            ))
        })
        .collect();
    if !finished.is_empty() {
        sections.push(format!("# Completed Research Steps\n\n{}", finished.join("\n\n")));
    }

    let steps: Vec<String> = batch.iter().map(render_step).collect();
    sections.push(format!("# Steps For This Batch\n\n{}", steps.join("\n")).trim_end().to_string());

    sections.push(
        "# Execution Instructions\n\n\
        - Work through every step of this batch with tool-driven research before drafting findings.\n\
        - Keep intermediate notes in artifacts (`write_file` / `edit_file`) rather than in the conversation.\n\
        - Delegate focused sub-tasks to specialists when it helps; give each a self-contained brief.\n\
        - Write the consolidated findings for this batch to `final_report.md`, then reply with a short summary."
            .to_string(),
    );

    if !resources.is_empty() {
        let mut lines = vec!["**The user mentioned the following resource files:**".to_string(), String::new()];
        for r in resources {
            lines.push(format!("- {} ({})", r.title, r.description));
        }
        lines.push(String::new());
        lines.push(LOCAL_SEARCH_REMINDER.to_string());
        sections.push(lines.join("\n"));
    }

    sections.push(CITATION_REMINDER.to_string());
    sections.join("\n\n")
}
