//! 工具调用修复
//!
//! 保证每个工具调用恰有一条相邻的结果消息，反之亦然：
//! 缺结果的调用补占位错误结果；找不到调用的结果（孤儿）与重复结果被丢弃。
//! 已配对的结果保持原有顺序；对已修复的上下文再次运行不产生任何变化。

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use crate::memory::{Budget, ConversationTurn, Message, Role};
use crate::middleware::{Stage, StageEffect};

pub const PLACEHOLDER_RESULT: &str = "Error: tool call did not complete";

#[derive(Debug, Clone, Copy, Default)]
pub struct ToolCallRepair;

impl ToolCallRepair {
    /// 返回 (补占位数, 丢弃数)
    pub fn repair(&self, turn: &mut ConversationTurn) -> (usize, usize) {
        let (placeholders, dropped, _) = self.repair_detailed(turn);
        (placeholders, dropped)
    }

    /// 返回 (补占位数, 丢弃数, 是否仅做了重排)；结果被挪回调用之后也需写回
    pub fn repair_detailed(&self, turn: &mut ConversationTurn) -> (usize, usize, bool) {
        let messages = turn.messages();

        // call id -> 首个声明它的 assistant 消息下标
        let mut owner: HashMap<&str, usize> = HashMap::new();
        for (i, m) in messages.iter().enumerate() {
            if m.has_tool_calls() {
                for call in &m.tool_calls {
                    owner.entry(call.id.as_str()).or_insert(i);
                }
            }
        }

        // call id -> 位于调用之后的首条结果
        let mut result_for: HashMap<&str, usize> = HashMap::new();
        for (i, m) in messages.iter().enumerate() {
            if m.role != Role::Tool {
                continue;
            }
            let Some(id) = m.tool_call_id.as_deref() else { continue };
            if let Some(&o) = owner.get(id) {
                if o < i {
                    result_for.entry(id).or_insert(i);
                }
            }
        }

        let mut out: Vec<Message> = Vec::with_capacity(messages.len());
        let mut placeholders = 0;
        let mut emitted: HashSet<usize> = HashSet::new();
        for (i, m) in messages.iter().enumerate() {
            if m.role == Role::Tool {
                continue;
            }
            out.push(m.clone());
            if !m.has_tool_calls() {
                continue;
            }
            let mut found: Vec<usize> = Vec::new();
            let mut missing = Vec::new();
            for call in &m.tool_calls {
                match result_for.get(call.id.as_str()) {
                    Some(&ri) if owner.get(call.id.as_str()) == Some(&i) && !found.contains(&ri) => {
                        found.push(ri)
                    }
                    _ => missing.push(call.id.clone()),
                }
            }
            found.sort_unstable();
            for ri in found {
                emitted.insert(ri);
                out.push(messages[ri].clone());
            }
            for id in missing {
                placeholders += 1;
                out.push(Message::tool_result(id, PLACEHOLDER_RESULT));
            }
        }

        let tool_messages = messages.iter().filter(|m| m.role == Role::Tool).count();
        let dropped = tool_messages - emitted.len();
        let reordered = placeholders == 0 && dropped == 0 && out.as_slice() != messages;
        if placeholders > 0 || dropped > 0 || reordered {
            *turn.messages_mut() = out;
        }
        (placeholders, dropped, reordered)
    }
}

#[async_trait]
impl Stage for ToolCallRepair {
    fn name(&self) -> &'static str {
        "tool_call_repair"
    }

    async fn process(&self, turn: &mut ConversationTurn, _budget: &mut Budget) -> Vec<StageEffect> {
        let (placeholders, dropped, reordered) = self.repair_detailed(turn);
        if placeholders == 0 && dropped == 0 && !reordered {
            return Vec::new();
        }
        tracing::info!(placeholders, dropped, reordered, "repaired tool call pairing");
        vec![StageEffect::Repaired {
            placeholders,
            dropped,
            reordered,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ToolCall;
    use serde_json::json;

    fn call(id: &str) -> ToolCall {
        ToolCall::new(id, "ls", json!({}))
    }

    #[test]
    fn test_dangling_call_gets_placeholder() {
        let mut turn = ConversationTurn::from_messages(vec![
            Message::user("go"),
            Message::assistant_with_calls("", vec![call("a"), call("b")]),
            Message::tool_result("a", "ok"),
            Message::user("next").with_name("timer"),
        ]);
        assert_eq!(ToolCallRepair.repair(&mut turn), (1, 0));
        let m = turn.messages();
        assert_eq!(m[2].tool_call_id.as_deref(), Some("a"));
        assert_eq!(m[3].tool_call_id.as_deref(), Some("b"));
        assert_eq!(m[3].content, PLACEHOLDER_RESULT);
        assert_eq!(m[4].name.as_deref(), Some("timer"));
    }

    #[test]
    fn test_orphan_and_duplicate_results_dropped() {
        let mut turn = ConversationTurn::from_messages(vec![
            Message::tool_result("ghost", "orphan"),
            Message::assistant_with_calls("", vec![call("a")]),
            Message::tool_result("a", "first"),
            Message::tool_result("a", "second"),
        ]);
        assert_eq!(ToolCallRepair.repair(&mut turn), (0, 2));
        assert_eq!(turn.len(), 2);
        assert_eq!(turn.messages()[1].content, "first");
    }

    #[test]
    fn test_interleaved_result_moved_next_to_call() {
        let mut turn = ConversationTurn::from_messages(vec![
            Message::user("go"),
            Message::assistant_with_calls("", vec![call("a")]),
            Message::user("Time check").with_name("timer"),
            Message::tool_result("a", "A"),
        ]);
        assert_eq!(ToolCallRepair.repair_detailed(&mut turn), (0, 0, true));
        let m = turn.messages();
        assert_eq!(m[1].tool_calls[0].id, "a");
        assert_eq!(m[2].tool_call_id.as_deref(), Some("a"));
        assert_eq!(m[3].name.as_deref(), Some("timer"));
        assert_eq!(ToolCallRepair.repair_detailed(&mut turn), (0, 0, false));
    }

    #[tokio::test]
    async fn test_stage_reports_reordering() {
        let mut turn = ConversationTurn::from_messages(vec![
            Message::assistant_with_calls("", vec![call("a")]),
            Message::user("interrupt"),
            Message::tool_result("a", "A"),
        ]);
        let mut budget = Budget::new(1000, std::time::Duration::from_secs(60));
        let effects = ToolCallRepair.process(&mut turn, &mut budget).await;
        assert_eq!(
            effects,
            vec![StageEffect::Repaired {
                placeholders: 0,
                dropped: 0,
                reordered: true,
            }]
        );
        assert_eq!(turn.messages()[1].role, Role::Tool);
    }

    #[test]
    fn test_well_formed_turn_untouched() {
        let original = ConversationTurn::from_messages(vec![
            Message::user("go"),
            Message::assistant_with_calls("", vec![call("a"), call("b")]),
            Message::tool_result("b", "B"),
            Message::tool_result("a", "A"),
            Message::assistant("done"),
        ]);
        let mut turn = original.clone();
        assert_eq!(ToolCallRepair.repair(&mut turn), (0, 0));
        assert_eq!(turn, original);
    }

    #[test]
    fn test_repair_is_idempotent() {
        let mut turn = ConversationTurn::from_messages(vec![
            Message::tool_result("x", "orphan"),
            Message::assistant_with_calls("", vec![call("a"), call("b")]),
            Message::user("interrupt"),
            Message::tool_result("a", "late"),
            Message::assistant_with_calls("", vec![call("c")]),
        ]);
        ToolCallRepair.repair(&mut turn);
        let once = turn.clone();
        assert_eq!(ToolCallRepair.repair(&mut turn), (0, 0));
        assert_eq!(turn, once);
        // 调用与结果相邻
        let m = once.messages();
        assert_eq!(m[0].tool_calls.len(), 2);
        assert_eq!(m[1].content, "late");
        assert_eq!(m[2].content, PLACEHOLDER_RESULT);
        assert_eq!(m[3].content, "interrupt");
    }
}
