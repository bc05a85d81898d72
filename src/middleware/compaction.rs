//! 上下文预算治理
//!
//! 估算当前上下文 token 数；超过 `token_limit * high_water_mark` 时，选取最早的一段连续消息
//! （不含最近一条用户指令、不含最近 recency_window 条消息、不拆开工具调用簇），
//! 以 Summarize 模式调用模型生成摘要，并原位替换为一条摘要消息。
//!
//! 每次模型调用最多压缩一次；摘要失败时跳过，下一次模型调用前重试。

use std::sync::Arc;

use async_trait::async_trait;

use crate::llm::{LlmClient, ModelRequest};
use crate::memory::{Budget, ConversationTurn, Message, Role, TokenEstimator};
use crate::middleware::{Stage, StageEffect};

pub const SUMMARY_MESSAGE_NAME: &str = "summary";
pub const TRUNCATION_MARKER_PREFIX: &str = "[Context truncated to preserve window.";

const SUMMARY_INSTRUCTIONS: &str = "Summarize the conversation excerpt below for your own later use. \
Keep every concrete finding, source URL, artifact path, open question and decision. \
Drop greetings, repetition and raw tool output that has already been digested. \
Answer with the summary only.";

pub struct ContextBudgetGovernor {
    llm: Arc<dyn LlmClient>,
    estimator: Arc<dyn TokenEstimator>,
    high_water_mark: f64,
    recency_window: usize,
}

impl ContextBudgetGovernor {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        estimator: Arc<dyn TokenEstimator>,
        high_water_mark: f64,
        recency_window: usize,
    ) -> Self {
        Self {
            llm,
            estimator,
            high_water_mark,
            recency_window,
        }
    }

    pub fn threshold(&self, budget: &Budget) -> usize {
        (budget.token_limit as f64 * self.high_water_mark) as usize
    }

    /// 可压缩区间 [start, end)；长度不足 2 时返回 None
    pub fn compaction_range(&self, turn: &ConversationTurn) -> Option<(usize, usize)> {
        let messages = turn.messages();
        let len = messages.len();
        let recency_start = len.saturating_sub(self.recency_window);
        let instruction = turn.latest_instruction_index();

        // 最早的连续区间：指令之前，或者（指令之前不够长时）指令之后到近期窗口之前
        let mut candidates = Vec::with_capacity(2);
        match instruction {
            Some(idx) => {
                candidates.push((0, idx.min(recency_start)));
                candidates.push((idx + 1, recency_start));
            }
            None => candidates.push((0, recency_start)),
        }

        for (start, end) in candidates {
            let mut end = end;
            // 不拆开工具调用簇：区间末尾之后若是 tool 结果，把所属 assistant 一并留在区间外
            while end > start && end < len && messages[end].role == Role::Tool {
                end -= 1;
            }
            if end >= start + 2 {
                return Some((start, end));
            }
        }
        None
    }

    async fn compact(&self, turn: &mut ConversationTurn, budget: &mut Budget, tokens_before: usize) -> Option<StageEffect> {
        let (start, end) = self.compaction_range(turn)?;
        let excerpt = turn.messages()[start..end].to_vec();
        let request = ModelRequest::summarize(SUMMARY_INSTRUCTIONS, excerpt);

        let summary = match self.llm.invoke(&request).await {
            Ok(reply) if !reply.content.trim().is_empty() => reply.content,
            Ok(_) => {
                tracing::warn!("summarization returned empty text; will retry next turn");
                return Some(StageEffect::CompactionFailed {
                    reason: "empty summary".to_string(),
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "summarization failed; will retry next turn");
                return Some(StageEffect::CompactionFailed {
                    reason: e.to_string(),
                });
            }
        };

        let summary_msg = Message::system(format!("Previous conversation summary:\n\n{}", summary.trim()))
            .with_name(SUMMARY_MESSAGE_NAME);
        turn.messages_mut().splice(start..end, std::iter::once(summary_msg));
        budget.record_compaction();

        let tokens_after = self.estimator.estimate_messages(turn.messages());
        budget.tokens_consumed_estimate = tokens_after;
        tracing::info!(
            removed = end - start,
            tokens_before,
            tokens_after,
            "context compacted"
        );
        Some(StageEffect::Compacted {
            removed_messages: end - start,
            tokens_before,
            tokens_after,
        })
    }

    /// 最近一条用户指令本身超过水位时按比例截断
    fn truncate_instruction(&self, turn: &mut ConversationTurn, budget: &mut Budget) -> Option<StageEffect> {
        let threshold = self.threshold(budget);
        let idx = turn.latest_instruction_index()?;
        let content = &turn.messages()[idx].content;
        let instruction_tokens = self.estimator.estimate(content);
        if instruction_tokens <= threshold {
            return None;
        }

        let total_chars = content.chars().count();
        let keep_chars = (total_chars as f64 * threshold as f64 / instruction_tokens as f64 * 0.9) as usize;
        let omitted = total_chars.saturating_sub(keep_chars);
        if omitted == 0 {
            return None;
        }
        let mut truncated: String = content.chars().take(keep_chars).collect();
        truncated.push_str(&format!(
            "\n\n{TRUNCATION_MARKER_PREFIX} Omitted approximately {omitted} characters.]"
        ));
        turn.messages_mut()[idx].content = truncated;
        budget.tokens_consumed_estimate = self.estimator.estimate_messages(turn.messages());
        tracing::warn!(omitted_chars = omitted, "latest instruction truncated to fit context window");
        Some(StageEffect::Truncated {
            omitted_chars: omitted,
        })
    }
}

#[async_trait]
impl Stage for ContextBudgetGovernor {
    fn name(&self) -> &'static str {
        "context_budget"
    }

    async fn process(&self, turn: &mut ConversationTurn, budget: &mut Budget) -> Vec<StageEffect> {
        let tokens = self.estimator.estimate_messages(turn.messages());
        budget.tokens_consumed_estimate = tokens;
        let threshold = self.threshold(budget);
        if tokens <= threshold || budget.compacted_this_turn() {
            return Vec::new();
        }

        let mut effects = Vec::new();
        effects.extend(self.compact(turn, budget, tokens).await);
        if budget.tokens_consumed_estimate > threshold {
            effects.extend(self.truncate_instruction(turn, budget));
        }
        effects
    }
}
