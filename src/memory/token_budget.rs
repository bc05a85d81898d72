//! 批次预算：token 估算与计时状态
//!
//! 每次编排调用开始时创建一份 Budget，批次结束即丢弃，不跨批次持久化。
//! 计时使用 tokio::time::Instant，测试中可用暂停时钟推进。

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::memory::Message;

/// Token 估算器：可替换实现（字符启发式 / 真实分词器），治理逻辑不依赖具体算法
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> usize;

    /// 整段消息序列的估算；每条消息额外计 4 个 token 的角色开销
    fn estimate_messages(&self, messages: &[Message]) -> usize {
        messages
            .iter()
            .map(|m| self.estimate(&m.estimation_text()) + 4)
            .sum()
    }
}

/// 按固定“字符/token”比例估算
#[derive(Debug, Clone)]
pub struct CharHeuristicEstimator {
    chars_per_token: f64,
}

impl CharHeuristicEstimator {
    pub fn new(chars_per_token: f64) -> Self {
        Self {
            chars_per_token: if chars_per_token > 0.0 { chars_per_token } else { 3.2 },
        }
    }

    pub fn chars_per_token(&self) -> f64 {
        self.chars_per_token
    }
}

impl Default for CharHeuristicEstimator {
    fn default() -> Self {
        Self::new(3.2)
    }
}

impl TokenEstimator for CharHeuristicEstimator {
    fn estimate(&self, text: &str) -> usize {
        let chars = text.chars().count();
        if chars == 0 {
            return 0;
        }
        (chars as f64 / self.chars_per_token).ceil() as usize
    }
}

/// 中英文混合估算：ASCII 约 4 字符/token，非 ASCII 约 1.5 字符/token
#[derive(Debug, Clone, Default)]
pub struct MixedScriptEstimator;

impl TokenEstimator for MixedScriptEstimator {
    fn estimate(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        let (ascii, non_ascii) = text.chars().fold((0usize, 0usize), |(a, n), c| {
            if c.is_ascii() {
                (a + 1, n)
            } else {
                (a, n + 1)
            }
        });
        (ascii / 4 + (non_ascii as f64 / 1.5).ceil() as usize).max(1)
    }
}

/// 计时器阶段；只能前进，Expired 为终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TimerPhase {
    Fresh,
    Nudged,
    FinalWarning,
    Expired,
}

/// 单次编排调用的 token 与时间预算
#[derive(Debug, Clone)]
pub struct Budget {
    pub token_limit: usize,
    pub tokens_consumed_estimate: usize,
    pub time_limit: Duration,
    pub elapsed_seconds: f64,
    pub nudges_sent: u32,
    pub timer_phase: TimerPhase,
    /// 已完成的模型调用次数
    pub model_turns: u32,
    /// 最近一次压缩发生在第几次模型调用之前
    pub last_compaction_turn: Option<u32>,
    pub compactions: u32,
    started: Instant,
}

impl Budget {
    pub fn new(token_limit: usize, time_limit: Duration) -> Self {
        Self {
            token_limit,
            tokens_consumed_estimate: 0,
            time_limit,
            elapsed_seconds: 0.0,
            nudges_sent: 0,
            timer_phase: TimerPhase::Fresh,
            model_turns: 0,
            last_compaction_turn: None,
            compactions: 0,
            started: Instant::now(),
        }
    }

    /// 在检查点读取耗时；elapsed_seconds 单调不减
    pub fn checkpoint(&mut self) -> f64 {
        let now = self.started.elapsed().as_secs_f64();
        if now > self.elapsed_seconds {
            self.elapsed_seconds = now;
        }
        self.elapsed_seconds
    }

    pub fn time_limit_seconds(&self) -> f64 {
        self.time_limit.as_secs_f64()
    }

    /// 已用时间占比；时间上限为 0 时视为已耗尽
    pub fn elapsed_fraction(&self) -> f64 {
        let limit = self.time_limit_seconds();
        if limit <= 0.0 {
            return 1.0;
        }
        self.elapsed_seconds / limit
    }

    pub fn remaining_seconds(&self) -> f64 {
        (self.time_limit_seconds() - self.elapsed_seconds).max(0.0)
    }

    pub fn is_expired(&self) -> bool {
        self.timer_phase == TimerPhase::Expired
    }

    pub fn record_model_turn(&mut self) {
        self.model_turns += 1;
    }

    /// 本次模型调用之前是否已经压缩过
    pub fn compacted_this_turn(&self) -> bool {
        self.last_compaction_turn == Some(self.model_turns)
    }

    pub fn record_compaction(&mut self) {
        self.last_compaction_turn = Some(self.model_turns);
        self.compactions += 1;
    }
}
