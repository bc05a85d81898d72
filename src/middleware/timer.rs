//! 耗时治理：Fresh -> Nudged -> FinalWarning -> Expired
//!
//! 只在检查点读取时间（模型调用前、工具派发前），从不 sleep。
//! 一次检查可以跨越多个阈值，此时 nudges_sent 逐级递增，但只注入最远阶段对应的一条提醒。
//! Expired 不注入消息，由循环负责终止。

use async_trait::async_trait;

use crate::memory::{Budget, ConversationTurn, Message, TimerPhase};
use crate::middleware::{Stage, StageEffect};

pub const TIMER_MESSAGE_NAME: &str = "timer";

const FINAL_WARNING_MESSAGE: &str = "Time is almost up. Stop calling tools now. \
Write your final answer immediately from the findings you already have, \
and make sure final_report.md contains the consolidated results.";

/// 剩余时间的可读形式："2 minutes"、"1 minute and 5 seconds"、"30 seconds"
pub fn format_remaining(seconds: f64) -> String {
    fn plural(n: u64, unit: &str) -> String {
        format!("{n} {unit}{}", if n == 1 { "" } else { "s" })
    }
    let bounded = seconds.max(0.0);
    if bounded >= 90.0 {
        return plural((bounded / 60.0).round() as u64, "minute");
    }
    if bounded >= 60.0 {
        let minutes = (bounded / 60.0).floor() as u64;
        let remainder = (bounded % 60.0).floor() as u64;
        if remainder == 0 {
            return plural(minutes, "minute");
        }
        return format!("{} and {}", plural(minutes, "minute"), plural(remainder, "second"));
    }
    plural((bounded.round() as u64).max(1), "second")
}

#[derive(Debug, Clone)]
pub struct ElapsedTimeGovernor {
    first_nudge_fraction: f64,
    final_warning_fraction: f64,
}

impl ElapsedTimeGovernor {
    pub fn new(first_nudge_fraction: f64, final_warning_fraction: f64) -> Self {
        Self {
            first_nudge_fraction,
            final_warning_fraction,
        }
    }

    fn phase_for(&self, fraction: f64) -> TimerPhase {
        if fraction >= 1.0 {
            TimerPhase::Expired
        } else if fraction >= self.final_warning_fraction {
            TimerPhase::FinalWarning
        } else if fraction >= self.first_nudge_fraction {
            TimerPhase::Nudged
        } else {
            TimerPhase::Fresh
        }
    }

    fn message_for(phase: TimerPhase, budget: &Budget) -> Option<String> {
        match phase {
            TimerPhase::Nudged => Some(format!(
                "Time check: about {} remaining. Converge on the most important findings \
                and start preparing the final response.",
                format_remaining(budget.remaining_seconds())
            )),
            TimerPhase::FinalWarning => Some(FINAL_WARNING_MESSAGE.to_string()),
            TimerPhase::Fresh | TimerPhase::Expired => None,
        }
    }

    /// 检查点：推进阶段并按需注入提醒
    pub fn check(&self, turn: &mut ConversationTurn, budget: &mut Budget) -> Option<StageEffect> {
        let elapsed_seconds = budget.checkpoint();
        let target = self.phase_for(budget.elapsed_fraction());
        let from = budget.timer_phase;
        if target <= from {
            return None;
        }

        for crossed in [TimerPhase::Nudged, TimerPhase::FinalWarning] {
            if from < crossed && crossed <= target {
                budget.nudges_sent += 1;
            }
        }
        budget.timer_phase = target;

        if let Some(text) = Self::message_for(target, budget) {
            let duplicate = turn
                .last()
                .is_some_and(|m| m.content.trim() == text.trim());
            if !duplicate {
                turn.push(Message::user(text).with_name(TIMER_MESSAGE_NAME));
            }
        }

        tracing::info!(
            from = ?from,
            to = ?target,
            elapsed_ms = (elapsed_seconds * 1000.0) as u64,
            nudges = budget.nudges_sent,
            "timer phase advanced"
        );
        Some(StageEffect::TimerTransition {
            from,
            to: target,
            elapsed_seconds,
        })
    }
}

#[async_trait]
impl Stage for ElapsedTimeGovernor {
    fn name(&self) -> &'static str {
        "elapsed_time"
    }

    async fn process(&self, turn: &mut ConversationTurn, budget: &mut Budget) -> Vec<StageEffect> {
        self.check(turn, budget).into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn governor() -> ElapsedTimeGovernor {
        ElapsedTimeGovernor::new(0.6, 0.85)
    }

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(120.0), "2 minutes");
        assert_eq!(format_remaining(65.0), "1 minute and 5 seconds");
        assert_eq!(format_remaining(60.0), "1 minute");
        assert_eq!(format_remaining(30.0), "30 seconds");
        assert_eq!(format_remaining(0.2), "1 second");
    }

    #[tokio::test(start_paused = true)]
    async fn test_phases_advance_in_order() {
        let g = governor();
        let mut turn = ConversationTurn::new();
        let mut budget = Budget::new(1000, Duration::from_secs(100));

        assert!(g.check(&mut turn, &mut budget).is_none());
        assert_eq!(budget.timer_phase, TimerPhase::Fresh);

        tokio::time::advance(Duration::from_secs(61)).await;
        g.check(&mut turn, &mut budget);
        assert_eq!(budget.timer_phase, TimerPhase::Nudged);
        assert_eq!(budget.nudges_sent, 1);
        assert_eq!(turn.len(), 1);
        assert_eq!(turn.messages()[0].name.as_deref(), Some(TIMER_MESSAGE_NAME));
        assert!(turn.messages()[0].content.contains("remaining"));

        // 同一阶段不重复注入
        assert!(g.check(&mut turn, &mut budget).is_none());
        assert_eq!(turn.len(), 1);

        tokio::time::advance(Duration::from_secs(25)).await;
        g.check(&mut turn, &mut budget);
        assert_eq!(budget.timer_phase, TimerPhase::FinalWarning);
        assert_eq!(budget.nudges_sent, 2);
        assert_eq!(turn.len(), 2);

        tokio::time::advance(Duration::from_secs(20)).await;
        g.check(&mut turn, &mut budget);
        assert!(budget.is_expired());
        assert_eq!(budget.nudges_sent, 2);
        assert_eq!(turn.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_jump_past_thresholds_injects_single_message() {
        let g = governor();
        let mut turn = ConversationTurn::new();
        let mut budget = Budget::new(1000, Duration::from_secs(100));
        tokio::time::advance(Duration::from_secs(90)).await;
        g.check(&mut turn, &mut budget);
        assert_eq!(budget.timer_phase, TimerPhase::FinalWarning);
        assert_eq!(budget.nudges_sent, 2);
        assert_eq!(turn.len(), 1);
        assert_eq!(turn.messages()[0].content, FINAL_WARNING_MESSAGE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_last_message_not_reinjected() {
        let g = governor();
        let mut turn = ConversationTurn::new();
        turn.push(Message::user(FINAL_WARNING_MESSAGE).with_name(TIMER_MESSAGE_NAME));
        let mut budget = Budget::new(1000, Duration::from_secs(100));
        tokio::time::advance(Duration::from_secs(90)).await;
        g.check(&mut turn, &mut budget);
        assert_eq!(turn.len(), 1);
        assert_eq!(budget.timer_phase, TimerPhase::FinalWarning);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nudges_monotonic_across_checkpoints() {
        let g = governor();
        let mut turn = ConversationTurn::new();
        let mut budget = Budget::new(1000, Duration::from_secs(50));
        let mut last_elapsed = 0.0;
        let mut last_nudges = 0;
        for _ in 0..12 {
            tokio::time::advance(Duration::from_secs(5)).await;
            g.check(&mut turn, &mut budget);
            assert!(budget.elapsed_seconds >= last_elapsed);
            assert!(budget.nudges_sent >= last_nudges);
            assert!(budget.nudges_sent - last_nudges <= 1);
            last_elapsed = budget.elapsed_seconds;
            last_nudges = budget.nudges_sent;
        }
        assert_eq!(budget.nudges_sent, 2);
        assert!(budget.is_expired());
    }
}
