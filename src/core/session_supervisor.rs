//! 会话监管：跨批次取消
//!
//! 外部工作流只能在批次之间请求取消；调度器每完成一个批次检查一次令牌，不打断进行中的批次。

use tokio_util::sync::CancellationToken;

/// 研究运行的生命周期管理：持有取消令牌
#[derive(Debug, Clone, Default)]
pub struct SessionSupervisor {
    cancel_token: CancellationToken,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// 请求取消：当前批次跑完后停止派发新批次
    pub fn cancel(&self) {
        tracing::info!("cancellation requested; stopping after the current batch");
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_shared_with_clones() {
        let supervisor = SessionSupervisor::new();
        let token = supervisor.cancel_token();
        assert!(!token.is_cancelled());
        supervisor.clone().cancel();
        assert!(token.is_cancelled());
        assert!(supervisor.is_cancelled());
    }
}
