//! 调用上下文
//!
//! 携带取消令牌、可选截止时间和当前事务句柄。事务句柄只能由协调器写入，
//! 外部通过 [`tx_from_context`] 读取。

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use txguard_errors::ContextError;

use crate::handle::TransactionHandle;

#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
    tx: Option<TransactionHandle>,
}

impl Context {
    /// 不会被取消、没有截止时间的根上下文
    pub fn background() -> Self {
        Self::default()
    }

    /// 由外部令牌控制取消
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
            tx: None,
        }
    }

    /// 派生子上下文，取消子上下文不影响父上下文
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
            tx: self.tx.clone(),
        }
    }

    /// 派生带截止时间的子上下文，取较早的截止时间
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let mut child = self.child();
        child.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        child
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub(crate) fn with_transaction(&self, handle: TransactionHandle) -> Self {
        Self {
            token: self.token.clone(),
            deadline: self.deadline,
            tx: Some(handle),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// 上下文已结束时返回原因，取消优先于超时
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// 等待上下文结束
    pub async fn done(&self) -> ContextError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = self.token.cancelled() => ContextError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                ContextError::Cancelled
            }
        }
    }

    /// 在上下文结束前运行 `fut`，否则丢弃 `fut` 并返回结束原因
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, ContextError>
    where
        F: Future,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            output = fut => Ok(output),
        }
    }

    /// 可被取消的等待
    pub async fn sleep(&self, duration: Duration) -> Result<(), ContextError> {
        self.run(tokio::time::sleep(duration)).await
    }
}

/// 读取上下文中的事务句柄
pub fn tx_from_context(ctx: &Context) -> Option<TransactionHandle> {
    ctx.tx.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_is_never_done() {
        let ctx = Context::background();
        assert!(ctx.err().is_none());
        assert!(tx_from_context(&ctx).is_none());
        assert_eq!(ctx.run(async { 7 }).await, Ok(7));
    }

    #[tokio::test]
    async fn test_cancel_propagates_to_children_only() {
        let parent = Context::background();
        let child = parent.child();

        child.cancel();
        assert_eq!(child.err(), Some(ContextError::Cancelled));
        assert!(parent.err().is_none());

        let child = parent.child();
        parent.cancel();
        assert_eq!(child.err(), Some(ContextError::Cancelled));
        assert_eq!(child.done().await, ContextError::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline() {
        let ctx = Context::background().with_timeout(Duration::from_secs(1));
        assert!(ctx.err().is_none());

        let result = ctx.sleep(Duration::from_secs(10)).await;
        assert_eq!(result, Err(ContextError::DeadlineExceeded));
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_keeps_earlier_deadline() {
        let ctx = Context::background().with_timeout(Duration::from_secs(1));
        let child = ctx.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), ctx.deadline());
    }

    #[tokio::test]
    async fn test_run_aborts_on_cancel() {
        let ctx = Context::background();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result = ctx.run(std::future::pending::<()>()).await;
        assert_eq!(result, Err(ContextError::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_wins_over_deadline() {
        let ctx = Context::background().with_timeout(Duration::ZERO);
        ctx.cancel();
        assert_eq!(ctx.err(), Some(ContextError::Cancelled));
    }
}
