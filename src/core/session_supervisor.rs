//! 会话监管：取消、暂停 / 恢复、状态订阅
//!
//! 每个会话一个 SessionSupervisor。取消令牌可挂在全局关闭令牌下（Ctrl+C 取消所有会话）；
//! 暂停点以「已完成轮数」表示，编排器进入下一轮前检查。

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{watch, Notify, RwLock};
use tokio_util::sync::CancellationToken;

use crate::core::state::SessionSnapshot;

/// 进入下一轮前的检查结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    Continue,
    Pause,
    Cancelled,
}

#[derive(Debug)]
pub struct SessionSupervisor {
    cancel_token: CancellationToken,
    /// 完成该轮数后暂停
    pause_at: RwLock<Option<u32>>,
    /// 最近一次检查返回了 Pause，尚未恢复
    paused: AtomicBool,
    resume: Notify,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// 父令牌取消时本会话随之取消
    pub fn with_parent(parent: &CancellationToken) -> Self {
        Self::with_token(parent.child_token())
    }

    fn with_token(cancel_token: CancellationToken) -> Self {
        let (snapshot_tx, _) = watch::channel(SessionSnapshot::default());
        Self {
            cancel_token,
            pause_at: RwLock::new(None),
            paused: AtomicBool::new(false),
            resume: Notify::new(),
            snapshot_tx,
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// 停止发起新的轮次；进行中的请求自然结束
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// 完成 turns 轮后暂停
    pub async fn pause_at(&self, turns: u32) {
        *self.pause_at.write().await = Some(turns);
    }

    /// 恢复运行；next 为下一个暂停点。未处于暂停时只更新暂停点
    pub async fn resume(&self, next: Option<u32>) {
        *self.pause_at.write().await = next;
        if self.paused.swap(false, Ordering::SeqCst) {
            self.resume.notify_one();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub async fn checkpoint(&self, completed_turns: u32) -> Checkpoint {
        if self.is_cancelled() {
            return Checkpoint::Cancelled;
        }
        match *self.pause_at.read().await {
            Some(n) if completed_turns >= n => {
                self.paused.store(true, Ordering::SeqCst);
                Checkpoint::Pause
            }
            _ => Checkpoint::Continue,
        }
    }

    /// 等待恢复；被取消时返回 false
    pub async fn wait_resume(&self) -> bool {
        tokio::select! {
            _ = self.resume.notified() => true,
            _ = self.cancel_token.cancelled() => false,
        }
    }

    pub fn publish(&self, snapshot: SessionSnapshot) {
        self.snapshot_tx.send_replace(snapshot);
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_tx.borrow().clone()
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_checkpoint_pause_and_resume() {
        let sup = SessionSupervisor::new();
        assert_eq!(sup.checkpoint(0).await, Checkpoint::Continue);
        sup.pause_at(2).await;
        assert_eq!(sup.checkpoint(1).await, Checkpoint::Continue);
        assert_eq!(sup.checkpoint(2).await, Checkpoint::Pause);

        sup.resume(Some(4)).await;
        assert!(sup.wait_resume().await);
        assert_eq!(sup.checkpoint(2).await, Checkpoint::Continue);
    }

    #[tokio::test]
    async fn test_resume_without_pause_does_not_skip_later_pause() {
        let sup = SessionSupervisor::new();
        sup.resume(None).await;
        assert!(!sup.is_paused());

        sup.pause_at(1).await;
        assert_eq!(sup.checkpoint(1).await, Checkpoint::Pause);
        assert!(sup.is_paused());
        let waited = tokio::time::timeout(Duration::from_millis(50), sup.wait_resume()).await;
        assert!(waited.is_err());

        sup.resume(None).await;
        assert!(sup.wait_resume().await);
        assert!(!sup.is_paused());
    }

    #[tokio::test]
    async fn test_parent_cancel_propagates() {
        let parent = CancellationToken::new();
        let sup = SessionSupervisor::with_parent(&parent);
        parent.cancel();
        assert_eq!(sup.checkpoint(0).await, Checkpoint::Cancelled);
        assert!(!sup.wait_resume().await);
    }

    #[test]
    fn test_publish_reaches_subscribers() {
        let sup = SessionSupervisor::new();
        let rx = sup.subscribe();
        sup.publish(SessionSnapshot {
            turn_index: 3,
            ..SessionSnapshot::default()
        });
        assert_eq!(rx.borrow().turn_index, 3);
        assert_eq!(sup.snapshot().turn_index, 3);
    }
}
