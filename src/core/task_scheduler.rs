//! 会话调度：用 Semaphore 限制同时运行的会话数

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub struct TaskScheduler {
    session_semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl TaskScheduler {
    pub fn new(max_concurrent_sessions: usize) -> Self {
        let max_concurrent = max_concurrent_sessions.max(1);
        Self {
            session_semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// 获取会话运行许可；调度器关闭时返回 None
    pub async fn acquire_session(&self) -> Option<OwnedSemaphorePermit> {
        self.session_semaphore.clone().acquire_owned().await.ok()
    }

    pub fn available(&self) -> usize {
        self.session_semaphore.available_permits()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(5)
    }
}
