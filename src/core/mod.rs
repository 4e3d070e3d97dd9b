//! 核心编排层：错误与恢复、重试、状态投影、会话监管、任务调度、主控循环

pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod retry;
pub mod session_supervisor;
pub mod shutdown;
pub mod state;
pub mod task_scheduler;

pub use error::{RecoveryAction, SessionError};
pub use orchestrator::{
    run_sessions, SessionContext, SessionLimits, SessionReport, WorkflowOrchestrator,
};
pub use recovery::RecoveryEngine;
pub use retry::{Idempotency, RetryController, RetryOutcome, RetryPolicy};
pub use session_supervisor::{Checkpoint, SessionSupervisor};
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use state::{Session, SessionSnapshot, SessionStatus, StopReason};
pub use task_scheduler::TaskScheduler;
