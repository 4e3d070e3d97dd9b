//! 会话错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 SessionError 决定 UseFallback / FailSession。

use thiserror::Error;

/// 会话运行过程中可能出现的错误（配置、网络、认证、生成失败等）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// 任务无步骤、task_id 无效、角色不存在等
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 超时、连接被重置、5xx：请求可能已被服务端处理
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// 连接未建立：请求确定没有到达服务端
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Authentication rejected: {0}")]
    Authentication(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// 平台业务错误（code != 200 或 success = false）
    #[error("Platform rejected request: {0}")]
    Rejected(String),

    #[error("Operation failed after {attempts} attempt(s): {cause}")]
    OperationFailed {
        cause: Box<SessionError>,
        attempts: u32,
    },

    #[error("Answer generation failed: {0}")]
    GenerationFailed(String),
}

impl SessionError {
    /// 是否属于可重试的瞬时错误
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SessionError::TransientNetwork(_)
                | SessionError::Connect(_)
                | SessionError::RateLimited(_)
        )
    }

    /// 瞬时错误中，请求是否可能已被服务端处理（at-most-once 操作不可重放）
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, SessionError::TransientNetwork(_))
    }

    /// 剥掉 OperationFailed 外壳，取最内层原因
    pub fn root_cause(&self) -> &SessionError {
        match self {
            SessionError::OperationFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 记录本轮失败，改用后备回答来源（人工输入等）
    UseFallback(String),
    /// 终止会话，保留已有对话记录
    FailSession,
}
