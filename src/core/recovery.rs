//! 错误恢复引擎
//!
//! 根据 SessionError 类型返回 RecoveryAction，供编排器决定改用后备回答来源还是终止会话。

use crate::core::{RecoveryAction, SessionError};

/// 轮次级错误恢复：生成失败时若有后备来源则继续，否则终止
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// has_fallback：当前会话是否配置了后备回答来源（人工 / 回放）
    pub fn handle(&self, err: &SessionError, has_fallback: bool) -> RecoveryAction {
        match err.root_cause() {
            SessionError::GenerationFailed(msg) if has_fallback => RecoveryAction::UseFallback(
                format!("自动生成回答失败（{msg}），改用后备回答来源"),
            ),
            _ => RecoveryAction::FailSession,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_generation_failed_with_fallback() {
        let engine = RecoveryEngine::new();
        let err = SessionError::GenerationFailed("backend down".to_string());
        match engine.handle(&err, true) {
            RecoveryAction::UseFallback(msg) => assert!(msg.contains("backend down")),
            other => panic!("Expected UseFallback, got {other:?}"),
        }
    }

    #[test]
    fn test_recovery_generation_failed_without_fallback() {
        let engine = RecoveryEngine::new();
        let err = SessionError::GenerationFailed("backend down".to_string());
        assert_eq!(engine.handle(&err, false), RecoveryAction::FailSession);
    }

    #[test]
    fn test_recovery_wrapped_generation_failure() {
        let engine = RecoveryEngine::new();
        let err = SessionError::OperationFailed {
            cause: Box::new(SessionError::GenerationFailed("timeout".to_string())),
            attempts: 3,
        };
        assert!(matches!(engine.handle(&err, true), RecoveryAction::UseFallback(_)));
    }

    #[test]
    fn test_recovery_authentication_is_fatal() {
        let engine = RecoveryEngine::new();
        let err = SessionError::Authentication("401".to_string());
        assert_eq!(engine.handle(&err, true), RecoveryAction::FailSession);
    }

    #[test]
    fn test_recovery_configuration_is_fatal() {
        let engine = RecoveryEngine::new();
        let err = SessionError::Configuration("no steps".to_string());
        assert_eq!(engine.handle(&err, true), RecoveryAction::FailSession);
    }
}
