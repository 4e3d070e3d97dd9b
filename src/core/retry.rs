//! 重试控制：有界指数退避 + 逐次放宽的单次超时
//!
//! - 瞬时错误（超时、连接重置、429、5xx）按策略重试，延迟为 `base_delay * 2^已尝试次数`
//! - 非瞬时错误（认证失败、载荷格式错误、业务拒绝）立即返回
//! - at-most-once 操作（如提交对话）遇到「请求可能已送达」的失败时不重放，避免重复提交

use std::future::Future;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::RetrySection;
use crate::core::SessionError;

/// 操作是否可以安全重放
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idempotency {
    Idempotent,
    AtMostOnce,
}

/// 重试策略（启动时构造，运行期不变）
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 总尝试次数上限（含首次）
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// 第 N 次尝试的超时；次数超过列表长度时沿用最后一项
    pub timeout_schedule: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            timeout_schedule: vec![
                Duration::from_secs(60),
                Duration::from_secs(120),
                Duration::from_secs(180),
            ],
        }
    }
}

impl RetryPolicy {
    pub fn from_config(section: &RetrySection) -> Self {
        let timeout_schedule = section
            .timeout_schedule_secs
            .iter()
            .map(|s| Duration::from_secs(*s))
            .collect();
        Self {
            max_attempts: section.max_attempts.max(1),
            base_delay: Duration::from_millis(section.base_delay_ms),
            timeout_schedule,
        }
    }

    /// 第 attempt 次（从 1 开始）尝试的超时
    pub fn timeout_for(&self, attempt: u32) -> Duration {
        let idx = attempt.saturating_sub(1) as usize;
        self.timeout_schedule
            .get(idx)
            .or_else(|| self.timeout_schedule.last())
            .copied()
            .unwrap_or(Duration::from_secs(60))
    }

    /// 已失败 attempts_made 次后，下一次尝试前的等待
    pub fn delay_after(&self, attempts_made: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempts_made))
    }
}

/// 成功结果及其代价
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome<T> {
    pub value: T,
    pub attempts: u32,
    pub total_delay: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct RetryController {
    policy: RetryPolicy,
}

impl RetryController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// 执行 operation；label 仅用于日志
    pub async fn execute<T, F, Fut>(
        &self,
        label: &str,
        idempotency: Idempotency,
        mut operation: F,
    ) -> Result<RetryOutcome<T>, SessionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SessionError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempts = 0u32;
        let mut total_delay = Duration::ZERO;

        loop {
            attempts += 1;
            let timeout = self.policy.timeout_for(attempts);
            let result = match tokio::time::timeout(timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(SessionError::TransientNetwork(format!(
                    "{label} timed out after {}s",
                    timeout.as_secs()
                ))),
            };

            let err = match result {
                Ok(value) => {
                    if attempts > 1 {
                        info!(operation = label, attempts, "request succeeded after retry");
                    }
                    return Ok(RetryOutcome {
                        value,
                        attempts,
                        total_delay,
                    });
                }
                Err(err) => err,
            };

            if !err.is_transient() {
                warn!(operation = label, error = %err, "non-retryable error");
                return Err(err);
            }

            if idempotency == Idempotency::AtMostOnce && err.is_ambiguous() {
                warn!(
                    operation = label,
                    error = %err,
                    "ambiguous failure on at-most-once operation, not re-submitting"
                );
                return Err(SessionError::OperationFailed {
                    cause: Box::new(err),
                    attempts,
                });
            }

            if attempts >= max_attempts {
                error!(operation = label, attempts, error = %err, "all retry attempts exhausted");
                return Err(SessionError::OperationFailed {
                    cause: Box::new(err),
                    attempts,
                });
            }

            let delay = self.policy.delay_after(attempts);
            warn!(
                operation = label,
                attempt = attempts,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying after transient failure"
            );
            tokio::time::sleep(delay).await;
            total_delay += delay;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn policy(base_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(base_ms),
            timeout_schedule: vec![Duration::from_secs(60), Duration::from_secs(120)],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt() {
        let controller = RetryController::new(policy(100));
        let calls = AtomicU32::new(0);

        let outcome = controller
            .execute("list_steps", Idempotency::Idempotent, || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(SessionError::TransientNetwork("connection reset".into()))
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(outcome.value, "ok");
        assert_eq!(outcome.attempts, 3);
        // 100ms * (2^1 + 2^2)
        assert_eq!(outcome.total_delay, Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_returns_operation_failed() {
        let controller = RetryController::new(policy(10));
        let err = controller
            .execute("list_steps", Idempotency::Idempotent, || async {
                Err::<(), _>(SessionError::TransientNetwork("reset".into()))
            })
            .await
            .unwrap_err();

        match err {
            SessionError::OperationFailed { attempts, cause } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*cause, SessionError::TransientNetwork(_)));
            }
            other => panic!("Expected OperationFailed, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_authentication_not_retried() {
        let controller = RetryController::new(policy(10));
        let calls = AtomicU32::new(0);
        let err = controller
            .execute("init_step", Idempotency::Idempotent, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(SessionError::Authentication("401".into())) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, SessionError::Authentication(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_at_most_once_does_not_resubmit_ambiguous_failure() {
        let controller = RetryController::new(policy(10));
        let calls = AtomicU32::new(0);
        let err = controller
            .execute("submit_turn", Idempotency::AtMostOnce, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(SessionError::TransientNetwork("reset".into())) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, SessionError::OperationFailed { attempts: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_at_most_once_retries_connect_failure() {
        let controller = RetryController::new(policy(10));
        let calls = AtomicU32::new(0);
        let outcome = controller
            .execute("submit_turn", Idempotency::AtMostOnce, || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n == 1 {
                        Err(SessionError::Connect("refused".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_attempt_times_out_and_escalates() {
        let controller = RetryController::new(RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(10),
            timeout_schedule: vec![Duration::from_secs(1), Duration::from_secs(5)],
        });
        let calls = AtomicU32::new(0);
        let outcome = controller
            .execute("complete", Idempotency::Idempotent, || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    // 首次耗时 2s 超过 1s 超时；第二次超时放宽到 5s
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    Ok::<_, SessionError>(n)
                }
            })
            .await
            .unwrap();
        assert_eq!(outcome.value, 2);
        assert_eq!(outcome.attempts, 2);
    }

    #[test]
    fn test_timeout_schedule_repeats_last_entry() {
        let p = policy(10);
        assert_eq!(p.timeout_for(1), Duration::from_secs(60));
        assert_eq!(p.timeout_for(2), Duration::from_secs(120));
        assert_eq!(p.timeout_for(7), Duration::from_secs(120));
    }
}
