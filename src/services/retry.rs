//! 统一的重试包装
//!
//! 所有能力接口调用都经过 [`call_with_retry`]：
//! - 瞬时错误（超时、限流、网络）指数退避重试，直到尝试次数上限
//! - 配额 / 无效请求立即失败
//! - 每次调用可设置单独的超时，超时按瞬时错误处理

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{CapabilityError, WorkflowError};

/// 重试策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 总尝试次数（包含第一次）
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// 单次调用超时
    pub call_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            call_timeout: Some(Duration::from_secs(60)),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.retry_max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.retry_initial_backoff_ms),
            max_backoff: Duration::from_millis(config.retry_max_backoff_ms),
            call_timeout: (config.call_timeout_secs > 0)
                .then(|| Duration::from_secs(config.call_timeout_secs)),
        }
    }

    /// 不等待的策略，测试用
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            call_timeout: None,
        }
    }

    /// 第 `attempt` 次失败后的等待时间：initial * 2^(attempt-1)，不超过 max_backoff
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

/// 按策略执行一次能力接口调用
///
/// `operation` 只用于日志和错误信息，例如 `"researcher.search"`。
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, WorkflowError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CapabilityError>>,
{
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        let outcome = match policy.call_timeout {
            Some(limit) => match timeout(limit, call()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(CapabilityError::timeout(format!(
                    "{} 超过 {:?} 未返回",
                    operation, limit
                ))),
            },
            None => call().await,
        };

        let error = match outcome {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} 在第 {} 次尝试成功", operation, attempt);
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        if !error.is_transient() {
            return Err(WorkflowError::Capability {
                operation: operation.to_string(),
                source: error,
            });
        }

        if attempt == max_attempts {
            warn!("{} 重试耗尽 ({} 次): {}", operation, attempt, error);
            return Err(WorkflowError::RetriesExhausted {
                operation: operation.to_string(),
                attempts: attempt,
                last: error,
            });
        }

        let wait = policy
            .backoff_for(attempt)
            .max(error.retry_after().unwrap_or_default());
        warn!(
            "{} 瞬时错误 (尝试 {}/{}), 等待 {:?} 后重试: {}",
            operation, attempt, max_attempts, wait, error
        );
        sleep(wait).await;
    }

    unreachable!("max_attempts >= 1 保证循环内返回")
}
