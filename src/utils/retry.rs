use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use crate::error::{Result, UploadError};

/// 重试策略
#[derive(Debug, Clone)]
pub enum RetryStrategy {
    /// 固定延迟
    Fixed(Duration),
    /// 指数退避
    Exponential {
        initial: Duration,
        multiplier: f64,
        max_delay: Duration,
    },
}

impl RetryStrategy {
    /// 计算第 n 次重试的延迟
    pub fn get_delay(&self, attempt: u32) -> Duration {
        match self {
            RetryStrategy::Fixed(delay) => *delay,
            RetryStrategy::Exponential { initial, multiplier, max_delay } => {
                let delay = initial.as_secs_f64() * multiplier.powf(attempt as f64);
                let delay = Duration::from_secs_f64(delay);
                std::cmp::min(delay, *max_delay)
            }
        }
    }
}

/// 重试配置
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大尝试次数（含首次）
    pub max_attempts: u32,
    pub strategy: RetryStrategy,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            strategy: RetryStrategy::Exponential {
                initial: initial_delay,
                multiplier: 2.0,
                max_delay: Duration::from_secs(60),
            },
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// 执行带重试的操作，只重试瞬时错误
pub async fn retry_with<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 0..policy.max_attempts.max(1) {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                if !error.is_retryable() {
                    return Err(error);
                }

                last_error = Some(error);

                // 不是最后一次尝试才等待
                if attempt + 1 < policy.max_attempts {
                    sleep(policy.strategy.get_delay(attempt)).await;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| UploadError::internal_error("retry exhausted")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: attempts,
            strategy: RetryStrategy::Fixed(Duration::from_millis(1)),
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let mut count = 0;
        let result = retry_with(&fast_policy(3), || {
            count += 1;
            let attempt = count;
            async move {
                if attempt < 3 {
                    Err(UploadError::server_error(503, "busy"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let mut count = 0;
        let result: Result<()> = retry_with(&fast_policy(3), || {
            count += 1;
            async { Err(UploadError::server_error(500, "down")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn permanent_errors_bail_immediately() {
        let mut count = 0;
        let result: Result<()> = retry_with(&fast_policy(5), || {
            count += 1;
            async { Err(UploadError::server_error(413, "too large")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(count, 1);
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let strategy = RetryStrategy::Exponential {
            initial: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(8),
        };
        assert_eq!(strategy.get_delay(0), Duration::from_secs(1));
        assert_eq!(strategy.get_delay(1), Duration::from_secs(2));
        assert_eq!(strategy.get_delay(2), Duration::from_secs(4));
        assert_eq!(strategy.get_delay(10), Duration::from_secs(8));
    }
}
