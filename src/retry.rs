use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::debug;

use crate::config::RetryConfig;

/// 外部调用统一使用的退避策略：指数增长、上限截断、可选抖动。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Self::default()
        }
    }

    /// 只尝试一次，不做重试。
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter,
        }
    }

    /// 第 `attempt` 次失败（从 1 开始）之后的等待时长，未加抖动。
    pub fn backoff(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as u32;
        let scaled = self.base_delay.saturating_mul(1u32 << exponent);
        scaled.min(self.max_delay.max(self.base_delay))
    }

    fn delay_for(&self, attempt: usize) -> Duration {
        let delay = self.backoff(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let factor = rand::rng().random_range(0.5..=1.0);
        delay.mul_f64(factor)
    }
}

/// 按照 `policy` 重试异步操作，闭包参数为当前尝试序号（从 1 开始）。
pub async fn retry_async<F, Fut, T, E>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts => {
                let delay = policy.delay_for(attempt);
                debug!(
                    target: "retry",
                    label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "调用失败，准备重试"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let counter = AtomicUsize::new(0);
        let policy = RetryPolicy::new(4, Duration::from_millis(1));
        let res: Result<u32, String> = retry_async(&policy, "test", |_| {
            let current = counter.fetch_add(1, Ordering::Relaxed);
            async move {
                if current < 2 {
                    Err("boom".to_string())
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(res.unwrap(), 7);
        assert_eq!(counter.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let counter = AtomicUsize::new(0);
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let res: Result<(), String> = retry_async(&policy, "test", |attempt| {
            counter.fetch_add(1, Ordering::Relaxed);
            async move { Err(format!("attempt {attempt}")) }
        })
        .await;

        assert_eq!(res.unwrap_err(), "attempt 2");
        assert_eq!(counter.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            jitter: false,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(9), Duration::from_millis(350));
    }
}
