//! 针对存储瞬时冲突的指数退避重试

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{AppError, AppResult};

/// 重试策略
///
/// delay = initial_delay * multiplier^attempt，封顶 max_delay，
/// 实际睡眠时间在 [delay/2, delay] 之间随机，避免大量请求同时重试。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            policy: RetryPolicy::default(),
        }
    }

    /// 不重试（测试用）
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay.min(self.max_delay);
        }
        let delay_ms =
            self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let delay = Duration::from_millis(delay_ms as u64);
        delay.min(self.max_delay)
    }

    fn jittered(&self, attempt: usize) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        let ms = delay.as_millis() as u64;
        if ms < 2 {
            return delay;
        }
        Duration::from_millis(rand::thread_rng().gen_range(ms / 2..=ms))
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.policy.max_retries = max_retries;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.policy.multiplier = multiplier;
        self
    }

    pub fn build(self) -> RetryPolicy {
        self.policy
    }
}

/// 执行 operation，遇到可重试错误 ([`AppError::is_retryable`]) 时退避重试。
/// 业务拒绝直接返回；重试耗尽后返回最后一次的错误。
pub async fn retry_on_conflict<F, Fut, T>(
    policy: &RetryPolicy,
    what: &str,
    operation: F,
) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    retry_loop(policy, None, what, operation).await
}

/// 与 [`retry_on_conflict`] 相同，但整体受 `budget` 限制。
///
/// 预算只在两次尝试之间检查：已经开始的尝试（包括其中的提交）总会执行完，
/// 它的结果原样返回，因此调用方不会在订单已提交时收到超时。
/// 预算不足以再睡一次退避时返回 [`AppError::Timeout`]。
pub async fn retry_within<F, Fut, T>(
    policy: &RetryPolicy,
    budget: Duration,
    what: &str,
    operation: F,
) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let deadline = Instant::now() + budget;
    retry_loop(policy, Some((deadline, budget)), what, operation).await
}

async fn retry_loop<F, Fut, T>(
    policy: &RetryPolicy,
    deadline: Option<(Instant, Duration)>,
    what: &str,
    mut operation: F,
) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(v) => {
                if attempt > 0 {
                    log::info!("{what} succeeded after {attempt} retries");
                }
                return Ok(v);
            }
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.jittered(attempt);
                if let Some((deadline, budget)) = deadline {
                    if Instant::now() + delay >= deadline {
                        log::warn!("{what} gave up after {} attempt(s): {e}", attempt + 1);
                        return Err(AppError::Timeout(format!("{what} exceeded {budget:?}")));
                    }
                }
                log::warn!(
                    "{what} hit a transient conflict (attempt {}), retrying in {:?}: {e}",
                    attempt + 1,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    log::error!("{what} failed after {attempt} retries: {e}");
                }
                return Err(e);
            }
        }
    }
}
