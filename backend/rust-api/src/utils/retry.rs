use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Exponential backoff for transient storage failures such as aborted
/// MongoDB transactions.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(25),
            max_delay: Duration::from_millis(400),
            jitter: Duration::from_millis(25),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based), without jitter.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    fn delay(&self, retry: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_ms)
        };
        self.base_delay(retry) + Duration::from_millis(extra)
    }
}

/// Runs `op` until it succeeds, fails with an error `is_transient` rejects,
/// or the policy runs out of attempts. The last error is returned.
pub async fn retry_transient<F, Fut, T, E, P>(
    policy: RetryPolicy,
    mut op: F,
    is_transient: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut retry = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if retry + 1 < policy.max_attempts && is_transient(&err) => {
                retry += 1;
                let delay = policy.delay(retry);
                tracing::debug!(
                    retry,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying transient failure"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
