//! Rate-limit backoff around agent calls.
//!
//! Only `AgentError::RateLimited` is retried. Every other failure, and the
//! rate-limit error itself once the policy's bounds are exhausted, goes back
//! to the caller.

use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::agent::{AgentError, Provider};

/// Wait distribution for one provider: `base - U[jitter_low, jitter_high]` seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffSchedule {
    base_secs: f64,
    jitter_low: f64,
    jitter_high: f64,
}

impl BackoffSchedule {
    /// Schedule tuned to the provider's rate-limit window.
    ///
    /// Mistral limits requests per second; the others limit tokens per minute.
    pub fn for_provider(provider: Provider) -> Self {
        match provider {
            Provider::Mistral => Self {
                base_secs: 5.0,
                jitter_low: 0.0,
                jitter_high: 4.0,
            },
            Provider::OpenAi | Provider::Anthropic | Provider::Ollama => Self {
                base_secs: 60.0,
                jitter_low: -10.0,
                jitter_high: 10.0,
            },
        }
    }

    /// Shortest possible wait.
    pub fn min_wait(&self) -> Duration {
        Duration::from_secs_f64(self.base_secs - self.jitter_high)
    }

    /// Longest possible wait.
    pub fn max_wait(&self) -> Duration {
        Duration::from_secs_f64(self.base_secs - self.jitter_low)
    }

    /// Draws one wait, rounded to hundredths of a second.
    pub fn wait_interval<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let jitter = rng.gen_range(self.jitter_low..=self.jitter_high);
        let secs = ((self.base_secs - jitter) * 100.0).round() / 100.0;
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// Bounds on rate-limit retries. The default is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: Option<u32>,
    /// Wall-clock budget measured from the first attempt.
    pub deadline: Option<Duration>,
}

impl RetryPolicy {
    /// Returns true if another retry is allowed after `retries` retries,
    /// given `elapsed` time and the next `wait`.
    fn allows(&self, retries: u32, elapsed: Duration, wait: Duration) -> bool {
        let under_count = self.max_retries.map_or(true, |max| retries < max);
        let under_deadline = self.deadline.map_or(true, |limit| elapsed + wait <= limit);
        under_count && under_deadline
    }
}

/// Sleeps and reissues `call` while it reports a rate limit and the policy allows.
pub async fn with_rate_limit_retry<T, F, Fut>(
    schedule: BackoffSchedule,
    policy: RetryPolicy,
    mut call: F,
) -> Result<T, AgentError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AgentError>>,
{
    with_retry_using(schedule, policy, &mut call, |wait| tokio::time::sleep(wait)).await
}

async fn with_retry_using<T, F, Fut, S, SFut>(
    schedule: BackoffSchedule,
    policy: RetryPolicy,
    call: &mut F,
    mut sleep: S,
) -> Result<T, AgentError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AgentError>>,
    S: FnMut(Duration) -> SFut,
    SFut: Future<Output = ()>,
{
    let start = Instant::now();
    let mut retries = 0;

    loop {
        match call().await {
            Err(AgentError::RateLimited(message)) => {
                // Draw before awaiting so the thread-local RNG is not held across the sleep.
                let wait = schedule.wait_interval(&mut rand::thread_rng());
                if !policy.allows(retries, start.elapsed(), wait) {
                    warn!("Rate limit retries exhausted after {} retries", retries);
                    return Err(AgentError::RateLimited(message));
                }
                warn!("{message}");
                warn!("Rate limit hit, waiting for {:.2} seconds...", wait.as_secs_f64());
                sleep(wait).await;
                retries += 1;
            }
            other => return other,
        }
    }
}
