use std::future::Future;
use std::time::Duration;

use super::client::RemoteError;

/// Bounded retry budget for one remote call.
///
/// Rate-limit and network retries are counted separately: a call can be
/// rate limited once and still get its network retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after a `Network` failure.
    pub network_retries: u32,
    /// Extra attempts after a `RateLimited` failure.
    pub rate_limit_retries: u32,
    pub backoff_base: Duration,
    pub backoff_factor: u32,
    /// Wait used when the platform sends no `Retry-After`.
    pub default_retry_after: Duration,
    /// Ceiling on any single wait.
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            network_retries: 2,
            rate_limit_retries: 1,
            backoff_base: Duration::from_secs(1),
            backoff_factor: 2,
            default_retry_after: Duration::from_secs(5),
            max_wait: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before network retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.saturating_pow(attempt);
        self.backoff_base.saturating_mul(factor).min(self.max_wait)
    }

    fn rate_limit_wait(&self, retry_after: Option<Duration>) -> Duration {
        retry_after
            .unwrap_or(self.default_retry_after)
            .min(self.max_wait)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's budget runs out. The last error is returned.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let mut network_used = 0;
    let mut rate_limit_used = 0;

    loop {
        let err = match op().await {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };

        let wait = match &err {
            RemoteError::RateLimited { retry_after } if rate_limit_used < policy.rate_limit_retries => {
                rate_limit_used += 1;
                policy.rate_limit_wait(*retry_after)
            }
            RemoteError::Network(_) if network_used < policy.network_retries => {
                let wait = policy.backoff(network_used);
                network_used += 1;
                wait
            }
            _ => {
                log::debug!("{}: giving up: {}", what, err);
                return Err(err);
            }
        };

        log::warn!("{}: {}; retrying in {:?}", what, err, wait);
        tokio::time::sleep(wait).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tokio::time::Instant;

    fn scripted(
        script: Vec<Result<u32, RemoteError>>,
    ) -> (Cell<usize>, Vec<Result<u32, RemoteError>>) {
        (Cell::new(0), script)
    }

    async fn run(
        policy: &RetryPolicy,
        calls: &Cell<usize>,
        script: &[Result<u32, RemoteError>],
    ) -> Result<u32, RemoteError> {
        call_with_retry(policy, "test", || {
            let n = calls.get();
            calls.set(n + 1);
            let step = script
                .get(n)
                .cloned()
                .unwrap_or_else(|| Err(RemoteError::Api("script exhausted".into())));
            async move { step }
        })
        .await
    }

    fn net() -> Result<u32, RemoteError> {
        Err(RemoteError::Network("connection reset".into()))
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(20), policy.max_wait);
    }

    #[tokio::test(start_paused = true)]
    async fn network_errors_retry_twice_then_fail() {
        let (calls, script) = scripted(vec![net(), net(), net(), Ok(1)]);
        let start = Instant::now();
        let res = run(&RetryPolicy::default(), &calls, &script).await;
        assert!(matches!(res, Err(RemoteError::Network(_))));
        assert_eq!(calls.get(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn network_error_recovers() {
        let (calls, script) = scripted(vec![net(), Ok(7)]);
        assert_eq!(run(&RetryPolicy::default(), &calls, &script).await, Ok(7));
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_waits_retry_after_once() {
        let limited = || {
            Err(RemoteError::RateLimited {
                retry_after: Some(Duration::from_secs(12)),
            })
        };
        let (calls, script) = scripted(vec![limited(), limited(), Ok(1)]);
        let start = Instant::now();
        let res = run(&RetryPolicy::default(), &calls, &script).await;
        assert!(matches!(res, Err(RemoteError::RateLimited { .. })));
        assert_eq!(calls.get(), 2);
        assert_eq!(start.elapsed(), Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_wait_is_capped() {
        let (calls, script) = scripted(vec![
            Err(RemoteError::RateLimited {
                retry_after: Some(Duration::from_secs(3600)),
            }),
            Ok(1),
        ]);
        let start = Instant::now();
        assert_eq!(run(&RetryPolicy::default(), &calls, &script).await, Ok(1));
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn auth_is_never_retried() {
        let (calls, script) = scripted(vec![Err(RemoteError::Auth("invalid_auth".into())), Ok(1)]);
        let start = Instant::now();
        let res = run(&RetryPolicy::default(), &calls, &script).await;
        assert_eq!(res, Err(RemoteError::Auth("invalid_auth".into())));
        assert_eq!(calls.get(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn api_errors_are_not_retried() {
        let (calls, script) = scripted(vec![Err(RemoteError::Api("invalid_name".into())), Ok(1)]);
        let res = run(&RetryPolicy::default(), &calls, &script).await;
        assert_eq!(res, Err(RemoteError::Api("invalid_name".into())));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn budgets_are_independent() {
        let (calls, script) = scripted(vec![
            Err(RemoteError::RateLimited { retry_after: None }),
            net(),
            net(),
            Ok(9),
        ]);
        let start = Instant::now();
        assert_eq!(run(&RetryPolicy::default(), &calls, &script).await, Ok(9));
        assert_eq!(calls.get(), 4);
        // 5s default rate-limit wait, then 1s + 2s backoff.
        assert_eq!(start.elapsed(), Duration::from_secs(8));
    }
}
