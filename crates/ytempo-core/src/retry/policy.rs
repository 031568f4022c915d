use rand::Rng;
use std::time::Duration;

/// High-level classification of a pipeline failure for retry purposes.
///
/// Kinds map user-visible causes (private video, disk full) as well as
/// transient infrastructure failures (network, throttling, timeouts).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network-level failure (DNS, connection reset, unreachable host).
    Network,
    /// The source does not exist or has been removed.
    SourceNotFound,
    /// The source exists but is private.
    SourcePrivate,
    /// The source requires age confirmation.
    AgeRestricted,
    /// The remote service asked us to slow down (e.g. HTTP 429).
    RateLimited,
    /// The transcoder failed on an otherwise complete download.
    Transcode,
    /// The destination volume is out of space.
    DiskFull,
    /// A stage or attempt exceeded its deadline.
    Timeout,
    /// The job was cancelled by the user.
    Cancelled,
    /// Anything we could not recognize (not retried).
    Unknown,
}

impl ErrorKind {
    /// Whether a failure of this kind is worth another attempt.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::RateLimited | ErrorKind::Timeout
        )
    }
}

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry this error.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Exponential backoff policy with jitter.
///
/// `max_retries` counts retries, not attempts: a job with `max_retries = 2`
/// runs at most three attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Base delay for backoff.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Compute the next backoff delay given how many retries have already run.
    ///
    /// `retries_so_far` is 0 when the first attempt just failed. Returns
    /// `RetryDecision::NoRetry` for non-retryable kinds (no budget consumed)
    /// and when the retry budget is exhausted. The delay grows as
    /// `base * 2^retries_so_far` with up to 50% added jitter so concurrently
    /// retrying jobs do not wake in lockstep.
    pub fn decide(&self, retries_so_far: u32, kind: ErrorKind) -> RetryDecision {
        if !kind.is_retryable() {
            return RetryDecision::NoRetry;
        }
        if retries_so_far >= self.max_retries {
            return RetryDecision::NoRetry;
        }

        let exp = 1u32 << retries_so_far.min(8);
        let raw = self.base_delay.saturating_mul(exp);
        let jitter = rand::thread_rng().gen_range(0.0..=0.5);
        let delay = raw.mul_f64(1.0 + jitter);
        RetryDecision::RetryAfter(delay)
    }
}
