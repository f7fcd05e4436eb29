//! Retry with exponential back-off and jitter for marketplace requests.
//!
//! Only errors for which [`ScraperError::is_retriable`] holds are retried:
//! network failures, 5xx and soft blocks. Everything else is returned at once.

use std::future::Future;
use std::time::Duration;

use crate::error::ScraperError;

const MAX_DELAY_MS: u64 = 30_000;

/// Runs `operation` with up to `max_retries` additional attempts on transient errors.
///
/// Back-off schedule with `backoff_base_ms = 1_000`:
///
/// | Attempt | Sleep before next attempt        |
/// |---------|----------------------------------|
/// | 1       | 1 000 ms × 2⁰ ± 25 % jitter     |
/// | 2       | 1 000 ms × 2¹ ± 25 % jitter     |
/// | 3       | 1 000 ms × 2² ± 25 % jitter     |
///
/// Delay is capped at 30 s.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    max_retries: u32,
    backoff_base_ms: u64,
    mut operation: F,
) -> Result<T, ScraperError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ScraperError>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retriable() || attempt >= max_retries {
                    return Err(err);
                }
                attempt += 1;
                let delay_ms = backoff_delay_ms(backoff_base_ms, attempt);
                tracing::warn!(
                    attempt,
                    max_retries,
                    delay_ms,
                    error = %err,
                    "transient scraper error, retrying after back-off"
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}

fn backoff_delay_ms(backoff_base_ms: u64, attempt: u32) -> u64 {
    let computed = backoff_base_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(10));
    let capped = computed.min(MAX_DELAY_MS);
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let jittered = (capped as f64 * (rand::random::<f64>() * 0.5 + 0.75)) as u64;
    jittered
}

/// Uniform random pause in `[min_ms, max_ms]` between page fetches.
pub(crate) async fn polite_delay(min_ms: u64, max_ms: u64) {
    if max_ms == 0 {
        return;
    }
    let delay = if max_ms > min_ms {
        rand::random_range(min_ms..=max_ms)
    } else {
        min_ms
    };
    tokio::time::sleep(Duration::from_millis(delay)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn soft_block() -> ScraperError {
        ScraperError::SoftBlock {
            url: "https://www.amazon.com/product-reviews/B000000001".to_owned(),
            indicator: "captcha".to_owned(),
        }
    }

    #[test]
    fn delay_stays_within_jitter_band_and_cap() {
        for attempt in 1..=3 {
            let base = 1_000u64 << (attempt - 1);
            let delay = backoff_delay_ms(1_000, attempt);
            assert!(delay >= base * 3 / 4 && delay <= base * 5 / 4, "{delay}");
        }
        assert!(backoff_delay_ms(1_000, 30) <= MAX_DELAY_MS * 5 / 4);
    }

    #[tokio::test]
    async fn retries_soft_block_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(3, 0, || {
            let c = Arc::clone(&c);
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(soft_block())
                } else {
                    Ok::<u32, ScraperError>(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(2, 0, || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<u32, ScraperError>(soft_block())
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(result, Err(ScraperError::SoftBlock { .. })));
    }

    #[tokio::test]
    async fn hard_block_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(3, 0, || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<u32, ScraperError>(ScraperError::HardBlock {
                    reason: "login redirect".to_owned(),
                })
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(ScraperError::HardBlock { .. })));
    }

    #[test]
    fn server_error_status_is_retried_client_error_is_not() {
        assert!(ScraperError::UnexpectedStatus {
            status: 502,
            url: String::new()
        }
        .is_retriable());
        assert!(!ScraperError::UnexpectedStatus {
            status: 403,
            url: String::new()
        }
        .is_retriable());
    }
}
