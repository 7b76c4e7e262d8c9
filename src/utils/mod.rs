use crate::error::{EngineError, EngineResult};
use std::future::Future;
use std::time::Duration;

pub mod validation;

/// Runs `operation` under `timeout`, mapping an elapsed timer to
/// [`EngineError::Timeout`].
pub async fn with_timeout<T, Fut>(what: &str, timeout: Duration, operation: Fut) -> EngineResult<T>
where
    Fut: Future<Output = EngineResult<T>>,
{
    match tokio::time::timeout(timeout, operation).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::Timeout(format!("{what} exceeded {}ms", timeout.as_millis()))),
    }
}

/// Vector-store calls: each attempt is timeout-bound, a failed attempt is
/// retried once, and a second failure surfaces as a server-side
/// [`EngineError::VectorStore`]. Dimension and validation errors are never
/// retried since repeating them cannot succeed.
pub async fn retry_once<F, Fut, T>(what: &str, timeout: Duration, mut operation: F) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match with_timeout(what, timeout, operation()).await {
            Ok(value) => return Ok(value),
            Err(e @ (EngineError::DimensionMismatch { .. } | EngineError::Validation(_))) => return Err(e),
            Err(e) if attempt >= 2 => {
                return Err(EngineError::VectorStore(format!("{what} failed after retry: {e}")));
            }
            Err(e) => {
                tracing::warn!("{} failed (attempt {}), retrying: {}", what, attempt, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn retries_exactly_once() {
        let calls = AtomicUsize::new(0);
        let result: EngineResult<()> = retry_once("query", Duration::from_secs(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EngineError::Internal("boom".into())) }
        })
        .await;
        assert!(matches!(result, Err(EngineError::VectorStore(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn second_attempt_can_succeed() {
        let calls = AtomicUsize::new(0);
        let result = retry_once("query", Duration::from_secs(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(EngineError::Internal("flaky".into()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn dimension_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: EngineResult<()> = retry_once("query", Duration::from_secs(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EngineError::DimensionMismatch { expected: 3, actual: 2 }) }
        })
        .await;
        assert!(matches!(result, Err(EngineError::DimensionMismatch { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn timeout_maps_to_error() {
        let result: EngineResult<()> = tokio_test::block_on(async {
            with_timeout("sleep", Duration::from_millis(5), async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await
        });
        assert!(matches!(result, Err(EngineError::Timeout(_))));
    }
}
