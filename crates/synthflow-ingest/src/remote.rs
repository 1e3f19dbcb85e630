//! Bounded remote calls

use std::future::Future;
use std::time::Duration;

use crate::error::{IngestError, Result};

/// Run `fut` with an upper bound on its duration.
///
/// Expiry becomes [`IngestError::Timeout`] naming `operation`; it is never
/// retried here.
pub async fn with_timeout<T, F>(operation: impl Into<String>, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(IngestError::Timeout {
            operation: operation.into(),
            limit,
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out() {
        let result: Result<()> = with_timeout("list raw/", Duration::from_secs(30), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;

        match result {
            Err(IngestError::Timeout { operation, limit }) => {
                assert_eq!(operation, "list raw/");
                assert_eq!(limit, Duration::from_secs(30));
            },
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let result: Result<u8> = with_timeout("get k", Duration::from_secs(1), async {
            Err(IngestError::ObjectNotFound("k".into()))
        })
        .await;
        assert!(matches!(result, Err(IngestError::ObjectNotFound(_))));
    }
}
