//! Timeout helper for backend calls
//!
//! Every backend bounds its own generation call. Expiry surfaces as
//! [`ForgeError::Timeout`], which the dispatch engine treats like any other
//! failed attempt and moves on to the next backend.

use std::future::Future;
use std::time::Duration;

use crate::types::{ForgeError, Result};

/// Execute an async operation with a timeout
///
/// # Example
///
/// ```ignore
/// let image = with_timeout(
///     config.timeout,
///     async { poll_history(&prompt_id).await },
///     "ComfyUI generation",
/// ).await?;
/// ```
pub async fn with_timeout<T, F>(timeout: Duration, future: F, operation_name: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(ForgeError::timeout(operation_name, timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_success() {
        let result = with_timeout(
            Duration::from_secs(1),
            async { Ok::<_, ForgeError>(42) },
            "test operation",
        )
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result = with_timeout(
            Duration::from_millis(10),
            async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, ForgeError>(42)
            },
            "slow generation",
        )
        .await;

        match result.unwrap_err() {
            ForgeError::Timeout {
                operation,
                duration,
            } => {
                assert_eq!(operation, "slow generation");
                assert_eq!(duration, Duration::from_millis(10));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let result: Result<()> = with_timeout(
            Duration::from_secs(1),
            async { Err(ForgeError::Config("bad".into())) },
            "op",
        )
        .await;
        assert!(matches!(result, Err(ForgeError::Config(_))));
    }
}
