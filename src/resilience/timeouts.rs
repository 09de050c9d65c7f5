//! Timeout enforcement.
//!
//! Every outbound call carries a deadline. An elapsed deadline becomes
//! [`DispatchError::Timeout`] and is handled like any other dispatch failure:
//! the fallback chain advances, nothing is retried in place.

use std::future::Future;
use std::time::Duration;

use crate::transport::DispatchError;

/// Run `fut` with a deadline, mapping expiry to `DispatchError::Timeout`.
pub async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T, DispatchError>
where
    F: Future<Output = Result<T, DispatchError>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(DispatchError::Timeout(deadline)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_elapses() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, DispatchError>(1)
        };
        let err = with_deadline(Duration::from_secs(30), slow).await.unwrap_err();
        assert!(matches!(err, DispatchError::Timeout(d) if d == Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_inner_result_passes_through() {
        let ok = with_deadline(Duration::from_secs(1), async { Ok::<_, DispatchError>(7) }).await;
        assert_eq!(ok.unwrap(), 7);
    }
}
