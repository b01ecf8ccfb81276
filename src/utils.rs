//! Utility functions for the key-input-gatt crate.

use std::future::Future;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Run a fallible future until it completes or the token is cancelled.
///
/// Cancellation wins ties, so an already-cancelled token never starts new
/// radio work.
///
/// # Example
///
/// ```
/// use key_input_gatt::utils::cancellable;
/// use key_input_gatt::Error;
/// use tokio_util::sync::CancellationToken;
///
/// # tokio_test::block_on(async {
/// let token = CancellationToken::new();
/// token.cancel();
/// let result = cancellable(&token, futures::future::pending::<key_input_gatt::Result<()>>()).await;
/// assert!(matches!(result, Err(Error::Cancelled)));
/// # });
/// ```
pub async fn cancellable<T, F>(token: &CancellationToken, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::Cancelled),
        result = future => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancellable_passes_result_through() {
        let token = CancellationToken::new();
        let value = cancellable(&token, async { Ok::<_, Error>(7u8) }).await;
        assert_eq!(value.ok(), Some(7));
    }

    #[tokio::test]
    async fn test_cancellable_interrupts_pending_future() {
        let token = CancellationToken::new();
        let child = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            child.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            cancellable(&token, futures::future::pending::<Result<()>>()),
        )
        .await
        .expect("cancellation should resolve the future");

        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
