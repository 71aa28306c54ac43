use crate::{Error, Result};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Sleep for `delay`, returning `Error::Cancelled` as soon as `token` fires.
pub async fn sleep_cancellable(delay: Duration, token: Option<&CancellationToken>) -> Result<()> {
    let Some(token) = token else {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        return Ok(());
    };
    if token.is_cancelled() {
        return Err(Error::Cancelled);
    }
    if delay.is_zero() {
        return Ok(());
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_sleeps_full_delay() {
        let start = Instant::now();
        sleep_cancellable(Duration::from_secs(5), None).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_sleep() {
        let token = CancellationToken::new();
        let child = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            child.cancel();
        });
        let start = Instant::now();
        let res = sleep_cancellable(Duration::from_secs(60), Some(&token)).await;
        assert!(matches!(res, Err(Error::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let res = sleep_cancellable(Duration::ZERO, Some(&token)).await;
        assert!(matches!(res, Err(Error::Cancelled)));
    }
}
