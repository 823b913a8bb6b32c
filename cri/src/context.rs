//! Per-request cancellation and deadline.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{PullError, Stage};

/// Cancellation signal and optional deadline carried through a pull.
#[derive(Debug, Clone, Default)]
pub struct PullContext {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

/// Cancels every stage run under the paired [`PullContext`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl PullContext {
    /// Context that never cancels and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Set the deadline to `timeout` from now. An earlier deadline wins.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// Attach a cancellation signal, replacing any existing one.
    pub fn cancellable(mut self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        self.cancel = Some(rx);
        (self, CancelHandle { tx })
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Run one stage, racing it against cancellation and the deadline.
    ///
    /// `fut` is not polled at all when the context has already ended.
    pub async fn run<F, T>(&self, stage: Stage, fut: F) -> Result<T, PullError>
    where
        F: Future<Output = T>,
    {
        if self.is_canceled() {
            return Err(PullError::Canceled { stage });
        }
        if self.is_expired() {
            return Err(PullError::DeadlineExceeded { stage });
        }

        let canceled = async {
            match self.cancel.clone() {
                Some(mut rx) => {
                    while !*rx.borrow_and_update() {
                        if rx.changed().await.is_err() {
                            // Handle dropped without canceling
                            std::future::pending::<()>().await;
                        }
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };

        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = canceled => Err(PullError::Canceled { stage }),
            _ = expired => Err(PullError::DeadlineExceeded { stage }),
            out = fut => Ok(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_background_runs_to_completion() {
        let ctx = PullContext::background();
        let out = ctx.run(Stage::Resolving, async { 42 }).await.unwrap();
        assert_eq!(out, 42);
    }

    #[tokio::test]
    async fn test_canceled_before_stage_skips_future() {
        let (ctx, handle) = PullContext::background().cancellable();
        handle.cancel();

        let polled = Arc::new(AtomicBool::new(false));
        let flag = polled.clone();
        let err = ctx
            .run(Stage::Preparing, async move { flag.store(true, Ordering::SeqCst) })
            .await
            .unwrap_err();

        assert!(matches!(err, PullError::Canceled { stage: Stage::Preparing }));
        assert!(!polled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_mid_stage() {
        let (ctx, handle) = PullContext::background().cancellable();
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.cancel();
        });

        let err = ctx
            .run(Stage::Pulling, tokio::time::sleep(Duration::from_secs(30)))
            .await
            .unwrap_err();
        assert!(matches!(err, PullError::Canceled { stage: Stage::Pulling }));
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_handle_never_cancels() {
        let (ctx, handle) = PullContext::background().cancellable();
        drop(handle);
        let out = ctx.run(Stage::Finalizing, async { "done" }).await.unwrap();
        assert_eq!(out, "done");
    }

    #[tokio::test]
    async fn test_deadline_mid_stage() {
        let ctx = PullContext::background().with_timeout(Duration::from_millis(20));
        let err = ctx
            .run(Stage::Pulling, tokio::time::sleep(Duration::from_secs(60)))
            .await
            .unwrap_err();
        assert!(matches!(err, PullError::DeadlineExceeded { stage: Stage::Pulling }));
    }

    #[tokio::test]
    async fn test_expired_before_stage() {
        let ctx = PullContext::background().with_timeout(Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(5)).await;
        let err = ctx.run(Stage::CheckingCache, async {}).await.unwrap_err();
        assert!(matches!(err, PullError::DeadlineExceeded { stage: Stage::CheckingCache }));
    }

    #[tokio::test]
    async fn test_earlier_deadline_wins() {
        let now = Instant::now();
        let ctx = PullContext::background()
            .with_deadline(now + Duration::from_secs(10))
            .with_deadline(now + Duration::from_secs(60));
        assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(10)));
    }
}
