//! Policy applied to every remote call.
//!
//! [`RemoteCaller`] bounds how many calls are in flight, applies a per-call
//! timeout, retries transient failures with backoff and stops issuing calls
//! once its [`CancelToken`] fires. Calls already in flight are left to finish.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};

use crate::backoff::RetryPolicy;
use crate::error::{RemoteError, RemoteResult};

/// Cooperative cancellation shared by every clone.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Issues remote calls under a shared concurrency limit, timeout and retry
/// policy.
#[derive(Debug, Clone)]
pub struct RemoteCaller {
    limiter: Arc<Semaphore>,
    timeout: Duration,
    retry: RetryPolicy,
    cancel: CancelToken,
}

impl RemoteCaller {
    /// Creates a caller allowing `concurrency` simultaneous calls.
    pub fn new(concurrency: usize, timeout: Duration) -> Self {
        Self {
            limiter: Arc::new(Semaphore::new(concurrency.max(1))),
            timeout,
            retry: RetryPolicy::none(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs `op`, retrying transient failures per the retry policy.
    ///
    /// `what` only labels log events.
    pub async fn call<T, F, Fut>(&self, what: &str, mut op: F) -> RemoteResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        let mut delays = self.retry.delays();
        let mut attempt = 1u32;

        loop {
            match self.attempt(&mut op).await {
                Err(err) if err.is_transient() => {
                    let Some(delay) = delays.next() else {
                        return Err(err);
                    };
                    tracing::warn!(
                        call = %what,
                        attempt,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "remote call failed, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancel.cancelled() => return Err(RemoteError::Cancelled),
                    }
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn attempt<T, F, Fut>(&self, op: &mut F) -> RemoteResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(RemoteError::Cancelled);
        }

        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| RemoteError::Cancelled)?;

        // Cancellation may have arrived while waiting for a permit.
        if self.cancel.is_cancelled() {
            return Err(RemoteError::Cancelled);
        }

        match tokio::time::timeout(self.timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::TimedOut(self.timeout)),
        }
    }
}

impl Default for RemoteCaller {
    fn default() -> Self {
        Self::new(4, Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    #[tokio::test]
    async fn hung_call_times_out() {
        let caller = RemoteCaller::new(1, Duration::from_millis(20));
        let result: RemoteResult<()> = caller
            .call("hang", || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;
        assert_eq!(result, Err(RemoteError::TimedOut(Duration::from_millis(20))));
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let caller = RemoteCaller::new(1, Duration::from_secs(1))
            .with_retry(RetryPolicy::new(2, Duration::from_millis(1)));

        let result = caller
            .call("flaky", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(RemoteError::Transport("reset".to_string()))
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let caller = RemoteCaller::new(1, Duration::from_secs(1))
            .with_retry(RetryPolicy::new(5, Duration::from_millis(1)));

        let result: RemoteResult<()> = caller
            .call("denied", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(RemoteError::Denied("no cert".to_string()))
            })
            .await;

        assert!(matches!(result, Err(RemoteError::Denied(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_caller_issues_no_calls() {
        let issued = AtomicU32::new(0);
        let counter = &issued;
        let caller = RemoteCaller::default();
        caller.cancel_token().cancel();

        let result: RemoteResult<()> = caller
            .call("skipped", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert_eq!(result, Err(RemoteError::Cancelled));
        assert_eq!(issued.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let caller = RemoteCaller::new(2, Duration::from_secs(5));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let caller = caller.clone();
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            tasks.spawn(async move {
                let (running, peak) = (&running, &peak);
                caller
                    .call("bounded", move || async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, RemoteError>(())
                    })
                    .await
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn cancel_token_wakes_waiters() {
        let token = CancelToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        token.cancel();
        waiter.await.unwrap();
        assert!(token.is_cancelled());
    }
}
