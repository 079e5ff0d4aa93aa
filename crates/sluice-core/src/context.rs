//! Request-scoped cancellation shared by the interception engine, the
//! subprocess runner and the storage sink.

use std::time::Duration;

use tokio_util::sync::{
    CancellationToken, DropGuard, WaitForCancellationFuture, WaitForCancellationFutureOwned,
};
use uuid::Uuid;

/// Cancellation signal plus identity for one inbound request.
///
/// Cloning shares the same signal. [`RequestContext::child`] derives a
/// context that is cancelled with its parent but can also be cancelled on
/// its own.
#[derive(Clone, Debug)]
pub struct RequestContext {
    token: CancellationToken,
    request_id: Uuid,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            request_id: Uuid::new_v4(),
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            request_id: self.request_id,
        }
    }

    /// Child context that is cancelled once `timeout` elapses.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let child = self.child();
        let token = child.token.clone();
        let request_id = self.request_id;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    tracing::debug!(
                        request_id = %request_id,
                        timeout_ms = timeout.as_millis() as u64,
                        "Request deadline expired"
                    );
                    token.cancel();
                }
                _ = token.cancelled() => {}
            }
        });
        child
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Owned variant of [`cancelled`](Self::cancelled) for spawned tasks.
    pub fn cancelled_owned(&self) -> WaitForCancellationFutureOwned {
        self.token.clone().cancelled_owned()
    }

    /// Cancels this context when the guard is dropped. Handlers hold one so
    /// both completion and client disconnect end the request.
    pub fn drop_guard(&self) -> DropGuard {
        self.token.clone().drop_guard()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_follows_parent() {
        let parent = RequestContext::new();
        let child = parent.child();
        assert_eq!(child.request_id(), parent.request_id());
        assert!(!child.is_cancelled());

        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_child_cancel_does_not_reach_parent() {
        let parent = RequestContext::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn test_drop_guard_cancels() {
        let ctx = RequestContext::new();
        {
            let _guard = ctx.drop_guard();
        }
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_with_timeout_cancels_after_deadline() {
        let ctx = RequestContext::new();
        let bounded = ctx.with_timeout(Duration::from_millis(20));
        tokio::time::timeout(Duration::from_secs(2), bounded.cancelled())
            .await
            .expect("deadline should fire");
        assert!(!ctx.is_cancelled());
    }
}
