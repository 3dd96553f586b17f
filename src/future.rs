use tokio::sync::oneshot;

use crate::error::ClientError;
use crate::model::OpResult;

type Payload = Result<OpResult, ClientError>;

/// A single-assignment result cell, completed exactly once by the Submitter
/// or Sorter. This is the handle those components hold; the call site that
/// issued the operation holds the paired [`FaasFutureWaiter`] instead.
///
/// Built on [`tokio::sync::oneshot`], which already gives single-assignment
/// semantics for free; this wrapper just names the completion paths
/// (`set_result` / `set_exception`) instead of exposing the raw channel, and
/// splits the type in two the way Rust's ownership model wants a
/// single-assignment cell split rather than shared by reference.
pub struct FaasFuture {
    tx: Option<oneshot::Sender<Payload>>,
}

/// The half of a [`FaasFuture`] that a caller awaits for completion.
pub struct FaasFutureWaiter {
    rx: oneshot::Receiver<Payload>,
}

impl FaasFuture {
    /// Creates a future/waiter pair: the future half goes wherever the
    /// result will eventually be produced (WorkQueue → EventQueue →
    /// Sorter), the waiter half goes back to the caller.
    pub fn new_pair() -> (Self, FaasFutureWaiter) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, FaasFutureWaiter { rx })
    }

    /// Complete the future with a successful result. A second call (after
    /// the sender has already been consumed) is a silent no-op: completion
    /// is at most once, not exactly once or panic, since a late
    /// timeout/result race is expected and handled by whichever side loses,
    /// not by crashing it.
    pub fn set_result(&mut self, result: OpResult) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Ok(result));
        }
    }

    pub fn set_exception(&mut self, err: ClientError) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(err));
        }
    }
}

impl FaasFutureWaiter {
    /// Blocks (async) until the future is completed, or fails with
    /// [`ClientError::Timeout`] if `timeout` elapses first.
    pub async fn wait(self, timeout: std::time::Duration) -> Payload {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_recv_error)) => Err(ClientError::InvariantViolation(
                "future dropped without being completed".to_string(),
            )),
            Err(_elapsed) => Err(ClientError::Timeout(timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn completes_exactly_once_with_result() {
        let (mut future, waiter) = FaasFuture::new_pair();
        future.set_result(OpResult::Empty);
        future.set_result(OpResult::Bytes(vec![1])); // ignored, already consumed
        let result = waiter.wait(Duration::from_secs(1)).await.unwrap();
        assert!(matches!(result, OpResult::Empty));
    }

    #[tokio::test]
    async fn completes_with_exception() {
        let (mut future, waiter) = FaasFuture::new_pair();
        future.set_exception(ClientError::SessionClosing);
        let result = waiter.wait(Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ClientError::SessionClosing)));
    }

    #[tokio::test]
    async fn waiter_times_out_if_never_completed() {
        let (future, waiter) = FaasFuture::new_pair();
        let result = waiter.wait(Duration::from_millis(20)).await;
        assert!(matches!(result, Err(ClientError::Timeout(_))));
        drop(future);
    }
}
