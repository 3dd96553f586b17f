use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use crate::error::ClientError;
use crate::future::FaasFuture;
use crate::model::Operation;

type Entry = (u64, Arc<dyn Operation>, FaasFuture);

/// FIFO of user-submitted operations awaiting dispatch.
///
/// `request_id`s are assigned under the same mutex that guards the deque,
/// so they are strictly increasing by 1 starting at 0 and unique within the
/// session — the ordering invariant everything downstream relies on.
pub struct WorkQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    closing: AtomicBool,
}

struct Inner {
    queue: VecDeque<Entry>,
    next_request_id: u64,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                next_request_id: 0,
            }),
            notify: Notify::new(),
            closing: AtomicBool::new(false),
        }
    }

    /// Assigns the next `request_id` and appends atomically.
    pub fn enqueue(&self, op: Arc<dyn Operation>, future: FaasFuture) -> Result<u64, ClientError> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(ClientError::SessionClosing);
        }
        let request_id = {
            let mut inner = self.inner.lock().expect("work queue lock poisoned");
            let request_id = inner.next_request_id;
            inner.next_request_id += 1;
            inner.queue.push_back((request_id, op, future));
            request_id
        };
        self.notify.notify_one();
        Ok(request_id)
    }

    /// Returns the head element, or `None` if `timeout` elapses first.
    pub async fn dequeue(&self, timeout: Duration) -> Option<Entry> {
        loop {
            if let Some(entry) = self.inner.lock().expect("work queue lock poisoned").queue.pop_front() {
                return Some(entry);
            }
            let notified = self.notify.notified();
            if tokio::time::timeout(timeout, notified).await.is_err() {
                return None;
            }
            // Woken up: loop back and try to pop again. Another dequeuer
            // may have raced us to the entry, in which case we loop again.
        }
    }

    /// Marks the queue as closing. Further `enqueue` calls fail with
    /// [`ClientError::SessionClosing`].
    pub fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Waits up to `timeout` for the queue to drain, failing with
    /// [`ClientError::Timeout`] otherwise.
    pub async fn drain_or_fail(&self, timeout: Duration) -> Result<(), ClientError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.inner.lock().expect("work queue lock poisoned").queue.is_empty() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ClientError::Timeout(timeout));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().expect("work queue lock poisoned").queue.len()
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Operation;
    use serde_json::Value;
    use std::time::Duration;

    struct NoOp;
    impl Operation for NoOp {
        fn name(&self) -> &str {
            "noop"
        }
        fn path(&self) -> &str {
            "/noop"
        }
        fn is_cloud_request(&self) -> bool {
            false
        }
        fn generate_request(&self) -> Value {
            Value::Null
        }
        fn process_result(&self, _reply: &Value, _future: &mut FaasFuture) -> Result<(), ClientError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn request_ids_increase_strictly_by_one() {
        let queue = WorkQueue::new();
        let id0 = queue.enqueue(Arc::new(NoOp), FaasFuture::new_pair().0).unwrap();
        let id1 = queue.enqueue(Arc::new(NoOp), FaasFuture::new_pair().0).unwrap();
        let id2 = queue.enqueue(Arc::new(NoOp), FaasFuture::new_pair().0).unwrap();
        assert_eq!((id0, id1, id2), (0, 1, 2));
    }

    #[tokio::test]
    async fn dequeue_preserves_enqueue_order() {
        let queue = WorkQueue::new();
        queue.enqueue(Arc::new(NoOp), FaasFuture::new_pair().0).unwrap();
        queue.enqueue(Arc::new(NoOp), FaasFuture::new_pair().0).unwrap();

        let (first, _, _) = queue.dequeue(Duration::from_secs(1)).await.unwrap();
        let (second, _, _) = queue.dequeue(Duration::from_secs(1)).await.unwrap();
        assert_eq!((first, second), (0, 1));
    }

    #[tokio::test]
    async fn dequeue_times_out_on_empty_queue() {
        let queue = WorkQueue::new();
        let result = queue.dequeue(Duration::from_millis(50)).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn enqueue_after_close_fails() {
        let queue = WorkQueue::new();
        queue.close();
        let result = queue.enqueue(Arc::new(NoOp), FaasFuture::new_pair().0);
        assert!(matches!(result, Err(ClientError::SessionClosing)));
    }

    #[tokio::test]
    async fn drain_or_fail_times_out_when_not_empty() {
        let queue = WorkQueue::new();
        queue.enqueue(Arc::new(NoOp), FaasFuture::new_pair().0).unwrap();
        let result = queue.drain_or_fail(Duration::from_millis(100)).await;
        assert!(matches!(result, Err(ClientError::Timeout(_))));
    }
}
