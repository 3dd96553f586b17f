use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{instrument, warn};

use crate::error::ClientError;
use crate::event_queue::{Event, EventQueue};
use crate::future::FaasFuture;
use crate::model::{Operation, OpResult};
use crate::watch::{WatchEventType, WatchedEvent};

struct PendingEntry {
    request_id: u64,
    op: Arc<dyn Operation>,
    future: FaasFuture,
    enqueued_at: Instant,
}

/// Drains `EventQueue`, correlating indirect callbacks with expected
/// requests in strict submission order, firing watches, completing
/// futures, and enforcing per-request timeouts.
///
/// Runs until the receiver closes or `cancel` is triggered.
#[instrument(skip_all)]
pub async fn run(
    event_queue: Arc<EventQueue>,
    mut receiver: mpsc::Receiver<Event>,
    request_timeout: Duration,
    poll_interval: Duration,
    cancel: tokio_util::sync::CancellationToken,
) {
    let mut pending: VecDeque<PendingEntry> = VecDeque::new();

    while !cancel.is_cancelled() {
        let processed = match tokio::time::timeout(poll_interval, receiver.recv()).await {
            Ok(Some(event)) => dispatch(event, &mut pending, &event_queue),
            Ok(None) => break,
            Err(_elapsed) => false,
        };

        if !processed {
            check_timeouts(&mut pending, request_timeout);
        }
    }

    // Drain whatever is left so no Future hangs forever after the session
    // shuts down: once stop() returns, no further events will ever be
    // delivered to these entries.
    for entry in pending.drain(..) {
        let mut future = entry.future;
        future.set_exception(ClientError::SessionClosing);
    }
}

/// Returns whether this event completed a future: only then does a quiet
/// tick skip the timeout scan.
fn dispatch(event: Event, pending: &mut VecDeque<PendingEntry>, event_queue: &EventQueue) -> bool {
    match event {
        Event::CloudExpectedResult {
            request_id,
            op,
            future,
        } => {
            pending.push_back(PendingEntry {
                request_id,
                op,
                future,
                enqueued_at: Instant::now(),
            });
            false
        }

        Event::CloudDirectResult {
            request_id: _,
            outcome,
            mut future,
        } => {
            if let Ok(result) = &outcome {
                fire_watches_for_result(result, event_queue);
            }
            match outcome {
                Ok(result) => future.set_result(result),
                Err(err) => future.set_exception(err),
            }
            true
        }

        Event::CloudFailure { request_id, error } => {
            // The provider failed after the expected slot was already
            // pushed; find and release it here instead of leaving it to
            // time out.
            if let Some(pos) = pending.iter().position(|e| e.request_id == request_id) {
                let mut entry = pending.remove(pos).expect("position just found");
                entry.future.set_exception(error);
                true
            } else {
                warn!(request_id, "no pending slot for failed cloud request");
                false
            }
        }

        Event::CloudIndirectResult { reply } => handle_indirect_result(reply, pending),

        Event::WatchNotification { watch, event } => {
            watch.deliver(event);
            false
        }
    }
}

fn handle_indirect_result(reply: serde_json::Value, pending: &mut VecDeque<PendingEntry>) -> bool {
    let local_idx = match parse_local_idx(&reply) {
        Some(idx) => idx,
        None => {
            warn!(?reply, "indirect result missing a parseable event id, dropping");
            return false;
        }
    };

    match pending.front() {
        Some(front) if front.request_id == local_idx => {
            let entry = pending.pop_front().expect("front just matched");
            let mut future = entry.future;
            if let Err(err) = entry.op.process_result(&reply, &mut future) {
                future.set_exception(err);
            }
            true
        }
        Some(front) if local_idx < front.request_id => {
            // The slot was already resolved (timed out or failed early);
            // this is a known-benign late reply.
            warn!(local_idx, head = front.request_id, "dropping late indirect reply for a resolved request");
            false
        }
        Some(front) => {
            panic!(
                "invariant violation: indirect reply for request {local_idx} arrived before request {} \
                 was ever expected; pending FIFO order was violated",
                front.request_id
            );
        }
        None => {
            warn!(local_idx, "dropping indirect reply with no pending requests at all");
            false
        }
    }
}

fn parse_local_idx(reply: &serde_json::Value) -> Option<u64> {
    let event = reply.get("event")?.as_str()?;
    let (_, idx) = event.split_once('-')?;
    idx.parse().ok()
}

fn fire_watches_for_result(result: &OpResult, event_queue: &EventQueue) {
    let Some(node) = result.as_node() else {
        return;
    };
    let observed_timestamp = node.modified.system.sum;

    let mut paths = vec![node.path.clone()];
    paths.extend(node.modified.epoch.affected_paths());

    let watches = match event_queue.get_watches(&paths, observed_timestamp) {
        Ok(watches) => watches,
        Err(err) => {
            warn!(error = %err, "failed to query watch registry");
            return;
        }
    };

    for watch in watches {
        // TODO(stall-read): a stale epoch observed here should trigger a
        // re-read before dispatching; left as future work.
        let event = WatchedEvent {
            event_type: WatchEventType::NodeDataChanged,
            path: watch.path.clone(),
            timestamp: observed_timestamp,
        };
        watch.deliver(event);
    }
}

fn check_timeouts(pending: &mut VecDeque<PendingEntry>, timeout: Duration) {
    let now = Instant::now();
    while let Some(front) = pending.front() {
        if now.duration_since(front.enqueued_at) >= timeout {
            let mut entry = pending.pop_front().expect("front just checked");
            entry.future.set_exception(ClientError::Timeout(timeout));
        } else {
            // Monotone enqueue timestamps make it sound to stop at the
            // first non-expired entry.
            break;
        }
    }
}
