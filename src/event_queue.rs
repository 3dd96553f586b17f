use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::ClientError;
use crate::future::FaasFuture;
use crate::model::{Operation, OpResult};
use crate::watch::{Watch, WatchEventType, WatchRegistry, WatchedEvent};

/// The tagged event kinds flowing through the queue, plus `CloudFailure` —
/// a provider failure on a cloud request gets its own event rather than
/// overloading `CloudDirectResult`, which is reserved for results of
/// genuinely direct reads.
pub enum Event {
    /// Emitted by the Submitter before a cloud call, reserving the
    /// request's ordering slot in the Sorter's `pending` list.
    CloudExpectedResult {
        request_id: u64,
        op: Arc<dyn Operation>,
        future: FaasFuture,
    },
    /// Emitted by the Submitter after a direct read.
    CloudDirectResult {
        request_id: u64,
        outcome: Result<OpResult, ClientError>,
        future: FaasFuture,
    },
    /// Emitted by the Submitter when `send_request` itself fails for a
    /// cloud request that already has an expected-result slot pending.
    CloudFailure {
        request_id: u64,
        error: ClientError,
    },
    /// Emitted by the listener on a server callback.
    CloudIndirectResult { reply: Value },
    /// Promoted by the EventQueue itself when a matching watch exists.
    WatchNotification { watch: Watch, event: WatchedEvent },
}

#[derive(Deserialize)]
struct WatchNotificationWire {
    path: String,
    #[serde(rename = "watch-event")]
    watch_event: i64,
    timestamp: u64,
}

/// Multiplexed inbox carrying replies, direct results, and watch
/// notifications; owns the watch registry.
pub struct EventQueue {
    sender: mpsc::Sender<Event>,
    watches: WatchRegistry,
    closing: AtomicBool,
}

impl EventQueue {
    /// Builds the queue together with the receiver half the Sorter drains.
    pub fn new(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Event>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (
            Arc::new(Self {
                sender,
                watches: WatchRegistry::new(),
                closing: AtomicBool::new(false),
            }),
            receiver,
        )
    }

    fn check_open(&self) -> Result<(), ClientError> {
        if self.closing.load(Ordering::SeqCst) {
            Err(ClientError::SessionClosing)
        } else {
            Ok(())
        }
    }

    pub async fn add_expected_result(
        &self,
        request_id: u64,
        op: Arc<dyn Operation>,
        future: FaasFuture,
    ) -> Result<(), ClientError> {
        self.check_open()?;
        self.sender
            .send(Event::CloudExpectedResult {
                request_id,
                op,
                future,
            })
            .await
            .map_err(|_| ClientError::InvariantViolation("event queue receiver dropped".into()))
    }

    pub async fn add_direct_result(
        &self,
        request_id: u64,
        outcome: Result<OpResult, ClientError>,
        future: FaasFuture,
    ) -> Result<(), ClientError> {
        self.check_open()?;
        self.sender
            .send(Event::CloudDirectResult {
                request_id,
                outcome,
                future,
            })
            .await
            .map_err(|_| ClientError::InvariantViolation("event queue receiver dropped".into()))
    }

    pub async fn add_failure(&self, request_id: u64, error: ClientError) -> Result<(), ClientError> {
        self.check_open()?;
        self.sender
            .send(Event::CloudFailure { request_id, error })
            .await
            .map_err(|_| ClientError::InvariantViolation("event queue receiver dropped".into()))
    }

    pub async fn add_indirect_result(&self, reply: Value) -> Result<(), ClientError> {
        self.check_open()?;
        self.sender
            .send(Event::CloudIndirectResult { reply })
            .await
            .map_err(|_| ClientError::InvariantViolation("event queue receiver dropped".into()))
    }

    /// Parses an inbound watch notification and, if a registered watch
    /// matches, promotes it to a `WatchNotification` event. If no matching
    /// watch exists, the notification is logged and dropped.
    pub async fn add_watch_notification(&self, reply: Value) -> Result<(), ClientError> {
        self.check_open()?;
        let wire: WatchNotificationWire = serde_json::from_value(reply)?;
        let Some(event_type) = WatchEventType::from_wire(wire.watch_event) else {
            warn!(path = %wire.path, code = wire.watch_event, "unknown watch-event code, dropping");
            return Ok(());
        };

        if event_type == WatchEventType::NodeDataChanged {
            if let Some(watch) = self.watches.take_data_watch(&wire.path) {
                let event = WatchedEvent {
                    event_type,
                    path: wire.path.clone(),
                    timestamp: wire.timestamp,
                };
                return self
                    .sender
                    .send(Event::WatchNotification { watch, event })
                    .await
                    .map_err(|_| {
                        ClientError::InvariantViolation("event queue receiver dropped".into())
                    });
            }
        }
        warn!(
            path = %wire.path,
            event = ?event_type,
            "ignoring watch notification with no registered watch"
        );
        Ok(())
    }

    pub fn add_watch(&self, path: &str, watch: Watch) -> Result<(), ClientError> {
        self.check_open()?;
        self.watches.add_watch(path, watch);
        Ok(())
    }

    /// Returns watches whose `timestamp < observed_timestamp` across
    /// `paths`, removing exactly those watches from the registry.
    pub fn get_watches(&self, paths: &[String], observed_timestamp: u64) -> Result<Vec<Watch>, ClientError> {
        self.check_open()?;
        Ok(self.watches.get_watches(paths, observed_timestamp))
    }

    pub fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
    }
}
