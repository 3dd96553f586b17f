//! A client-side engine for a serverless, ZooKeeper-like coordination
//! service: FIFO ordering of operations, correlation of asynchronous cloud
//! replies, and watch delivery, all driven by a handful of cooperating
//! Tokio tasks.
//!
//! Start with [`SessionConfig`] to describe how a session should behave,
//! implement [`ProviderClient`] for your cloud backend (or reuse the
//! in-memory stub under `provider::testing` in tests), and drive the
//! session through [`Session`]:
//!
//! ```norun
//! use faaskeeper_client::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run(provider: Arc<dyn ProviderClient>, op: Arc<dyn Operation>) -> Result<(), ClientError> {
//! let config = SessionConfig::new("my-deployment");
//! let mut session = Session::new(config, provider);
//! session.start().await?;
//!
//! let result = session.call(op, std::time::Duration::from_secs(5)).await?;
//! println!("{:?}", result);
//!
//! session.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! A session wires together five pieces:
//!
//! - [`work_queue::WorkQueue`] — the FIFO of submitted operations, the
//!   source of strictly increasing `request_id`s.
//! - [`submitter`] — drains the work queue and dispatches each operation to
//!   a [`ProviderClient`], either as a fire-and-forget cloud request or a
//!   synchronous direct read.
//! - [`event_queue::EventQueue`] — the single channel all asynchronous
//!   outcomes funnel through: expected results, direct results, provider
//!   failures, indirect replies, and watch notifications.
//! - [`listener::ResponseListener`] — accepts inbound reply connections and
//!   feeds them into the event queue.
//! - [`sorter`] — the only task that drains the event queue, correlating
//!   indirect replies with their expected slot in strict submission order,
//!   firing watches, and completing [`future::FaasFuture`]s.
//!
//! [`session::Session`] owns the lifetime of all of the above.

pub mod config;
pub mod error;
pub mod event_queue;
pub mod future;
pub mod listener;
pub mod model;
pub mod provider;
pub mod session;
pub mod sorter;
pub mod submitter;
pub mod watch;
pub mod work_queue;

/// `use faaskeeper_client::prelude::*` for convenient access to the types
/// most callers need.
pub mod prelude {
    pub use crate::config::SessionConfig;
    pub use crate::error::{ClientError, ProviderError};
    pub use crate::future::{FaasFuture, FaasFutureWaiter};
    pub use crate::model::{EpochMeta, Modified, Node, Operation, OpResult, SystemMeta};
    pub use crate::provider::{DirectOutcome, ProviderClient};
    pub use crate::session::Session;
    pub use crate::watch::{Watch, WatchEventType, WatchType, WatchedEvent};
}

pub use prelude::*;
