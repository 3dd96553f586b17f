use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::error::ClientError;
use crate::event_queue::EventQueue;
use crate::future::{FaasFuture, FaasFutureWaiter};
use crate::listener::ResponseListener;
use crate::model::Operation;
use crate::provider::ProviderClient;
use crate::sorter;
use crate::submitter;
use crate::work_queue::WorkQueue;

/// Owns the four components (WorkQueue, EventQueue, ResponseListener,
/// Submitter, Sorter) and sequences their start/stop: queues are
/// constructed first and handed to the background tasks by handle, so no
/// component owns another's lifecycle beyond those handles.
pub struct Session {
    config: SessionConfig,
    provider: Arc<dyn ProviderClient>,
    session_id: Option<String>,
    work_queue: Arc<WorkQueue>,
    event_queue: Option<Arc<EventQueue>>,
    listener: Option<Arc<ResponseListener>>,
    cancel: Option<CancellationToken>,
    submitter_task: Option<JoinHandle<()>>,
    sorter_task: Option<JoinHandle<()>>,
}

impl Session {
    pub fn new(config: SessionConfig, provider: Arc<dyn ProviderClient>) -> Self {
        Self {
            config,
            provider,
            session_id: None,
            work_queue: Arc::new(WorkQueue::new()),
            event_queue: None,
            listener: None,
            cancel: None,
            submitter_task: None,
            sorter_task: None,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Starts the response listener, submitter, and sorter tasks: assign a
    /// fresh session id, stand up the reply channel, then let the
    /// background tasks run.
    #[instrument(skip_all)]
    pub async fn start(&mut self) -> Result<(), ClientError> {
        let session_id = Uuid::new_v4().simple().to_string()[..8].to_string();

        let (event_queue, receiver) = EventQueue::new(256);
        let listener = Arc::new(
            ResponseListener::start(
                self.config.listener_port,
                &self.config.echo_url,
                self.config.public_address_override.clone(),
                self.config.poll_interval,
                self.config.max_message_bytes,
                event_queue.clone(),
            )
            .await?,
        );

        let cancel = CancellationToken::new();

        let submitter_task = tokio::spawn(submitter::run(
            session_id.clone(),
            self.work_queue.clone(),
            event_queue.clone(),
            self.provider.clone(),
            listener.clone(),
            self.config.poll_interval,
            cancel.clone(),
        ));

        let sorter_task = tokio::spawn(sorter::run(
            event_queue.clone(),
            receiver,
            self.config.request_timeout,
            self.config.poll_interval,
            cancel.clone(),
        ));

        self.session_id = Some(session_id);
        self.event_queue = Some(event_queue);
        self.listener = Some(listener);
        self.cancel = Some(cancel);
        self.submitter_task = Some(submitter_task);
        self.sorter_task = Some(sorter_task);
        Ok(())
    }

    /// Enqueues an operation without waiting for it, returning the waiter
    /// half so the caller can block on the result whenever it's ready to.
    pub fn submit(&self, op: Arc<dyn Operation>) -> Result<FaasFutureWaiter, ClientError> {
        let (future, waiter) = FaasFuture::new_pair();
        self.work_queue.enqueue(op, future)?;
        Ok(waiter)
    }

    /// Enqueues an operation and awaits its result within `timeout`.
    pub async fn call(
        &self,
        op: Arc<dyn Operation>,
        timeout: std::time::Duration,
    ) -> Result<crate::model::OpResult, ClientError> {
        let (future, waiter) = FaasFuture::new_pair();
        self.work_queue.enqueue(op, future)?;
        waiter.wait(timeout).await
    }

    /// Before shutdown: stop accepting new requests, wait for in-flight
    /// work to drain, then tear down the background tasks.
    #[instrument(skip_all)]
    pub async fn stop(&mut self) -> Result<(), ClientError> {
        self.work_queue.close();
        self.work_queue
            .drain_or_fail(self.config.shutdown_drain_timeout)
            .await?;

        if let Some(event_queue) = &self.event_queue {
            event_queue.close();
        }
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = self.submitter_task.take() {
            let _ = task.await;
        }
        if let Some(task) = self.sorter_task.take() {
            let _ = task.await;
        }
        if let Some(listener) = self.listener.take() {
            listener.stop().await;
        }

        self.session_id = None;
        self.event_queue = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OpResult;
    use crate::provider::testing::InMemoryProvider;
    use serde_json::Value;

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

    fn local_config() -> SessionConfig {
        SessionConfig::new("test-session").with_public_address_override("127.0.0.1".to_string())
    }

    #[tokio::test]
    async fn start_then_stop_tears_down_cleanly() {
        let provider: Arc<dyn ProviderClient> = Arc::new(InMemoryProvider::default());
        let mut session = Session::new(local_config(), provider);
        session.start().await.unwrap();
        assert!(session.session_id().is_some());
        session.stop().await.unwrap();
        assert!(session.session_id().is_none());
    }

    #[tokio::test]
    async fn call_completes_with_direct_result() {
        let provider = InMemoryProvider::default();
        *provider.direct_result.lock().unwrap() = Some(crate::provider::DirectOutcome::Plain(OpResult::Empty));
        let provider: Arc<dyn ProviderClient> = Arc::new(provider);

        let mut session = Session::new(local_config(), provider);
        session.start().await.unwrap();
        let result = session
            .call(Arc::new(NoOp), std::time::Duration::from_secs(2))
            .await
            .unwrap();
        assert!(matches!(result, OpResult::Empty));
        session.stop().await.unwrap();
    }
}
