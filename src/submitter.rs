use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::error::ClientError;
use crate::event_queue::EventQueue;
use crate::listener::ResponseListener;
use crate::model::OpResult;
use crate::provider::ProviderClient;
use crate::work_queue::WorkQueue;

/// Drains `WorkQueue`, dispatching each operation to the provider and
/// pushing the outcome into `EventQueue`.
///
/// Runs until `cancel` is triggered; intended to be driven by
/// `tokio::spawn` from [`crate::session::Session`].
#[instrument(skip_all)]
pub async fn run(
    session_id: String,
    work_queue: Arc<WorkQueue>,
    event_queue: Arc<EventQueue>,
    provider: Arc<dyn ProviderClient>,
    listener: Arc<ResponseListener>,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    info!("submitter started");
    while !cancel.is_cancelled() {
        let submission = work_queue.dequeue(poll_interval).await;
        let Some((request_id, op, future)) = submission else {
            continue;
        };

        if op.is_cloud_request() {
            // The expected-result slot must be visible to the Sorter
            // before the provider call returns, so that an indirect reply
            // can never arrive before its slot exists.
            if let Err(err) = event_queue
                .add_expected_result(request_id, op.clone(), future)
                .await
            {
                warn!(request_id, error = %err, "event queue closed, dropping cloud request");
                continue;
            }

            let data = merge_source(
                op.generate_request(),
                listener.address(),
                listener.port(),
            );
            let wire_id = format!("{session_id}-{request_id}");
            if let Err(provider_err) = provider.send_request(wire_id, data).await {
                // Surface a synthetic failure event rather than leaving the
                // expected-result slot orphaned.
                if let Err(err) = event_queue
                    .add_failure(request_id, ClientError::Provider(provider_err))
                    .await
                {
                    warn!(request_id, error = %err, "event queue closed, dropping failure");
                }
            }
        } else {
            let listener_addr = (listener.address().to_string(), listener.port());
            let outcome = match provider.execute_request(op.as_ref(), listener_addr).await {
                Ok(Some(direct)) => {
                    let (result, watch) = direct.into_parts();
                    if let Some(watch) = watch {
                        if let Err(err) = event_queue.add_watch(op.path(), watch) {
                            warn!(request_id, error = %err, "failed to register watch");
                        }
                    }
                    Ok(result)
                }
                Ok(None) => Ok(OpResult::Empty),
                Err(provider_err) => Err(ClientError::Provider(provider_err)),
            };

            if let Err(err) = event_queue
                .add_direct_result(request_id, outcome, future)
                .await
            {
                warn!(request_id, error = %err, "event queue closed, dropping direct result");
            }
        }
    }
    info!("submitter stopped");
}

fn merge_source(mut data: Value, ip: &str, port: u16) -> Value {
    if let Value::Object(map) = &mut data {
        map.insert("sourceIP".to_string(), Value::String(ip.to_string()));
        map.insert("sourcePort".to_string(), Value::Number(port.into()));
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_queue::Event;
    use crate::future::FaasFuture;
    use crate::model::Operation;
    use crate::provider::testing::InMemoryProvider;
    use crate::provider::DirectOutcome;
    use crate::watch::{Watch, WatchType};
    use serde_json::json;
    use std::time::Duration;

    struct CreateOp {
        path: String,
    }
    impl Operation for CreateOp {
        fn name(&self) -> &str {
            "create"
        }
        fn path(&self) -> &str {
            &self.path
        }
        fn is_cloud_request(&self) -> bool {
            true
        }
        fn generate_request(&self) -> Value {
            json!({"op": "create_node", "path": self.path})
        }
        fn process_result(&self, _reply: &Value, _future: &mut FaasFuture) -> Result<(), ClientError> {
            Ok(())
        }
    }

    struct GetOp {
        path: String,
    }
    impl Operation for GetOp {
        fn name(&self) -> &str {
            "get_data"
        }
        fn path(&self) -> &str {
            &self.path
        }
        fn is_cloud_request(&self) -> bool {
            false
        }
        fn generate_request(&self) -> Value {
            json!({"op": "get_data", "path": self.path})
        }
        fn process_result(&self, _reply: &Value, _future: &mut FaasFuture) -> Result<(), ClientError> {
            Ok(())
        }
    }

    /// A listener bound on an ephemeral local port with the public-address
    /// lookup skipped, so tests never make a real outbound HTTP call.
    async fn local_listener(event_queue: Arc<EventQueue>) -> Arc<ResponseListener> {
        Arc::new(
            ResponseListener::start(
                0,
                "unused",
                Some("127.0.0.1".to_string()),
                Duration::from_millis(20),
                1024,
                event_queue,
            )
            .await
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn cloud_request_run_emits_expected_result_then_sends() {
        let (event_queue, mut rx) = EventQueue::new(8);
        let listener = local_listener(event_queue.clone()).await;
        let provider = Arc::new(InMemoryProvider::default());
        let work_queue = Arc::new(WorkQueue::new());
        work_queue
            .enqueue(
                Arc::new(CreateOp { path: "/a".into() }),
                FaasFuture::new_pair().0,
            )
            .unwrap();

        let cancel = CancellationToken::new();
        let run_cancel = cancel.clone();
        let provider_dyn: Arc<dyn ProviderClient> = provider.clone();
        let handle = tokio::spawn(run(
            "S".to_string(),
            work_queue,
            event_queue,
            provider_dyn,
            listener.clone(),
            Duration::from_millis(20),
            run_cancel,
        ));

        match rx.recv().await {
            Some(Event::CloudExpectedResult { request_id, .. }) => assert_eq!(request_id, 0),
            _ => panic!("expected CloudExpectedResult first"),
        }

        // The provider only sees the request after its slot is already
        // reserved in the event queue.
        let sent = provider.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "S-0");

        cancel.cancel();
        handle.await.unwrap();
        listener.stop().await;
    }

    #[tokio::test]
    async fn cloud_request_provider_failure_emits_cloud_failure() {
        let (event_queue, mut rx) = EventQueue::new(8);
        let listener = local_listener(event_queue.clone()).await;
        let provider: Arc<dyn ProviderClient> = Arc::new(InMemoryProvider {
            fail_send: true,
            ..Default::default()
        });
        let work_queue = Arc::new(WorkQueue::new());
        work_queue
            .enqueue(
                Arc::new(CreateOp { path: "/a".into() }),
                FaasFuture::new_pair().0,
            )
            .unwrap();

        let cancel = CancellationToken::new();
        let run_cancel = cancel.clone();
        let handle = tokio::spawn(run(
            "S".to_string(),
            work_queue,
            event_queue,
            provider,
            listener.clone(),
            Duration::from_millis(20),
            run_cancel,
        ));

        match rx.recv().await {
            Some(Event::CloudExpectedResult { request_id, .. }) => assert_eq!(request_id, 0),
            _ => panic!("expected CloudExpectedResult first"),
        }
        match rx.recv().await {
            Some(Event::CloudFailure { request_id, .. }) => assert_eq!(request_id, 0),
            _ => panic!("expected CloudFailure after a failed send_request"),
        }

        cancel.cancel();
        handle.await.unwrap();
        listener.stop().await;
    }

    #[tokio::test]
    async fn direct_request_run_emits_plain_result() {
        let (event_queue, mut rx) = EventQueue::new(8);
        let listener = local_listener(event_queue.clone()).await;
        let provider = InMemoryProvider::default();
        *provider.direct_result.lock().unwrap() = Some(DirectOutcome::Plain(OpResult::Empty));
        let provider: Arc<dyn ProviderClient> = Arc::new(provider);

        let work_queue = Arc::new(WorkQueue::new());
        work_queue
            .enqueue(
                Arc::new(GetOp { path: "/x".into() }),
                FaasFuture::new_pair().0,
            )
            .unwrap();

        let cancel = CancellationToken::new();
        let run_cancel = cancel.clone();
        let handle = tokio::spawn(run(
            "S".to_string(),
            work_queue,
            event_queue,
            provider,
            listener.clone(),
            Duration::from_millis(20),
            run_cancel,
        ));

        match rx.recv().await {
            Some(Event::CloudDirectResult { request_id, outcome, .. }) => {
                assert_eq!(request_id, 0);
                assert!(matches!(outcome, Ok(OpResult::Empty)));
            }
            _ => panic!("expected CloudDirectResult"),
        }

        cancel.cancel();
        handle.await.unwrap();
        listener.stop().await;
    }

    #[tokio::test]
    async fn direct_request_with_watch_registers_watch_via_run() {
        let (event_queue, mut rx) = EventQueue::new(8);
        let listener = local_listener(event_queue.clone()).await;
        let provider = InMemoryProvider::default();
        let watch = Watch::new("/x", WatchType::GetData, 0, |_| {});
        *provider.direct_result.lock().unwrap() =
            Some(DirectOutcome::WithWatch(OpResult::Empty, watch));
        let provider: Arc<dyn ProviderClient> = Arc::new(provider);

        let work_queue = Arc::new(WorkQueue::new());
        work_queue
            .enqueue(
                Arc::new(GetOp { path: "/x".into() }),
                FaasFuture::new_pair().0,
            )
            .unwrap();

        let cancel = CancellationToken::new();
        let run_cancel = cancel.clone();
        let event_queue_for_run = event_queue.clone();
        let handle = tokio::spawn(run(
            "S".to_string(),
            work_queue,
            event_queue_for_run,
            provider,
            listener.clone(),
            Duration::from_millis(20),
            run_cancel,
        ));

        match rx.recv().await {
            Some(Event::CloudDirectResult { request_id, .. }) => assert_eq!(request_id, 0),
            _ => panic!("expected CloudDirectResult"),
        }

        // The watch registered alongside the direct result is now live in
        // the registry, independent of the future that completed above.
        let fired = event_queue.get_watches(&["/x".to_string()], 1).unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].path, "/x");

        cancel.cancel();
        handle.await.unwrap();
        listener.stop().await;
    }
}
