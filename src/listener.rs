use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::error::ClientError;
use crate::event_queue::EventQueue;

/// Background network endpoint receiving indirect results and watch
/// notifications over TCP.
pub struct ResponseListener {
    address: String,
    port: u16,
    cancel: CancellationToken,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ResponseListener {
    /// Binds the listening socket, discovers the public IP, and spawns the
    /// background accept loop. Returns once the listener is ready to
    /// advertise its `(address, port)` rendezvous to cloud workers.
    pub async fn start(
        bind_port: u16,
        echo_url: &str,
        address_override: Option<String>,
        poll_interval: Duration,
        max_message_bytes: usize,
        events: Arc<EventQueue>,
    ) -> Result<Self, ClientError> {
        let listener = TcpListener::bind(("0.0.0.0", bind_port)).await?;
        let port = listener.local_addr()?.port();
        let address = match address_override {
            Some(address) => address,
            None => discover_public_address(echo_url).await?,
        };

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(accept_loop(
            listener,
            events,
            task_cancel,
            poll_interval,
            max_message_bytes,
        ));

        info!(%address, port, "response listener bound");
        Ok(Self {
            address,
            port,
            cancel,
            task: std::sync::Mutex::new(Some(task)),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Clears the run flag and waits for the accept loop to acknowledge
    /// exit. Maximum stop latency equals the accept poll interval plus one
    /// JSON-decode duration.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = self.task.lock().expect("listener task lock poisoned").take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

async fn discover_public_address(echo_url: &str) -> Result<String, ClientError> {
    let response = reqwest::get(echo_url)
        .await
        .map_err(|e| ClientError::Io(e.to_string()))?;
    let body = response
        .text()
        .await
        .map_err(|e| ClientError::Io(e.to_string()))?;
    Ok(body.trim().to_string())
}

#[instrument(skip_all)]
async fn accept_loop(
    listener: TcpListener,
    events: Arc<EventQueue>,
    cancel: CancellationToken,
    poll_interval: Duration,
    max_message_bytes: usize,
) {
    while !cancel.is_cancelled() {
        match tokio::time::timeout(poll_interval, listener.accept()).await {
            Ok(Ok((socket, addr))) => {
                info!(%addr, "accepted connection");
                if let Err(err) = handle_connection(socket, max_message_bytes, &events).await {
                    warn!(%addr, error = %err, "dropping malformed message");
                }
            }
            Ok(Err(err)) => {
                // Socket errors are logged and the single connection is
                // dropped without terminating the loop.
                warn!(error = %err, "socket accept error");
            }
            Err(_elapsed) => {
                // Accept timeout: expected, used only to re-check `cancel`.
            }
        }
    }
    info!("response listener accept loop stopped");
}

async fn handle_connection(
    mut socket: TcpStream,
    max_message_bytes: usize,
    events: &Arc<EventQueue>,
) -> Result<(), ClientError> {
    let mut buf = Vec::new();
    socket
        .take(max_message_bytes as u64)
        .read_to_end(&mut buf)
        .await?;

    let message: Value = serde_json::from_slice(&buf)?;
    if message.get("watch-event").is_some() {
        events.add_watch_notification(message).await
    } else {
        events.add_indirect_result(message).await
    }
}
