use std::time::Duration;

/// Tunables for a single client session.
///
/// This is a plain builder-style struct rather than a file/env-backed
/// layer: the crate is a library embedded in a larger client, not a
/// standalone deployable service, so loading configuration from disk is the
/// embedder's job.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Name of the faaskeeper deployment this session talks to.
    pub service_name: String,

    /// Port the response listener binds to. `0` requests an OS-assigned
    /// ephemeral port.
    pub listener_port: u16,

    /// Endpoint used once at startup to discover this host's public IP.
    pub echo_url: String,

    /// Skips the echo-URL lookup and uses this address instead. Intended
    /// for tests and for deployments that already know their externally
    /// reachable address.
    pub public_address_override: Option<String>,

    /// How long a cloud-request may sit in `Sorter::pending` before it is
    /// failed with [`crate::error::ClientError::Timeout`].
    pub request_timeout: Duration,

    /// Poll interval used by blocking-with-timeout dequeues (`EventQueue`,
    /// `WorkQueue`) and by the response listener's accept loop.
    pub poll_interval: Duration,

    /// Budget for `WorkQueue::drain_or_fail` during `Session::stop`.
    pub shutdown_drain_timeout: Duration,

    /// Ceiling on a single inbound reply-socket message.
    pub max_message_bytes: usize,
}

impl SessionConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            listener_port: 0,
            echo_url: "https://checkip.amazonaws.com".to_string(),
            public_address_override: None,
            request_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(500),
            shutdown_drain_timeout: Duration::from_secs(5),
            max_message_bytes: 64 * 1024,
        }
    }

    pub fn with_listener_port(mut self, port: u16) -> Self {
        self.listener_port = port;
        self
    }

    pub fn with_echo_url(mut self, url: impl Into<String>) -> Self {
        self.echo_url = url.into();
        self
    }

    pub fn with_public_address_override(mut self, address: impl Into<String>) -> Self {
        self.public_address_override = Some(address.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}
