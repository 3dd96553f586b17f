use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProviderError;
use crate::model::{Operation, OpResult};
use crate::watch::Watch;

/// What a direct storage read can hand back: either a plain result, or a
/// result paired with a watch to register. A sum type replaces a
/// "return a tuple or not" convention.
pub enum DirectOutcome {
    Plain(OpResult),
    WithWatch(OpResult, Watch),
}

impl DirectOutcome {
    pub fn into_parts(self) -> (OpResult, Option<Watch>) {
        match self {
            DirectOutcome::Plain(result) => (result, None),
            DirectOutcome::WithWatch(result, watch) => (result, Some(watch)),
        }
    }
}

/// The cloud provider adapter consumed by this crate. Its implementation —
/// talking to the actual managed storage and request queue — is out of
/// scope here; this trait is the seam.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Fire-and-forget write to the provider's request queue. `data`
    /// carries at minimum `op`, `path`, `user`, `version`, `flags`, `data`,
    /// `sourceIP`, `sourcePort`.
    async fn send_request(&self, request_id: String, data: Value) -> Result<(), ProviderError>;

    /// Synchronous direct storage access.
    async fn execute_request(
        &self,
        op: &dyn Operation,
        listener_addr: (String, u16),
    ) -> Result<Option<DirectOutcome>, ProviderError>;
}
