use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClientError;
use crate::future::FaasFuture;

/// A snapshot of a znode-like entity.
///
/// Everything about the payload besides `path` and `modified` is opaque to
/// the core engine, so `data` stays a raw byte blob rather than a typed
/// field, and any additional attributes the provider attaches ride along in
/// `extra`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Node {
    pub path: String,
    #[serde(default)]
    pub data: Vec<u8>,
    pub modified: Modified,
    #[serde(flatten, default)]
    pub extra: std::collections::BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Modified {
    pub system: SystemMeta,
    pub epoch: EpochMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SystemMeta {
    /// Monotonically assigned logical timestamp.
    pub sum: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EpochMeta {
    /// Dependency identifiers of the form `path_suffix`; the paths
    /// affected by this epoch are the prefixes of each entry split on `_`.
    pub version: Vec<String>,
}

impl EpochMeta {
    /// Paths extracted from the dependency identifiers.
    pub fn affected_paths(&self) -> Vec<String> {
        self.version
            .iter()
            .map(|entry| entry.split('_').next().unwrap_or(entry).to_string())
            .collect()
    }
}

/// Sum type replacing a duck-typed result: a node snapshot, a raw byte
/// payload, or nothing, encoded so callers match on variant instead of
/// doing a runtime type test.
#[derive(Debug, Clone)]
pub enum OpResult {
    Node(Node),
    Bytes(Vec<u8>),
    Empty,
}

impl OpResult {
    /// The node this result carries, if any — used by the Sorter to decide
    /// whether a direct result should trigger watch dispatch.
    pub fn as_node(&self) -> Option<&Node> {
        match self {
            OpResult::Node(node) => Some(node),
            _ => None,
        }
    }
}

/// An abstract user-submitted request. Immutable after creation.
///
/// `Operation` implementations are the out-of-scope user-facing API surface
/// (create/get/set/exists/delete/get_children) in concrete form; this crate
/// only depends on the trait, not on any particular operation.
pub trait Operation: Send + Sync {
    /// Human-readable name, used only for logging.
    fn name(&self) -> &str;

    /// The znode path this operation targets.
    fn path(&self) -> &str;

    /// Whether this operation is dispatched to a cloud worker (`true`) or
    /// satisfied by a direct storage read (`false`).
    fn is_cloud_request(&self) -> bool;

    /// Produce the serializable request payload. Merged with
    /// `sourceIP`/`sourcePort` by the Submitter before being handed to
    /// [`crate::provider::ProviderClient::send_request`].
    fn generate_request(&self) -> Value;

    /// Map a raw indirect reply to a user result, completing `future`.
    ///
    /// Only meaningful for cloud requests; direct requests never reach this
    /// method since their result is already an [`OpResult`] by the time the
    /// Sorter sees it.
    fn process_result(&self, reply: &Value, future: &mut FaasFuture) -> Result<(), ClientError>;
}
