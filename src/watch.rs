use std::collections::HashMap;
use std::sync::Mutex;

/// Kind of watch a caller can register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchType {
    GetData,
    Exists,
    GetChildren,
}

/// Kind of change a watch notification reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventType {
    NodeDataChanged,
    NodeCreated,
    NodeDeleted,
    NodeChildrenChanged,
}

impl WatchEventType {
    pub fn from_wire(code: i64) -> Option<Self> {
        match code {
            0 => Some(WatchEventType::NodeDataChanged),
            1 => Some(WatchEventType::NodeCreated),
            2 => Some(WatchEventType::NodeDeleted),
            3 => Some(WatchEventType::NodeChildrenChanged),
            _ => None,
        }
    }
}

/// Delivered to a watch's callback when it fires.
#[derive(Debug, Clone)]
pub struct WatchedEvent {
    pub event_type: WatchEventType,
    pub path: String,
    pub timestamp: u64,
}

/// A one-shot callback keyed by (path, watch_type), fired when the observed
/// state of the path changes.
pub struct Watch {
    pub path: String,
    pub watch_type: WatchType,
    /// Logical timestamp set at registration; a watch only fires for
    /// observations strictly newer than this, so it never fires against the
    /// very update that installed it.
    pub timestamp: u64,
    deliver: Box<dyn FnOnce(WatchedEvent) + Send>,
}

impl std::fmt::Debug for Watch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watch")
            .field("path", &self.path)
            .field("watch_type", &self.watch_type)
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}

impl Watch {
    pub fn new(
        path: impl Into<String>,
        watch_type: WatchType,
        timestamp: u64,
        deliver: impl FnOnce(WatchedEvent) + Send + 'static,
    ) -> Self {
        Self {
            path: path.into(),
            watch_type,
            timestamp,
            deliver: Box::new(deliver),
        }
    }

    pub fn deliver(self, event: WatchedEvent) {
        (self.deliver)(event)
    }
}

/// MD5 digest of `path` — a stable fixed-width key that decouples registry
/// storage from arbitrary path lengths.
pub fn hash_path(path: &str) -> [u8; 16] {
    md5::compute(path.as_bytes()).0
}

/// The watch registry owned by [`crate::event_queue::EventQueue`].
///
/// At most one watch of a given `watch_type` is kept per path at any time;
/// re-registration silently replaces the prior entry.
#[derive(Default)]
pub struct WatchRegistry {
    watches: Mutex<HashMap<[u8; 16], Vec<Watch>>>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_watch(&self, path: &str, watch: Watch) {
        let key = hash_path(path);
        let mut watches = self.watches.lock().expect("watch registry lock poisoned");
        let bucket = watches.entry(key).or_default();
        if let Some(slot) = bucket.iter_mut().find(|w| w.watch_type == watch.watch_type) {
            *slot = watch;
        } else {
            bucket.push(watch);
        }
    }

    /// Returns all watches across `paths` whose `timestamp < observed_timestamp`,
    /// removing exactly those watches from the registry.
    ///
    /// Removal is per-watch, not per-path-bucket — a path with one stale and
    /// one fresh watch keeps the fresh one registered and releases only the
    /// stale one.
    pub fn get_watches(&self, paths: &[String], observed_timestamp: u64) -> Vec<Watch> {
        let mut fired = Vec::new();
        let mut watches = self.watches.lock().expect("watch registry lock poisoned");
        for path in paths {
            let key = hash_path(path);
            if let std::collections::hash_map::Entry::Occupied(mut entry) = watches.entry(key) {
                let bucket = entry.get_mut();
                let mut i = 0;
                while i < bucket.len() {
                    if bucket[i].timestamp < observed_timestamp {
                        fired.push(bucket.remove(i));
                    } else {
                        i += 1;
                    }
                }
                if bucket.is_empty() {
                    entry.remove();
                }
            }
        }
        fired
    }

    /// Finds the registered `GetData` watch for `path` matching a
    /// `NODE_DATA_CHANGED` notification, removing it if found: only the
    /// first matching watch on the path is taken, scanning then stops.
    pub fn take_data_watch(&self, path: &str) -> Option<Watch> {
        let key = hash_path(path);
        let mut watches = self.watches.lock().expect("watch registry lock poisoned");
        if let std::collections::hash_map::Entry::Occupied(mut entry) = watches.entry(key) {
            let bucket = entry.get_mut();
            if let Some(idx) = bucket.iter().position(|w| w.watch_type == WatchType::GetData) {
                let watch = bucket.remove(idx);
                if bucket.is_empty() {
                    entry.remove();
                }
                return Some(watch);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn reregistration_replaces_prior_watch() {
        let registry = WatchRegistry::new();
        registry.add_watch("/a", Watch::new("/a", WatchType::GetData, 1, |_| {}));
        registry.add_watch("/a", Watch::new("/a", WatchType::GetData, 2, |_| {}));

        let fired = registry.get_watches(&["/a".to_string()], 100);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].timestamp, 2);
    }

    #[test]
    fn partial_removal_keeps_fresh_watch_registered() {
        let registry = WatchRegistry::new();
        registry.add_watch("/a", Watch::new("/a", WatchType::GetData, 1, |_| {}));
        registry.add_watch("/a", Watch::new("/a", WatchType::Exists, 50, |_| {}));

        let fired = registry.get_watches(&["/a".to_string()], 10);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].watch_type, WatchType::GetData);

        // The Exists watch (timestamp 50) is still registered.
        let fired_again = registry.get_watches(&["/a".to_string()], 1000);
        assert_eq!(fired_again.len(), 1);
        assert_eq!(fired_again[0].watch_type, WatchType::Exists);
    }

    #[test]
    fn take_data_watch_fires_and_removes() {
        let registry = WatchRegistry::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        registry.add_watch(
            "/x",
            Watch::new("/x", WatchType::GetData, 10, move |_event| {
                fired_clone.store(true, Ordering::SeqCst);
            }),
        );

        let watch = registry.take_data_watch("/x").expect("watch present");
        watch.deliver(WatchedEvent {
            event_type: WatchEventType::NodeDataChanged,
            path: "/x".to_string(),
            timestamp: 20,
        });
        assert!(fired.load(Ordering::SeqCst));
        assert!(registry.take_data_watch("/x").is_none());
    }
}
