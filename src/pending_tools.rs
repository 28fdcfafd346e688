//! Pending-tool set.
//!
//! A concurrency-safe set of outstanding `tool_use` IDs, shared between the
//! accumulator (which adds IDs as tool-use blocks finish streaming) and the
//! correlator (which removes them as tool-result entries show up in the
//! agent's session log). Grounded in
//! `examples/original_source/tool_correlator.go`'s `pendingToolIDs` map
//! guarded by an `RWMutex`; translated to a `tokio::sync::RwLock` since the
//! rest of the proxy's suspension points are async.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::RwLock;

/// Shared handle to the set; cloning shares the same underlying set.
#[derive(Clone, Default)]
pub struct PendingTools {
    inner: Arc<RwLock<HashSet<String>>>,
}

impl PendingTools {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `id` to the set. A no-op for an empty id.
    pub async fn add(&self, id: &str) {
        if id.is_empty() {
            return;
        }
        self.inner.write().await.insert(id.to_string());
    }

    /// Remove `id` from the set, returning the set's new size. A no-op
    /// (returning the unchanged size) for an empty id.
    pub async fn remove(&self, id: &str) -> usize {
        let mut guard = self.inner.write().await;
        if !id.is_empty() {
            guard.remove(id);
        }
        guard.len()
    }

    pub async fn contains(&self, id: &str) -> bool {
        if id.is_empty() {
            return false;
        }
        self.inner.read().await.contains(id)
    }

    /// A point-in-time copy of the set's contents.
    pub async fn snapshot(&self) -> HashSet<String> {
        self.inner.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_and_remove_round_trip() {
        let set = PendingTools::new();
        set.add("toolu_1").await;
        set.add("toolu_2").await;
        assert_eq!(set.len().await, 2);
        assert!(set.contains("toolu_1").await);

        let remaining = set.remove("toolu_1").await;
        assert_eq!(remaining, 1);
        assert!(!set.contains("toolu_1").await);
    }

    #[tokio::test]
    async fn empty_id_operations_are_no_ops() {
        let set = PendingTools::new();
        set.add("").await;
        assert!(set.is_empty().await);
        assert_eq!(set.remove("").await, 0);
    }

    #[tokio::test]
    async fn snapshot_is_independent_of_later_mutation() {
        let set = PendingTools::new();
        set.add("toolu_1").await;
        let snap = set.snapshot().await;
        set.add("toolu_2").await;
        assert_eq!(snap.len(), 1);
        assert_eq!(set.len().await, 2);
    }
}
