//! Latest-snapshot store and the read façade over it.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::types::{NamespaceHealth, NodeHealth, PodIssueReport, Snapshot};

/// Holds exactly one snapshot. Publishing swaps the whole thing, so readers
/// see either the previous snapshot or the new one, never a mix.
#[derive(Debug)]
pub struct SnapshotStore {
    current: RwLock<Arc<Snapshot>>,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore {
    /// A store holding the empty placeholder snapshot.
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(Snapshot::empty())),
        }
    }

    /// Replace the current snapshot.
    pub async fn publish(&self, snapshot: Snapshot) {
        let cycle = snapshot.cycle;
        *self.current.write().await = Arc::new(snapshot);
        debug!(cycle, "Snapshot published");
    }

    /// The current snapshot.
    pub async fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&*self.current.read().await)
    }
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthView {
    pub nodes: BTreeMap<String, NodeHealth>,
    pub namespaces: BTreeMap<String, NamespaceHealth>,
}

/// Body of `GET /status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusView {
    pub namespaces: BTreeMap<String, NamespaceHealth>,
}

/// Read-only view of the latest snapshot.
#[derive(Debug, Clone)]
pub struct StatusFacade {
    store: Arc<SnapshotStore>,
}

impl StatusFacade {
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Self { store }
    }

    pub async fn current_node_health(&self) -> BTreeMap<String, NodeHealth> {
        self.store.current().await.nodes.clone()
    }

    pub async fn current_namespace_health(&self) -> BTreeMap<String, NamespaceHealth> {
        self.store.current().await.namespaces.clone()
    }

    pub async fn current_pod_issues(&self) -> Vec<PodIssueReport> {
        self.store.current().await.pod_issues.clone()
    }

    pub async fn full_snapshot(&self) -> Arc<Snapshot> {
        self.store.current().await
    }

    /// Nodes and namespaces taken from a single snapshot.
    pub async fn health_view(&self) -> HealthView {
        let snapshot = self.store.current().await;
        HealthView {
            nodes: snapshot.nodes.clone(),
            namespaces: snapshot.namespaces.clone(),
        }
    }

    pub async fn status_view(&self) -> StatusView {
        StatusView {
            namespaces: self.current_namespace_health().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot(cycle: u64) -> Snapshot {
        let mut snapshot = Snapshot {
            cycle,
            generated_at: Some(Utc::now()),
            ..Snapshot::default()
        };
        snapshot
            .nodes
            .insert("worker-1".to_string(), NodeHealth::healthy("worker-1"));
        snapshot.namespaces.insert(
            "client-a".to_string(),
            NamespaceHealth::healthy("client-a"),
        );
        snapshot
    }

    #[tokio::test]
    async fn test_empty_before_first_publish() {
        let facade = StatusFacade::new(Arc::new(SnapshotStore::new()));
        assert!(facade.current_node_health().await.is_empty());
        assert!(facade.current_namespace_health().await.is_empty());
        assert!(facade.current_pod_issues().await.is_empty());
        assert!(!facade.full_snapshot().await.is_published());

        let json = serde_json::to_value(facade.health_view().await).unwrap();
        assert_eq!(json, serde_json::json!({ "nodes": {}, "namespaces": {} }));
    }

    #[tokio::test]
    async fn test_publish_replaces_whole_snapshot() {
        let store = Arc::new(SnapshotStore::new());
        let facade = StatusFacade::new(Arc::clone(&store));

        store.publish(snapshot(1)).await;
        let held = facade.full_snapshot().await;
        assert_eq!(held.cycle, 1);

        let mut next = snapshot(2);
        next.nodes.clear();
        store.publish(next).await;

        // Readers holding the old snapshot keep a consistent copy.
        assert_eq!(held.nodes.len(), 1);
        assert_eq!(facade.full_snapshot().await.cycle, 2);
        assert!(facade.current_node_health().await.is_empty());
        assert_eq!(facade.status_view().await.namespaces.len(), 1);
    }
}
