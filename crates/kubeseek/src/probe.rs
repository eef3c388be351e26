//! Node and namespace health probes.
//!
//! A probe never fails: query errors become an unhealthy record carrying the
//! error text.

use tracing::{debug, warn};

use crate::cluster::ClusterQuery;
use crate::types::{NamespaceHealth, NodeHealth};

/// Message for a NotReady node that reported no reason.
pub const NODE_NOT_READY: &str = "node is not ready";

/// Message for a node whose status has no Ready condition.
pub const NODE_NO_READY_CONDITION: &str = "node reports no Ready condition";

/// Message for a namespace with pods outside Running/Succeeded.
pub const UNHEALTHY_PODS_PRESENT: &str = "unhealthy pods present";

/// Probe a node's Ready condition.
pub async fn probe_node(cluster: &dyn ClusterQuery, node: &str) -> NodeHealth {
    match cluster.node_ready_condition(node).await {
        Ok(Some(condition)) if condition.ready => {
            debug!(node = %node, "Node ready");
            NodeHealth::healthy(node)
        }
        Ok(Some(condition)) => {
            let message = if condition.reason.is_empty() {
                NODE_NOT_READY.to_string()
            } else {
                condition.reason
            };
            warn!(node = %node, reason = %message, "Node not ready");
            NodeHealth::unhealthy(node, message)
        }
        Ok(None) => {
            warn!(node = %node, "Node has no Ready condition");
            NodeHealth::unhealthy(node, NODE_NO_READY_CONDITION)
        }
        Err(e) => {
            warn!(node = %node, error = %e, "Node probe failed");
            NodeHealth::unhealthy(node, e.to_string())
        }
    }
}

/// Probe a namespace by pod phase. Pods outside Running/Succeeded are unhealthy.
pub async fn probe_namespace(cluster: &dyn ClusterQuery, namespace: &str) -> NamespaceHealth {
    let pods = match cluster.list_pods(namespace).await {
        Ok(pods) => pods,
        Err(e) => {
            warn!(namespace = %namespace, error = %e, "Namespace probe failed");
            return NamespaceHealth::unhealthy(namespace, e.to_string(), Vec::new());
        }
    };

    let unhealthy: Vec<String> = pods
        .into_iter()
        .filter(|pod| !pod.phase.is_healthy())
        .map(|pod| pod.name)
        .collect();

    if unhealthy.is_empty() {
        NamespaceHealth::healthy(namespace)
    } else {
        warn!(
            namespace = %namespace,
            pods = ?unhealthy,
            "Namespace has unhealthy pods"
        );
        NamespaceHealth::unhealthy(namespace, UNHEALTHY_PODS_PRESENT, unhealthy)
    }
}
