//! Per-call deadline for any backend.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use super::{ClusterQuery, LogRequest, PodPhase, PodSummary, ReadyCondition};
use crate::error::QueryError;

/// Wraps a [`ClusterQuery`] so every call fails with
/// [`QueryError::Timeout`] once `timeout` elapses.
#[derive(Debug, Clone)]
pub struct TimeoutCluster<Q> {
    inner: Q,
    timeout: Duration,
}

impl<Q: ClusterQuery> TimeoutCluster<Q> {
    pub fn new(inner: Q, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<T, QueryError>
    where
        F: Future<Output = Result<T, QueryError>> + Send,
    {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| QueryError::Timeout {
                operation,
                timeout: self.timeout,
            })?
    }
}

#[async_trait]
impl<Q: ClusterQuery> ClusterQuery for TimeoutCluster<Q> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn list_namespaces(&self) -> Result<Vec<String>, QueryError> {
        self.bounded("list namespaces", self.inner.list_namespaces())
            .await
    }

    async fn list_nodes(&self) -> Result<Vec<String>, QueryError> {
        self.bounded("list nodes", self.inner.list_nodes()).await
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodSummary>, QueryError> {
        self.bounded("list pods", self.inner.list_pods(namespace))
            .await
    }

    async fn node_ready_condition(
        &self,
        node: &str,
    ) -> Result<Option<ReadyCondition>, QueryError> {
        self.bounded("get node", self.inner.node_ready_condition(node))
            .await
    }

    async fn pod_phase(&self, namespace: &str, pod: &str) -> Result<PodPhase, QueryError> {
        self.bounded("get pod phase", self.inner.pod_phase(namespace, pod))
            .await
    }

    async fn fetch_log_tail(&self, request: &LogRequest) -> Result<String, QueryError> {
        self.bounded("fetch log", self.inner.fetch_log_tail(request))
            .await
    }
}
