//! Scripted in-memory cluster.
//!
//! Holds nodes, namespaces, pods and log contents in memory, with optional
//! failure injection and artificial latency. Records every log request so
//! callers can assert what was (and was not) inspected.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{ClusterQuery, LogRequest, PodPhase, PodSummary, ReadyCondition};
use crate::error::QueryError;
use crate::types::LogSource;

type LogKey = (String, String, Option<String>, LogSource);

#[derive(Debug, Default)]
struct State {
    nodes: BTreeMap<String, Option<ReadyCondition>>,
    namespaces: BTreeMap<String, Vec<PodSummary>>,
    /// Phase reported by `pod_phase` when it differs from the listing.
    phase_overrides: HashMap<(String, String), PodPhase>,
    logs: HashMap<LogKey, Result<String, String>>,
    namespace_listing_failure: Option<String>,
    node_listing_failure: Option<String>,
    node_failures: HashMap<String, String>,
    pod_listing_failures: HashMap<String, String>,
    slow_nodes: BTreeSet<String>,
    log_requests: Vec<LogRequest>,
}

/// An in-memory [`ClusterQuery`].
#[derive(Debug, Default)]
pub struct InMemoryCluster {
    state: Mutex<State>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Decrements the in-flight counter when a call finishes.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn failure(operation: &str, reason: &str) -> QueryError {
    QueryError::Command {
        command: operation.to_string(),
        stderr: reason.to_string(),
    }
}

impl InMemoryCluster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delay every call by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Add a node with a Ready condition.
    #[must_use]
    pub fn with_node(self, name: &str, ready: bool, reason: &str) -> Self {
        self.set_node(name, ready, reason);
        self
    }

    /// Add a node that reports no Ready condition.
    #[must_use]
    pub fn with_node_without_condition(self, name: &str) -> Self {
        self.state().nodes.insert(name.to_string(), None);
        self
    }

    /// Add an empty namespace.
    #[must_use]
    pub fn with_namespace(self, namespace: &str) -> Self {
        self.state()
            .namespaces
            .entry(namespace.to_string())
            .or_default();
        self
    }

    /// Add a pod (creating its namespace if needed).
    #[must_use]
    pub fn with_pod(self, namespace: &str, pod: PodSummary) -> Self {
        self.state()
            .namespaces
            .entry(namespace.to_string())
            .or_default()
            .push(pod);
        self
    }

    /// Set log content. A `None` container matches any container of the pod.
    #[must_use]
    pub fn with_log(
        self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        source: LogSource,
        content: &str,
    ) -> Self {
        self.state().logs.insert(
            log_key(namespace, pod, container, source),
            Ok(content.to_string()),
        );
        self
    }

    /// Make a log fetch fail.
    #[must_use]
    pub fn fail_log(
        self,
        namespace: &str,
        pod: &str,
        container: Option<&str>,
        source: LogSource,
        reason: &str,
    ) -> Self {
        self.state().logs.insert(
            log_key(namespace, pod, container, source),
            Err(reason.to_string()),
        );
        self
    }

    #[must_use]
    pub fn fail_namespace_listing(self, reason: &str) -> Self {
        self.state().namespace_listing_failure = Some(reason.to_string());
        self
    }

    #[must_use]
    pub fn fail_node_listing(self, reason: &str) -> Self {
        self.state().node_listing_failure = Some(reason.to_string());
        self
    }

    /// Make the Ready-condition query for one node fail.
    #[must_use]
    pub fn fail_node(self, node: &str, reason: &str) -> Self {
        self.state()
            .node_failures
            .insert(node.to_string(), reason.to_string());
        self
    }

    /// Make pod listing in one namespace fail.
    #[must_use]
    pub fn fail_pod_listing(self, namespace: &str, reason: &str) -> Self {
        self.state()
            .pod_listing_failures
            .insert(namespace.to_string(), reason.to_string());
        self
    }

    /// Add a node whose Ready-condition query hangs far longer than any
    /// sensible timeout.
    #[must_use]
    pub fn with_hung_node(self, node: &str) -> Self {
        {
            let mut state = self.state();
            state.nodes.entry(node.to_string()).or_insert(None);
            state.slow_nodes.insert(node.to_string());
        }
        self
    }

    /// Change (or add) a node's Ready condition.
    pub fn set_node(&self, name: &str, ready: bool, reason: &str) {
        self.state().nodes.insert(
            name.to_string(),
            Some(ReadyCondition {
                ready,
                reason: reason.to_string(),
            }),
        );
    }

    /// Report a different phase from `pod_phase` than from the listing.
    pub fn set_pod_phase(&self, namespace: &str, pod: &str, phase: PodPhase) {
        self.state()
            .phase_overrides
            .insert((namespace.to_string(), pod.to_string()), phase);
    }

    /// Clear an injected namespace-listing failure.
    pub fn restore_namespace_listing(&self) {
        self.state().namespace_listing_failure = None;
    }

    /// Every log request received so far.
    pub fn log_requests(&self) -> Vec<LogRequest> {
        self.state().log_requests.clone()
    }

    /// Log requests that targeted one pod.
    pub fn log_requests_for(&self, namespace: &str, pod: &str) -> Vec<LogRequest> {
        self.state()
            .log_requests
            .iter()
            .filter(|r| r.namespace == namespace && r.pod == pod)
            .cloned()
            .collect()
    }

    /// Highest number of concurrent calls observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        guard
    }
}

fn log_key(namespace: &str, pod: &str, container: Option<&str>, source: LogSource) -> LogKey {
    (
        namespace.to_string(),
        pod.to_string(),
        container.map(str::to_string),
        source,
    )
}

#[async_trait]
impl ClusterQuery for InMemoryCluster {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn list_namespaces(&self) -> Result<Vec<String>, QueryError> {
        let _guard = self.enter().await;
        let state = self.state();
        if let Some(reason) = &state.namespace_listing_failure {
            return Err(failure("list namespaces", reason));
        }
        Ok(state.namespaces.keys().cloned().collect())
    }

    async fn list_nodes(&self) -> Result<Vec<String>, QueryError> {
        let _guard = self.enter().await;
        let state = self.state();
        if let Some(reason) = &state.node_listing_failure {
            return Err(failure("list nodes", reason));
        }
        Ok(state.nodes.keys().cloned().collect())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodSummary>, QueryError> {
        let _guard = self.enter().await;
        let state = self.state();
        if let Some(reason) = state.pod_listing_failures.get(namespace) {
            return Err(failure("list pods", reason));
        }
        Ok(state.namespaces.get(namespace).cloned().unwrap_or_default())
    }

    async fn node_ready_condition(
        &self,
        node: &str,
    ) -> Result<Option<ReadyCondition>, QueryError> {
        let _guard = self.enter().await;
        let hung = self.state().slow_nodes.contains(node);
        if hung {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        let state = self.state();
        if let Some(reason) = state.node_failures.get(node) {
            return Err(failure("get node", reason));
        }
        state
            .nodes
            .get(node)
            .cloned()
            .ok_or_else(|| QueryError::NotFound(format!("node {node}")))
    }

    async fn pod_phase(&self, namespace: &str, pod: &str) -> Result<PodPhase, QueryError> {
        let _guard = self.enter().await;
        let state = self.state();
        if let Some(phase) = state
            .phase_overrides
            .get(&(namespace.to_string(), pod.to_string()))
        {
            return Ok(*phase);
        }
        state
            .namespaces
            .get(namespace)
            .and_then(|pods| pods.iter().find(|p| p.name == pod))
            .map(|p| p.phase)
            .ok_or_else(|| QueryError::NotFound(format!("pod {namespace}/{pod}")))
    }

    async fn fetch_log_tail(&self, request: &LogRequest) -> Result<String, QueryError> {
        let _guard = self.enter().await;
        let mut state = self.state();
        state.log_requests.push(request.clone());

        let exact = log_key(
            &request.namespace,
            &request.pod,
            request.container.as_deref(),
            request.source,
        );
        let any_container = log_key(&request.namespace, &request.pod, None, request.source);

        match state.logs.get(&exact).or_else(|| state.logs.get(&any_container)) {
            Some(Ok(content)) => Ok(super::tail_lines(content, request.max_lines)),
            Some(Err(reason)) => Err(failure("fetch log", reason)),
            None => Ok(String::new()),
        }
    }
}
