//! Reconciliation loop.
//!
//! Each cycle discovers namespaces and nodes, probes them, inspects pod logs
//! and publishes one fresh [`Snapshot`]. Every stage fans out with at most
//! `concurrency` units in flight and finishes before the next one starts.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cluster::{ClusterQuery, PodSummary};
use crate::config::MonitorConfig;
use crate::error::MonitorError;
use crate::inspector::{inspection_candidates, InspectionOutcome, PodInspector};
use crate::probe::{probe_namespace, probe_node};
use crate::store::SnapshotStore;
use crate::types::{CycleStats, NamespaceHealth, NodeHealth, PodIssueReport, Snapshot};

/// Drives cycles and publishes their snapshots.
#[derive(Clone)]
pub struct Scheduler {
    cluster: Arc<dyn ClusterQuery>,
    config: Arc<MonitorConfig>,
    store: Arc<SnapshotStore>,
}

impl Scheduler {
    pub fn new(
        cluster: Arc<dyn ClusterQuery>,
        config: MonitorConfig,
        store: Arc<SnapshotStore>,
    ) -> Self {
        Self {
            cluster,
            config: Arc::new(config),
            store,
        }
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Run cycles until `shutdown` is cancelled.
    ///
    /// A failed cycle leaves the previous snapshot in place; the loop sleeps
    /// and tries again.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            prefix = %self.config.namespace_prefix,
            interval_secs = self.config.poll_interval.as_secs(),
            concurrency = self.config.concurrency,
            "Reconciliation loop started"
        );

        let mut cycle = 0u64;
        while !shutdown.is_cancelled() {
            cycle += 1;
            match self.run_once(cycle).await {
                Ok(snapshot) => self.store.publish(snapshot).await,
                Err(e) => error!(cycle, error = %e, "Cycle failed, keeping previous snapshot"),
            }

            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        info!(cycles = cycle, "Reconciliation loop stopped");
    }

    /// Run one cycle on its own task.
    ///
    /// A panic inside the cycle or an exceeded cycle deadline is returned as a
    /// [`MonitorError`] instead of taking the loop down.
    pub async fn run_once(&self, cycle: u64) -> Result<Snapshot, MonitorError> {
        let this = self.clone();
        let handle = tokio::spawn(async move { this.run_cycle(cycle).await });
        let abort = handle.abort_handle();

        let joined = match self.config.cycle_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    abort.abort();
                    return Err(MonitorError::CycleTimeout { cycle, timeout });
                }
            },
            None => handle.await,
        };

        joined.map_err(|source| MonitorError::CycleAborted { cycle, source })
    }

    /// Build the snapshot for one cycle. Never fails: every degraded unit is
    /// recorded or logged and the cycle carries on.
    pub async fn run_cycle(&self, cycle: u64) -> Snapshot {
        let started = Instant::now();
        info!(cycle, "Cycle started");

        let (namespaces, nodes) = tokio::join!(self.discover_namespaces(), self.discover_nodes());
        let mut stats = CycleStats::default();

        let nodes = self.probe_nodes(nodes).await;
        stats.nodes_probed = nodes.len();

        let namespace_health = self.probe_namespaces(&namespaces).await;
        stats.namespaces_probed = namespace_health.len();

        let mut pod_issues = Vec::new();
        for namespace in &namespaces {
            pod_issues.extend(self.inspect_namespace(namespace, &mut stats).await);
        }
        pod_issues.sort_by(|a, b| (&a.namespace, &a.pod).cmp(&(&b.namespace, &b.pod)));

        stats.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        info!(
            cycle,
            nodes = stats.nodes_probed,
            namespaces = stats.namespaces_probed,
            pods_inspected = stats.pods_inspected,
            pods_skipped = stats.pods_skipped,
            issues = pod_issues.len(),
            log_fetch_failures = stats.log_fetch_failures,
            duration_ms = stats.duration_ms,
            "Cycle finished"
        );

        Snapshot {
            nodes,
            namespaces: namespace_health,
            pod_issues,
            generated_at: Some(Utc::now()),
            cycle,
            stats,
        }
    }

    async fn discover_namespaces(&self) -> Vec<String> {
        match self.cluster.list_namespaces().await {
            Ok(all) => {
                let total = all.len();
                let watched: Vec<String> = all
                    .into_iter()
                    .filter(|ns| self.config.watches_namespace(ns))
                    .collect();
                debug!(total, watched = watched.len(), "Namespaces discovered");
                watched
            }
            Err(e) => {
                warn!(error = %e, "Namespace discovery failed, continuing with none");
                Vec::new()
            }
        }
    }

    async fn discover_nodes(&self) -> Vec<String> {
        match self.cluster.list_nodes().await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(error = %e, "Node discovery failed, continuing with none");
                Vec::new()
            }
        }
    }

    /// Await `work`, bounded by the per-task timeout if one is set.
    async fn within_task_timeout<F: Future>(&self, work: F) -> Option<F::Output> {
        match self.config.task_timeout {
            Some(timeout) => tokio::time::timeout(timeout, work).await.ok(),
            None => Some(work.await),
        }
    }

    fn task_timeout_message(&self) -> String {
        let secs = self.config.task_timeout.map_or(0, |t| t.as_secs());
        format!("probe timed out after {secs}s")
    }

    async fn probe_nodes(&self, nodes: Vec<String>) -> BTreeMap<String, NodeHealth> {
        let cluster = &*self.cluster;
        stream::iter(nodes)
            .map(|node| async move {
                let health = self
                    .within_task_timeout(probe_node(cluster, &node))
                    .await
                    .unwrap_or_else(|| {
                        warn!(node = %node, "Node probe timed out");
                        NodeHealth::unhealthy(node.as_str(), self.task_timeout_message())
                    });
                (node, health)
            })
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await
    }

    async fn probe_namespaces(&self, namespaces: &[String]) -> BTreeMap<String, NamespaceHealth> {
        let cluster = &*self.cluster;
        stream::iter(namespaces.to_vec())
            .map(|namespace| async move {
                let health = self
                    .within_task_timeout(probe_namespace(cluster, &namespace))
                    .await
                    .unwrap_or_else(|| {
                        warn!(namespace = %namespace, "Namespace probe timed out");
                        NamespaceHealth::unhealthy(
                            namespace.as_str(),
                            self.task_timeout_message(),
                            Vec::new(),
                        )
                    });
                (namespace, health)
            })
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await
    }

    async fn inspect_namespace(
        &self,
        namespace: &str,
        stats: &mut CycleStats,
    ) -> Vec<PodIssueReport> {
        let pods: Vec<PodSummary> = match self.cluster.list_pods(namespace).await {
            Ok(pods) => pods,
            Err(e) => {
                warn!(namespace = %namespace, error = %e, "Pod discovery failed, skipping namespace");
                return Vec::new();
            }
        };

        let inspector = PodInspector::new(&*self.cluster, self.config.log_tail_lines);
        let candidates: Vec<PodSummary> = inspection_candidates(&pods).cloned().collect();
        stats.pods_skipped += pods.len() - candidates.len();

        let outcomes: Vec<InspectionOutcome> = stream::iter(candidates)
            .map(|pod| {
                let inspector = &inspector;
                async move {
                    self.within_task_timeout(inspector.inspect(namespace, &pod))
                        .await
                        .unwrap_or_else(|| {
                            warn!(namespace = %namespace, pod = %pod.name, "Pod inspection timed out");
                            InspectionOutcome::default()
                        })
                }
            })
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        let mut reports = Vec::new();
        for outcome in outcomes {
            if outcome.inspected {
                stats.pods_inspected += 1;
            } else {
                stats.pods_skipped += 1;
            }
            stats.log_fetch_failures += outcome.log_fetch_failures;
            reports.extend(outcome.report);
        }
        reports
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::cluster::{InMemoryCluster, LogRequest, PodPhase, ReadyCondition};
    use crate::error::QueryError;
    use crate::types::LogSource;

    fn scheduler(cluster: InMemoryCluster, config: MonitorConfig) -> (Scheduler, Arc<InMemoryCluster>) {
        let cluster = Arc::new(cluster);
        let scheduler = Scheduler::new(
            Arc::clone(&cluster) as Arc<dyn ClusterQuery>,
            config,
            Arc::new(SnapshotStore::new()),
        );
        (scheduler, cluster)
    }

    #[tokio::test]
    async fn test_namespace_discovery_failure_still_probes_nodes() {
        let (scheduler, _) = scheduler(
            InMemoryCluster::new()
                .with_node("node-a", true, "KubeletReady")
                .with_pod("client-a", PodSummary::new("api-0", PodPhase::Running))
                .fail_namespace_listing("apiserver unavailable"),
            MonitorConfig::default(),
        );

        let snapshot = scheduler.run_once(1).await.unwrap();
        assert!(snapshot.namespaces.is_empty());
        assert!(snapshot.pod_issues.is_empty());
        assert!(snapshot.nodes["node-a"].ready);
        assert!(snapshot.is_published());
    }

    #[tokio::test]
    async fn test_only_prefixed_namespaces_are_probed() {
        let (scheduler, cluster) = scheduler(
            InMemoryCluster::new()
                .with_pod("client-a", PodSummary::new("api-0", PodPhase::Running))
                .with_pod("kube-system", PodSummary::new("coredns-0", PodPhase::Pending))
                .with_namespace("default"),
            MonitorConfig::default(),
        );

        let snapshot = scheduler.run_cycle(1).await;
        assert_eq!(snapshot.namespaces.keys().collect::<Vec<_>>(), vec!["client-a"]);
        assert!(cluster.log_requests_for("kube-system", "coredns-0").is_empty());
    }

    #[tokio::test]
    async fn test_pod_listing_failure_marks_namespace_unhealthy() {
        let (scheduler, _) = scheduler(
            InMemoryCluster::new()
                .with_namespace("client-a")
                .with_pod("client-b", PodSummary::new("api-0", PodPhase::Running))
                .fail_pod_listing("client-a", "forbidden"),
            MonitorConfig::default(),
        );

        let snapshot = scheduler.run_cycle(1).await;
        let failed = &snapshot.namespaces["client-a"];
        assert!(!failed.healthy);
        assert!(failed.message.contains("forbidden"));
        assert!(snapshot.namespaces["client-b"].healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fan_out_respects_concurrency_bound() {
        let mut cluster = InMemoryCluster::new().with_latency(Duration::from_millis(50));
        for i in 0..12 {
            cluster = cluster.with_node(&format!("node-{i}"), true, "KubeletReady");
        }
        for i in 0..8 {
            cluster = cluster.with_pod(
                "client-a",
                PodSummary::new(format!("api-{i}"), PodPhase::Running).with_containers(["app"]),
            );
        }
        let (scheduler, cluster) =
            scheduler(cluster, MonitorConfig::default().with_concurrency(3));

        let snapshot = scheduler.run_cycle(1).await;
        assert_eq!(snapshot.nodes.len(), 12);
        assert_eq!(snapshot.stats.pods_inspected, 8);
        assert_eq!(cluster.peak_in_flight(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_timeout_marks_hung_node_unhealthy() {
        let (scheduler, _) = scheduler(
            InMemoryCluster::new()
                .with_node("node-a", true, "KubeletReady")
                .with_hung_node("node-b"),
            MonitorConfig::default().with_task_timeout(Some(Duration::from_secs(2))),
        );

        let snapshot = scheduler.run_cycle(1).await;
        assert!(snapshot.nodes["node-a"].ready);
        let hung = &snapshot.nodes["node-b"];
        assert!(!hung.ready);
        assert_eq!(hung.message, "probe timed out after 2s");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_timeout_is_reported() {
        let (scheduler, _) = scheduler(
            InMemoryCluster::new().with_hung_node("node-b"),
            MonitorConfig::default().with_cycle_timeout(Some(Duration::from_secs(5))),
        );

        let err = scheduler.run_once(4).await.unwrap_err();
        assert!(matches!(err, MonitorError::CycleTimeout { cycle: 4, .. }));
    }

    #[tokio::test]
    async fn test_stats_count_skips_and_fetch_failures() {
        let (scheduler, _) = scheduler(
            InMemoryCluster::new()
                .with_pod("client-a", PodSummary::new("api-0", PodPhase::Running))
                .with_pod("client-a", PodSummary::new("web-0", PodPhase::Pending))
                .with_pod("client-a", PodSummary::new("migrate-1", PodPhase::Succeeded))
                .fail_log("client-a", "api-0", None, LogSource::Dmesg, "exec refused"),
            MonitorConfig::default(),
        );

        let stats = scheduler.run_cycle(1).await.stats;
        assert_eq!(stats.namespaces_probed, 1);
        assert_eq!(stats.pods_inspected, 1);
        assert_eq!(stats.pods_skipped, 2);
        assert_eq!(stats.log_fetch_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_publishes_until_cancelled() {
        let (scheduler, _) = scheduler(
            InMemoryCluster::new().with_node("node-a", true, "KubeletReady"),
            MonitorConfig::default().with_poll_interval(Duration::from_secs(10)),
        );
        let store = Arc::clone(scheduler.store());
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            let shutdown = shutdown.clone();
            async move { scheduler.run(shutdown).await }
        });

        tokio::time::sleep(Duration::from_secs(25)).await;
        shutdown.cancel();
        handle.await.unwrap();

        let snapshot = store.current().await;
        assert!(snapshot.is_published());
        assert!(snapshot.cycle >= 2);
        assert!(snapshot.nodes["node-a"].ready);
    }

    /// Delegates to an in-memory cluster, but panics on every node listing
    /// after the first.
    struct PanicsAfterFirstCycle {
        inner: InMemoryCluster,
        node_listings: AtomicUsize,
    }

    #[async_trait]
    impl ClusterQuery for PanicsAfterFirstCycle {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn list_namespaces(&self) -> Result<Vec<String>, QueryError> {
            self.inner.list_namespaces().await
        }

        async fn list_nodes(&self) -> Result<Vec<String>, QueryError> {
            if self.node_listings.fetch_add(1, Ordering::SeqCst) > 0 {
                panic!("node listing blew up");
            }
            self.inner.list_nodes().await
        }

        async fn list_pods(&self, namespace: &str) -> Result<Vec<PodSummary>, QueryError> {
            self.inner.list_pods(namespace).await
        }

        async fn node_ready_condition(
            &self,
            node: &str,
        ) -> Result<Option<ReadyCondition>, QueryError> {
            self.inner.node_ready_condition(node).await
        }

        async fn pod_phase(&self, namespace: &str, pod: &str) -> Result<PodPhase, QueryError> {
            self.inner.pod_phase(namespace, pod).await
        }

        async fn fetch_log_tail(&self, request: &LogRequest) -> Result<String, QueryError> {
            self.inner.fetch_log_tail(request).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cycle_keeps_previous_snapshot() {
        let cluster = PanicsAfterFirstCycle {
            inner: InMemoryCluster::new().with_node("node-a", true, "KubeletReady"),
            node_listings: AtomicUsize::new(0),
        };
        let store = Arc::new(SnapshotStore::new());
        let scheduler = Scheduler::new(
            Arc::new(cluster),
            MonitorConfig::default().with_poll_interval(Duration::from_secs(10)),
            Arc::clone(&store),
        );
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            let shutdown = shutdown.clone();
            async move { scheduler.run(shutdown).await }
        });

        // Cycle 1 publishes at t=0; cycle 2 panics at t=10 and the loop carries on.
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(!handle.is_finished());
        shutdown.cancel();
        handle.await.unwrap();

        let snapshot = store.current().await;
        assert_eq!(snapshot.cycle, 1);
        assert!(snapshot.nodes["node-a"].ready);

        let err = scheduler.run_once(3).await.unwrap_err();
        assert!(matches!(err, MonitorError::CycleAborted { cycle: 3, .. }));
    }
}
