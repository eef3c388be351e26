//! Pod log inspection.
//!
//! Reads bounded log tails from each container of a running pod and runs the
//! log signatures over them. Fetch failures are logged and treated as empty
//! logs so one bad container never hides issues in the rest.

use tracing::{debug, warn};

use crate::cluster::{ClusterQuery, LogRequest, PodPhase, PodSummary};
use crate::signature::{match_lines, skips_application_log};
use crate::types::{LogSource, PodIssue, PodIssueReport};

/// Result of inspecting one pod.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InspectionOutcome {
    /// Present only when at least one line matched.
    pub report: Option<PodIssueReport>,
    /// False when the pod was skipped because it was not running.
    pub inspected: bool,
    pub log_fetch_failures: usize,
}

impl InspectionOutcome {
    fn skipped() -> Self {
        Self::default()
    }
}

/// Pods worth inspecting. Succeeded pods are finished and never inspected.
pub fn inspection_candidates(pods: &[PodSummary]) -> impl Iterator<Item = &PodSummary> {
    pods.iter().filter(|pod| pod.phase != PodPhase::Succeeded)
}

/// Inspects pods against one cluster.
pub struct PodInspector<'a> {
    cluster: &'a dyn ClusterQuery,
    tail_lines: u32,
}

impl<'a> PodInspector<'a> {
    pub fn new(cluster: &'a dyn ClusterQuery, tail_lines: u32) -> Self {
        Self {
            cluster,
            tail_lines,
        }
    }

    /// Inspect a pod's logs if it is currently running.
    pub async fn inspect(&self, namespace: &str, pod: &PodSummary) -> InspectionOutcome {
        if pod.phase == PodPhase::Succeeded {
            return InspectionOutcome::skipped();
        }

        // The listing may be stale by the time this pod's turn comes.
        match self.cluster.pod_phase(namespace, &pod.name).await {
            Ok(PodPhase::Running) => {}
            Ok(phase) => {
                debug!(namespace = %namespace, pod = %pod.name, phase = %phase, "Skipping pod that is not running");
                return InspectionOutcome::skipped();
            }
            Err(e) => {
                warn!(namespace = %namespace, pod = %pod.name, error = %e, "Could not confirm pod phase, skipping");
                return InspectionOutcome::skipped();
            }
        }

        let mut sources = vec![LogSource::Dmesg];
        if !skips_application_log(&pod.name) {
            sources.push(LogSource::ApplicationLog);
        }

        // An empty container list means the pod's default container.
        let containers: Vec<Option<&str>> = if pod.containers.is_empty() {
            vec![None]
        } else {
            pod.containers.iter().map(|c| Some(c.as_str())).collect()
        };

        let mut issues = Vec::new();
        let mut log_fetch_failures = 0;

        for container in containers {
            for &source in &sources {
                let request = LogRequest {
                    namespace: namespace.to_string(),
                    pod: pod.name.clone(),
                    container: container.map(str::to_string),
                    source,
                    max_lines: self.tail_lines,
                };

                let text = match self.cluster.fetch_log_tail(&request).await {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(
                            namespace = %namespace,
                            pod = %pod.name,
                            container = container.unwrap_or("default"),
                            source = %source,
                            error = %e,
                            "Log fetch failed, treating as empty"
                        );
                        log_fetch_failures += 1;
                        continue;
                    }
                };

                let lines = match_lines(source, &text);
                if !lines.is_empty() {
                    debug!(log = %request, matches = lines.len(), "Signature matched");
                    issues.push(PodIssue {
                        source,
                        container: request.container,
                        lines,
                    });
                }
            }
        }

        let report = (!issues.is_empty()).then(|| PodIssueReport {
            namespace: namespace.to_string(),
            pod: pod.name.clone(),
            issues,
        });

        InspectionOutcome {
            report,
            inspected: true,
            log_fetch_failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::InMemoryCluster;

    const DIRTY_DMESG: &str = "[Mon] eth0 up\n[Mon] kernel: oom-killer invoked\n";
    const DIRTY_APP: &str = "celery@worker: 111 connection refused";

    fn running(name: &str) -> PodSummary {
        PodSummary::new(name, PodPhase::Running).with_containers(["app"])
    }

    #[tokio::test]
    async fn test_dirty_pod_produces_report() {
        let cluster = InMemoryCluster::new()
            .with_pod("client-a", running("api-0"))
            .with_log("client-a", "api-0", Some("app"), LogSource::Dmesg, DIRTY_DMESG)
            .with_log(
                "client-a",
                "api-0",
                Some("app"),
                LogSource::ApplicationLog,
                DIRTY_APP,
            );
        let inspector = PodInspector::new(&cluster, 100);

        let outcome = inspector.inspect("client-a", &running("api-0")).await;
        assert!(outcome.inspected);
        let report = outcome.report.unwrap();
        assert_eq!(report.pod, "api-0");
        assert_eq!(report.issues.len(), 2);
        assert_eq!(
            report.issues_from(LogSource::Dmesg).next().unwrap().lines,
            vec!["[Mon] kernel: oom-killer invoked"]
        );
        assert_eq!(report.issues[0].container.as_deref(), Some("app"));
    }

    #[tokio::test]
    async fn test_clean_pod_produces_no_report() {
        let cluster = InMemoryCluster::new()
            .with_pod("client-a", running("api-1"))
            .with_log("client-a", "api-1", None, LogSource::Dmesg, "all quiet");
        let outcome = PodInspector::new(&cluster, 100)
            .inspect("client-a", &running("api-1"))
            .await;
        assert!(outcome.inspected);
        assert!(outcome.report.is_none());
        assert_eq!(cluster.log_requests_for("client-a", "api-1").len(), 2);
    }

    #[tokio::test]
    async fn test_redis_pod_skips_application_log() {
        let cluster = InMemoryCluster::new()
            .with_pod("client-a", running("redis-master-0"))
            .with_log(
                "client-a",
                "redis-master-0",
                None,
                LogSource::ApplicationLog,
                DIRTY_APP,
            );
        let outcome = PodInspector::new(&cluster, 100)
            .inspect("client-a", &running("redis-master-0"))
            .await;
        assert!(outcome.report.is_none());

        let requests = cluster.log_requests_for("client-a", "redis-master-0");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].source, LogSource::Dmesg);
    }

    #[tokio::test]
    async fn test_succeeded_pod_is_never_inspected() {
        let pod = PodSummary::new("migrate-1", PodPhase::Succeeded);
        let cluster = InMemoryCluster::new()
            .with_pod("client-a", pod.clone())
            .with_log("client-a", "migrate-1", None, LogSource::Dmesg, DIRTY_DMESG);

        let outcome = PodInspector::new(&cluster, 100).inspect("client-a", &pod).await;
        assert_eq!(outcome, InspectionOutcome::default());
        assert!(cluster.log_requests().is_empty());

        let pods = vec![pod, running("api-0")];
        let names: Vec<&str> = inspection_candidates(&pods).map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["api-0"]);
    }

    #[tokio::test]
    async fn test_pod_no_longer_running_is_skipped() {
        let cluster = InMemoryCluster::new()
            .with_pod("client-a", running("api-0"))
            .with_log("client-a", "api-0", None, LogSource::Dmesg, DIRTY_DMESG);
        cluster.set_pod_phase("client-a", "api-0", PodPhase::Pending);

        let outcome = PodInspector::new(&cluster, 100)
            .inspect("client-a", &running("api-0"))
            .await;
        assert!(!outcome.inspected);
        assert!(outcome.report.is_none());
        assert!(cluster.log_requests().is_empty());
    }

    #[tokio::test]
    async fn test_phase_query_failure_skips_pod() {
        // Not present in the cluster, so the phase lookup fails.
        let cluster = InMemoryCluster::new();
        let outcome = PodInspector::new(&cluster, 100)
            .inspect("client-a", &running("ghost-0"))
            .await;
        assert!(!outcome.inspected);
        assert!(cluster.log_requests().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_does_not_hide_other_containers() {
        let pod = PodSummary::new("api-0", PodPhase::Running).with_containers(["proxy", "app"]);
        let cluster = InMemoryCluster::new()
            .with_pod("client-a", pod.clone())
            .fail_log(
                "client-a",
                "api-0",
                Some("proxy"),
                LogSource::Dmesg,
                "container not found",
            )
            .with_log("client-a", "api-0", Some("app"), LogSource::Dmesg, DIRTY_DMESG);

        let outcome = PodInspector::new(&cluster, 100).inspect("client-a", &pod).await;
        assert!(outcome.inspected);
        assert_eq!(outcome.log_fetch_failures, 1);
        let report = outcome.report.unwrap();
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].container.as_deref(), Some("app"));
        assert_eq!(cluster.log_requests_for("client-a", "api-0").len(), 4);
    }

    #[tokio::test]
    async fn test_default_container_when_none_declared() {
        let pod = PodSummary::new("api-0", PodPhase::Running);
        let cluster = InMemoryCluster::new()
            .with_pod("client-a", pod.clone())
            .with_log("client-a", "api-0", None, LogSource::Dmesg, DIRTY_DMESG);

        let outcome = PodInspector::new(&cluster, 100).inspect("client-a", &pod).await;
        let report = outcome.report.unwrap();
        assert_eq!(report.issues[0].container, None);
        assert!(cluster
            .log_requests()
            .iter()
            .all(|r| r.container.is_none()));
    }

    #[tokio::test]
    async fn test_tail_bound_is_passed_through() {
        let pod = running("api-0");
        let cluster = InMemoryCluster::new().with_pod("client-a", pod.clone());
        PodInspector::new(&cluster, 7).inspect("client-a", &pod).await;
        assert!(cluster.log_requests().iter().all(|r| r.max_lines == 7));
    }
}
