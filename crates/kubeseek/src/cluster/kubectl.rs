//! `kubectl` backend.
//!
//! Runs `kubectl` as a subprocess for every query. Useful where a kubeconfig
//! works for the CLI but not for the API client (exec credential plugins,
//! bastion wrappers).

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use super::api::{pod_summary, ready_condition};
use super::{tail_lines, ClusterQuery, LogRequest, PodPhase, PodSummary, ReadyCondition};
use crate::error::QueryError;
use crate::types::LogSource;

/// Default binary name, resolved through `PATH`.
pub const DEFAULT_KUBECTL: &str = "kubectl";

/// `items` of a `kubectl get -o json` list.
#[derive(Debug, Deserialize)]
struct ItemList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

/// [`ClusterQuery`] that shells out to `kubectl`.
#[derive(Debug, Clone)]
pub struct KubectlCluster {
    binary: String,
    context: Option<String>,
    application_log_path: String,
}

impl KubectlCluster {
    #[must_use]
    pub fn new(application_log_path: impl Into<String>) -> Self {
        Self {
            binary: DEFAULT_KUBECTL.to_string(),
            context: None,
            application_log_path: application_log_path.into(),
        }
    }

    /// Use a specific kubectl binary.
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Pin every call to a kubeconfig context.
    #[must_use]
    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }

    /// Full argument list for a call, including the context flag.
    fn args<I, S>(&self, args: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut all = Vec::new();
        if let Some(context) = &self.context {
            all.push("--context".to_string());
            all.push(context.clone());
        }
        all.extend(args.into_iter().map(Into::into));
        all
    }

    fn log_args(&self, request: &LogRequest) -> Vec<String> {
        let mut args = vec![
            "exec".to_string(),
            "-n".to_string(),
            request.namespace.clone(),
            request.pod.clone(),
        ];
        if let Some(container) = &request.container {
            args.push("-c".to_string());
            args.push(container.clone());
        }
        args.push("--".to_string());
        match request.source {
            LogSource::Dmesg => {
                args.push("dmesg".to_string());
                args.push("-T".to_string());
            }
            LogSource::ApplicationLog => {
                args.push("tail".to_string());
                args.push("-n".to_string());
                args.push(request.max_lines.to_string());
                args.push(self.application_log_path.clone());
            }
        }
        self.args(args)
    }

    async fn run(&self, args: Vec<String>) -> Result<String, QueryError> {
        let rendered = format!("{} {}", self.binary, args.join(" "));
        debug!(command = %rendered, "Running kubectl");

        let output = Command::new(&self.binary)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(QueryError::Command {
                command: rendered,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn names(&self, resource: &str) -> Result<Vec<String>, QueryError> {
        let output = self
            .run(self.args([
                "get",
                resource,
                "-o",
                "jsonpath={.items[*].metadata.name}",
            ]))
            .await?;
        Ok(split_names(&output))
    }
}

#[async_trait]
impl ClusterQuery for KubectlCluster {
    fn name(&self) -> &'static str {
        "kubectl"
    }

    async fn list_namespaces(&self) -> Result<Vec<String>, QueryError> {
        self.names("namespaces").await
    }

    async fn list_nodes(&self) -> Result<Vec<String>, QueryError> {
        self.names("nodes").await
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodSummary>, QueryError> {
        let output = self
            .run(self.args(["get", "pods", "-n", namespace, "-o", "json"]))
            .await?;
        parse_pod_list(&output)
    }

    async fn node_ready_condition(
        &self,
        node: &str,
    ) -> Result<Option<ReadyCondition>, QueryError> {
        let output = self
            .run(self.args(["get", "node", node, "-o", "json"]))
            .await?;
        let node: Node = serde_json::from_str(&output)?;
        Ok(ready_condition(&node))
    }

    async fn pod_phase(&self, namespace: &str, pod: &str) -> Result<PodPhase, QueryError> {
        let output = self
            .run(self.args([
                "get",
                "pod",
                "-n",
                namespace,
                pod,
                "-o",
                "jsonpath={.status.phase}",
            ]))
            .await?;
        Ok(PodPhase::parse(output.trim()))
    }

    async fn fetch_log_tail(&self, request: &LogRequest) -> Result<String, QueryError> {
        let output = self.run(self.log_args(request)).await?;
        Ok(tail_lines(&output, request.max_lines))
    }
}

fn split_names(output: &str) -> Vec<String> {
    output.split_whitespace().map(str::to_string).collect()
}

fn parse_pod_list(output: &str) -> Result<Vec<PodSummary>, QueryError> {
    if output.trim().is_empty() {
        return Ok(Vec::new());
    }
    let list: ItemList<Pod> =
        serde_json::from_str(output).map_err(|e| QueryError::parse("pod list", e))?;
    Ok(list.items.iter().filter_map(pod_summary).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_names() {
        assert_eq!(
            split_names("client-a client-b\nkube-system"),
            vec!["client-a", "client-b", "kube-system"]
        );
        assert!(split_names("").is_empty());
    }

    #[test]
    fn test_parse_pod_list() {
        let output = r#"{
            "apiVersion": "v1",
            "kind": "List",
            "items": [
                {
                    "apiVersion": "v1",
                    "kind": "Pod",
                    "metadata": { "name": "web-0" },
                    "spec": { "containers": [{ "name": "web" }] },
                    "status": { "phase": "Pending" }
                },
                {
                    "apiVersion": "v1",
                    "kind": "Pod",
                    "metadata": { "name": "migrate-x" },
                    "spec": { "containers": [{ "name": "migrate" }] },
                    "status": { "phase": "Succeeded" }
                }
            ]
        }"#;

        let pods = parse_pod_list(output).unwrap();
        assert_eq!(pods.len(), 2);
        assert_eq!(pods[0].name, "web-0");
        assert_eq!(pods[0].phase, PodPhase::Pending);
        assert_eq!(pods[0].containers, vec!["web"]);
        assert_eq!(pods[1].phase, PodPhase::Succeeded);
    }

    #[test]
    fn test_parse_pod_list_rejects_garbage() {
        assert!(parse_pod_list("").unwrap().is_empty());
        let err = parse_pod_list("error: the server doesn't have a resource type").unwrap_err();
        assert!(matches!(err, QueryError::Parse { .. }));
    }

    #[test]
    fn test_log_args_for_each_source() {
        let cluster = KubectlCluster::new("/var/log/app.log")
            .with_context(Some("prod".to_string()));

        let mut request = LogRequest {
            namespace: "client-a".to_string(),
            pod: "api-0".to_string(),
            container: Some("app".to_string()),
            source: LogSource::Dmesg,
            max_lines: 25,
        };
        assert_eq!(
            cluster.log_args(&request).join(" "),
            "--context prod exec -n client-a api-0 -c app -- dmesg -T"
        );

        request.source = LogSource::ApplicationLog;
        request.container = None;
        assert_eq!(
            cluster.log_args(&request).join(" "),
            "--context prod exec -n client-a api-0 -- tail -n 25 /var/log/app.log"
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_query_error() {
        let cluster = KubectlCluster::new("/var/log/app.log")
            .with_binary("/nonexistent/kubectl-for-tests");
        let err = cluster.list_nodes().await.unwrap_err();
        assert!(matches!(err, QueryError::Io(_)));
    }
}
