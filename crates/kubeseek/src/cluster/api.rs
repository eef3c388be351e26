//! Kubernetes API backend (kube-rs).
//!
//! Listings go through the typed API. Log tails are read by exec'ing into the
//! target container, since neither the kernel ring buffer nor an application's
//! own log file is visible through the pod log endpoint.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Node, Pod};
use kube::api::{Api, AttachParams, ListParams};
use kube::Client;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use super::{tail_lines, ClusterQuery, LogRequest, PodPhase, PodSummary, ReadyCondition};
use crate::error::QueryError;
use crate::types::LogSource;

/// [`ClusterQuery`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    application_log_path: String,
}

impl KubeCluster {
    /// Create a backend from an existing client.
    #[must_use]
    pub fn new(client: Client, application_log_path: impl Into<String>) -> Self {
        Self {
            client,
            application_log_path: application_log_path.into(),
        }
    }

    /// Create a backend from the ambient kubeconfig or in-cluster service account.
    pub async fn try_default(application_log_path: impl Into<String>) -> Result<Self, QueryError> {
        let client = Client::try_default().await?;
        Ok(Self::new(client, application_log_path))
    }

    fn log_command(&self, request: &LogRequest) -> Vec<String> {
        match request.source {
            LogSource::Dmesg => vec!["dmesg".to_string(), "-T".to_string()],
            LogSource::ApplicationLog => vec![
                "tail".to_string(),
                "-n".to_string(),
                request.max_lines.to_string(),
                self.application_log_path.clone(),
            ],
        }
    }

    async fn exec(&self, request: &LogRequest, command: Vec<String>) -> Result<String, QueryError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &request.namespace);
        let mut params = AttachParams::default().stdout(true).stderr(false);
        if let Some(container) = &request.container {
            params = params.container(container.clone());
        }

        let rendered = command.join(" ");
        debug!(log = %request, command = %rendered, "Exec into container");

        let mut attached = pods.exec(&request.pod, command, &params).await?;

        let output = match attached.stdout() {
            Some(stdout) => read_lossy(stdout).await?,
            None => String::new(),
        };

        let status = match attached.take_status() {
            Some(status) => status.await,
            None => None,
        };

        attached.join().await.map_err(|e| QueryError::Command {
            command: rendered.clone(),
            stderr: e.to_string(),
        })?;

        if let Some(status) = status {
            if status.status.as_deref() == Some("Failure") {
                return Err(QueryError::Command {
                    command: rendered,
                    stderr: status.message.unwrap_or_else(|| "exec failed".to_string()),
                });
            }
        }

        Ok(output)
    }
}

#[async_trait]
impl ClusterQuery for KubeCluster {
    fn name(&self) -> &'static str {
        "kube"
    }

    async fn list_namespaces(&self) -> Result<Vec<String>, QueryError> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let list = namespaces.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }

    async fn list_nodes(&self) -> Result<Vec<String>, QueryError> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|node| node.metadata.name)
            .collect())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodSummary>, QueryError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods.list(&ListParams::default()).await?;
        Ok(list.items.iter().filter_map(pod_summary).collect())
    }

    async fn node_ready_condition(
        &self,
        node: &str,
    ) -> Result<Option<ReadyCondition>, QueryError> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let node = nodes.get(node).await?;
        Ok(ready_condition(&node))
    }

    async fn pod_phase(&self, namespace: &str, pod: &str) -> Result<PodPhase, QueryError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = pods.get(pod).await?;
        Ok(pod_phase(&pod))
    }

    async fn fetch_log_tail(&self, request: &LogRequest) -> Result<String, QueryError> {
        let output = self.exec(request, self.log_command(request)).await?;
        Ok(tail_lines(&output, request.max_lines))
    }
}

/// Drain a stream as text. Invalid UTF-8 is replaced, not an error.
async fn read_lossy<R: AsyncRead + Unpin>(mut reader: R) -> std::io::Result<String> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub(super) fn pod_phase(pod: &Pod) -> PodPhase {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .map_or(PodPhase::Unknown, PodPhase::parse)
}

pub(super) fn pod_summary(pod: &Pod) -> Option<PodSummary> {
    let name = pod.metadata.name.clone()?;
    let containers = pod
        .spec
        .as_ref()
        .map(|spec| spec.containers.iter().map(|c| c.name.clone()).collect())
        .unwrap_or_default();
    Some(PodSummary {
        name,
        phase: pod_phase(pod),
        containers,
    })
}

pub(super) fn ready_condition(node: &Node) -> Option<ReadyCondition> {
    node.status
        .as_ref()?
        .conditions
        .as_ref()?
        .iter()
        .find(|c| c.type_ == "Ready")
        .map(|c| ReadyCondition {
            ready: c.status == "True",
            reason: c
                .reason
                .clone()
                .or_else(|| c.message.clone())
                .unwrap_or_default(),
        })
}
