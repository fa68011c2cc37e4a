//! Typed wrapper over the Kubernetes namespace/pod/port-forward primitives.
//!
//! Everything the deployment engine and the liveness probe need from the
//! platform goes through the [`ClusterOps`] trait, so their logic can be
//! unit-tested against a mock without a cluster. [`KubeCluster`] is the real
//! implementation on top of kube-rs; credential loading is the ambient
//! kubeconfig (`kube::Client::try_default`).

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, ContainerPort, Namespace, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams};
use tracing::{debug, info, warn};

use crate::node_spec::NodeSpec;
use crate::{Error, Result, KEEP_NAMESPACE_ENV};

/// Label identifying resources owned by this tool
const MANAGED_BY_LABEL: (&str, &str) = ("app.kubernetes.io/managed-by", "chainspawn");

/// What the poller needs to know about a running pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodInfo {
    /// Pod name
    pub name: String,
    /// Assigned pod IP, never empty
    pub ip: String,
}

/// Platform operations used by the deployment engine and the probe
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ClusterOps: Send + Sync {
    /// Create a namespace. `AlreadyExists` if it is present (callers treat
    /// that as success for idempotent setup).
    async fn create_namespace(&self, name: &str) -> Result<()>;

    /// Observe a namespace. `NotFound` if absent.
    async fn read_namespace(&self, name: &str) -> Result<()>;

    /// Create the pod described by `spec` in `namespace`.
    async fn create_pod(&self, spec: &NodeSpec, namespace: &str) -> Result<()>;

    /// Read a pod's assigned IP. `NotFound` both when the pod does not exist
    /// and when it exists without an IP yet - callers must treat both as
    /// retryable.
    async fn get_pod(&self, node_id: &str, namespace: &str) -> Result<PodInfo>;

    /// Delete a namespace and everything in it. A no-op success when the
    /// keep-namespace guard variable is set.
    async fn delete_namespace(&self, name: &str) -> Result<()>;

    /// Open a local TCP listener on `local_port` tunnelling to `remote_port`
    /// on the pod. Returns once the listener is bound; the tunnel then lives
    /// for the rest of the process.
    async fn start_port_forward(
        &self,
        namespace: &str,
        pod: &str,
        local_port: u16,
        remote_port: u16,
    ) -> Result<()>;
}

/// kube-rs implementation of [`ClusterOps`]
#[derive(Clone)]
pub struct KubeCluster {
    client: kube::Client,
}

impl KubeCluster {
    /// Wrap an existing client
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    /// Connect using the ambient kubeconfig / in-cluster environment
    pub async fn connect() -> Result<Self> {
        let client = kube::Client::try_default().await?;
        Ok(Self { client })
    }

    fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait::async_trait]
impl ClusterOps for KubeCluster {
    async fn create_namespace(&self, name: &str) -> Result<()> {
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(BTreeMap::from([(
                    MANAGED_BY_LABEL.0.to_string(),
                    MANAGED_BY_LABEL.1.to_string(),
                )])),
                ..Default::default()
            },
            ..Default::default()
        };

        match self.namespaces().create(&PostParams::default(), &ns).await {
            Ok(_) => {
                info!(namespace = %name, "namespace created");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                Err(Error::already_exists("namespace", name))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read_namespace(&self, name: &str) -> Result<()> {
        match self.namespaces().get(name).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                Err(Error::not_found("namespace", name))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn create_pod(&self, spec: &NodeSpec, namespace: &str) -> Result<()> {
        let pod = build_pod(spec);
        self.pods(namespace)
            .create(&PostParams::default(), &pod)
            .await?;
        info!(pod = %spec.node_id, namespace = %namespace, image = %spec.image, "pod created");
        Ok(())
    }

    async fn get_pod(&self, node_id: &str, namespace: &str) -> Result<PodInfo> {
        let pod = match self.pods(namespace).get(node_id).await {
            Ok(pod) => pod,
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                return Err(Error::not_found("pod", node_id));
            }
            Err(e) => return Err(e.into()),
        };

        match pod_ip(&pod) {
            Some(ip) => Ok(PodInfo {
                name: node_id.to_string(),
                ip,
            }),
            // same kind as "does not exist": the poller retries both
            None => Err(Error::not_found("pod ip for", node_id)),
        }
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        if std::env::var_os(KEEP_NAMESPACE_ENV).is_some() {
            info!(namespace = %name, "{} set, keeping namespace", KEEP_NAMESPACE_ENV);
            return Ok(());
        }
        self.namespaces()
            .delete(name, &DeleteParams::default())
            .await?;
        info!(namespace = %name, "namespace deleted");
        Ok(())
    }

    async fn start_port_forward(
        &self,
        namespace: &str,
        pod: &str,
        local_port: u16,
        remote_port: u16,
    ) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", local_port))
            .await
            .map_err(|e| {
                Error::port_forward(format!("failed to bind 127.0.0.1:{}: {}", local_port, e))
            })?;
        info!(
            namespace = %namespace, pod = %pod,
            local_port, remote_port,
            "port-forward listener bound"
        );

        let pods = self.pods(namespace);
        let pod = pod.to_string();
        // the tunnel lives for the process lifetime; there is no close contract
        tokio::spawn(async move {
            loop {
                let (mut local, peer) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "port-forward accept failed");
                        continue;
                    }
                };
                debug!(peer = %peer, pod = %pod, "tunnelling connection");

                let mut pf = match pods.portforward(&pod, &[remote_port]).await {
                    Ok(pf) => pf,
                    Err(e) => {
                        warn!(pod = %pod, error = %e, "portforward to pod failed");
                        continue;
                    }
                };
                let Some(mut upstream) = pf.take_stream(remote_port) else {
                    warn!(pod = %pod, port = remote_port, "no stream for forwarded port");
                    continue;
                };

                tokio::spawn(async move {
                    if let Err(e) = tokio::io::copy_bidirectional(&mut local, &mut upstream).await
                    {
                        debug!(error = %e, "tunnelled connection closed with error");
                    }
                    // the forwarder must outlive the stream it handed out
                    drop(pf);
                });
            }
        });

        Ok(())
    }
}

/// Build the pod manifest for a node launch spec
fn build_pod(spec: &NodeSpec) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(spec.node_id.clone()),
            labels: Some(BTreeMap::from([
                ("app".to_string(), spec.node_id.clone()),
                (
                    MANAGED_BY_LABEL.0.to_string(),
                    MANAGED_BY_LABEL.1.to_string(),
                ),
            ])),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: spec.node_id.clone(),
                image: Some(spec.image.clone()),
                args: Some(spec.args.clone()),
                ports: Some(vec![
                    ContainerPort {
                        container_port: i32::from(spec.port),
                        name: Some("rpc".to_string()),
                        ..Default::default()
                    },
                    ContainerPort {
                        container_port: i32::from(crate::P2P_PORT),
                        name: Some("p2p".to_string()),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: None,
    }
}

/// A pod's assigned IP, if the platform has assigned one yet
fn pod_ip(pod: &Pod) -> Option<String> {
    pod.status
        .as_ref()
        .and_then(|s| s.pod_ip.clone())
        .filter(|ip| !ip.is_empty())
}
