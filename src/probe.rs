//! Chain-height liveness probe.
//!
//! Asks a node's JSON-RPC endpoint for its latest block and succeeds once
//! the height passes a target. The node is addressed either directly by
//! `(url, port)` or as a pod looked up in the topology, in which case a
//! local port-forward tunnel is opened first and all RPC traffic goes
//! through `127.0.0.1`.
//!
//! Error policy is stricter than pod readiness polling on purpose: a pod
//! without an IP is a node that is not ready yet, but an RPC endpoint that
//! errors is a broken node. The first transport error fails the probe
//! immediately; only "height not reached yet" is retried.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::cluster::ClusterOps;
use crate::poll;
use crate::topology::Topology;
use crate::{Error, Result, HEIGHT_POLL_INTERVAL};

/// Which node to probe
#[derive(Debug, Clone)]
pub enum Target {
    /// Explicit host and RPC port, no tunnel
    Url {
        /// Host name or address, without scheme
        url: String,
        /// RPC port
        port: u16,
    },
    /// A pod resolved against the topology, reached through a tunnel
    Pod {
        /// Namespace; defaults to the tracked one
        namespace: Option<String>,
        /// Pod name; defaults to the first tracked node
        pod: Option<String>,
        /// RPC port used when the pod is named explicitly
        port: u16,
    },
}

/// Where the probe ended up pointing, and the tunnel it needs (if any)
#[derive(Debug, PartialEq, Eq)]
struct Resolved {
    endpoint: String,
    tunnel: Option<(String, String, u16)>,
}

/// Polls a node's RPC endpoint for chain height.
pub struct LivenessProbe {
    cluster: Option<Arc<dyn ClusterOps>>,
    http: reqwest::Client,
    interval: Duration,
}

impl LivenessProbe {
    /// Probe that can only reach explicit `(url, port)` targets
    pub fn direct() -> Self {
        Self {
            cluster: None,
            http: reqwest::Client::new(),
            interval: HEIGHT_POLL_INTERVAL,
        }
    }

    /// Probe that can also tunnel to pod targets
    pub fn with_cluster(cluster: Arc<dyn ClusterOps>) -> Self {
        Self {
            cluster: Some(cluster),
            http: reqwest::Client::new(),
            interval: HEIGHT_POLL_INTERVAL,
        }
    }

    /// Override the poll interval (tests poll fast)
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Poll until the chain height strictly exceeds `desired_height`.
    ///
    /// Returns the first height seen above the target, `Timeout` when the
    /// deadline passes with every polled height at or below it, and fails
    /// immediately on the first transport or parse error.
    pub async fn check_height(
        &self,
        topology: &Topology,
        target: Target,
        desired_height: u64,
        timeout: Duration,
    ) -> Result<u64> {
        let resolved = resolve(topology, target)?;

        if let Some((namespace, pod, port)) = &resolved.tunnel {
            let cluster = self.cluster.as_ref().ok_or_else(|| {
                Error::port_forward("pod targets need cluster access, use --url instead")
            })?;
            cluster
                .start_port_forward(namespace, pod, *port, *port)
                .await?;
        }

        let endpoint = resolved.endpoint;
        info!(endpoint = %endpoint, desired_height, "probing chain height");

        let what = format!("chain height above {}", desired_height);
        let height = poll::wait_with_timeout(timeout, self.interval, &what, || {
            let endpoint = endpoint.clone();
            async move {
                let height = self.query_height(&endpoint).await?;
                debug!(height, desired_height, "polled chain height");
                Ok((height > desired_height).then_some(height))
            }
        })
        .await?;

        info!(height, "chain height reached");
        Ok(height)
    }

    /// One `chain_getBlock` round trip. Any failure is a hard error.
    async fn query_height(&self, endpoint: &str) -> Result<u64> {
        let body = serde_json::json!({
            "id": 1,
            "jsonrpc": "2.0",
            "method": "chain_getBlock",
        });

        let response = self
            .http
            .post(endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::rpc(format!("chain_getBlock request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(Error::rpc(format!(
                "chain_getBlock returned {}",
                response.status()
            )));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::rpc(format!("chain_getBlock response unreadable: {}", e)))?;
        let number = value
            .pointer("/result/block/header/number")
            .and_then(|n| n.as_str())
            .ok_or_else(|| Error::rpc("block header has no number field"))?;
        parse_hex_height(number)
    }
}

/// Turn a target into a concrete RPC endpoint plus the tunnel it requires.
fn resolve(topology: &Topology, target: Target) -> Result<Resolved> {
    match target {
        Target::Url { url, port } => Ok(Resolved {
            endpoint: format!("http://{}:{}", url, port),
            tunnel: None,
        }),
        Target::Pod {
            namespace,
            pod,
            port,
        } => {
            let namespace = namespace
                .or_else(|| topology.namespace.clone())
                .ok_or_else(|| Error::not_found("namespace", "in topology"))?;
            let (pod, port) = match pod {
                Some(pod) => (pod, port),
                None => {
                    let node = topology
                        .first_node()
                        .ok_or_else(|| Error::not_found("node", "in topology"))?;
                    (node.node_id.clone(), node.port)
                }
            };
            Ok(Resolved {
                endpoint: format!("http://127.0.0.1:{}", port),
                tunnel: Some((namespace, pod, port)),
            })
        }
    }
}

/// Parse a hex-encoded block number ("0x2a") to a decimal height.
fn parse_hex_height(number: &str) -> Result<u64> {
    let digits = number.trim_start_matches("0x");
    u64::from_str_radix(digits, 16)
        .map_err(|e| Error::rpc(format!("bad block number {:?}: {}", number, e)))
}
