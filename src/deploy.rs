//! Deployment engine: namespace setup, node creation, readiness polling,
//! topology recording, teardown.
//!
//! The engine is the only writer of the topology store, and every operation
//! is a strictly sequential chain of awaits - a validator cannot be created
//! until the bootnode's record (ip and peer id) has been durably written,
//! because its launch arguments are built from that record.
//!
//! No rollback is attempted on partial failure: a half-created topology
//! (bootnode up, validator failed) is left in place for inspection.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::cluster::{ClusterOps, PodInfo};
use crate::node_spec::{self, NodeSpec};
use crate::poll;
use crate::topology::{NodeRecord, TopologyStore};
use crate::{Result, POD_POLL_INTERVAL};

/// Orchestrates cluster provisioning and teardown against a [`ClusterOps`]
/// implementation, recording results in the [`TopologyStore`].
pub struct DeploymentEngine<'a> {
    client: Arc<dyn ClusterOps>,
    store: &'a mut TopologyStore,
    poll_interval: Duration,
}

impl<'a> DeploymentEngine<'a> {
    /// Create an engine with the standard pod readiness poll interval
    pub fn new(client: Arc<dyn ClusterOps>, store: &'a mut TopologyStore) -> Self {
        Self {
            client,
            store,
            poll_interval: POD_POLL_INTERVAL,
        }
    }

    /// Override the readiness poll interval (tests poll fast)
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Make sure `namespace` exists, then record it (and the image) as the
    /// active cluster.
    ///
    /// Idempotent: an existing namespace is observed, not recreated, and a
    /// creation race losing to another creator counts as success.
    pub async fn ensure_namespace(&mut self, namespace: &str, image: &str) -> Result<()> {
        match self.client.read_namespace(namespace).await {
            Ok(()) => {
                info!(namespace = %namespace, "namespace already exists");
            }
            Err(e) if e.is_not_found() => {
                match self.client.create_namespace(namespace).await {
                    Ok(()) => {}
                    Err(e) if e.is_already_exists() => {
                        info!(namespace = %namespace, "namespace appeared concurrently");
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(e) => return Err(e),
        }
        self.store.set_namespace(namespace, image)
    }

    /// Spawn a standalone dev node.
    pub async fn spawn_dev(
        &mut self,
        node_id: &str,
        image: &str,
        port: u16,
        namespace: &str,
    ) -> Result<NodeRecord> {
        self.ensure_namespace(namespace, image).await?;
        let spec = node_spec::dev_node(node_id, image, port);
        self.spawn_spec(spec, namespace).await
    }

    /// Spawn the alice/bob validator pair: the bootnode first, then - only
    /// once its ip and peer id are durably recorded - the validator that
    /// dials it.
    pub async fn create_alice_bob_nodes(
        &mut self,
        image: &str,
        port: u16,
        namespace: &str,
    ) -> Result<(NodeRecord, NodeRecord)> {
        self.ensure_namespace(namespace, image).await?;

        let alice = self.spawn_spec(node_spec::bootnode(image, port), namespace).await?;

        // built from the just-persisted topology, so the bootnode address is real
        let bob_spec = node_spec::validator(image, port, self.store.topology())?;
        let bob = self.spawn_spec(bob_spec, namespace).await?;

        Ok((alice, bob))
    }

    /// Create the pod, wait for its IP, record the node.
    async fn spawn_spec(&mut self, spec: NodeSpec, namespace: &str) -> Result<NodeRecord> {
        self.client.create_pod(&spec, namespace).await?;
        let pod = self.await_ready(&spec.node_id, namespace).await?;

        let (node_key, peer_id) = spec.role.identity();
        let record = NodeRecord {
            node_id: spec.node_id.clone(),
            ip: pod.ip,
            port: spec.port,
            role: spec.role.role(),
            peer_id: peer_id.map(str::to_string),
            node_key: node_key.map(str::to_string),
        };
        self.store.record_node(record.clone())?;
        info!(node = %record.node_id, ip = %record.ip, "node ready and recorded");
        Ok(record)
    }

    /// Poll until the pod has an assigned IP. Unbounded: a pod that is not
    /// scheduled yet and a pod that does not exist yet look the same here,
    /// and both mean "ask again". The backstop is process-level.
    async fn await_ready(&self, node_id: &str, namespace: &str) -> Result<PodInfo> {
        let client = self.client.clone();
        let what = format!("pod {} to get an ip", node_id);
        poll::wait_until(self.poll_interval, &what, || {
            let client = client.clone();
            async move {
                match client.get_pod(node_id, namespace).await {
                    Ok(info) => Ok(Some(info)),
                    Err(e) if e.is_not_found() => Ok(None),
                    Err(e) => Err(e),
                }
            }
        })
        .await
    }

    /// Delete the cluster's namespace. The target is the explicit argument
    /// if given, otherwise the tracked namespace; with neither this is a
    /// silent no-op. The topology is reset only when the deleted namespace
    /// is the tracked one.
    pub async fn cleanup(&mut self, namespace: Option<&str>) -> Result<()> {
        let tracked = self.store.topology().namespace.clone();
        let target = match namespace.map(str::to_string).or_else(|| tracked.clone()) {
            Some(target) => target,
            None => {
                warn!("no namespace tracked and none supplied, nothing to clean");
                return Ok(());
            }
        };

        self.client.delete_namespace(&target).await?;

        if tracked.as_deref() == Some(target.as_str()) {
            self.store.reset()?;
            info!(namespace = %target, "cleaned up tracked cluster");
        } else {
            info!(namespace = %target, "cleaned up untracked namespace");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockClusterOps;
    use crate::node_spec::ALICE_PEER_ID;
    use crate::Error;
    use mockall::predicate::eq;
    use std::sync::atomic::{AtomicU32, Ordering};

    const IMAGE: &str = "parity/substrate:latest";

    fn fast_engine<'a>(
        mock: MockClusterOps,
        store: &'a mut TopologyStore,
    ) -> DeploymentEngine<'a> {
        DeploymentEngine::new(Arc::new(mock), store)
            .with_poll_interval(Duration::from_millis(1))
    }

    fn temp_store(dir: &tempfile::TempDir) -> TopologyStore {
        TopologyStore::open(dir.path().join("topology.json"))
    }

    #[tokio::test]
    async fn ensure_namespace_creates_once_observes_twice() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = temp_store(&dir);
        let mut mock = MockClusterOps::new();

        let reads = AtomicU32::new(0);
        mock.expect_read_namespace()
            .with(eq("testnet"))
            .times(2)
            .returning(move |name| {
                if reads.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Error::not_found("namespace", name))
                } else {
                    Ok(())
                }
            });
        mock.expect_create_namespace()
            .with(eq("testnet"))
            .times(1)
            .returning(|_| Ok(()));

        let mut engine = fast_engine(mock, &mut store);
        engine.ensure_namespace("testnet", IMAGE).await.unwrap();
        engine.ensure_namespace("testnet", IMAGE).await.unwrap();

        assert_eq!(store.topology().namespace.as_deref(), Some("testnet"));
        assert_eq!(store.topology().image.as_deref(), Some(IMAGE));
    }

    #[tokio::test]
    async fn ensure_namespace_tolerates_creation_race() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = temp_store(&dir);
        let mut mock = MockClusterOps::new();

        mock.expect_read_namespace()
            .returning(|name| Err(Error::not_found("namespace", name)));
        mock.expect_create_namespace()
            .returning(|name| Err(Error::already_exists("namespace", name)));

        let mut engine = fast_engine(mock, &mut store);
        engine.ensure_namespace("testnet", IMAGE).await.unwrap();
        assert_eq!(store.topology().namespace.as_deref(), Some("testnet"));
    }

    #[tokio::test]
    async fn spawn_dev_records_the_discovered_ip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = temp_store(&dir);
        let mut mock = MockClusterOps::new();

        mock.expect_read_namespace().returning(|_| Ok(()));
        mock.expect_create_pod()
            .withf(|spec, ns| spec.node_id == "dev" && ns == "testnet")
            .times(1)
            .returning(|_, _| Ok(()));
        mock.expect_get_pod().returning(|name, _| {
            Ok(PodInfo {
                name: name.to_string(),
                ip: "10.1.0.7".to_string(),
            })
        });

        let mut engine = fast_engine(mock, &mut store);
        let record = engine.spawn_dev("dev", IMAGE, 9944, "testnet").await.unwrap();

        assert_eq!(record.ip, "10.1.0.7");
        assert_eq!(store.topology().nodes.len(), 1);
        assert!(store.topology().bootnode.is_none());
    }

    #[tokio::test]
    async fn readiness_poll_retries_not_found_and_missing_ip_alike() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = temp_store(&dir);
        let mut mock = MockClusterOps::new();

        mock.expect_read_namespace().returning(|_| Ok(()));
        mock.expect_create_pod().returning(|_, _| Ok(()));

        let attempts = AtomicU32::new(0);
        mock.expect_get_pod().times(3).returning(move |name, _| {
            match attempts.fetch_add(1, Ordering::SeqCst) {
                // pod object absent, then present without an ip
                0 => Err(Error::not_found("pod", name)),
                1 => Err(Error::not_found("pod ip for", name)),
                _ => Ok(PodInfo {
                    name: name.to_string(),
                    ip: "10.1.0.9".to_string(),
                }),
            }
        });

        let mut engine = fast_engine(mock, &mut store);
        let record = engine.spawn_dev("dev", IMAGE, 9944, "testnet").await.unwrap();
        assert_eq!(record.ip, "10.1.0.9");
    }

    #[tokio::test]
    async fn readiness_poll_aborts_on_platform_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = temp_store(&dir);
        let mut mock = MockClusterOps::new();

        mock.expect_read_namespace().returning(|_| Ok(()));
        mock.expect_create_pod().returning(|_, _| Ok(()));
        mock.expect_get_pod()
            .times(1)
            .returning(|_, _| Err(Error::rpc("api server on fire")));

        let mut engine = fast_engine(mock, &mut store);
        let err = engine.spawn_dev("dev", IMAGE, 9944, "testnet").await.unwrap_err();
        assert!(!err.is_not_found());
        // nothing was recorded
        assert!(store.topology().nodes.is_empty());
    }

    #[tokio::test]
    async fn alice_then_bob_and_bob_dials_alices_recorded_ip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = temp_store(&dir);
        let mut mock = MockClusterOps::new();

        mock.expect_read_namespace().returning(|_| Ok(()));

        let creations = AtomicU32::new(0);
        mock.expect_create_pod()
            .times(2)
            .withf(move |spec, _| {
                match creations.fetch_add(1, Ordering::SeqCst) {
                    0 => spec.node_id == "alice",
                    // bob's args can only be built after alice's record
                    // (ip + peer id) is in the store
                    _ => {
                        spec.node_id == "bob"
                            && spec.args.contains(&format!(
                                "--bootnodes=/ip4/10.1.0.7/tcp/30333/p2p/{}",
                                ALICE_PEER_ID
                            ))
                    }
                }
            })
            .returning(|_, _| Ok(()));

        mock.expect_get_pod().returning(|name, _| {
            let ip = if name == "alice" { "10.1.0.7" } else { "10.1.0.8" };
            Ok(PodInfo {
                name: name.to_string(),
                ip: ip.to_string(),
            })
        });

        let mut engine = fast_engine(mock, &mut store);
        let (alice, bob) = engine
            .create_alice_bob_nodes(IMAGE, 9944, "testnet")
            .await
            .unwrap();

        assert_eq!(alice.ip, "10.1.0.7");
        assert_eq!(bob.ip, "10.1.0.8");
        let ids: Vec<_> = store.topology().nodes.iter().map(|n| n.node_id.as_str()).collect();
        assert_eq!(ids, ["alice", "bob"]);
        assert_eq!(store.topology().bootnode.as_ref().unwrap().node_id, "alice");
    }

    #[tokio::test]
    async fn bootnode_failure_leaves_half_created_topology() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = temp_store(&dir);
        let mut mock = MockClusterOps::new();

        mock.expect_read_namespace().returning(|_| Ok(()));
        // alice comes up; bob's pod creation fails
        let creations = AtomicU32::new(0);
        mock.expect_create_pod().returning(move |_, _| {
            if creations.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(())
            } else {
                Err(Error::rpc("quota exceeded"))
            }
        });
        mock.expect_get_pod().returning(|name, _| {
            Ok(PodInfo {
                name: name.to_string(),
                ip: "10.1.0.7".to_string(),
            })
        });

        let mut engine = fast_engine(mock, &mut store);
        let err = engine
            .create_alice_bob_nodes(IMAGE, 9944, "testnet")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("quota"));

        // alice's record is kept for inspection, no rollback
        let ids: Vec<_> = store.topology().nodes.iter().map(|n| n.node_id.as_str()).collect();
        assert_eq!(ids, ["alice"]);
    }

    #[tokio::test]
    async fn cleanup_of_tracked_namespace_resets_topology() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = temp_store(&dir);
        store.set_namespace("testnet", IMAGE).unwrap();

        let mut mock = MockClusterOps::new();
        mock.expect_delete_namespace()
            .with(eq("testnet"))
            .times(1)
            .returning(|_| Ok(()));

        let mut engine = fast_engine(mock, &mut store);
        engine.cleanup(None).await.unwrap();
        assert!(store.topology().is_empty());
    }

    #[tokio::test]
    async fn cleanup_of_other_namespace_keeps_topology() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = temp_store(&dir);
        store.set_namespace("testnet", IMAGE).unwrap();

        let mut mock = MockClusterOps::new();
        mock.expect_delete_namespace()
            .with(eq("scratch"))
            .times(1)
            .returning(|_| Ok(()));

        let mut engine = fast_engine(mock, &mut store);
        engine.cleanup(Some("scratch")).await.unwrap();
        assert_eq!(store.topology().namespace.as_deref(), Some("testnet"));
    }

    #[tokio::test]
    async fn cleanup_without_target_is_a_silent_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = temp_store(&dir);

        let mut mock = MockClusterOps::new();
        mock.expect_delete_namespace().times(0);

        let mut engine = fast_engine(mock, &mut store);
        engine.cleanup(None).await.unwrap();
    }
}
