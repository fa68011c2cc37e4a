//! Durable record of the currently active test cluster.
//!
//! Exactly one topology is tracked at a time: the namespace it lives in, the
//! node image it was spawned from, and the ordered set of nodes created so
//! far. The record is stored at `~/.chainspawn/topology.json` (overridable
//! via `CHAINSPAWN_TOPOLOGY`) and overwritten wholesale on every mutation,
//! so later commands - and later invocations of the CLI - see the cluster
//! the last spawn left behind.
//!
//! A missing or unreadable file is never fatal; it simply means "no active
//! cluster" and loads as an empty topology.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{Error, Result, TOPOLOGY_PATH_ENV};

const TOPOLOGY_DIR_NAME: &str = ".chainspawn";
const TOPOLOGY_FILE_NAME: &str = "topology.json";

/// Role a node plays in the test cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Standalone development node with instant block production
    Dev,
    /// First node of a multi-node topology; others join through it
    Bootnode,
    /// Block-authoring node joining via the bootnode
    Validator,
    /// Non-authoring node joining via the bootnode
    FullNode,
}

/// One created node. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Pod name, unique within the namespace
    pub node_id: String,
    /// Pod IP assigned by the platform
    pub ip: String,
    /// RPC port the node listens on
    pub port: u16,
    /// Role the node was spawned with
    pub role: NodeRole,
    /// Libp2p peer id, present for nodes with a fixture identity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
    /// Libp2p node key the node was launched with
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_key: Option<String>,
}

/// The currently active cluster: namespace, image, and every node created in
/// it. `bootnode` is a fast-lookup copy of the single bootnode record; the
/// `nodes` sequence owns all records including that one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    /// Namespace holding the cluster's pods
    pub namespace: Option<String>,
    /// Node image the cluster was spawned from
    pub image: Option<String>,
    /// The bootnode, if one has been created
    pub bootnode: Option<NodeRecord>,
    /// All created nodes, in creation order
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
}

impl Topology {
    /// True if nothing has been spawned yet (or the cluster was cleaned up)
    pub fn is_empty(&self) -> bool {
        self.namespace.is_none() && self.nodes.is_empty()
    }

    /// First tracked node, the default target for liveness probes
    pub fn first_node(&self) -> Option<&NodeRecord> {
        self.nodes.first()
    }
}

/// Single-writer store for the topology record.
///
/// Every mutating call persists synchronously before returning, so the next
/// operation in the process (and the next process) reads what was written.
#[derive(Debug)]
pub struct TopologyStore {
    path: PathBuf,
    topology: Topology,
}

impl TopologyStore {
    /// Open the store at the default location: `$CHAINSPAWN_TOPOLOGY` if
    /// set, otherwise `~/.chainspawn/topology.json`.
    pub fn open_default() -> Result<Self> {
        let path = match std::env::var_os(TOPOLOGY_PATH_ENV) {
            Some(p) => PathBuf::from(p),
            None => {
                let home = dirs::home_dir().ok_or_else(|| {
                    Error::Io(std::io::Error::other("could not determine home directory"))
                })?;
                home.join(TOPOLOGY_DIR_NAME).join(TOPOLOGY_FILE_NAME)
            }
        };
        Ok(Self::open(path))
    }

    /// Open the store at an explicit path, loading whatever is there.
    /// Missing or corrupt data loads as the empty topology.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let topology = Self::load(&path);
        Self { path, topology }
    }

    fn load(path: &Path) -> Topology {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no topology file, starting empty");
                return Topology::default();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable topology file, starting empty");
                return Topology::default();
            }
        };
        match serde_json::from_str(&data) {
            Ok(topology) => topology,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt topology file, starting empty");
                Topology::default()
            }
        }
    }

    /// The current topology
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Record the namespace (and image) the active cluster lives in
    pub fn set_namespace(&mut self, namespace: &str, image: &str) -> Result<()> {
        self.topology.namespace = Some(namespace.to_string());
        self.topology.image = Some(image.to_string());
        self.persist()
    }

    /// Append a created node. A bootnode record is additionally copied into
    /// the `bootnode` slot for fast lookup.
    pub fn record_node(&mut self, node: NodeRecord) -> Result<()> {
        if node.role == NodeRole::Bootnode {
            self.topology.bootnode = Some(node.clone());
        }
        self.topology.nodes.push(node);
        self.persist()
    }

    /// Reset to the empty topology (the owning namespace was deleted)
    pub fn reset(&mut self) -> Result<()> {
        self.topology = Topology::default();
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let data = serde_json::to_string_pretty(&self.topology)?;
        std::fs::write(&self.path, data)?;
        Ok(())
    }
}
