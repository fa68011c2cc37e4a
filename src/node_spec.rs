//! Role to launch-specification mapping.
//!
//! Pure and deterministic: the same `(role, image, port)` always yields the
//! same spec. Multi-node topologies use fixed, well-known node keys and peer
//! ids so nodes can find each other without a key-generation or exchange
//! protocol. That makes clusters reproducible and makes them unsafe for
//! anything beyond disposable testing, which is the point.

use crate::topology::{NodeRole, Topology};
use crate::{Error, Result, P2P_PORT};

/// Alice's fixture node key (the well-known dev key `1`)
pub const ALICE_NODE_KEY: &str =
    "0000000000000000000000000000000000000000000000000000000000000001";

/// Peer id derived from [`ALICE_NODE_KEY`], hardcoded rather than computed
pub const ALICE_PEER_ID: &str = "12D3KooWEyoppNCUx8Yx66oV9fJnriXwCcXwDDUA2kj6vnc6iDEp";

/// Bob's fixture node key (the well-known dev key `2`)
pub const BOB_NODE_KEY: &str =
    "0000000000000000000000000000000000000000000000000000000000000002";

/// Peer id derived from [`BOB_NODE_KEY`], hardcoded rather than computed
pub const BOB_PEER_ID: &str = "12D3KooWHdiAxVd8uMQR1hGWXccidmfCwLqcMpGwR6QcTP6QRMuD";

/// Role-specific launch data. Each variant carries only the fields that
/// role actually uses; a dev node has no network identity at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleSpec {
    /// Standalone dev node
    Dev,
    /// Bootnode with a fixture identity other nodes dial
    Bootnode {
        /// Launch key
        node_key: String,
        /// Identity other nodes put in their `--bootnodes` multiaddress
        peer_id: String,
    },
    /// Validator joining via the bootnode
    Validator {
        /// Launch key
        node_key: String,
        /// Fixture identity of this validator
        peer_id: String,
    },
    /// Non-authoring full node joining via the bootnode
    FullNode,
}

impl RoleSpec {
    /// The topology-level role this spec produces
    pub fn role(&self) -> NodeRole {
        match self {
            RoleSpec::Dev => NodeRole::Dev,
            RoleSpec::Bootnode { .. } => NodeRole::Bootnode,
            RoleSpec::Validator { .. } => NodeRole::Validator,
            RoleSpec::FullNode => NodeRole::FullNode,
        }
    }

    /// Identity material carried by this role, if any
    pub fn identity(&self) -> (Option<&str>, Option<&str>) {
        match self {
            RoleSpec::Bootnode { node_key, peer_id }
            | RoleSpec::Validator { node_key, peer_id } => {
                (Some(node_key.as_str()), Some(peer_id.as_str()))
            }
            RoleSpec::Dev | RoleSpec::FullNode => (None, None),
        }
    }
}

/// Everything needed to create one node pod. Consumed once by the
/// deployment engine; its `role` data ends up in the node's record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    /// Pod name
    pub node_id: String,
    /// Container image
    pub image: String,
    /// RPC port the container exposes
    pub port: u16,
    /// Node launch arguments, in order
    pub args: Vec<String>,
    /// Role-specific data
    pub role: RoleSpec,
}

/// Build the launch spec for a standalone dev node.
pub fn dev_node(node_id: &str, image: &str, port: u16) -> NodeSpec {
    NodeSpec {
        node_id: node_id.to_string(),
        image: image.to_string(),
        port,
        args: vec![
            "--dev".to_string(),
            "--rpc-external".to_string(),
            "--ws-external".to_string(),
        ],
        role: RoleSpec::Dev,
    }
}

/// Build the launch spec for the bootnode ("alice").
pub fn bootnode(image: &str, port: u16) -> NodeSpec {
    NodeSpec {
        node_id: "alice".to_string(),
        image: image.to_string(),
        port,
        args: vec![
            "--validator".to_string(),
            "--alice".to_string(),
            "--node-key".to_string(),
            ALICE_NODE_KEY.to_string(),
            "--no-telemetry".to_string(),
            "--rpc-cors=all".to_string(),
        ],
        role: RoleSpec::Bootnode {
            node_key: ALICE_NODE_KEY.to_string(),
            peer_id: ALICE_PEER_ID.to_string(),
        },
    }
}

/// Build the launch spec for the validator ("bob").
///
/// Requires a bootnode with a recorded ip and peer id in the topology: bob
/// dials alice's multiaddress at startup, so there is nothing useful to
/// launch before she is reachable. Fails with `MissingBootnode` otherwise.
pub fn validator(image: &str, port: u16, topology: &Topology) -> Result<NodeSpec> {
    let boot = topology.bootnode.as_ref().ok_or(Error::MissingBootnode)?;
    let peer_id = boot.peer_id.as_deref().ok_or(Error::MissingBootnode)?;
    if boot.ip.is_empty() {
        return Err(Error::MissingBootnode);
    }

    let bootnode_addr = format!("/ip4/{}/tcp/{}/p2p/{}", boot.ip, P2P_PORT, peer_id);
    Ok(NodeSpec {
        node_id: "bob".to_string(),
        image: image.to_string(),
        port,
        args: vec![
            "--validator".to_string(),
            "--bob".to_string(),
            "--node-key".to_string(),
            BOB_NODE_KEY.to_string(),
            format!("--bootnodes={}", bootnode_addr),
        ],
        role: RoleSpec::Validator {
            node_key: BOB_NODE_KEY.to_string(),
            peer_id: BOB_PEER_ID.to_string(),
        },
    })
}
