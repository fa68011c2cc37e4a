//! Chainspawn - ephemeral blockchain test clusters on Kubernetes
//!
//! Chainspawn provisions short-lived Substrate-style test networks inside a
//! Kubernetes namespace, records the resulting topology on disk, and probes
//! nodes for liveness by watching their chain height over JSON-RPC.
//!
//! # Architecture
//!
//! - A namespace groups one test cluster's resources; deleting it tears the
//!   whole cluster down.
//! - Each node runs as a single pod; node identities for multi-node
//!   topologies are deterministic fixtures, not runtime-generated keys.
//! - The active topology (namespace, image, nodes) is a single durable JSON
//!   record that later commands consult, e.g. to locate a node to probe.
//!
//! # Modules
//!
//! - [`cluster`] - Typed wrapper over Kubernetes namespace/pod/port-forward
//!   primitives
//! - [`topology`] - Durable record of the active cluster and its nodes
//! - [`node_spec`] - Role to launch-specification mapping
//! - [`deploy`] - Deployment engine: namespace, pods, readiness, topology
//! - [`probe`] - Chain-height liveness probe
//! - [`poll`] - Fixed-interval polling helpers
//! - [`error`] - Error types

#![cfg_attr(not(test), deny(missing_docs))]

use std::time::Duration;

pub mod cluster;
pub mod deploy;
pub mod error;
pub mod node_spec;
pub mod poll;
pub mod probe;
pub mod topology;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Default namespace for spawned test clusters
pub const DEFAULT_NAMESPACE: &str = "chainspawn";

/// Default node container image
pub const DEFAULT_IMAGE: &str = "parity/substrate:latest";

/// Default RPC port exposed by spawned nodes
pub const DEFAULT_RPC_PORT: u16 = 9944;

/// Libp2p port nodes listen on; used to build the bootnode multiaddress
pub const P2P_PORT: u16 = 30333;

/// Delay between pod readiness polls
pub const POD_POLL_INTERVAL: Duration = Duration::from_millis(5000);

/// Delay between chain-height polls
pub const HEIGHT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Wall-clock budget for the `singlenodeheight` command
pub const DEFAULT_HEIGHT_TIMEOUT: Duration = Duration::from_secs(300);

/// When set, `clean` leaves the namespace in place (dry-run safety net)
pub const KEEP_NAMESPACE_ENV: &str = "CHAINSPAWN_KEEP_NAMESPACE";

/// Overrides the topology file location
pub const TOPOLOGY_PATH_ENV: &str = "CHAINSPAWN_TOPOLOGY";
