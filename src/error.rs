//! Error types for chainspawn operations

use thiserror::Error;

/// Main error type for chainspawn operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// A platform resource is absent (often non-fatal: triggers
    /// create-on-demand or another poll attempt)
    #[error("{kind} {name} not found")]
    NotFound {
        /// Resource kind, e.g. "namespace" or "pod"
        kind: String,
        /// Resource name
        name: String,
    },

    /// A platform resource already exists (non-fatal for idempotent setup)
    #[error("{kind} {name} already exists")]
    AlreadyExists {
        /// Resource kind
        kind: String,
        /// Resource name
        name: String,
    },

    /// Validator creation requires a bootnode with a recorded ip and peer id
    #[error("no bootnode recorded in the current topology")]
    MissingBootnode,

    /// A bounded poll reached its deadline
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// Node RPC endpoint returned garbage or could not be reached
    #[error("rpc error: {0}")]
    Rpc(String),

    /// Port-forward tunnel could not be established
    #[error("port-forward error: {0}")]
    PortForward(String),

    /// io error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// json error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a not-found error for the given resource
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create an already-exists error for the given resource
    pub fn already_exists(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create an rpc error with the given message
    pub fn rpc(msg: impl Into<String>) -> Self {
        Self::Rpc(msg.into())
    }

    /// Create a port-forward error with the given message
    pub fn port_forward(msg: impl Into<String>) -> Self {
        Self::PortForward(msg.into())
    }

    /// True for "resource absent" errors, including the raw kube 404
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube(kube::Error::Api(ae)) => ae.code == 404,
            _ => false,
        }
    }

    /// True for "resource already exists" errors, including the raw kube 409
    pub fn is_already_exists(&self) -> bool {
        match self {
            Error::AlreadyExists { .. } => true,
            Error::Kube(kube::Error::Api(ae)) => ae.code == 409,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_classified() {
        let err = Error::not_found("pod", "alice");
        assert!(err.is_not_found());
        assert!(!err.is_already_exists());
        assert_eq!(err.to_string(), "pod alice not found");
    }

    #[test]
    fn already_exists_is_classified() {
        let err = Error::already_exists("namespace", "chainspawn");
        assert!(err.is_already_exists());
        assert!(!err.is_not_found());
        assert_eq!(err.to_string(), "namespace chainspawn already exists");
    }

    #[test]
    fn missing_bootnode_is_fatal_precondition() {
        let err = Error::MissingBootnode;
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("bootnode"));
    }

    #[test]
    fn timeout_names_what_was_waited_for() {
        let err = Error::Timeout("chain height above 10".into());
        assert!(err.to_string().contains("chain height above 10"));
    }
}
