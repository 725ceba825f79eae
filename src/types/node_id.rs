//! Node identity: a random opaque identifier generated once per process.

use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Opaque node identifier, ≥8 bytes of entropy rendered as a short
/// printable hex string. Ephemeral — nothing is persisted across restarts.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    /// Generate a fresh random identifier (16 bytes of entropy, hex-encoded).
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Short display alias: the last few characters of the identifier,
    /// used when labeling a message's originator.
    pub fn alias(&self) -> &str {
        let len = self.0.len();
        &self.0[len.saturating_sub(8)..]
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_distinct_ids() {
        let a = NodeId::generate();
        let b = NodeId::generate();
        assert_ne!(a.0, b.0);
        assert!(a.0.len() >= 16);
    }

    #[test]
    fn alias_is_suffix() {
        let id = NodeId("0123456789abcdef".to_string());
        assert_eq!(id.alias(), "89abcdef");
    }

    #[test]
    fn alias_handles_short_ids() {
        let id = NodeId("ab".to_string());
        assert_eq!(id.alias(), "ab");
    }
}
