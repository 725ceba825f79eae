//! Connected-node record, hub only: one per open connection.

use crate::crypto::kem::PublicKey;
use crate::types::room::now_millis;
use crate::types::NodeId;
use tokio::sync::mpsc;

/// Outbound frame queue for one connection. The session manager never
/// writes to a socket directly — every outgoing frame goes through this
/// queue so a slow reader can't block the mutation that produced the frame.
pub type OutboundSender = mpsc::UnboundedSender<String>;
pub type OutboundReceiver = mpsc::UnboundedReceiver<String>;

pub struct ConnectedNode {
    pub node_id: NodeId,
    pub public_key: PublicKey,
    pub return_address: String,
    pub outbound: OutboundSender,
    pub authenticated: bool,
    pub joined_at: u64,
}

impl ConnectedNode {
    pub fn new(
        node_id: NodeId,
        public_key: PublicKey,
        return_address: String,
        outbound: OutboundSender,
        authenticated: bool,
    ) -> Self {
        Self {
            node_id,
            public_key,
            return_address,
            outbound,
            authenticated,
            joined_at: now_millis(),
        }
    }

    /// Best-effort send: a dropped receiver just means the connection's
    /// task has already torn down, which the session manager learns about
    /// separately on its own close path.
    pub fn send(&self, frame_json: String) {
        let _ = self.outbound.send(frame_json);
    }
}
