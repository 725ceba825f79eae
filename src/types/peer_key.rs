//! Per-node pairwise-key table: remote node identifier → shared secret.
//!
//! KEM handshakes aren't symmetric like Diffie-Hellman — whichever side
//! encapsulates is the one whose secret the pair ends up sharing, the other
//! side only ever decapsulates. When both sides initiate at once
//! ("two clients simultaneously initiate key exchange against one another")
//! a plain tri-state table isn't enough to converge: each side would
//! otherwise encapsulate its own secret and never learn the other's.
//! `PendingOutbound` carries our own in-flight secret so it can become
//! canonical once acknowledged, or be discarded in favor of the peer's if
//! the tie-break says they win.

use crate::crypto::kem::SharedSecret;
use crate::types::NodeId;
use std::collections::HashMap;
use tokio::sync::Mutex;

enum Slot {
    /// We sent a `key_exchange_request`; our own secret, once our
    /// encapsulation finishes, waits here for the peer's acknowledgement.
    PendingOutbound(Option<SharedSecret>),
    Established(SharedSecret),
}

/// Owned by exactly one node; concurrent access is serialized behind a
/// single mutex (the table is small and mutations are infrequent, so a
/// plain `Mutex` — rather than a reader/writer split — is sufficient here;
/// contrast with the hub's roster/room tables, which do use a
/// single-writer-many-readers `RwLock`).
#[derive(Default)]
pub struct PeerKeyTable {
    entries: Mutex<HashMap<NodeId, Slot>>,
}

/// Result of a `get`: either the established secret, or a note that an
/// exchange is already underway and the caller must wait or drop the
/// operation. Owned, since it can't hand back a borrow once the mutex
/// guard backing the table is dropped.
pub enum LookupOwned {
    Absent,
    Pending,
    Established(SharedSecret),
}

impl LookupOwned {
    pub fn is_established(&self) -> bool {
        matches!(self, LookupOwned::Established(_))
    }

    pub fn secret(&self) -> Option<&SharedSecret> {
        match self {
            LookupOwned::Established(s) => Some(s),
            _ => None,
        }
    }
}

/// Whether a caller wanting to initiate a key exchange should actually do
/// so, or skip because one is already in flight or resolved.
pub enum Initiate {
    Start,
    Skip,
}

impl PeerKeyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table with one secret already established, synchronously —
    /// used by the hub to seed its own self-delivery key at construction
    /// time, before any async task could race to populate it.
    pub fn new_with_established(peer: NodeId, secret: SharedSecret) -> Self {
        let mut entries = HashMap::new();
        entries.insert(peer, Slot::Established(secret));
        Self {
            entries: Mutex::new(entries),
        }
    }

    pub async fn has(&self, peer: &NodeId) -> bool {
        self.entries.lock().await.contains_key(peer)
    }

    pub async fn get(&self, peer: &NodeId) -> LookupOwned {
        match self.entries.lock().await.get(peer) {
            None => LookupOwned::Absent,
            Some(Slot::PendingOutbound(_)) => LookupOwned::Pending,
            Some(Slot::Established(secret)) => LookupOwned::Established(secret.clone()),
        }
    }

    /// Reserve `peer` for an outbound exchange we are about to initiate.
    /// `Skip` means a request from us or them is already in flight, or a
    /// secret is already established — the caller must not encapsulate.
    pub async fn begin_initiate(&self, peer: NodeId) -> Initiate {
        let mut entries = self.entries.lock().await;
        match entries.entry(peer) {
            std::collections::hash_map::Entry::Occupied(_) => Initiate::Skip,
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(Slot::PendingOutbound(None));
                Initiate::Start
            }
        }
    }

    /// Record the secret our own encapsulation produced. Still provisional
    /// until the peer's `key_exchange_response` confirms it.
    pub async fn record_initiated(&self, peer: NodeId, secret: SharedSecret) {
        self.entries.lock().await.insert(peer, Slot::PendingOutbound(Some(secret)));
    }

    /// The peer acknowledged our request: our secret is now canonical.
    /// A no-op if we have no matching in-flight secret (stale or duplicate
    /// acknowledgement).
    pub async fn confirm_initiated(&self, peer: &NodeId) {
        let mut entries = self.entries.lock().await;
        if let Some(Slot::PendingOutbound(Some(secret))) = entries.remove(peer) {
            entries.insert(peer.clone(), Slot::Established(secret));
        }
    }

    /// An incoming `key_exchange_request` arrived from `peer`. `we_are_lower`
    /// is whether our own node id sorts before theirs, which breaks the tie
    /// when both sides initiated concurrently: the lower id's encapsulation
    /// wins, so the higher id discards its own in-flight attempt and
    /// decapsulates the winner's ciphertext instead. Returns whether the
    /// caller should proceed to decapsulate and establish from it.
    pub async fn should_accept_incoming(&self, peer: &NodeId, we_are_lower: bool) -> bool {
        let entries = self.entries.lock().await;
        match entries.get(peer) {
            None => true,
            Some(Slot::Established(_)) => false,
            Some(Slot::PendingOutbound(_)) => !we_are_lower,
        }
    }

    /// Install a secret obtained by decapsulating an incoming request,
    /// overwriting whatever was there (our own losing in-flight attempt, if
    /// any — `should_accept_incoming` is what decided this is safe).
    pub async fn establish_from_incoming(&self, peer: NodeId, secret: SharedSecret) {
        self.entries.lock().await.insert(peer, Slot::Established(secret));
    }

    pub async fn delete(&self, peer: &NodeId) {
        self.entries.lock().await.remove(peer);
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kem;

    fn secret(byte: u8) -> SharedSecret {
        SharedSecret([byte; kem::SHARED_SECRET_LEN])
    }

    #[tokio::test]
    async fn absent_then_pending_then_established() {
        let table = PeerKeyTable::new();
        let peer = NodeId::generate();
        assert!(matches!(table.get(&peer).await, LookupOwned::Absent));

        assert!(matches!(table.begin_initiate(peer.clone()).await, Initiate::Start));
        assert!(matches!(table.get(&peer).await, LookupOwned::Pending));

        table.record_initiated(peer.clone(), secret(5)).await;
        assert!(matches!(table.get(&peer).await, LookupOwned::Pending));

        table.confirm_initiated(&peer).await;
        assert!(table.get(&peer).await.is_established());
    }

    #[tokio::test]
    async fn begin_initiate_is_not_reentrant() {
        let table = PeerKeyTable::new();
        let peer = NodeId::generate();
        assert!(matches!(table.begin_initiate(peer.clone()).await, Initiate::Start));
        assert!(matches!(table.begin_initiate(peer.clone()).await, Initiate::Skip));
    }

    #[tokio::test]
    async fn simultaneous_initiation_converges_on_lower_id_winner() {
        let table_a = PeerKeyTable::new();
        let table_b = PeerKeyTable::new();
        let (low, high) = {
            let x = NodeId::generate();
            let y = NodeId::generate();
            if x.0 < y.0 { (x, y) } else { (y, x) }
        };

        // Both sides initiate toward each other at once.
        table_a.begin_initiate(high.clone()).await; // a is "low", initiating toward "high"
        table_a.record_initiated(high.clone(), secret(1)).await;
        table_b.begin_initiate(low.clone()).await; // b is "high", initiating toward "low"
        table_b.record_initiated(low.clone(), secret(2)).await;

        // b (higher id) receives a's request: b is not the lower id, so it
        // must accept and decapsulate a's ciphertext instead of keeping its
        // own in-flight secret.
        assert!(table_b.should_accept_incoming(&low, false).await);
        table_b.establish_from_incoming(low.clone(), secret(1)).await;

        // a (lower id) receives b's request: a is the lower id, so it must
        // discard the incoming duplicate and keep waiting for its own ack.
        assert!(!table_a.should_accept_incoming(&high, true).await);
        table_a.confirm_initiated(&high).await;

        assert_eq!(
            table_a.get(&high).await.secret().unwrap().as_bytes(),
            table_b.get(&low).await.secret().unwrap().as_bytes()
        );
    }

    #[tokio::test]
    async fn fresh_incoming_request_is_accepted() {
        let table = PeerKeyTable::new();
        let peer = NodeId::generate();
        assert!(table.should_accept_incoming(&peer, true).await);
        table.establish_from_incoming(peer.clone(), secret(9)).await;
        assert!(table.get(&peer).await.is_established());
    }
}
