//! Chat rooms and their in-memory message history (hub only).

use crate::types::NodeId;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageRecord {
    pub chat_id: String,
    pub from_node_id: String,
    pub sender_alias: String,
    pub text: String,
    pub timestamp: u64,
}

pub struct ChatRoom {
    pub chat_id: String,
    pub name: String,
    pub creator: NodeId,
    /// Insertion order retained for display; membership is set semantics —
    /// `join` is a no-op if the node is already a participant.
    participants: Vec<NodeId>,
    pub created_at: u64,
    pub history: Vec<MessageRecord>,
}

impl ChatRoom {
    pub fn new(name: String, creator: NodeId) -> Self {
        let chat_id = format!("chat_{}_{}", now_millis(), random_suffix());
        let created_at = now_millis();
        Self {
            chat_id,
            name,
            participants: vec![creator.clone()],
            creator,
            created_at,
            history: Vec::new(),
        }
    }

    pub fn participants(&self) -> &[NodeId] {
        &self.participants
    }

    /// Set-semantics join: adding an already-present participant is a no-op.
    /// Returns whether the node was newly added.
    pub fn join(&mut self, node: NodeId) -> bool {
        if self.participants.contains(&node) {
            false
        } else {
            self.participants.push(node);
            true
        }
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.participants.contains(node)
    }

    /// Remove a disconnected node from every room it was in. Invariant: a
    /// room never loses a participant it never had — callers only invoke
    /// this for nodes actually present, so this asserts rather than
    /// silently ignoring a mismatch.
    pub fn remove(&mut self, node: &NodeId) {
        let before = self.participants.len();
        self.participants.retain(|p| p != node);
        assert_eq!(
            self.participants.len(),
            before - 1,
            "room lost a participant it never had"
        );
    }

    pub fn record_message(&mut self, from: &NodeId, text: String) -> MessageRecord {
        let record = MessageRecord {
            chat_id: self.chat_id.clone(),
            from_node_id: from.0.clone(),
            sender_alias: from.alias().to_string(),
            text,
            timestamp: now_millis(),
        };
        self.history.push(record.clone());
        record
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the Unix epoch")
        .as_millis() as u64
}

fn random_suffix() -> String {
    use rand::Rng;
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..9)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_is_idempotent_set_semantics() {
        let creator = NodeId::generate();
        let joiner = NodeId::generate();
        let mut room = ChatRoom::new("general".into(), creator.clone());
        assert!(room.join(joiner.clone()));
        assert!(!room.join(joiner.clone()));
        assert_eq!(room.participants().len(), 2);
    }

    #[test]
    fn history_is_append_only_in_receive_order() {
        let creator = NodeId::generate();
        let mut room = ChatRoom::new("general".into(), creator.clone());
        room.record_message(&creator, "m1".into());
        room.record_message(&creator, "m2".into());
        room.record_message(&creator, "m3".into());
        let texts: Vec<_> = room.history.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["m1", "m2", "m3"]);
    }

    #[test]
    #[should_panic(expected = "never had")]
    fn remove_of_absent_participant_asserts() {
        let creator = NodeId::generate();
        let stranger = NodeId::generate();
        let mut room = ChatRoom::new("general".into(), creator);
        room.remove(&stranger);
    }
}
