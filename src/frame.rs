//! Frame codec: a closed sum type over every wire message, replacing a
//! type-keyed dispatch with an exhaustiveness-checked match.
//!
//! Each frame is one JSON text document per WebSocket text message — the
//! `type` tag makes it self-describing, and the underlying WebSocket
//! message framing gives length-delimiting for free.

use crate::crypto::aead::{self, SealedRecord, SymmetricKey};
use crate::error::{SessionError, SessionResult};
use crate::types::room::MessageRecord;
use serde::{Deserialize, Serialize};

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct NodeSummary {
    pub node_id: String,
    pub public_key: String, // hex-encoded ML-KEM public key
    pub return_address: String,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct ChatSummary {
    pub chat_id: String,
    pub name: String,
    pub creator: String,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    // --- unsealed: handshake / control (never sealed) ---
    Register {
        request_id: Option<u64>,
        node_id: String,
        public_key: String,
        return_address: String,
        /// Self-asserted; only honored by the hub when no session password
        /// is configured.
        authenticated: bool,
    },
    Registered {
        request_id: Option<u64>,
        node_id: String,
        /// The hub's own node id, so the client knows which pairwise-key
        /// entry seals `encrypted_message` deliveries (the hub, not the
        /// original chat author, is the sealing party).
        hub_node_id: String,
    },
    PasswordChallenge,
    PasswordAttempt {
        /// Plaintext fallback, only accepted when encapsulation isn't yet
        /// possible.
        password: Option<String>,
        /// Preferred form: KEM ciphertext + AEAD-sealed password.
        kem_ciphertext: Option<String>,
        sealed_password: Option<SealedRecord>,
    },
    PasswordRequired,
    PasswordNotRequired,
    PasswordAccepted,
    PasswordRejected,
    KeyExchangeRequest {
        from_node_id: String,
        to_node_id: String,
        ciphertext: String,
    },
    KeyExchangeResponse {
        from_node_id: String,
        to_node_id: String,
    },
    PeerInfo {
        node_id: String,
        public_key: String,
        return_address: String,
    },
    Ping,
    Pong,
    AccessDenied {
        reason: String,
    },

    // --- sealed: application ---
    DiscoverNodes {
        request_id: Option<u64>,
    },
    NodeList {
        request_id: Option<u64>,
        nodes: Vec<NodeSummary>,
    },
    GetChats {
        request_id: Option<u64>,
    },
    ChatList {
        request_id: Option<u64>,
        chats: Vec<ChatSummary>,
    },
    CreateChat {
        name: String,
    },
    ChatCreated {
        chat_id: String,
        name: String,
    },
    ChatAvailable {
        chat_id: String,
        name: String,
        creator: String,
    },
    JoinChat {
        chat_id: String,
    },
    UserJoined {
        chat_id: String,
        node_id: String,
    },
    SendChatMessage {
        chat_id: String,
        node_id: String,
        message_text: String,
        timestamp: u64,
    },
    EncryptedMessage {
        chat_id: String,
        from_node_id: String,
        sender_alias: String,
        sealed: SealedRecord,
    },
    ChatHistory {
        chat_id: String,
        messages: Vec<MessageRecord>,
    },

    /// Outer envelope for a sealed application frame. The inner `sealed`
    /// payload's plaintext is itself the JSON encoding of another `Frame`.
    SecureMessage {
        from_node_id: String,
        sealed: SealedRecord,
    },

    /// Catch-all for forward compatibility: an unrecognized `type` tag
    /// decodes here instead of failing the whole frame — malformed or
    /// unknown frames are discarded, never fatal.
    #[serde(other)]
    Unknown,
}

impl Frame {
    /// Whether this frame's type belongs to the sealed (application) class.
    /// `SecureMessage` itself is the sealed-transport envelope, not a
    /// payload type, and is therefore excluded — only frames which may
    /// legally appear *inside* one are sealed.
    pub fn is_sealed_type(&self) -> bool {
        !matches!(
            self,
            Frame::Register { .. }
                | Frame::Registered { .. }
                | Frame::PasswordChallenge
                | Frame::PasswordAttempt { .. }
                | Frame::PasswordRequired
                | Frame::PasswordNotRequired
                | Frame::PasswordAccepted
                | Frame::PasswordRejected
                | Frame::KeyExchangeRequest { .. }
                | Frame::KeyExchangeResponse { .. }
                | Frame::PeerInfo { .. }
                | Frame::Ping
                | Frame::Pong
                | Frame::AccessDenied { .. }
                | Frame::SecureMessage { .. }
                | Frame::Unknown
        )
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("Frame serialization is infallible")
    }

    pub fn decode(text: &str) -> crate::error::SessionResult<Frame> {
        Ok(serde_json::from_str(text)?)
    }

    /// Wrap this frame in a `secure_message` envelope, AEAD-sealed under
    /// `key`, asserting `from_node_id` as the sealing party's identity.
    pub fn seal_with(&self, from_node_id: &str, key: &SymmetricKey) -> Frame {
        Frame::SecureMessage {
            from_node_id: from_node_id.to_string(),
            sealed: aead::seal(self.encode().as_bytes(), key),
        }
    }
}

/// Open a `secure_message` envelope's inner frame.
pub fn open_secure_message(sealed: &SealedRecord, key: &SymmetricKey) -> SessionResult<Frame> {
    let plaintext = aead::open(sealed, key)?;
    let text =
        String::from_utf8(plaintext).map_err(|_| SessionError::Frame("non-utf8 secure_message payload".into()))?;
    Frame::decode(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(frame: Frame) {
        let encoded = frame.encode();
        let decoded = Frame::decode(&encoded).unwrap();
        assert_eq!(encoded, decoded.encode());
    }

    #[test]
    fn round_trips_every_variant_family() {
        round_trip(Frame::PasswordChallenge);
        round_trip(Frame::Ping);
        round_trip(Frame::DiscoverNodes { request_id: Some(1) });
        round_trip(Frame::CreateChat {
            name: "general".into(),
        });
        round_trip(Frame::AccessDenied {
            reason: "not registered".into(),
        });
    }

    #[test]
    fn unknown_type_decodes_to_catch_all() {
        let decoded = Frame::decode(r#"{"type":"something_new"}"#).unwrap();
        assert!(matches!(decoded, Frame::Unknown));
    }

    #[test]
    fn malformed_json_is_frame_error() {
        assert!(Frame::decode("not json").is_err());
    }

    #[test]
    fn sealed_classification_splits_control_from_application() {
        assert!(!Frame::Register {
            request_id: None,
            node_id: "a".into(),
            public_key: "a".into(),
            return_address: "a".into(),
            authenticated: false,
        }
        .is_sealed_type());
        assert!(Frame::DiscoverNodes { request_id: None }.is_sealed_type());
        assert!(Frame::CreateChat { name: "x".into() }.is_sealed_type());
        assert!(!Frame::Ping.is_sealed_type());
    }

    #[test]
    fn seal_with_and_open_secure_message_round_trip() {
        let key = aead::derive(&crate::crypto::kem::SharedSecret([7; crate::crypto::kem::SHARED_SECRET_LEN]));
        let inner = Frame::CreateChat { name: "general".into() };

        let envelope = inner.seal_with("node-a", &key);
        let Frame::SecureMessage { from_node_id, sealed } = &envelope else {
            panic!("seal_with must produce a SecureMessage envelope");
        };
        assert_eq!(from_node_id, "node-a");

        let opened = open_secure_message(sealed, &key).unwrap();
        assert_eq!(opened.encode(), inner.encode());
    }

    #[test]
    fn open_secure_message_rejects_wrong_key() {
        let key = aead::derive(&crate::crypto::kem::SharedSecret([1; crate::crypto::kem::SHARED_SECRET_LEN]));
        let wrong_key = aead::derive(&crate::crypto::kem::SharedSecret([2; crate::crypto::kem::SHARED_SECRET_LEN]));
        let envelope = Frame::JoinChat { chat_id: "c1".into() }.seal_with("node-a", &key);
        let Frame::SecureMessage { sealed, .. } = envelope else {
            unreachable!()
        };
        assert!(open_secure_message(&sealed, &wrong_key).is_err());
    }
}
