//! Hub session manager: admission, roster, rooms, and message fan-out.
//! The network accept loop lives in [`server`]; this module is
//! transport-agnostic so the state machine can be exercised directly in
//! tests without opening a socket.

pub mod local_client;
pub mod server;
pub mod state;

use crate::crypto::{aead, kem};
use crate::error::{SessionError, SessionResult};
use crate::frame::{ChatSummary, Frame, NodeSummary};
use crate::types::connection::OutboundSender;
use crate::types::{ChatRoom, ConnectedNode, NodeId, PeerKeyTable};
use state::AdmissionPhase;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tokio::sync::{mpsc, Mutex, RwLock};

#[derive(Clone)]
pub struct HubConfig {
    pub port: u16,
    pub password: Option<String>,
    pub display_name: String,
}

/// Per-connection context carried by the connection's reader task. Created
/// once per accepted connection (and once, synthetically, for the hub's own
/// local operator client) and threaded through every `handle_frame` call.
/// Cloning shares the same outbound queue and close signal — used by the
/// local operator client, which drives `handle_frame` (REPL commands) and
/// `initiate_key_exchange` (reacting to `node_list`/`peer_info`) from two
/// separate tasks.
#[derive(Clone)]
pub struct ConnCtx {
    pub phase: AdmissionPhase,
    pub node_id: Option<NodeId>,
    pub outbound: OutboundSender,
    pub close: mpsc::UnboundedSender<()>,
}

fn pair_key(a: &NodeId, b: &NodeId) -> (NodeId, NodeId) {
    if a.0 <= b.0 {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

struct HubState {
    node_id: NodeId,
    keypair: kem::Keypair,
    password: Option<String>,
    roster: RwLock<HashMap<NodeId, ConnectedNode>>,
    rooms: RwLock<HashMap<String, ChatRoom>>,
    peer_keys: PeerKeyTable,
    introduced: Mutex<HashSet<(NodeId, NodeId)>>,
}

#[derive(Clone)]
pub struct Hub(Arc<HubState>);

impl Hub {
    pub fn new(config: &HubConfig) -> Self {
        let node_id = NodeId::generate();
        let keypair = kem::generate();
        // The hub is always the sealing party for room-message fan-out,
        // including deliveries to its own local operator client — the hub
        // also participates as its own logical client. There's no handshake partner to exchange with for that
        // case, so the hub just encapsulates against its own public key and
        // installs the resulting secret under its own node id up front.
        let (_, self_secret) = kem::encapsulate(&keypair.public).expect("self-encapsulation cannot fail");
        let peer_keys = PeerKeyTable::new_with_established(node_id.clone(), self_secret);
        Hub(Arc::new(HubState {
            node_id,
            keypair,
            password: config.password.clone(),
            roster: RwLock::new(HashMap::new()),
            rooms: RwLock::new(HashMap::new()),
            peer_keys,
            introduced: Mutex::new(HashSet::new()),
        }))
    }

    pub fn node_id(&self) -> &NodeId {
        &self.0.node_id
    }

    pub fn public_key(&self) -> &kem::PublicKey {
        &self.0.keypair.public
    }

    pub async fn roster_len(&self) -> usize {
        self.0.roster.read().await.len()
    }

    pub async fn room_count(&self) -> usize {
        self.0.rooms.read().await.len()
    }

    /// The hub's own pairwise-key table, exposed so the local operator
    /// client (which isn't a real network connection) can open messages
    /// addressed to the hub itself.
    pub fn peer_keys(&self) -> &PeerKeyTable {
        &self.0.peer_keys
    }

    /// Spawn the hub's own in-process client, bypassing the password
    /// challenge — the operator's own local client is trusted by
    /// construction. Returns a context the caller can
    /// drive exactly like a remote connection, plus the inbound frame
    /// receiver for frames addressed to the operator (chat history,
    /// encrypted messages, etc).
    pub async fn spawn_local_client(&self, return_address: String) -> (ConnCtx, mpsc::UnboundedReceiver<String>) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (close_tx, _close_rx) = mpsc::unbounded_channel();
        let node_id = self.0.node_id.clone();
        self.0.roster.write().await.insert(
            node_id.clone(),
            ConnectedNode::new(
                node_id.clone(),
                self.0.keypair.public.clone(),
                return_address,
                outbound_tx.clone(),
                true,
            ),
        );
        let ctx = ConnCtx {
            phase: AdmissionPhase::Operational,
            node_id: Some(node_id),
            outbound: outbound_tx,
            close: close_tx,
        };
        (ctx, outbound_rx)
    }

    /// Handle one inbound frame on behalf of `ctx`'s connection, dispatching
    /// by the connection's current admission phase.
    pub async fn handle_frame(&self, ctx: &mut ConnCtx, frame: Frame) {
        use AdmissionPhase::*;
        match frame {
            Frame::PasswordChallenge => {
                if self.0.password.is_some() {
                    ctx.outbound.send(Frame::PasswordRequired.encode()).ok();
                } else {
                    ctx.outbound.send(Frame::PasswordNotRequired.encode()).ok();
                }
                ctx.phase = AwaitingAuth;
            }
            Frame::Register {
                request_id,
                node_id,
                public_key,
                return_address,
                authenticated,
            } => {
                let eligible = matches!(ctx.phase, Authenticated)
                    || (matches!(ctx.phase, Connected | AwaitingAuth)
                        && self.0.password.is_none()
                        && authenticated);
                if !eligible {
                    self.deny(ctx, "registration not permitted in current state");
                    return;
                }
                self.do_register(ctx, request_id, node_id, public_key, return_address)
                    .await;
            }
            Frame::PasswordAttempt {
                password,
                kem_ciphertext,
                sealed_password,
            } => {
                if !matches!(ctx.phase, AwaitingAuth) {
                    self.deny(ctx, "password attempt not permitted in current state");
                    return;
                }
                let ok = self
                    .check_password(password, kem_ciphertext, sealed_password)
                    .await;
                if ok {
                    ctx.phase = Authenticated;
                    ctx.outbound.send(Frame::PasswordAccepted.encode()).ok();
                } else {
                    ctx.outbound.send(Frame::PasswordRejected.encode()).ok();
                    let close = ctx.close.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        close.send(()).ok();
                    });
                }
            }
            Frame::DiscoverNodes { request_id } => {
                if !ctx.phase.is_operational() {
                    self.deny(ctx, "discover_nodes requires registration");
                    return;
                }
                self.serve_discover_nodes(ctx, request_id).await;
            }
            Frame::GetChats { request_id } => {
                if !ctx.phase.is_operational() {
                    self.deny(ctx, "get_chats requires registration");
                    return;
                }
                self.serve_get_chats(ctx, request_id).await;
            }
            Frame::CreateChat { name } => {
                if !ctx.phase.is_operational() {
                    self.deny(ctx, "create_chat requires registration");
                    return;
                }
                self.serve_create_chat(ctx, name).await;
            }
            Frame::JoinChat { chat_id } => {
                if !ctx.phase.is_operational() {
                    self.deny(ctx, "join_chat requires registration");
                    return;
                }
                self.serve_join_chat(ctx, chat_id).await;
            }
            Frame::SendChatMessage {
                chat_id,
                node_id,
                message_text,
                ..
            } => {
                if !ctx.phase.is_operational() {
                    self.deny(ctx, "send_chat_message requires registration");
                    return;
                }
                self.serve_send_chat_message(chat_id, node_id, message_text)
                    .await;
            }
            Frame::KeyExchangeRequest {
                from_node_id,
                to_node_id,
                ciphertext,
            } => {
                self.route_key_exchange_request(from_node_id, to_node_id, ciphertext)
                    .await;
            }
            Frame::KeyExchangeResponse {
                from_node_id,
                to_node_id,
            } => {
                self.route_key_exchange_response(from_node_id, to_node_id)
                    .await;
            }
            Frame::Ping => {
                ctx.outbound.send(Frame::Pong.encode()).ok();
            }
            Frame::Pong => {}
            Frame::Unknown => {
                log::debug!("discarding frame of unknown type");
            }
            other => {
                self.deny(ctx, "frame not permitted in current state");
                log::debug!("unhandled or misplaced frame: {other:?}");
            }
        }
    }

    fn deny(&self, ctx: &ConnCtx, reason: &str) {
        ctx.outbound
            .send(
                Frame::AccessDenied {
                    reason: reason.to_string(),
                }
                .encode(),
            )
            .ok();
    }

    async fn do_register(
        &self,
        ctx: &mut ConnCtx,
        request_id: Option<u64>,
        node_id: String,
        public_key_hex: String,
        return_address: String,
    ) {
        let node_id = NodeId(node_id);
        let public_key = match hex::decode(&public_key_hex).ok().and_then(|b| kem::PublicKey::from_bytes(&b).ok()) {
            Some(pk) => pk,
            None => {
                self.deny(ctx, "malformed public key");
                return;
            }
        };
        self.0.roster.write().await.insert(
            node_id.clone(),
            ConnectedNode::new(
                node_id.clone(),
                public_key,
                return_address,
                ctx.outbound.clone(),
                true,
            ),
        );
        ctx.node_id = Some(node_id.clone());
        ctx.phase = AdmissionPhase::Operational;
        ctx.outbound
            .send(
                Frame::Registered {
                    request_id,
                    node_id: node_id.0.clone(),
                    hub_node_id: self.0.node_id.0.clone(),
                }
                .encode(),
            )
            .ok();

        // The hub needs its own pairwise key with every registered client to
        // seal `encrypted_message` deliveries to them, so it initiates the
        // exchange itself rather than waiting to be asked.
        let summary = NodeSummary {
            node_id: node_id.0,
            public_key: public_key_hex,
            return_address: String::new(),
        };
        self.initiate_key_exchange(ctx, &summary).await.ok();
    }

    async fn check_password(
        &self,
        password: Option<String>,
        kem_ciphertext: Option<String>,
        sealed_password: Option<aead::SealedRecord>,
    ) -> bool {
        let Some(expected) = &self.0.password else {
            return true;
        };
        if let (Some(ct_hex), Some(sealed)) = (kem_ciphertext, sealed_password) {
            if let Ok(ct_bytes) = hex::decode(ct_hex) {
                if let Ok(ct) = kem::Ciphertext::from_bytes(&ct_bytes) {
                    if let Ok(secret) = kem::decapsulate(&ct, &self.0.keypair.private) {
                        let key = aead::derive(&secret);
                        if let Ok(plain) = aead::open(&sealed, &key) {
                            return constant_time_eq(&plain, expected.as_bytes());
                        }
                    }
                }
            }
            return false;
        }
        match password {
            Some(attempt) => constant_time_eq(attempt.as_bytes(), expected.as_bytes()),
            None => false,
        }
    }

    async fn serve_discover_nodes(&self, ctx: &ConnCtx, request_id: Option<u64>) {
        let Some(self_id) = &ctx.node_id else { return };
        let roster = self.0.roster.read().await;
        let nodes = roster
            .values()
            .filter(|n| &n.node_id != self_id)
            .map(|n| NodeSummary {
                node_id: n.node_id.0.clone(),
                public_key: hex::encode(n.public_key.as_bytes()),
                return_address: n.return_address.clone(),
            })
            .collect();
        drop(roster);
        self.send_sealed(self_id, &ctx.outbound, Frame::NodeList { request_id, nodes }).await;
    }

    async fn serve_get_chats(&self, ctx: &ConnCtx, request_id: Option<u64>) {
        let Some(self_id) = &ctx.node_id else { return };
        let rooms = self.0.rooms.read().await;
        let chats = rooms
            .values()
            .map(|r| ChatSummary {
                chat_id: r.chat_id.clone(),
                name: r.name.clone(),
                creator: r.creator.0.clone(),
            })
            .collect();
        drop(rooms);
        self.send_sealed(self_id, &ctx.outbound, Frame::ChatList { request_id, chats }).await;
    }

    async fn serve_create_chat(&self, ctx: &ConnCtx, name: String) {
        let Some(creator) = ctx.node_id.clone() else { return };
        let room = ChatRoom::new(name.clone(), creator.clone());
        let chat_id = room.chat_id.clone();
        self.0.rooms.write().await.insert(chat_id.clone(), room);
        self.send_sealed(
            &creator,
            &ctx.outbound,
            Frame::ChatCreated {
                chat_id: chat_id.clone(),
                name: name.clone(),
            },
        )
        .await;
        self.broadcast_except(
            &creator,
            Frame::ChatAvailable {
                chat_id,
                name,
                creator: creator.0.clone(),
            },
        )
        .await;
    }

    async fn serve_join_chat(&self, ctx: &ConnCtx, chat_id: String) {
        let Some(joiner) = ctx.node_id.clone() else { return };
        let (history, other_participants) = {
            let mut rooms = self.0.rooms.write().await;
            let Some(room) = rooms.get_mut(&chat_id) else {
                self.deny(ctx, "no such chat");
                return;
            };
            room.join(joiner.clone());
            let others: Vec<NodeId> = room
                .participants()
                .iter()
                .filter(|p| **p != joiner)
                .cloned()
                .collect();
            (room.history.clone(), others)
        };
        self.send_sealed(
            &joiner,
            &ctx.outbound,
            Frame::ChatHistory {
                chat_id: chat_id.clone(),
                messages: history,
            },
        )
        .await;
        self.broadcast_to(
            &other_participants,
            Frame::UserJoined {
                chat_id: chat_id.clone(),
                node_id: joiner.0.clone(),
            },
        )
        .await;
        for other in &other_participants {
            self.ensure_introduced(&joiner, other).await;
        }
    }

    async fn serve_send_chat_message(&self, chat_id: String, node_id: String, text: String) {
        let sender = NodeId(node_id);
        let (record, recipients) = {
            let mut rooms = self.0.rooms.write().await;
            let Some(room) = rooms.get_mut(&chat_id) else {
                log::debug!("send_chat_message for unknown chat {chat_id}");
                return;
            };
            let record = room.record_message(&sender, text);
            let recipients: Vec<NodeId> = room
                .participants()
                .iter()
                .filter(|p| **p != sender)
                .cloned()
                .collect();
            (record, recipients)
        };
        for recipient in recipients {
            self.ensure_introduced(&sender, &recipient).await;
            self.deliver_encrypted_message(recipient, record.clone());
        }
    }

    /// Deliver a room message to `recipient`, sealed with the hub's own
    /// pairwise key for them. If that key isn't established yet (the
    /// recipient only just registered and hasn't completed its handshake
    /// with the hub), retry briefly rather than drop the message.
    fn deliver_encrypted_message(&self, recipient: NodeId, record: crate::types::MessageRecord) {
        let hub = self.clone();
        tokio::spawn(async move {
            let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
            loop {
                let lookup = hub.0.peer_keys.get(&recipient).await;
                if let Some(secret) = lookup.secret() {
                    let key = aead::derive(secret);
                    let payload = serde_json::json!({
                        "chatId": record.chat_id,
                        "fromNodeId": record.from_node_id,
                        "text": record.text,
                        "timestamp": record.timestamp,
                        "senderAlias": record.sender_alias,
                    });
                    let sealed = aead::seal(payload.to_string().as_bytes(), &key);
                    let frame = Frame::EncryptedMessage {
                        chat_id: record.chat_id.clone(),
                        from_node_id: record.from_node_id.clone(),
                        sender_alias: record.sender_alias.clone(),
                        sealed,
                    };
                    if let Some(conn) = hub.0.roster.read().await.get(&recipient) {
                        conn.send(frame.encode());
                    }
                    return;
                }
                if tokio::time::Instant::now() >= deadline {
                    log::warn!("giving up delivering message to {recipient}: no pairwise key established");
                    return;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        });
    }

    /// Send `peer_info` to each side of a pair that has never been
    /// introduced before. This is a hub-local bookkeeping
    /// set, deliberately not the pairwise-key table itself, which tracks a
    /// separate "pending" state during simultaneous key-exchange initiation.
    async fn ensure_introduced(&self, a: &NodeId, b: &NodeId) {
        let key = pair_key(a, b);
        {
            let mut introduced = self.0.introduced.lock().await;
            if introduced.contains(&key) {
                return;
            }
            introduced.insert(key);
        }
        let roster = self.0.roster.read().await;
        let (Some(node_a), Some(node_b)) = (roster.get(a), roster.get(b)) else {
            return;
        };
        node_a.send(
            Frame::PeerInfo {
                node_id: node_b.node_id.0.clone(),
                public_key: hex::encode(node_b.public_key.as_bytes()),
                return_address: node_b.return_address.clone(),
            }
            .encode(),
        );
        node_b.send(
            Frame::PeerInfo {
                node_id: node_a.node_id.0.clone(),
                public_key: hex::encode(node_a.public_key.as_bytes()),
                return_address: node_a.return_address.clone(),
            }
            .encode(),
        );
    }

    /// Send a sealed-class frame to one connection, wrapped in a
    /// `secure_message` envelope if the hub has an established pairwise key
    /// with that peer. Without one yet, the frame goes out unsealed — a
    /// degraded fallback, since `broadcast_*`/`send_sealed` callers are
    /// always sealed-class types.
    async fn seal_for(&self, peer: &NodeId, frame: Frame) -> Frame {
        let lookup = self.0.peer_keys.get(peer).await;
        match lookup.secret() {
            Some(secret) => frame.seal_with(&self.0.node_id.0, &aead::derive(secret)),
            None => frame,
        }
    }

    async fn send_sealed(&self, peer: &NodeId, outbound: &crate::types::connection::OutboundSender, frame: Frame) {
        let wire = self.seal_for(peer, frame).await;
        outbound.send(wire.encode()).ok();
    }

    async fn broadcast_except(&self, exclude: &NodeId, frame: Frame) {
        let roster = self.0.roster.read().await;
        for node in roster.values().filter(|n| &n.node_id != exclude) {
            let wire = self.seal_for(&node.node_id, frame.clone()).await;
            node.send(wire.encode());
        }
    }

    async fn broadcast_to(&self, targets: &[NodeId], frame: Frame) {
        let roster = self.0.roster.read().await;
        for target in targets {
            if let Some(node) = roster.get(target) {
                let wire = self.seal_for(target, frame.clone()).await;
                node.send(wire.encode());
            }
        }
    }

    /// Unwrap an inbound `secure_message` envelope using the hub's pairwise
    /// key for the embedded sender, returning the inner frame. Non-envelope
    /// frames pass through unchanged; a failed open or an unknown sender
    /// discards the frame (decode failure is already the catch-all policy
    /// for malformed wire data).
    pub async fn unwrap_inbound(&self, frame: Frame) -> Frame {
        let Frame::SecureMessage { from_node_id, sealed } = frame else {
            return frame;
        };
        let lookup = self.0.peer_keys.get(&NodeId(from_node_id.clone())).await;
        let Some(secret) = lookup.secret() else {
            log::debug!("dropping secure_message from {from_node_id}: no pairwise key yet");
            return Frame::Unknown;
        };
        match crate::frame::open_secure_message(&sealed, &aead::derive(secret)) {
            Ok(inner) => inner,
            Err(e) => {
                log::debug!("failed to open secure_message from {from_node_id}: {e}");
                Frame::Unknown
            }
        }
    }

    /// `key_exchange_request` targeting the hub itself is answered
    /// directly (the hub is a party to the exchange); targeting any other
    /// node, it is relayed verbatim — the hub never learns that pairwise
    /// secret.
    async fn route_key_exchange_request(&self, from: String, to: String, ciphertext_hex: String) {
        let from_id = NodeId(from);
        let to_id = NodeId(to);
        if to_id == self.0.node_id {
            let Ok(ct_bytes) = hex::decode(&ciphertext_hex) else {
                log::debug!("malformed key exchange ciphertext");
                return;
            };
            let Ok(ct) = kem::Ciphertext::from_bytes(&ct_bytes) else {
                return;
            };
            let we_are_lower = self.0.node_id.0 < from_id.0;
            if !self.0.peer_keys.should_accept_incoming(&from_id, we_are_lower).await {
                log::debug!("discarding losing side of a simultaneous key exchange with {from_id}");
                return;
            }
            match kem::decapsulate(&ct, &self.0.keypair.private) {
                Ok(secret) => {
                    self.0.peer_keys.establish_from_incoming(from_id.clone(), secret).await;
                    let roster = self.0.roster.read().await;
                    if let Some(requester) = roster.get(&from_id) {
                        requester.send(
                            Frame::KeyExchangeResponse {
                                from_node_id: self.0.node_id.0.clone(),
                                to_node_id: from_id.0,
                            }
                            .encode(),
                        );
                    }
                }
                Err(e) => log::debug!("key exchange decapsulation failed: {e}"),
            }
            return;
        }
        let roster = self.0.roster.read().await;
        if let Some(target) = roster.get(&to_id) {
            target.send(
                Frame::KeyExchangeRequest {
                    from_node_id: from_id.0,
                    to_node_id: to_id.0,
                    ciphertext: ciphertext_hex,
                }
                .encode(),
            );
        }
    }

    async fn route_key_exchange_response(&self, from: String, to: String) {
        let to_id = NodeId(to);
        if to_id == self.0.node_id {
            self.0.peer_keys.confirm_initiated(&NodeId(from)).await;
            return;
        }
        let roster = self.0.roster.read().await;
        if let Some(target) = roster.get(&to_id) {
            target.send(
                Frame::KeyExchangeResponse {
                    from_node_id: from,
                    to_node_id: to_id.0,
                }
                .encode(),
            );
        }
    }

    /// Release a connection's roster entry (and, transitively, its room
    /// memberships) on close.
    pub async fn release_connection(&self, node_id: &NodeId) {
        self.0.roster.write().await.remove(node_id);
        self.0.peer_keys.delete(node_id).await;
        let mut rooms = self.0.rooms.write().await;
        for room in rooms.values_mut() {
            if room.contains(node_id) {
                room.remove(node_id);
            }
        }
    }

    /// Establish the hub's own pairwise key with a connected node, mirroring
    /// the client-side `node_list` handler — the hub is just
    /// another node from the perspective of key exchange.
    pub async fn initiate_key_exchange(&self, ctx: &ConnCtx, peer: &NodeSummary) -> SessionResult<()> {
        let peer_id = NodeId(peer.node_id.clone());
        if matches!(
            self.0.peer_keys.begin_initiate(peer_id.clone()).await,
            crate::types::peer_key::Initiate::Skip
        ) {
            return Ok(());
        }
        let pk_bytes = hex::decode(&peer.public_key)
            .map_err(|_| SessionError::Crypto("bad peer public key encoding".into()))?;
        let pk = kem::PublicKey::from_bytes(&pk_bytes)?;
        let (ciphertext, secret) = kem::encapsulate(&pk)?;
        self.0.peer_keys.record_initiated(peer_id.clone(), secret).await;
        ctx.outbound
            .send(
                Frame::KeyExchangeRequest {
                    from_node_id: self.0.node_id.0.clone(),
                    to_node_id: peer_id.0,
                    ciphertext: hex::encode(ciphertext.as_bytes()),
                }
                .encode(),
            )
            .ok();
        Ok(())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.ct_eq(b).into()
}
