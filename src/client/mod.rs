//! Client session: one connection to a hub, mirroring the hub's admission
//! state machine through CONNECTING → CHALLENGING → AUTHENTICATING →
//! REGISTERING → OPERATIONAL.

pub mod connect;
pub mod request_tracker;

use crate::collab::PasswordIo;
use crate::crypto::{aead, kem};
use crate::error::{SessionError, SessionResult};
use crate::frame::{ChatSummary, Frame, NodeSummary};
use crate::types::peer_key::Initiate;
use crate::types::{MessageRecord, NodeId, PeerKeyTable};
use connect::parse_connection_code;
use futures::{SinkExt, StreamExt};
use request_tracker::RequestTracker;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientPhase {
    Connecting,
    Challenging,
    Authenticating,
    Registering,
    Operational,
}

pub struct ClientConfig {
    pub return_address: String,
}

/// A chat event surfaced to whatever drives this client (CLI loop, the
/// hub's own local operator client) — delivered messages and room
/// lifecycle notices. Rendering them is outer surface, not this crate's job.
pub enum ClientEvent {
    Message(MessageRecord),
    ChatAvailable { chat_id: String, name: String },
    UserJoined { chat_id: String, node_id: String },
    HubClosed,
}

struct ClientState {
    node_id: NodeId,
    keypair: kem::Keypair,
    peer_keys: PeerKeyTable,
    peers: RwLock<HashMap<NodeId, NodeSummary>>,
    requests: RequestTracker,
    outbound: mpsc::UnboundedSender<String>,
    phase: RwLock<ClientPhase>,
    /// Learned from `registered`; the hub is the sealing party for every
    /// `encrypted_message` delivery regardless of the room message's author.
    hub_node_id: RwLock<Option<NodeId>>,
    /// Set the moment the hub rejects our password, so `connect()`'s poll
    /// loop can fail fast instead of waiting out the full registration
    /// deadline.
    auth_failed: RwLock<bool>,
}

#[derive(Clone)]
pub struct Client(Arc<ClientState>);

impl Client {
    /// Open a connection to `code`, run the handshake to OPERATIONAL, and
    /// return the session plus a channel of chat events for the caller to
    /// drive.
    pub async fn connect(
        code: &str,
        config: ClientConfig,
        password_io: Arc<dyn PasswordIo>,
    ) -> SessionResult<(Client, mpsc::UnboundedReceiver<ClientEvent>)> {
        let target = parse_connection_code(code)?;
        let url = target.to_url();
        let (ws_stream, _response) = tokio_tungstenite::connect_async(&url).await?;
        let (mut write, mut read) = ws_stream.split();

        let keypair = kem::generate();
        let node_id = NodeId::generate();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();

        let state = Arc::new(ClientState {
            node_id,
            keypair,
            peer_keys: PeerKeyTable::new(),
            peers: RwLock::new(HashMap::new()),
            requests: RequestTracker::new(),
            outbound: outbound_tx,
            phase: RwLock::new(ClientPhase::Connecting),
            hub_node_id: RwLock::new(None),
            auth_failed: RwLock::new(false),
        });
        let client = Client(state);

        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if write.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        });

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        *client.0.phase.write().await = ClientPhase::Challenging;
        client.send(Frame::PasswordChallenge);

        let return_address = config.return_address;
        let client_for_reader = client.clone();
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        let Ok(frame) = Frame::decode(&text) else {
                            log::debug!("discarding malformed frame");
                            continue;
                        };
                        let frame = client_for_reader.unwrap_inbound(frame).await;
                        client_for_reader
                            .handle_frame(frame, &return_address, &password_io, &events_tx)
                            .await;
                    }
                    Ok(Message::Close(_)) | Err(_) => {
                        events_tx.send(ClientEvent::HubClosed).ok();
                        break;
                    }
                    _ => {}
                }
            }
        });

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while *client.0.phase.read().await != ClientPhase::Operational {
            if *client.0.auth_failed.read().await {
                return Err(SessionError::Auth("hub rejected password".into()));
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(SessionError::Timeout("registration"));
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let keepalive = client.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(crate::PING_INTERVAL).await;
                if *keepalive.0.phase.read().await != ClientPhase::Operational {
                    break;
                }
                keepalive.send(Frame::Ping);
            }
        });

        Ok((client, events_rx))
    }

    pub fn node_id(&self) -> &NodeId {
        &self.0.node_id
    }

    fn send(&self, frame: Frame) {
        self.0.outbound.send(frame.encode()).ok();
    }

    /// Wrap `frame` in a `secure_message` envelope under the client↔hub
    /// pairwise key, if one is established yet. Without one, the frame goes
    /// out unsealed — the hub tolerates this during the brief window before
    /// its own key exchange with us completes.
    async fn seal_for_hub(&self, frame: Frame) -> Frame {
        let Some(hub_id) = self.0.hub_node_id.read().await.clone() else {
            return frame;
        };
        let lookup = self.0.peer_keys.get(&hub_id).await;
        match lookup.secret() {
            Some(secret) => frame.seal_with(&self.0.node_id.0, &aead::derive(secret)),
            None => frame,
        }
    }

    async fn send_sealed(&self, frame: Frame) {
        let wire = self.seal_for_hub(frame).await;
        self.0.outbound.send(wire.encode()).ok();
    }

    /// Unwrap an inbound `secure_message` envelope using our pairwise key
    /// for the embedded sender. Non-envelope frames pass through unchanged.
    async fn unwrap_inbound(&self, frame: Frame) -> Frame {
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

    async fn handle_frame(
        &self,
        frame: Frame,
        return_address: &str,
        password_io: &Arc<dyn PasswordIo>,
        events: &mpsc::UnboundedSender<ClientEvent>,
    ) {
        match frame {
            Frame::PasswordRequired => {
                *self.0.phase.write().await = ClientPhase::Authenticating;
                let password_io = password_io.clone();
                let prompt = tokio::task::spawn_blocking(move || password_io.prompt_password("Hub password")).await;
                match prompt {
                    Ok(Ok(password)) => self.send(Frame::PasswordAttempt {
                        password: Some(password),
                        kem_ciphertext: None,
                        sealed_password: None,
                    }),
                    Ok(Err(e)) => log::warn!("could not read password: {e}"),
                    Err(e) => log::warn!("password prompt task panicked: {e}"),
                }
            }
            Frame::PasswordNotRequired | Frame::PasswordAccepted => {
                self.register(return_address).await;
            }
            Frame::PasswordRejected => {
                log::warn!("hub rejected our password");
                *self.0.auth_failed.write().await = true;
            }
            Frame::Registered { hub_node_id, .. } => {
                *self.0.hub_node_id.write().await = Some(NodeId(hub_node_id));
                *self.0.phase.write().await = ClientPhase::Operational;
                self.send_sealed(Frame::DiscoverNodes {
                    request_id: Some(self.0.requests.next_request_id()),
                })
                .await;
                self.send_sealed(Frame::GetChats {
                    request_id: Some(self.0.requests.next_request_id()),
                })
                .await;
            }
            Frame::NodeList { request_id, nodes } => {
                if let Some(id) = request_id {
                    self.0.requests.resolve(id, Frame::NodeList { request_id, nodes: nodes.clone() });
                }
                {
                    let mut peers = self.0.peers.write().await;
                    for node in &nodes {
                        peers.insert(NodeId(node.node_id.clone()), node.clone());
                    }
                }
                for node in nodes {
                    self.maybe_initiate_key_exchange(&node).await;
                    tokio::time::sleep(crate::KEY_EXCHANGE_SPACING).await;
                }
            }
            Frame::ChatList { request_id, chats } => {
                if let Some(id) = request_id {
                    self.0.requests.resolve(id, Frame::ChatList { request_id, chats });
                }
            }
            Frame::ChatAvailable { chat_id, name, .. } => {
                events.send(ClientEvent::ChatAvailable { chat_id, name }).ok();
            }
            Frame::UserJoined { chat_id, node_id } => {
                events.send(ClientEvent::UserJoined { chat_id, node_id }).ok();
            }
            Frame::ChatHistory { messages, .. } => {
                for m in messages {
                    events.send(ClientEvent::Message(m)).ok();
                }
            }
            Frame::PeerInfo { node_id, public_key, return_address } => {
                let summary = NodeSummary { node_id: node_id.clone(), public_key, return_address };
                self.0.peers.write().await.insert(NodeId(node_id), summary.clone());
                self.maybe_initiate_key_exchange(&summary).await;
            }
            Frame::KeyExchangeRequest { from_node_id, to_node_id, ciphertext }
                if to_node_id == self.0.node_id.0 =>
            {
                self.accept_key_exchange(from_node_id, ciphertext).await;
            }
            Frame::KeyExchangeRequest { .. } => {}
            Frame::KeyExchangeResponse { from_node_id, to_node_id }
                if to_node_id == self.0.node_id.0 =>
            {
                self.0.peer_keys.confirm_initiated(&NodeId(from_node_id)).await;
            }
            Frame::KeyExchangeResponse { .. } => {}
            Frame::EncryptedMessage { chat_id, from_node_id, sender_alias, sealed } => {
                self.open_and_emit(chat_id, from_node_id, sender_alias, sealed, events).await;
            }
            Frame::Ping => self.send(Frame::Pong),
            Frame::AccessDenied { reason } => log::warn!("hub denied request: {reason}"),
            Frame::Unknown => log::debug!("discarding frame of unknown type"),
            _ => {}
        }
    }

    async fn register(&self, return_address: &str) {
        *self.0.phase.write().await = ClientPhase::Registering;
        self.send(Frame::Register {
            request_id: Some(self.0.requests.next_request_id()),
            node_id: self.0.node_id.0.clone(),
            public_key: hex::encode(self.0.keypair.public.as_bytes()),
            return_address: return_address.to_string(),
            authenticated: true,
        });
    }

    /// Mirrors the hub's own key-exchange initiation: anyone newly learned
    /// of via `node_list` or `peer_info` without an established key gets a
    /// `key_exchange_request`.
    async fn maybe_initiate_key_exchange(&self, peer: &NodeSummary) {
        let peer_id = NodeId(peer.node_id.clone());
        if peer_id == self.0.node_id {
            return;
        }
        if matches!(self.0.peer_keys.begin_initiate(peer_id.clone()).await, Initiate::Skip) {
            return;
        }
        let Ok(pk_bytes) = hex::decode(&peer.public_key) else { return };
        let Ok(pk) = kem::PublicKey::from_bytes(&pk_bytes) else { return };
        let Ok((ciphertext, secret)) = kem::encapsulate(&pk) else { return };
        self.0.peer_keys.record_initiated(peer_id.clone(), secret).await;
        self.send(Frame::KeyExchangeRequest {
            from_node_id: self.0.node_id.0.clone(),
            to_node_id: peer_id.0,
            ciphertext: hex::encode(ciphertext.as_bytes()),
        });
    }

    async fn accept_key_exchange(&self, from: String, ciphertext_hex: String) {
        let from_id = NodeId(from.clone());
        let we_are_lower = self.0.node_id.0 < from_id.0;
        if !self.0.peer_keys.should_accept_incoming(&from_id, we_are_lower).await {
            return;
        }
        let Ok(ct_bytes) = hex::decode(&ciphertext_hex) else { return };
        let Ok(ct) = kem::Ciphertext::from_bytes(&ct_bytes) else { return };
        match kem::decapsulate(&ct, &self.0.keypair.private) {
            Ok(secret) => {
                self.0.peer_keys.establish_from_incoming(from_id, secret).await;
                self.send(Frame::KeyExchangeResponse {
                    from_node_id: self.0.node_id.0.clone(),
                    to_node_id: from,
                });
            }
            Err(e) => log::debug!("key exchange decapsulation failed: {e}"),
        }
    }

    async fn open_and_emit(
        &self,
        chat_id: String,
        from_node_id: String,
        sender_alias: String,
        sealed: aead::SealedRecord,
        events: &mpsc::UnboundedSender<ClientEvent>,
    ) {
        // The hub seals every `encrypted_message` with its own pairwise key
        // to us, not the original author's — the hub is the sealing
        // authority for room messages, not the original sender.
        let Some(hub_id) = self.0.hub_node_id.read().await.clone() else {
            log::debug!("dropping encrypted_message before the hub's identity is known");
            return;
        };
        let lookup = self.0.peer_keys.get(&hub_id).await;
        let Some(secret) = lookup.secret() else {
            log::debug!("dropping encrypted_message from {from_node_id}: no pairwise key with the hub yet");
            return;
        };
        let key = aead::derive(secret);
        let Ok(plain) = aead::open(&sealed, &key) else {
            log::debug!("failed to open encrypted_message from {from_node_id}");
            return;
        };
        let Ok(payload) = serde_json::from_slice::<serde_json::Value>(&plain) else {
            return;
        };
        let record = MessageRecord {
            chat_id,
            from_node_id,
            sender_alias,
            text: payload["text"].as_str().unwrap_or_default().to_string(),
            timestamp: payload["timestamp"].as_u64().unwrap_or_default(),
        };
        events.send(ClientEvent::Message(record)).ok();
    }

    pub async fn discover_nodes(&self) -> SessionResult<Vec<NodeSummary>> {
        let id = self.0.requests.next_request_id();
        let rx = self.0.requests.register(id);
        self.send_sealed(Frame::DiscoverNodes { request_id: Some(id) }).await;
        match self
            .0
            .requests
            .await_reply(id, rx, Duration::from_secs(5), "discover_nodes")
            .await?
        {
            Frame::NodeList { nodes, .. } => Ok(nodes),
            _ => Ok(Vec::new()),
        }
    }

    pub async fn get_chats(&self) -> SessionResult<Vec<ChatSummary>> {
        let id = self.0.requests.next_request_id();
        let rx = self.0.requests.register(id);
        self.send_sealed(Frame::GetChats { request_id: Some(id) }).await;
        match self
            .0
            .requests
            .await_reply(id, rx, Duration::from_secs(5), "get_chats")
            .await?
        {
            Frame::ChatList { chats, .. } => Ok(chats),
            _ => Ok(Vec::new()),
        }
    }

    pub async fn create_chat(&self, name: String) {
        self.send_sealed(Frame::CreateChat { name }).await;
    }

    pub async fn join_chat(&self, chat_id: String) {
        self.send_sealed(Frame::JoinChat { chat_id }).await;
    }

    pub async fn send_chat_message(&self, chat_id: String, text: String) {
        self.send_sealed(Frame::SendChatMessage {
            chat_id,
            node_id: self.0.node_id.0.clone(),
            message_text: text,
            timestamp: crate::types::room::now_millis(),
        })
        .await;
    }
}
