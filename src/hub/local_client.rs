//! The hub operator's own in-process client: it bypasses the password
//! challenge but otherwise behaves like any other node once registered.
//! Drives the frames the hub sends to `ctx`'s
//! outbound channel: reacting to `node_list`/`peer_info` by initiating key
//! exchange, opening `encrypted_message` with the hub's own pairwise key,
//! and surfacing chat activity as events the CLI can print.

use crate::crypto::aead;
use crate::frame::{Frame, NodeSummary};
use crate::hub::{ConnCtx, Hub};
use tokio::sync::mpsc;

pub enum LocalEvent {
    Message { chat_id: String, sender_alias: String, text: String },
    ChatAvailable { chat_id: String, name: String },
    UserJoined { chat_id: String, node_id: String },
    ChatList { chats: Vec<crate::frame::ChatSummary> },
}

/// Spawn the task driving the operator's own connection. `ctx` must be the
/// context returned by [`Hub::spawn_local_client`]; `outbound_rx` its paired
/// receiver.
pub fn spawn(hub: Hub, ctx: ConnCtx, mut outbound_rx: mpsc::UnboundedReceiver<String>) -> mpsc::UnboundedReceiver<LocalEvent> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(text) = outbound_rx.recv().await {
            let Ok(frame) = Frame::decode(&text) else {
                continue;
            };
            let frame = hub.unwrap_inbound(frame).await;
            match frame {
                Frame::NodeList { nodes, .. } => {
                    for node in nodes {
                        hub.initiate_key_exchange(&ctx, &node).await.ok();
                        tokio::time::sleep(crate::KEY_EXCHANGE_SPACING).await;
                    }
                }
                Frame::PeerInfo { node_id, public_key, return_address } => {
                    let summary = NodeSummary { node_id, public_key, return_address };
                    hub.initiate_key_exchange(&ctx, &summary).await.ok();
                }
                Frame::ChatAvailable { chat_id, name, .. } => {
                    events_tx.send(LocalEvent::ChatAvailable { chat_id, name }).ok();
                }
                Frame::ChatList { chats, .. } => {
                    events_tx.send(LocalEvent::ChatList { chats }).ok();
                }
                Frame::UserJoined { chat_id, node_id } => {
                    events_tx.send(LocalEvent::UserJoined { chat_id, node_id }).ok();
                }
                Frame::ChatHistory { chat_id, messages } => {
                    for m in messages {
                        events_tx
                            .send(LocalEvent::Message {
                                chat_id: chat_id.clone(),
                                sender_alias: m.sender_alias,
                                text: m.text,
                            })
                            .ok();
                    }
                }
                Frame::EncryptedMessage { chat_id, sender_alias, sealed, .. } => {
                    let Some(event) = open_message(&hub, chat_id, sender_alias, sealed).await else {
                        continue;
                    };
                    events_tx.send(event).ok();
                }
                _ => {}
            }
        }
    });
    events_rx
}

async fn open_message(
    hub: &Hub,
    chat_id: String,
    sender_alias: String,
    sealed: aead::SealedRecord,
) -> Option<LocalEvent> {
    // The hub seals every `encrypted_message` delivery with its own
    // pairwise key to the recipient — for the hub's own local
    // client, that's its self-established key, not a key tied to whoever
    // originally authored the room message.
    let lookup = hub.peer_keys().get(hub.node_id()).await;
    let secret = lookup.secret()?;
    let key = aead::derive(secret);
    let plain = aead::open(&sealed, &key).ok()?;
    let payload: serde_json::Value = serde_json::from_slice(&plain).ok()?;
    let text = payload["text"].as_str().unwrap_or_default().to_string();
    Some(LocalEvent::Message { chat_id, sender_alias, text })
}
