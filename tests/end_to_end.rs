//! End-to-end scenarios over a real TCP + WebSocket loop.

use melq::client::{Client, ClientConfig, ClientEvent};
use melq::collab::{PasswordIo, StdinPasswordIo};
use melq::error::{SessionError, SessionResult};
use melq::hub::local_client::LocalEvent;
use melq::hub::{Hub, HubConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// A password collaborator with a fixed answer, standing in for an
/// interactive terminal prompt in these non-interactive tests.
struct FixedPassword(&'static str);

impl PasswordIo for FixedPassword {
    fn prompt_password(&self, _prompt_text: &str) -> SessionResult<String> {
        Ok(self.0.to_string())
    }
}

async fn start_hub(password: Option<&str>) -> (Hub, u16) {
    let config = HubConfig {
        port: 0,
        password: password.map(str::to_string),
        display_name: "hub".to_string(),
    };
    let hub = Hub::new(&config);
    let (listener, port) = melq::hub::server::bind(&config).await.expect("bind");
    tokio::spawn(melq::hub::server::serve(hub.clone(), listener));
    (hub, port)
}

async fn connect(port: u16, return_address: &str) -> (Client, mpsc::UnboundedReceiver<ClientEvent>) {
    let code = format!("127.0.0.1:{port}");
    let config = ClientConfig { return_address: return_address.to_string() };
    Client::connect(&code, config, Arc::new(StdinPasswordIo))
        .await
        .expect("client connects and reaches OPERATIONAL")
}

#[tokio::test]
async fn password_success_registers_one_roster_entry() {
    let (hub, port) = start_hub(Some("p@ss")).await;
    assert_eq!(hub.roster_len().await, 0);

    let code = format!("127.0.0.1:{port}");
    let config = ClientConfig { return_address: "alice".to_string() };
    let (client, _events) = Client::connect(&code, config, Arc::new(FixedPassword("p@ss")))
        .await
        .expect("correct password admits the client");

    assert_eq!(hub.roster_len().await, 1);
    let chats = client.get_chats().await.expect("chat list request succeeds");
    assert!(chats.is_empty());
}

#[tokio::test]
async fn password_failure_leaves_roster_empty() {
    let (hub, port) = start_hub(Some("p@ss")).await;
    let code = format!("127.0.0.1:{port}");
    let config = ClientConfig { return_address: "mallory".to_string() };

    let started = tokio::time::Instant::now();
    let result = Client::connect(&code, config, Arc::new(FixedPassword("wrong"))).await;
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "a rejected password must surface promptly, not after the registration deadline"
    );
    match result {
        Err(SessionError::Auth(_)) => {}
        Err(e) => panic!("wrong password must surface as an auth error, got {e}"),
        Ok(_) => panic!("wrong password must not reach OPERATIONAL"),
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(hub.roster_len().await, 0, "hub must not retain a rejected connection");
}

#[tokio::test]
async fn three_party_chat_delivers_sealed_message() {
    let (hub, port) = start_hub(None).await;
    let (a, mut a_events) = connect(port, "alice").await;
    let (b, mut b_events) = connect(port, "bob").await;
    assert_eq!(hub.roster_len().await, 2);

    a.create_chat("general".to_string()).await;
    let chat_id = loop {
        match b_events.recv().await.expect("bob sees the new room") {
            ClientEvent::ChatAvailable { chat_id, name } => {
                assert_eq!(name, "general");
                break chat_id;
            }
            _ => continue,
        }
    };

    b.join_chat(chat_id.clone()).await;
    loop {
        if let ClientEvent::UserJoined { chat_id: cid, .. } = a_events.recv().await.expect("alice hears the join") {
            assert_eq!(cid, chat_id);
            break;
        }
    }

    // Give key-exchange introductions from the join a moment to land before messaging.
    tokio::time::sleep(Duration::from_millis(300)).await;

    a.send_chat_message(chat_id.clone(), "hello".to_string()).await;
    let msg = loop {
        if let ClientEvent::Message(m) = b_events.recv().await.expect("bob receives the chat message") {
            break m;
        }
    };
    assert_eq!(msg.chat_id, chat_id);
    assert_eq!(msg.text, "hello");
    assert_eq!(msg.from_node_id, a.node_id().0);
}

#[tokio::test]
async fn hub_local_operator_receives_chat_message() {
    let (hub, port) = start_hub(None).await;
    let (ctx, outbound_rx) = hub.spawn_local_client("local-operator".to_string()).await;
    let mut local_events = melq::hub::local_client::spawn(hub.clone(), ctx.clone(), outbound_rx);

    let (a, _a_events) = connect(port, "alice").await;
    a.create_chat("general".to_string()).await;

    let mut chat_id = None;
    while chat_id.is_none() {
        if let Some(LocalEvent::ChatAvailable { chat_id: cid, .. }) = local_events.recv().await {
            chat_id = Some(cid);
        }
    }
    let chat_id = chat_id.unwrap();

    // Drive the hub's own join so the operator is a room participant, same
    // as a remote client calling join_chat.
    let mut repl_ctx = ctx.clone();
    hub.handle_frame(&mut repl_ctx, melq::frame::Frame::JoinChat { chat_id: chat_id.clone() })
        .await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    a.send_chat_message(chat_id.clone(), "hi hub".to_string()).await;

    let text = loop {
        if let Some(LocalEvent::Message { text, .. }) = local_events.recv().await {
            break text;
        }
    };
    assert_eq!(text, "hi hub");
}

#[tokio::test]
async fn late_join_receives_full_history_in_order() {
    let (_hub, port) = start_hub(None).await;
    let (a, _a_events) = connect(port, "alice").await;

    a.create_chat("room".to_string()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let chats = a.get_chats().await.expect("alice can list her own room");
    let chat_id = chats[0].chat_id.clone();

    for text in ["m1", "m2", "m3"] {
        a.send_chat_message(chat_id.clone(), text.to_string()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let (b, mut b_events) = connect(port, "bob").await;
    b.join_chat(chat_id.clone()).await;

    let mut history = Vec::new();
    while history.len() < 3 {
        if let ClientEvent::Message(m) = b_events.recv().await.expect("bob gets the history dump") {
            history.push(m.text);
        }
    }
    assert_eq!(history, vec!["m1", "m2", "m3"]);
}
