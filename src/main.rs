//! Entry point: parses [`cli::Cli`] and drives a hub or a client session to
//! completion, with exit codes 0 normal, 1 startup error,
//! 130 interrupted).

mod cli;

use clap::Parser;
use cli::Command;
use melq::client::{Client, ClientConfig, ClientEvent};
use melq::collab::{discovery, ManualTunnel, StdinPasswordIo, Tunnel};
use melq::frame::Frame;
use melq::hub::local_client::LocalEvent;
use melq::hub::{Hub, HubConfig};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() {
    melq::init_logging();
    let cli = cli::Cli::parse();
    let result = match cli.command {
        Command::Host { internet, local_only, password, tunnel, port } => {
            run_host(internet, local_only, password, tunnel, port).await
        }
        Command::Join { code } => run_join(code).await,
        Command::Discover { timeout_secs } => run_discover(timeout_secs).await,
    };
    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("melq: {e}");
            std::process::exit(1);
        }
    }
}

async fn run_host(
    internet: bool,
    local_only: bool,
    password: Option<String>,
    tunnel: String,
    port: u16,
) -> anyhow::Result<()> {
    let config = HubConfig { port, password, display_name: "hub".to_string() };
    let hub = Hub::new(&config);
    let (listener, bound_port) = melq::hub::server::bind(&config).await?;

    if internet {
        let info = ManualTunnel.establish(bound_port, &tunnel, None)?;
        println!("share this connection code: {}", info.connection_code);
        if info.requires_port_forwarding {
            println!("(forward port {bound_port} to this machine first)");
        }
    } else {
        println!("share this connection code: melq://{}:{bound_port}", discovery::local_ip_string());
    }

    if !local_only {
        discovery::advertise(hub.node_id().0.clone(), config.display_name.clone(), bound_port).await?;
    }

    tokio::spawn(melq::hub::server::serve(hub.clone(), listener));

    let (ctx, outbound_rx) = hub.spawn_local_client("local-operator".to_string()).await;
    let mut repl_ctx = ctx.clone();
    let mut events = melq::hub::local_client::spawn(hub.clone(), ctx, outbound_rx);

    println!("hub running on port {bound_port}, node id {}", hub.node_id());
    print_repl_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let Some(frame) = parse_repl_line(&line, &hub.node_id().0) else { break };
                        match frame {
                            Some(frame) => hub.handle_frame(&mut repl_ctx, frame).await,
                            None if line.trim() == "/chats" => {
                                hub.handle_frame(&mut repl_ctx, Frame::GetChats { request_id: None }).await
                            }
                            None => {}
                        }
                    }
                    _ => break,
                }
            }
            event = events.recv() => {
                match event {
                    Some(event) => print_local_event(event),
                    None => break,
                }
            }
        }
    }
    Ok(())
}

async fn run_join(code: String) -> anyhow::Result<()> {
    let config = ClientConfig { return_address: "remote-client".to_string() };
    let password_io = Arc::new(StdinPasswordIo);
    let (client, mut events) = Client::connect(&code, config, password_io).await?;
    println!("connected as node {}", client.node_id());
    print_repl_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        match parse_repl_line(&line, &client.node_id().0) {
                            None => break,
                            Some(Some(Frame::CreateChat { name })) => client.create_chat(name).await,
                            Some(Some(Frame::JoinChat { chat_id })) => client.join_chat(chat_id).await,
                            Some(Some(Frame::SendChatMessage { chat_id, message_text, .. })) => {
                                client.send_chat_message(chat_id, message_text).await
                            }
                            Some(Some(_)) | Some(None) => {
                                if line.trim() == "/chats" {
                                    print_chats(&client).await;
                                }
                            }
                        }
                    }
                    _ => break,
                }
            }
            event = events.recv() => {
                match event {
                    Some(ClientEvent::Message(m)) => println!("[{}] {}: {}", m.chat_id, m.sender_alias, m.text),
                    Some(ClientEvent::ChatAvailable { chat_id, name }) => println!("chat available: {name} ({chat_id})"),
                    Some(ClientEvent::UserJoined { chat_id, node_id }) => println!("{node_id} joined {chat_id}"),
                    Some(ClientEvent::HubClosed) | None => {
                        println!("hub closed the connection");
                        break;
                    }
                }
            }
        }
    }
    Ok(())
}

async fn print_chats(client: &Client) {
    match client.get_chats().await {
        Ok(chats) => {
            for c in chats {
                println!("{} — {}", c.chat_id, c.name);
            }
        }
        Err(e) => println!("could not list chats: {e}"),
    }
}

fn print_repl_help() {
    println!("commands: /create <name>  /join <chat_id>  /send <chat_id> <text>  /chats  /quit");
    std::io::stdout().flush().ok();
}

fn print_local_event(event: LocalEvent) {
    match event {
        LocalEvent::Message { chat_id, sender_alias, text } => println!("[{chat_id}] {sender_alias}: {text}"),
        LocalEvent::ChatAvailable { chat_id, name } => println!("chat available: {name} ({chat_id})"),
        LocalEvent::UserJoined { chat_id, node_id } => println!("{node_id} joined {chat_id}"),
        LocalEvent::ChatList { chats } => {
            for c in chats {
                println!("{} — {}", c.chat_id, c.name);
            }
        }
    }
}

/// Parse one REPL line into the frame it should produce. `None` (outer)
/// means end the session (`/quit` or EOF); `Some(None)` means the line
/// produced no frame (empty, unrecognized, or a query like `/chats` handled
/// by its caller); `Some(Some(frame))` is a command to act on.
fn parse_repl_line(line: &str, self_node_id: &str) -> Option<Option<Frame>> {
    let line = line.trim();
    if line == "/quit" {
        return None;
    }
    if let Some(name) = line.strip_prefix("/create ") {
        return Some(Some(Frame::CreateChat { name: name.trim().to_string() }));
    }
    if let Some(chat_id) = line.strip_prefix("/join ") {
        return Some(Some(Frame::JoinChat { chat_id: chat_id.trim().to_string() }));
    }
    if let Some(rest) = line.strip_prefix("/send ") {
        return match rest.split_once(' ') {
            Some((chat_id, text)) => Some(Some(Frame::SendChatMessage {
                chat_id: chat_id.to_string(),
                node_id: self_node_id.to_string(),
                message_text: text.to_string(),
                timestamp: melq::types::room::now_millis(),
            })),
            None => {
                println!("usage: /send <chat_id> <text>");
                Some(None)
            }
        };
    }
    if !line.is_empty() && line != "/chats" {
        println!("unrecognized command: {line}");
    }
    Some(None)
}

async fn run_discover(timeout_secs: u64) -> anyhow::Result<()> {
    let replies = discovery::probe(std::time::Duration::from_secs(timeout_secs)).await?;
    if replies.is_empty() {
        println!("no hubs found");
    }
    for r in replies {
        println!("{} ({}) — {}", r.network_name, r.node_id, r.connection_code);
    }
    Ok(())
}
