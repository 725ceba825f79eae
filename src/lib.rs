//! melq — a post-quantum end-to-end-encrypted group chat hub and client.
//!
//! A node either runs as a `Hub` (accepting connections from other nodes and
//! relaying their frames) or as a `Client` (opening one connection to a hub).
//! The hub also drives its own in-process client so the operator can chat
//! through the same surface as any remote joiner.

pub mod client;
pub mod collab;
pub mod crypto;
pub mod error;
pub mod frame;
pub mod hub;
pub mod types;

pub use error::{SessionError, SessionResult};

/// Default TCP port the hub listens on before port-contention probing.
pub const DEFAULT_PORT: u16 = 42045;

/// Number of successive ports probed after `DEFAULT_PORT` (or a requested
/// port) is found busy.
pub const PORT_PROBE_RANGE: u16 = 50;

/// Fixed UDP port the LAN discovery responder listens on.
pub const DISCOVERY_PORT: u16 = 42046;

/// Fixed associated data shared by both sides of every AEAD seal/open.
pub const AEAD_ASSOCIATED_DATA: &[u8] = b"melq-v1-frame";

/// Interval between client keepalive pings while OPERATIONAL.
pub const PING_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

/// Minimum spacing between successive key-exchange initiations on a busy
/// `node_list`, so a many-peer join doesn't burst CPU on KEM operations.
pub const KEY_EXCHANGE_SPACING: std::time::Duration = std::time::Duration::from_millis(500);

/// Debug trace macro — compiled out entirely unless the `logging` feature is
/// enabled, keeping hot per-frame tracing out of release builds by default.
#[macro_export]
macro_rules! debug_println {
    ($($arg:tt)*) => {
        #[cfg(feature = "logging")]
        {
            log::debug!($($arg)*);
        }
    };
}

/// Install the `env_logger` backend for the `log` facade. Call once from
/// each binary entry point.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
