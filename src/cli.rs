//! Command-line surface: mutually exclusive `host` / `join` /
//! `discover` subcommands.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "melq", about = "Post-quantum end-to-end-encrypted group chat")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start a hub and join it as its own operator.
    Host {
        /// Expose the hub beyond the LAN via a tunnel.
        #[arg(long)]
        internet: bool,
        /// Skip LAN discovery advertising.
        #[arg(long)]
        local_only: bool,
        /// Require this password from joining clients.
        #[arg(long)]
        password: Option<String>,
        /// Tunnel method to use when `--internet` is set.
        #[arg(long, default_value = "manual")]
        tunnel: String,
        /// TCP port to listen on before port-contention probing.
        #[arg(long, default_value_t = melq::DEFAULT_PORT)]
        port: u16,
    },
    /// Join an existing hub by connection code.
    Join {
        /// `melq://…`, `https://…`, `http://…`, `host:port`, or a bare domain.
        code: String,
    },
    /// Probe the LAN for advertising hubs.
    Discover {
        /// How long to wait for replies, in seconds.
        #[arg(long, default_value_t = 3)]
        timeout_secs: u64,
    },
}
