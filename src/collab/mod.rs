//! External-interface collaborators: tunnel exposure, LAN
//! discovery, and password I/O. The session core only depends on these
//! through narrow contracts, never on how a concrete implementation gets
//! its answer.

pub mod discovery;
pub mod password_io;
pub mod tunnel;

pub use discovery::DiscoveryAnnouncement;
pub use password_io::{PasswordIo, StdinPasswordIo};
pub use tunnel::{ManualTunnel, Tunnel, TunnelInfo};
