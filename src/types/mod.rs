pub mod connection;
pub mod node_id;
pub mod peer_key;
pub mod room;

pub use connection::ConnectedNode;
pub use node_id::NodeId;
pub use peer_key::{Initiate, LookupOwned, PeerKeyTable};
pub use room::{ChatRoom, MessageRecord};
