pub mod constants;
pub mod error;
pub mod message;
pub mod network;

pub use error::NetworkError;
pub use message::PeerMessage;
pub use network::{ConnectionId, NetworkConfig, PeerNetwork};
