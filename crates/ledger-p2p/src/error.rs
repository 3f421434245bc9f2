use crate::network::ConnectionId;

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection limit of {0} reached")]
    ConnectionLimit(usize),

    #[error("connection {0} is closed")]
    Closed(ConnectionId),
}
