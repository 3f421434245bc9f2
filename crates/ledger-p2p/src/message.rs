use crate::NetworkError;
use ledger_core::{Block, Transaction};
use serde::{Deserialize, Serialize};

/// Everything peers say to each other. One JSON object per WebSocket frame,
/// tagged by its `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PeerMessage {
    /// Full chain offered for consensus evaluation.
    Chain { chain: Vec<Block> },
    /// Submitted for validated enqueue.
    Transaction { transaction: Transaction },
    /// Peer addresses to merge into the known set.
    Nodelist { nodes: Vec<String> },
    /// Empty the pending queue.
    ClearTransactions,
}

impl PeerMessage {
    pub fn to_json(&self) -> Result<String, NetworkError> {
        serde_json::to_string(self).map_err(NetworkError::Serialization)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, NetworkError> {
        serde_json::from_slice(bytes).map_err(NetworkError::Serialization)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PeerMessage::Chain { .. } => "chain",
            PeerMessage::Transaction { .. } => "transaction",
            PeerMessage::Nodelist { .. } => "nodelist",
            PeerMessage::ClearTransactions => "clear-transactions",
        }
    }
}
