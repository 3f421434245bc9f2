//! Thin HTTP surface over the ledger and the peer network.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ledger_core::{Block, LedgerError, MiningStrategy, SharedLedger, Transaction};
use ledger_p2p::{NetworkError, PeerNetwork};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) node_id: String,
    pub(crate) ledger: SharedLedger,
    pub(crate) network: PeerNetwork,
    pub(crate) strategy: MiningStrategy,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TxIn {
    from_address: String,
    to_address: String,
    amount: i64,
    #[serde(default)]
    payload: Option<Value>,
}

impl From<TxIn> for Transaction {
    fn from(tx: TxIn) -> Self {
        Transaction {
            from_address: Some(tx.from_address),
            to_address: tx.to_address,
            amount: tx.amount,
            payload: tx.payload,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MineIn {
    mining_reward_address: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectIn {
    peer_address: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChainOut {
    chain: Vec<Block>,
    is_valid: bool,
    difficulty: u32,
    mining_reward: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NodeInfo {
    node_id: String,
    peers: usize,
    chain_length: usize,
    pending_transactions: usize,
}

pub(crate) struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        let status = match err {
            LedgerError::InvalidTransaction(_) => StatusCode::BAD_REQUEST,
            LedgerError::MiningConflict { .. } | LedgerError::MiningCancelled => StatusCode::CONFLICT,
            LedgerError::InvalidBlock { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<NetworkError> for ApiError {
    fn from(err: NetworkError) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: err.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
        }
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(Health { status: "ok" }) }))
        .route("/chain", get(chain))
        .route("/pending", get(pending))
        .route("/payments", post(create_payment))
        .route("/transactions", post(submit_transaction))
        .route("/mine", post(mine))
        .route("/balance/{address}", get(balance))
        .route("/wallet/{address}/transactions", get(wallet_transactions))
        .route("/peers", get(peers))
        .route("/connect-node", post(connect_node))
        .route("/sync", post(sync))
        .route("/node-info", get(node_info))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn chain(State(state): State<AppState>) -> Json<ChainOut> {
    let out = state.ledger.read(|ledger| ChainOut {
        chain: ledger.chain().to_vec(),
        is_valid: ledger.is_chain_valid(),
        difficulty: ledger.difficulty(),
        mining_reward: ledger.mining_reward(),
    });
    Json(out)
}

async fn pending(State(state): State<AppState>) -> Json<Vec<Transaction>> {
    Json(state.ledger.pending_transactions())
}

/// Unvalidated enqueue, kept local.
async fn create_payment(State(state): State<AppState>, Json(tx): Json<TxIn>) -> Json<Value> {
    let tx = Transaction::from(tx);
    state.ledger.create_transaction(tx.clone());
    Json(json!({ "message": "Transaction queued", "transaction": tx }))
}

async fn submit_transaction(State(state): State<AppState>, Json(tx): Json<TxIn>) -> ApiResult<Value> {
    let tx = Transaction::from(tx);
    state.ledger.add_transaction(tx.clone())?;
    let peers = state.network.broadcast_transaction(tx.clone())?;
    Ok(Json(json!({
        "message": "Transaction added and broadcasted",
        "transaction": tx,
        "peers": peers,
    })))
}

async fn mine(State(state): State<AppState>, Json(req): Json<MineIn>) -> ApiResult<Value> {
    if req.mining_reward_address.is_empty() {
        return Err(ApiError::bad_request("miningRewardAddress is required"));
    }
    let ledger = state.ledger.clone();
    let strategy = state.strategy;
    let block = tokio::task::spawn_blocking(move || {
        ledger.mine_pending_transactions(&req.mining_reward_address, strategy)
    })
    .await??;

    let peers = state.network.broadcast_chain()?;
    state.network.broadcast_clear_transactions()?;
    if peers == 0 {
        info!(index = block.index, "no peers to broadcast to");
    } else {
        info!(index = block.index, peers, "broadcasted new chain");
    }
    Ok(Json(json!({
        "message": "Block mined successfully and broadcasted",
        "block": block,
        "peers": peers,
    })))
}

async fn balance(State(state): State<AppState>, Path(address): Path<String>) -> Json<Value> {
    let balance = state.ledger.balance_of_address(&address);
    // Clamped to i64 for JSON clients.
    Json(json!({ "address": address, "balance": i64::try_from(balance).unwrap_or(i64::MAX) }))
}

async fn wallet_transactions(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Json<Vec<Transaction>> {
    Json(state.ledger.transactions_for_wallet(&address))
}

async fn peers(State(state): State<AppState>) -> Json<Value> {
    let connected: Vec<String> = state
        .network
        .peers()
        .into_iter()
        .map(|(_, address)| address)
        .collect();
    Json(json!({
        "peers": state.network.known_addresses(),
        "connected": connected,
    }))
}

async fn connect_node(State(state): State<AppState>, Json(req): Json<ConnectIn>) -> ApiResult<Value> {
    if req.peer_address.is_empty() {
        return Err(ApiError::bad_request("Invalid peer address"));
    }
    if state.network.known_addresses().contains(&req.peer_address) {
        return Err(ApiError::bad_request("Peer already known"));
    }
    if let Err(e) = state.network.connect(&req.peer_address).await {
        warn!(peer = %req.peer_address, error = %e, "failed to connect to peer");
        return Err(e.into());
    }
    Ok(Json(json!({ "message": "Connected to peer", "peer": req.peer_address })))
}

async fn sync(State(state): State<AppState>) -> ApiResult<Value> {
    let peers = state.network.broadcast_chain()?;
    Ok(Json(json!({ "message": "Blockchain sync initiated", "peers": peers })))
}

async fn node_info(State(state): State<AppState>) -> Json<NodeInfo> {
    Json(NodeInfo {
        node_id: state.node_id.clone(),
        peers: state.network.connection_count(),
        chain_length: state.ledger.chain_len(),
        pending_transactions: state.ledger.pending_transactions().len(),
    })
}
