mod api;
mod constants;

use crate::api::AppState;
use crate::constants::{DEFAULT_HTTP_LISTEN, DEFAULT_P2P_LISTEN, NODE_ID_BYTES};
use clap::Parser;
use ledger_core::{Ledger, LedgerConfig, MiningStrategy, SharedLedger};
use ledger_p2p::{NetworkConfig, PeerNetwork};
use ledger_storage::SledStore;
use rand::RngCore;
use std::{net::SocketAddr, sync::Arc};
use tracing::{info, Level};

#[derive(Parser, Debug)]
struct Args {
    /// HTTP address to listen on, e.g. 127.0.0.1:8080
    #[arg(long, default_value = DEFAULT_HTTP_LISTEN)]
    listen: String,

    /// P2P (WebSocket) address to listen on
    #[arg(long, default_value = DEFAULT_P2P_LISTEN)]
    p2p_listen: String,

    /// Address peers should dial to reach this node, e.g. ws://192.168.1.20:6001
    #[arg(long)]
    advertise: Option<String>,

    /// Peers to dial at startup, e.g. ws://127.0.0.1:6002
    #[arg(long, value_delimiter = ',')]
    peers: Vec<String>,

    /// Leading zero hex digits a block hash needs
    #[arg(long, default_value_t = LedgerConfig::default().difficulty)]
    difficulty: u32,

    /// Amount issued to the miner of each block
    #[arg(long, default_value_t = LedgerConfig::default().mining_reward, value_parser = clap::value_parser!(i64).range(0..))]
    mining_reward: i64,

    /// Cap on live peer connections
    #[arg(long, default_value_t = NetworkConfig::default().max_connections)]
    max_connections: usize,

    /// Frames queued per peer before a slow peer is dropped
    #[arg(long, default_value_t = NetworkConfig::default().outbox_capacity)]
    outbox_capacity: usize,

    /// Search nonces on every core instead of one
    #[arg(long)]
    parallel_mining: bool,

    /// Data directory for sled; the chain lives in memory only when absent
    #[arg(long)]
    data_dir: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut ledger = SharedLedger::new(Ledger::new(LedgerConfig {
        difficulty: args.difficulty,
        mining_reward: args.mining_reward,
    }));
    if let Some(dir) = &args.data_dir {
        let store = Arc::new(SledStore::open(dir)?);
        ledger = ledger.with_store(store);
        ledger.restore_from_store()?;
    }

    let network = PeerNetwork::new(
        ledger.clone(),
        NetworkConfig {
            advertised_address: args.advertise.clone(),
            max_connections: args.max_connections,
            outbox_capacity: args.outbox_capacity,
        },
    );
    let p2p_addr = network.listen(&args.p2p_listen).await?;
    network.connect_to_peers(args.peers.iter().cloned());

    let mut id = [0u8; NODE_ID_BYTES];
    rand::thread_rng().fill_bytes(&mut id);
    let state = AppState {
        node_id: hex::encode(id),
        ledger: ledger.clone(),
        network,
        strategy: if args.parallel_mining {
            MiningStrategy::Parallel
        } else {
            MiningStrategy::Sequential
        },
    };

    let app = api::router(state);
    let addr: SocketAddr = args.listen.parse()?;
    info!(
        http = %addr,
        p2p = %p2p_addr,
        chain_length = ledger.chain_len(),
        "ledger-node listening"
    );
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    ledger.cancel_mining();
    info!("ledger-node stopped");
    Ok(())
}
