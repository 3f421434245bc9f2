use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "ledger-cli")]
#[command(about = "CLI client for the replicated ledger node")]
struct Cli {
    /// Node base URL (e.g. http://127.0.0.1:8080)
    #[arg(long, global = true, default_value = "http://127.0.0.1:8080")]
    node: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a validated transaction and broadcast it to peers
    Submit {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: i64,
    },
    /// Queue a transaction locally without validation
    Pay {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: i64,
    },
    /// Mine the pending transactions, rewarding ADDRESS
    Mine { address: String },
    /// Balance of ADDRESS
    Balance { address: String },
    /// Every transaction touching ADDRESS
    History { address: String },
    /// Full chain and its validity
    Chain,
    /// Pending transaction queue
    Pending,
    /// Known peer addresses
    Peers,
    /// Dial a peer, e.g. ws://127.0.0.1:6002
    Connect { peer: String },
    /// Broadcast the local chain to every peer
    Sync,
    /// Node id, peer count and queue sizes
    Info,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TxOut {
    from_address: String,
    to_address: String,
    amount: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .pretty()
        .init();

    let cli = Cli::parse();
    let node = cli.node.trim_end_matches('/');
    let client = reqwest::Client::new();

    let request = match cli.cmd {
        Command::Submit { from, to, amount } => client
            .post(format!("{node}/transactions"))
            .json(&TxOut { from_address: from, to_address: to, amount }),
        Command::Pay { from, to, amount } => client
            .post(format!("{node}/payments"))
            .json(&TxOut { from_address: from, to_address: to, amount }),
        Command::Mine { address } => client
            .post(format!("{node}/mine"))
            .json(&serde_json::json!({ "miningRewardAddress": address })),
        Command::Balance { address } => client.get(format!("{node}/balance/{address}")),
        Command::History { address } => {
            client.get(format!("{node}/wallet/{address}/transactions"))
        }
        Command::Chain => client.get(format!("{node}/chain")),
        Command::Pending => client.get(format!("{node}/pending")),
        Command::Peers => client.get(format!("{node}/peers")),
        Command::Connect { peer } => client
            .post(format!("{node}/connect-node"))
            .json(&serde_json::json!({ "peerAddress": peer })),
        Command::Sync => client.post(format!("{node}/sync")),
        Command::Info => client.get(format!("{node}/node-info")),
    };

    let res = request.send().await?;
    let status = res.status();
    debug!(%status, "node responded");
    let body: Value = res.json().await?;
    println!("status: {}", status);
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
