use crate::constants::{ACCEPT_BACKOFF, DEFAULT_MAX_CONNECTIONS, DEFAULT_OUTBOX_CAPACITY};
use crate::{NetworkError, PeerMessage};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use ledger_core::{SharedLedger, Transaction};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

pub type ConnectionId = u64;

#[derive(Clone, Debug)]
pub struct NetworkConfig {
    /// Address other nodes should dial to reach us, e.g. `ws://10.0.0.5:6001`.
    /// Shared in every nodelist, never dialled.
    pub advertised_address: Option<String>,
    pub max_connections: usize,
    /// Per-peer send queue. A peer whose queue fills up is dropped.
    pub outbox_capacity: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            advertised_address: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
        }
    }
}

struct Peer {
    address: String,
    outbox: mpsc::Sender<Message>,
}

struct Inner {
    ledger: SharedLedger,
    config: NetworkConfig,
    connections: Mutex<HashMap<ConnectionId, Peer>>,
    known: Mutex<BTreeSet<String>>,
    next_id: AtomicU64,
}

/// Live peer connections plus the gossiped address book.
///
/// Every connection gets a writer task fed by a bounded outbox and a reader
/// task that dispatches inbound messages onto the shared ledger. A failure on
/// one connection drops that connection and nothing else.
#[derive(Clone)]
pub struct PeerNetwork {
    inner: Arc<Inner>,
}

impl PeerNetwork {
    pub fn new(ledger: SharedLedger, config: NetworkConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                ledger,
                config,
                connections: Mutex::new(HashMap::new()),
                known: Mutex::new(BTreeSet::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn ledger(&self) -> &SharedLedger {
        &self.inner.ledger
    }

    /// Binds and starts accepting peers in the background. Returns the bound address.
    pub async fn listen(&self, addr: impl ToSocketAddrs) -> Result<SocketAddr, NetworkError> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        info!(%local, "p2p server listening");
        tokio::spawn(self.clone().accept_loop(listener));
        Ok(local)
    }

    async fn accept_loop(self, listener: TcpListener) {
        loop {
            let (stream, remote) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "failed to accept p2p connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            let network = self.clone();
            tokio::spawn(async move {
                let ws = match tokio_tungstenite::accept_async(stream).await {
                    Ok(ws) => ws,
                    Err(e) => {
                        warn!(%remote, error = %e, "websocket handshake failed");
                        return;
                    }
                };
                if let Err(e) = network.on_connect(ws, remote.to_string()) {
                    warn!(%remote, error = %e, "refused inbound peer");
                }
            });
        }
    }

    /// Dials one peer and runs the connect sequence on success.
    pub async fn connect(&self, address: &str) -> Result<ConnectionId, NetworkError> {
        let max = self.inner.config.max_connections;
        if self.connection_count() >= max {
            return Err(NetworkError::ConnectionLimit(max));
        }
        let (ws, _response) = tokio_tungstenite::connect_async(address).await?;
        let id = self.on_connect(ws, address.to_string())?;
        self.inner.known.lock().insert(address.to_string());
        Ok(id)
    }

    /// Fire-and-forget version of [`PeerNetwork::connect`]. Failures are logged, never retried.
    pub fn connect_to_peers<I, S>(&self, addresses: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for address in addresses {
            let address = address.into();
            let network = self.clone();
            tokio::spawn(async move {
                if let Err(e) = network.connect(&address).await {
                    warn!(peer = %address, error = %e, "failed to connect to peer");
                }
            });
        }
    }

    pub fn broadcast_chain(&self) -> Result<usize, NetworkError> {
        let chain = self.inner.ledger.chain();
        self.broadcast(&PeerMessage::Chain { chain })
    }

    pub fn broadcast_transaction(&self, transaction: Transaction) -> Result<usize, NetworkError> {
        self.broadcast(&PeerMessage::Transaction { transaction })
    }

    pub fn broadcast_clear_transactions(&self) -> Result<usize, NetworkError> {
        self.broadcast(&PeerMessage::ClearTransactions)
    }

    /// Queues `message` on every live connection and returns how many took it.
    pub fn broadcast(&self, message: &PeerMessage) -> Result<usize, NetworkError> {
        let frame = Message::Text(message.to_json()?);
        let mut dead = Vec::new();
        let mut sent = 0;
        {
            let connections = self.inner.connections.lock();
            for (id, peer) in connections.iter() {
                match peer.outbox.try_send(frame.clone()) {
                    Ok(()) => sent += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(connection = *id, "peer outbox full, dropping peer");
                        dead.push(*id);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        warn!(connection = *id, "peer outbox closed, dropping peer");
                        dead.push(*id);
                    }
                }
            }
        }
        for id in dead {
            self.drop_connection(id);
        }
        debug!(kind = message.kind(), peers = sent, "broadcast");
        Ok(sent)
    }

    pub fn send_to(&self, id: ConnectionId, message: &PeerMessage) -> Result<(), NetworkError> {
        let frame = Message::Text(message.to_json()?);
        let connections = self.inner.connections.lock();
        let peer = connections.get(&id).ok_or(NetworkError::Closed(id))?;
        peer.outbox.try_send(frame).map_err(|_| NetworkError::Closed(id))
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.lock().len()
    }

    /// `(id, remote address)` for each live connection.
    pub fn peers(&self) -> Vec<(ConnectionId, String)> {
        let mut peers: Vec<_> = self
            .inner
            .connections
            .lock()
            .iter()
            .map(|(id, peer)| (*id, peer.address.clone()))
            .collect();
        peers.sort();
        peers
    }

    pub fn known_addresses(&self) -> Vec<String> {
        self.inner.known.lock().iter().cloned().collect()
    }

    fn nodelist(&self) -> PeerMessage {
        let mut nodes: BTreeSet<String> = self.inner.known.lock().clone();
        if let Some(own) = &self.inner.config.advertised_address {
            nodes.insert(own.clone());
        }
        PeerMessage::Nodelist {
            nodes: nodes.into_iter().collect(),
        }
    }

    /// Registers the socket, greets it with our nodelist and chain, then starts its tasks.
    fn on_connect<S>(&self, ws: WebSocketStream<S>, address: String) -> Result<ConnectionId, NetworkError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let greeting = [
            Message::Text(self.nodelist().to_json()?),
            Message::Text(
                PeerMessage::Chain {
                    chain: self.inner.ledger.chain(),
                }
                .to_json()?,
            ),
        ];

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let capacity = self.inner.config.outbox_capacity.max(greeting.len());
        let (outbox, rx) = mpsc::channel(capacity);
        for frame in greeting {
            outbox.try_send(frame).map_err(|_| NetworkError::Closed(id))?;
        }
        {
            let mut connections = self.inner.connections.lock();
            let max = self.inner.config.max_connections;
            if connections.len() >= max {
                return Err(NetworkError::ConnectionLimit(max));
            }
            connections.insert(
                id,
                Peer {
                    address: address.clone(),
                    outbox,
                },
            );
        }
        info!(connection = id, peer = %address, "peer connected");

        let (sink, stream) = ws.split();
        tokio::spawn(self.clone().write_loop(id, sink, rx));
        tokio::spawn(self.clone().read_loop(id, stream));
        Ok(id)
    }

    async fn write_loop<S>(
        self,
        id: ConnectionId,
        mut sink: SplitSink<WebSocketStream<S>, Message>,
        mut rx: mpsc::Receiver<Message>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = sink.send(frame).await {
                warn!(connection = id, error = %e, "send failed, dropping peer");
                break;
            }
        }
        self.drop_connection(id);
        let _ = sink.close().await;
    }

    async fn read_loop<S>(self, id: ConnectionId, mut stream: SplitStream<WebSocketStream<S>>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        while let Some(frame) = stream.next().await {
            let bytes = match frame {
                Ok(Message::Text(text)) => text.into_bytes(),
                Ok(Message::Binary(bytes)) => bytes,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    warn!(connection = id, error = %e, "socket error");
                    break;
                }
            };
            match PeerMessage::from_slice(&bytes) {
                Ok(message) => self.handle_message(id, message).await,
                Err(e) => {
                    warn!(connection = id, error = %e, "malformed peer message, dropping peer");
                    break;
                }
            }
        }
        self.drop_connection(id);
    }

    async fn handle_message(&self, id: ConnectionId, message: PeerMessage) {
        debug!(connection = id, kind = message.kind(), "peer message");
        let ledger = &self.inner.ledger;
        match message {
            PeerMessage::Chain { chain } => {
                // Validation and the store rewrite block, so they run off the reactor.
                let length = chain.len();
                let syncing = ledger.clone();
                match tokio::task::spawn_blocking(move || syncing.force_sync(chain)).await {
                    Ok(true) => info!(connection = id, length, "chain synced"),
                    Ok(false) => {}
                    Err(e) => warn!(connection = id, error = %e, "chain sync task failed"),
                }
            }
            PeerMessage::Transaction { transaction } => {
                if let Err(e) = ledger.add_transaction(transaction) {
                    warn!(connection = id, error = %e, "rejected peer transaction");
                }
            }
            PeerMessage::Nodelist { nodes } => self.discover(nodes),
            PeerMessage::ClearTransactions => ledger.clear_pending_transactions(),
        }
    }

    /// Merges `nodes` into the known set and dials each address seen for the first time.
    fn discover(&self, nodes: Vec<String>) {
        let own = self.inner.config.advertised_address.as_deref();
        let fresh: Vec<String> = {
            let mut known = self.inner.known.lock();
            nodes
                .into_iter()
                .filter(|node| Some(node.as_str()) != own && known.insert(node.clone()))
                .collect()
        };
        for node in &fresh {
            info!(peer = %node, "discovered peer");
        }
        self.connect_to_peers(fresh);
    }

    fn drop_connection(&self, id: ConnectionId) {
        if let Some(peer) = self.inner.connections.lock().remove(&id) {
            info!(connection = id, peer = %peer.address, "peer disconnected");
        }
    }
}
