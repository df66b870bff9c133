use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use bc_chain::{Ledger, SimpleExecutiveContext};
use bc_network::Session;
use bc_primitives::NodeId;
use bc_store::{SledStorage, TableFactory};
use bc_sync::{SyncEngine, SyncHost, SyncMessageFactory};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

use crate::config::{NodeConfig, PeerBoot};

/// Opens the store (building genesis if absent), starts listening, dials
/// configured boot peers, and runs the sync engine until the process is
/// killed.
pub async fn run(home: &Path, mut config: NodeConfig, listen_override: Option<String>) -> Result<()> {
    if let Some(listen) = listen_override {
        config.network.listen_addr = listen;
    }

    let store_path = home.join(&config.store_path);
    let storage = SledStorage::open(&store_path)
        .with_context(|| format!("failed to open store at {}", store_path.display()))?;
    let factory = TableFactory::new(storage);
    let ledger = Arc::new(Ledger::new(factory.clone()));

    let mut genesis_param = config.genesis.clone().into_param();
    if ledger.check_and_build_genesis_block(&mut genesis_param)? {
        info!(target: "node", "built genesis block");
    } else {
        info!(target: "node", "genesis block already present");
    }

    let exec_ctx = Arc::new(SimpleExecutiveContext::new(factory));
    let tx_pool = Arc::new(bc_node_tx_pool::InMemoryTxPool::default());
    let self_id = config.network.node_id;
    let engine = SyncEngine::new(self_id, ledger, exec_ctx, tx_pool, config.sync.clone().into());

    let listener = TcpListener::bind(&config.network.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.network.listen_addr))?;
    info!(target: "node", addr = %config.network.listen_addr, "listening");

    let accept_engine = engine.clone();
    tokio::spawn(accept_loop(listener, accept_engine, self_id));

    for peer in config.network.boot_peers.clone() {
        let engine = engine.clone();
        tokio::spawn(dial_peer(peer, engine, self_id));
    }

    let worker_engine = engine.clone();
    let worker_handle = std::thread::spawn(move || worker_engine.run());
    let mut worker_exit = Box::pin(tokio::task::spawn_blocking(move || worker_handle.join()));
    let mut ctrl_c = Box::pin(tokio::signal::ctrl_c());

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result.context("failed to wait for ctrl-c")?;
                info!(target: "node", "shutting down");
                engine.stop();
                let _ = (&mut worker_exit).await;
                break;
            }
            _ = &mut worker_exit => {
                if engine.stopped_fatally() {
                    error!(target: "node", "sync engine stopped on a fatal error, exiting");
                    std::process::exit(1);
                }
                warn!(target: "node", "sync engine worker exited unexpectedly");
                break;
            }
        }
    }
    Ok(())
}

async fn accept_loop(listener: TcpListener, engine: Arc<SyncEngine>, self_id: NodeId) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(target: "node", %err, "accept failed");
                continue;
            }
        };
        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(err) = accept_one(stream, engine, self_id).await {
                warn!(target: "node", %err, %addr, "inbound handshake failed");
            }
        });
    }
}

async fn accept_one(mut stream: TcpStream, engine: Arc<SyncEngine>, self_id: NodeId) -> Result<()> {
    let peer_id = handshake(&mut stream, self_id).await?;
    spawn_session(stream, peer_id, engine);
    Ok(())
}

async fn dial_peer(peer: PeerBoot, engine: Arc<SyncEngine>, self_id: NodeId) {
    match TcpStream::connect(&peer.addr).await {
        Ok(mut stream) => match handshake(&mut stream, self_id).await {
            Ok(peer_id) => {
                if peer_id != peer.node_id {
                    warn!(target: "node", expected = %peer.node_id, got = %peer_id, "boot peer presented an unexpected node id");
                    return;
                }
                spawn_session(stream, peer_id, engine);
            }
            Err(err) => warn!(target: "node", %err, peer = %peer, "handshake with boot peer failed"),
        },
        Err(err) => warn!(target: "node", %err, peer = %peer, "failed to dial boot peer"),
    }
}

/// Exchanges raw node ids before handing the stream to the sync protocol's
/// own framing; lets `SyncHost` reject a peer that turns out to be this
/// node without waiting for a Status packet.
async fn handshake(stream: &mut TcpStream, self_id: NodeId) -> Result<NodeId> {
    let (mut read_half, mut write_half) = stream.split();
    let mut peer_bytes = [0u8; NodeId::LEN];
    let (write_result, read_result) = tokio::join!(
        write_half.write_all(self_id.as_bytes()),
        read_half.read_exact(&mut peer_bytes)
    );
    write_result.context("failed to send node id")?;
    read_result.context("failed to read peer node id")?;
    Ok(NodeId(peer_bytes))
}

fn spawn_session(stream: TcpStream, peer_id: NodeId, engine: Arc<SyncEngine>) {
    let session = Session::spawn(stream, SyncMessageFactory);
    engine.register_peer(peer_id, session.clone());
    let host = Arc::new(SyncHost { peer: peer_id, engine, session: session.clone() });
    session.start(host);
}

mod bc_node_tx_pool {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use bc_primitives::{Hash, Transaction};
    use bc_sync::{ImportError, TxPool};

    /// Minimal in-process pool: no admission policy, no persistence.
    /// Transactions a client submits or a peer gossips are held until the
    /// sync engine picks them up for broadcast; nothing ever expires them.
    /// A real admission policy (fee checks, nonce ordering, eviction) is
    /// out of scope here.
    #[derive(Default)]
    pub struct InMemoryTxPool {
        transactions: Mutex<Vec<Transaction>>,
    }

    impl TxPool for InMemoryTxPool {
        fn pending(&self, limit: usize, exclude: &HashSet<Hash>) -> Vec<Transaction> {
            self.transactions
                .lock()
                .unwrap()
                .iter()
                .filter(|tx| !exclude.contains(&tx.sha3()))
                .take(limit)
                .cloned()
                .collect()
        }

        fn import(&self, transaction: Transaction) -> Result<(), ImportError> {
            let mut guard = self.transactions.lock().unwrap();
            if guard.iter().any(|tx| tx.sha3() == transaction.sha3()) {
                return Err(ImportError::AlreadyKnown);
            }
            guard.push(transaction);
            Ok(())
        }
    }
}
