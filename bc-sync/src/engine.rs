use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bc_chain::{ExecutiveContext, Ledger};
use bc_network::{DisconnectReason, Host, SendOptions, Session};
use bc_primitives::{Hash, NodeId};
use parking_lot::{Condvar, Mutex};
use rand::seq::SliceRandom;
use tracing::{debug, error, info, warn};

use crate::error::SyncError;
use crate::packet::{PacketBody, SyncMessage};
use crate::tx_pool::TxPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Downloading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPeerStatus {
    pub node_id: NodeId,
    pub height: i64,
    pub genesis_hash: Hash,
    pub latest_hash: Hash,
}

#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    pub idle_wait_ms: u64,
    pub max_send_transactions: usize,
    pub max_payload: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { idle_wait_ms: 200, max_send_transactions: 256, max_payload: 1024 * 1024 }
    }
}

struct PeerHandle {
    session: Session<SyncMessage>,
    status: Option<SyncPeerStatus>,
    known_txs: HashSet<Hash>,
}

/// Cooperative per-tick loop (§4.F): gossips transactions and status when
/// idle, drains a download queue of blocks when catching up.
pub struct SyncEngine {
    self_node_id: NodeId,
    ledger: Arc<Ledger>,
    exec_ctx: Arc<dyn ExecutiveContext + Send + Sync>,
    tx_pool: Arc<dyn TxPool>,
    config: SyncConfig,

    state: Mutex<SyncState>,
    peers: Mutex<HashMap<NodeId, PeerHandle>>,
    tx_sent: Mutex<HashSet<Hash>>,
    download_queue: Mutex<BTreeMap<i64, bc_primitives::Block>>,
    known_highest_number: AtomicI64,

    new_transactions: AtomicBool,
    new_blocks: AtomicBool,
    stop: AtomicBool,
    fatal: AtomicBool,
    wake: Condvar,
    wake_mutex: Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        self_node_id: NodeId,
        ledger: Arc<Ledger>,
        exec_ctx: Arc<dyn ExecutiveContext + Send + Sync>,
        tx_pool: Arc<dyn TxPool>,
        config: SyncConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            self_node_id,
            ledger,
            exec_ctx,
            tx_pool,
            config,
            state: Mutex::new(SyncState::Idle),
            peers: Mutex::new(HashMap::new()),
            tx_sent: Mutex::new(HashSet::new()),
            download_queue: Mutex::new(BTreeMap::new()),
            known_highest_number: AtomicI64::new(0),
            new_transactions: AtomicBool::new(false),
            new_blocks: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            fatal: AtomicBool::new(false),
            wake: Condvar::new(),
            wake_mutex: Mutex::new(()),
        })
    }

    pub fn register_peer(&self, node_id: NodeId, session: Session<SyncMessage>) {
        self.peers.lock().insert(node_id, PeerHandle { session, status: None, known_txs: HashSet::new() });
    }

    pub fn remove_peer(&self, node_id: &NodeId) {
        self.peers.lock().remove(node_id);
    }

    pub fn state(&self) -> SyncState {
        *self.state.lock()
    }

    /// Called by the committer/tx-pool side to wake the worker.
    pub fn notify_new_transactions(&self) {
        self.new_transactions.store(true, Ordering::SeqCst);
        self.wake.notify_all();
    }

    pub fn notify_new_blocks(&self) {
        self.new_blocks.store(true, Ordering::SeqCst);
        self.wake.notify_all();
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.wake.notify_all();
    }

    /// Whether the worker loop stopped itself because of a fatal error,
    /// as opposed to an external `stop()` call. Checked by the embedder
    /// after the worker thread exits to decide whether to bring the
    /// process down.
    pub fn stopped_fatally(&self) -> bool {
        self.fatal.load(Ordering::SeqCst)
    }

    /// Runs the tick loop on the calling thread until `stop` is called or a
    /// fatal error surfaces from a commit. Intended to be spawned on its own
    /// dedicated worker thread.
    pub fn run(self: &Arc<Self>) {
        while !self.stop.load(Ordering::SeqCst) {
            if let Err(err) = self.do_work() {
                error!(target: "sync", %err, "sync tick failed");
                if err.is_fatal() {
                    self.fatal.store(true, Ordering::SeqCst);
                    self.stop();
                    return;
                }
            }
            let mut guard = self.wake_mutex.lock();
            let timeout = Duration::from_millis(self.config.idle_wait_ms);
            let woken = self.new_transactions.load(Ordering::SeqCst)
                || self.new_blocks.load(Ordering::SeqCst)
                || self.stop.load(Ordering::SeqCst);
            if !woken {
                self.wake.wait_for(&mut guard, timeout);
            }
        }
    }

    pub fn do_work(&self) -> Result<(), SyncError> {
        let state = *self.state.lock();
        match state {
            SyncState::Idle => {
                if self.new_transactions.swap(false, Ordering::SeqCst) {
                    self.maintain_transactions();
                }
                if self.new_blocks.swap(false, Ordering::SeqCst) {
                    self.maintain_blocks();
                }
            }
            SyncState::Downloading => {
                if self.maintain_downloading_queue()? {
                    *self.state.lock() = SyncState::Idle;
                    info!(target: "sync", "download queue drained, back to Idle");
                }
            }
        }
        Ok(())
    }

    pub fn maintain_transactions(&self) {
        let exclude = self.tx_sent.lock().clone();
        let pending = self.tx_pool.pending(self.config.max_send_transactions, &exclude);
        if pending.is_empty() {
            return;
        }

        let mut peers = self.peers.lock();
        let peer_ids: Vec<NodeId> = peers.keys().cloned().collect();
        let mut per_peer_batches: HashMap<NodeId, Vec<Vec<u8>>> = HashMap::new();

        for tx in &pending {
            let hash = tx.sha3();
            let observed_from_peer = peers.values().any(|p| p.known_txs.contains(&hash));
            let candidates: Vec<NodeId> = peer_ids
                .iter()
                .filter(|id| !peers.get(*id).map(|p| p.known_txs.contains(&hash)).unwrap_or(false))
                .cloned()
                .collect();
            if candidates.is_empty() {
                continue;
            }

            let fraction = if observed_from_peer { 0.25 } else { 1.0 };
            let take = ((candidates.len() as f64) * fraction).ceil().max(1.0) as usize;
            let mut rng = rand::thread_rng();
            let mut shuffled = candidates.clone();
            shuffled.shuffle(&mut rng);
            let selected = &shuffled[..take.min(shuffled.len())];

            if selected.is_empty() {
                continue;
            }
            self.tx_sent.lock().insert(hash);
            let encoded = tx.encode();
            for peer_id in selected {
                per_peer_batches.entry(*peer_id).or_default().push(encoded.clone());
                if let Some(peer) = peers.get_mut(peer_id) {
                    peer.known_txs.insert(hash);
                }
            }
        }

        for (peer_id, batch) in per_peer_batches {
            if let Some(peer) = peers.get(&peer_id) {
                let count = batch.len();
                let message =
                    SyncMessage::broadcast(PacketBody::Transactions { encoded: batch });
                peer.session.async_send_message(message, SendOptions::no_timeout(), |_| {});
                debug!(target: "sync", peer = %peer_id, count, "sent transactions packet");
            }
        }
    }

    pub fn maintain_blocks(&self) {
        let current_number = self.ledger.number().unwrap_or(0);
        let genesis_hash = self.ledger.number_hash(0).ok().flatten().unwrap_or(Hash::zero());
        let current_hash = self.ledger.number_hash(current_number).ok().flatten().unwrap_or(Hash::zero());
        let body = PacketBody::Status { number: current_number, genesis_hash, latest_hash: current_hash };

        let peers = self.peers.lock();
        for peer in peers.values() {
            let message = SyncMessage::broadcast(body.clone());
            peer.session.async_send_message(message, SendOptions::no_timeout(), |_| {});
        }
        debug!(target: "sync", number = current_number, "broadcast status");
    }

    /// Pops a contiguous run of blocks starting at `current_number + 1`
    /// and commits them in order, synchronously, within this tick — the
    /// original's commented-out commit step is treated as a bug, not the
    /// intended behavior. Returns `true` once the ledger has caught up to
    /// `known_highest_number`.
    pub fn maintain_downloading_queue(&self) -> Result<bool, SyncError> {
        loop {
            let current_number = self.ledger.number()?;
            let next = current_number + 1;
            let block = {
                let mut queue = self.download_queue.lock();
                queue.remove(&next)
            };
            let Some(block) = block else {
                break;
            };
            match self.ledger.commit_block(block, self.exec_ctx.as_ref())? {
                bc_chain::CommitResult::Ok => continue,
                other => {
                    warn!(target: "sync", ?other, number = next, "commit of downloaded block failed, retrying next tick");
                    break;
                }
            }
        }
        let current_number = self.ledger.number()?;
        Ok(current_number >= self.known_highest_number.load(Ordering::SeqCst))
    }

    fn push_download(&self, block: bc_primitives::Block) {
        let current_number = self.ledger.number().unwrap_or(0);
        if block.header.number <= current_number {
            return;
        }
        let number = block.header.number;
        self.known_highest_number.fetch_max(number, Ordering::SeqCst);
        self.download_queue.lock().insert(number, block);
        *self.state.lock() = SyncState::Downloading;
        self.wake.notify_all();
    }

    /// Dispatches one decoded message from `peer`. The generic session
    /// layer has already rejected anything that fails to frame or decode;
    /// this only applies sync-specific semantics.
    pub fn message_handler(&self, peer: NodeId, message: &SyncMessage) -> Option<DisconnectReason> {
        if peer == self.self_node_id {
            return Some(DisconnectReason::LocalIdentity);
        }

        match &message.body {
            PacketBody::Status { number, genesis_hash, latest_hash } => {
                let mut peers = self.peers.lock();
                if let Some(handle) = peers.get_mut(&peer) {
                    handle.status = Some(SyncPeerStatus {
                        node_id: peer,
                        height: *number,
                        genesis_hash: *genesis_hash,
                        latest_hash: *latest_hash,
                    });
                }
            }
            PacketBody::Transactions { .. } => {
                let transactions = message.body.decode_transactions();
                let mut peers = self.peers.lock();
                for tx in transactions {
                    let hash = tx.sha3();
                    let _ = self.tx_pool.import(tx);
                    if let Some(handle) = peers.get_mut(&peer) {
                        handle.known_txs.insert(hash);
                    }
                }
            }
            PacketBody::Blocks { .. } => {
                for block in message.body.decode_blocks() {
                    self.push_download(block);
                }
            }
            PacketBody::RequestBlocks { .. } => {
                if let Some((from, size)) = message.body.request_blocks() {
                    self.serve_request_blocks(peer, from, size, message.seq);
                }
            }
        }
        None
    }

    fn serve_request_blocks(&self, peer: NodeId, from: i64, size: i64, seq: u32) {
        let mut shard_bytes = 0usize;
        let mut shards: Vec<Vec<Vec<u8>>> = vec![Vec::new()];

        for number in from..from + size {
            let Ok(Some(block)) = self.ledger.get_block_by_number(number) else { break };
            let bytes = block.encode();
            if shard_bytes + bytes.len() > self.config.max_payload && !shards.last().unwrap().is_empty() {
                shards.push(Vec::new());
                shard_bytes = 0;
            }
            shard_bytes += bytes.len();
            shards.last_mut().unwrap().push(bytes);
        }
        shards.retain(|s| !s.is_empty());

        let peers = self.peers.lock();
        let Some(handle) = peers.get(&peer) else { return };
        for shard in shards {
            let message = SyncMessage::response(seq, PacketBody::Blocks { encoded: shard });
            handle.session.async_send_message(message, SendOptions::no_timeout(), |_| {});
        }
    }
}

/// Adapts a `SyncEngine` to the generic session `Host` trait for one
/// peer's connection.
pub struct SyncHost {
    pub peer: NodeId,
    pub engine: Arc<SyncEngine>,
    pub session: Session<SyncMessage>,
}

impl Host<SyncMessage> for SyncHost {
    fn on_message(&self, message: SyncMessage) {
        if let Some(reason) = self.engine.message_handler(self.peer, &message) {
            self.session.drop_session(reason);
        }
    }

    fn on_disconnect(&self, _reason: DisconnectReason) {
        self.engine.remove_peer(&self.peer);
    }
}
