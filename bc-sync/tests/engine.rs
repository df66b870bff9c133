use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bc_chain::{system_tables as sys, Ledger, SimpleExecutiveContext};
use bc_primitives::{Address, Block, BlockHeader, GenesisBlockParam, Hash, NodeId, Transaction};
use bc_store::{Condition, Entry, MemoryStorage, TableFactory};
use bc_sync::{ImportError, PacketBody, SyncConfig, SyncEngine, SyncHost, SyncMessage, SyncMessageFactory, SyncState, TxPool};
use bc_network::{Host, Session};

fn genesis_param(miners: Vec<NodeId>) -> GenesisBlockParam {
    GenesisBlockParam {
        group_mark: "g-mark-pbft-AMOPDB-mpt-1000-300000000".to_string(),
        tx_count_limit: 1000,
        tx_gas_limit: 300_000_000,
        miner_list: miners,
        observer_list: vec![],
        consensus_type: "pbft".to_string(),
        storage_type: "AMOPDB".to_string(),
        state_type: "mpt".to_string(),
    }
}

fn new_ledger() -> (Arc<Ledger>, Arc<TableFactory>) {
    let storage = MemoryStorage::new();
    let factory = TableFactory::new(storage);
    let ledger = Arc::new(Ledger::new(factory.clone()));
    let mut param = genesis_param(vec![NodeId([9u8; 64])]);
    ledger.check_and_build_genesis_block(&mut param).unwrap();
    (ledger, factory)
}

fn sample_tx(nonce: u64) -> Transaction {
    Transaction {
        from: Address([1u8; 20]),
        to: Some(Address([2u8; 20])),
        nonce,
        gas_limit: 21_000,
        gas_price: 1,
        payload: vec![],
        signature: [0u8; 65],
    }
}

fn child_block(parent: &Block, number: i64) -> Block {
    Block {
        header: BlockHeader {
            number,
            parent_hash: parent.hash(),
            state_root: Hash::zero(),
            transactions_root: Hash::zero(),
            receipts_root: Hash::zero(),
            timestamp: number as u64,
            sealer: 0,
            sealer_list: vec![],
            extra_data: vec![],
        },
        transactions: vec![],
        receipts: vec![],
        signature_list: vec![],
    }
}

#[derive(Default)]
struct FakeTxPool {
    pending: Mutex<Vec<Transaction>>,
    imported: Mutex<Vec<Transaction>>,
}

impl TxPool for FakeTxPool {
    fn pending(&self, limit: usize, exclude: &HashSet<Hash>) -> Vec<Transaction> {
        self.pending
            .lock()
            .unwrap()
            .iter()
            .filter(|tx| !exclude.contains(&tx.sha3()))
            .take(limit)
            .cloned()
            .collect()
    }

    fn import(&self, transaction: Transaction) -> Result<(), ImportError> {
        self.imported.lock().unwrap().push(transaction);
        Ok(())
    }
}

fn make_engine(self_node_id: NodeId) -> (Arc<SyncEngine>, Arc<Ledger>, Arc<FakeTxPool>) {
    let (ledger, factory) = new_ledger();
    let exec_ctx = Arc::new(SimpleExecutiveContext::new(factory));
    let tx_pool = Arc::new(FakeTxPool::default());
    let engine = SyncEngine::new(self_node_id, ledger.clone(), exec_ctx, tx_pool.clone(), SyncConfig::default());
    (engine, ledger, tx_pool)
}

#[test]
fn self_identity_message_is_rejected() {
    let self_id = NodeId([1u8; 64]);
    let (engine, _ledger, _pool) = make_engine(self_id);
    let message = SyncMessage::broadcast(PacketBody::Status {
        number: 0,
        genesis_hash: Hash::zero(),
        latest_hash: Hash::zero(),
    });
    let reason = engine.message_handler(self_id, &message);
    assert_eq!(reason, Some(bc_network::DisconnectReason::LocalIdentity));
}

#[test]
fn transactions_from_peer_are_imported_and_marked_known() {
    let self_id = NodeId([1u8; 64]);
    let peer_id = NodeId([2u8; 64]);
    let (engine, _ledger, tx_pool) = make_engine(self_id);

    let tx = sample_tx(1);
    let message = SyncMessage::broadcast(PacketBody::Transactions { encoded: vec![tx.encode()] });
    assert_eq!(engine.message_handler(peer_id, &message), None);

    assert_eq!(tx_pool.imported.lock().unwrap().len(), 1);
}

#[test]
fn out_of_order_blocks_drain_in_order_once_contiguous() {
    let self_id = NodeId([1u8; 64]);
    let peer_id = NodeId([2u8; 64]);
    let (engine, ledger, _pool) = make_engine(self_id);

    let genesis = ledger.get_block_by_number(0).unwrap().unwrap();
    let b1 = child_block(&genesis, 1);
    let b2 = child_block(&b1, 2);
    let b3 = child_block(&b2, 3);

    // b2 and b3 arrive before b1: nothing should commit until b1 shows up.
    engine.message_handler(peer_id, &SyncMessage::broadcast(PacketBody::Blocks { encoded: vec![b3.encode()] }));
    engine.message_handler(peer_id, &SyncMessage::broadcast(PacketBody::Blocks { encoded: vec![b2.encode()] }));
    assert_eq!(engine.state(), SyncState::Downloading);
    assert_eq!(ledger.number().unwrap(), 0);

    engine.message_handler(peer_id, &SyncMessage::broadcast(PacketBody::Blocks { encoded: vec![b1.encode()] }));
    let caught_up = engine.maintain_downloading_queue().unwrap();
    assert!(caught_up);
    assert_eq!(ledger.number().unwrap(), 3);
}

#[test]
fn status_broadcast_reaches_a_real_peer_session() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let self_id = NodeId([1u8; 64]);
        let peer_id = NodeId([2u8; 64]);
        let (engine_a, ledger_a, _pool_a) = make_engine(self_id);
        let (engine_b, _ledger_b, _pool_b) = make_engine(peer_id);

        let (stream_a, stream_b) = tokio::io::duplex(64 * 1024);
        let session_a = Session::spawn(stream_a, SyncMessageFactory);
        let session_b = Session::spawn(stream_b, SyncMessageFactory);

        engine_a.register_peer(peer_id, session_a.clone());
        engine_b.register_peer(self_id, session_b.clone());

        let host_a = Arc::new(SyncHost { peer: peer_id, engine: engine_a.clone(), session: session_a.clone() });
        let host_b = Arc::new(SyncHost { peer: self_id, engine: engine_b.clone(), session: session_b.clone() });
        session_a.start(host_a);
        session_b.start(host_b);

        engine_a.maintain_blocks();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Nothing panics or disconnects; engine_b's own message_handler
        // consumed the Status packet on its read loop.
        let _ = ledger_a.number().unwrap();
        let _ = engine_b.state();
    });
}

#[test]
fn run_stops_itself_and_flags_fatal_on_a_corrupt_ledger() {
    let self_id = NodeId([1u8; 64]);
    let peer_id = NodeId([2u8; 64]);
    let (engine, ledger, _pool) = make_engine(self_id);

    // Corrupt the current-height row so `ledger.number()` returns a fatal
    // `CorruptSystemTable` error instead of a height.
    let table = ledger.factory().open_table(sys::CURRENT_STATE).unwrap();
    let mut entry = Entry::new();
    entry.set("value", "not-a-number");
    let condition = Condition::new();
    table.update(sys::CURRENT_STATE_KEY_NUMBER, entry, &condition, None).unwrap();

    let genesis = Block {
        header: BlockHeader {
            number: 1,
            parent_hash: Hash::zero(),
            state_root: Hash::zero(),
            transactions_root: Hash::zero(),
            receipts_root: Hash::zero(),
            timestamp: 1,
            sealer: 0,
            sealer_list: vec![],
            extra_data: vec![],
        },
        transactions: vec![],
        receipts: vec![],
        signature_list: vec![],
    };
    // `push_download` falls back to height 0 when `number()` errors, so any
    // block past that pushes the engine into the Downloading state.
    engine.message_handler(peer_id, &SyncMessage::broadcast(PacketBody::Blocks { encoded: vec![genesis.encode()] }));
    assert_eq!(engine.state(), SyncState::Downloading);

    engine.run();
    assert!(engine.stopped_fatally());
}
