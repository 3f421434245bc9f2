mod helpers;

use helpers::{create_temp_store, mined_ledger, teardown_store};
use ledger_core::chain::{genesis_block, ChainStore};
use ledger_core::{Ledger, LedgerConfig, MiningStrategy, SharedLedger, Transaction};
use ledger_storage::SledStore;
use std::sync::Arc;
use tempfile::tempdir;

#[tokio::test]
async fn test_storage_integration() -> anyhow::Result<()> {
    let (temp_dir, store) = create_temp_store();
    let ledger = mined_ledger(10);

    for block in ledger.chain() {
        store.put_block(block)?;
    }

    for block in ledger.chain() {
        let retrieved = store.get_block(block.index)?.expect("Block should exist");
        assert_eq!(&retrieved, block);
    }
    assert_eq!(store.tip_height()?, 10);
    assert_eq!(store.tip_hash()?, Some(ledger.latest_block().hash.clone()));
    assert!(store.get_block(11)?.is_none());

    teardown_store(temp_dir, store);
    Ok(())
}

#[tokio::test]
async fn test_storage_persistence() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let ledger = mined_ledger(3);
    {
        let store = SledStore::open(temp_dir.path())?;
        store.replace_chain(ledger.chain())?;
        store.close()?;
    }
    // Re-open the SledStore and verify the chain persists
    {
        let store = SledStore::open(temp_dir.path())?;
        let chain = store.load_chain()?;
        assert_eq!(chain, ledger.chain());
        assert_eq!(chain[0], genesis_block());
        assert!(ledger.is_valid_chain(&chain));
    }
    temp_dir.close()?;
    Ok(())
}

#[tokio::test]
async fn test_empty_store() -> anyhow::Result<()> {
    let (temp_dir, store) = create_temp_store();
    assert_eq!(store.tip_height()?, 0);
    assert_eq!(store.tip_hash()?, None);
    assert!(store.load_chain()?.is_empty());
    teardown_store(temp_dir, store);
    Ok(())
}

#[tokio::test]
async fn test_replace_chain_overwrites() -> anyhow::Result<()> {
    let (temp_dir, store) = create_temp_store();
    let short = mined_ledger(2);
    let long = mined_ledger(4);

    store.replace_chain(short.chain())?;
    store.replace_chain(long.chain())?;
    assert_eq!(store.load_chain()?, long.chain());
    assert_eq!(store.tip_height()?, 4);

    store.replace_chain(&[])?;
    assert!(store.load_chain()?.is_empty());
    assert_eq!(store.tip_hash()?, None);

    teardown_store(temp_dir, store);
    Ok(())
}

#[tokio::test]
async fn test_payload_round_trips() -> anyhow::Result<()> {
    let (temp_dir, store) = create_temp_store();
    let mut ledger = mined_ledger(0);
    ledger.create_transaction(
        Transaction::issuance("0xU", 0).with_payload(serde_json::json!({
            "type": "USER",
            "name": "Ada",
        })),
    );
    ledger.mine_pending_transactions("0xA")?;
    store.replace_chain(ledger.chain())?;

    let block = store.get_block(1)?.expect("Block should exist");
    assert!(block.has_valid_hash());
    assert_eq!(block.transactions[0].payload.as_ref().unwrap()["name"], "Ada");

    teardown_store(temp_dir, store);
    Ok(())
}

#[tokio::test]
async fn test_corrupted_block_is_an_error() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    {
        let store = SledStore::open(temp_dir.path())?;
        store.put_block(&genesis_block())?;
        store.close()?;
    }
    {
        let sled_db = sled::open(temp_dir.path())?;
        let blocks = sled_db.open_tree("blocks")?;
        blocks.insert(0u64.to_be_bytes(), vec![0u8; 10])?;
        sled_db.flush()?;
    }
    let store = SledStore::open(temp_dir.path())?;
    assert!(store.get_block(0).is_err());
    assert!(store.load_chain().is_err());
    drop(store);
    temp_dir.close()?;
    Ok(())
}

#[tokio::test]
async fn test_shared_ledger_writes_through() -> anyhow::Result<()> {
    let (temp_dir, store) = create_temp_store();
    let store = Arc::new(store);
    let shared = SharedLedger::new(Ledger::new(LedgerConfig {
        difficulty: 1,
        mining_reward: 100,
    }))
    .with_store(store.clone());

    // Seeds the empty store with genesis.
    assert!(!shared.restore_from_store()?);
    assert_eq!(store.load_chain()?, vec![genesis_block()]);

    shared.mine_pending_transactions("0xA", MiningStrategy::Sequential)?;
    assert_eq!(store.load_chain()?, shared.chain());

    let longer = mined_ledger(3);
    assert!(shared.force_sync(longer.chain().to_vec()));
    assert_eq!(store.load_chain()?, longer.chain());

    drop(shared);
    let store = Arc::try_unwrap(store).ok().expect("sole owner");
    teardown_store(temp_dir, store);
    Ok(())
}

#[tokio::test]
async fn test_restore_adopts_persisted_chain() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let persisted = mined_ledger(2);
    {
        let store = SledStore::open(temp_dir.path())?;
        store.replace_chain(persisted.chain())?;
    }

    let store = Arc::new(SledStore::open(temp_dir.path())?);
    let shared = SharedLedger::new(Ledger::default()).with_store(store);
    assert!(shared.restore_from_store()?);
    assert_eq!(shared.chain(), persisted.chain());
    assert_eq!(shared.balance_of_address("0xA"), 200);
    drop(shared);
    temp_dir.close()?;
    Ok(())
}

#[tokio::test]
async fn test_restore_ignores_tampered_chain() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let mut chain = mined_ledger(2).chain().to_vec();
    chain[1].transactions[0].amount = 1_000_000;
    {
        let store = SledStore::open(temp_dir.path())?;
        store.replace_chain(&chain)?;
    }

    let store = Arc::new(SledStore::open(temp_dir.path())?);
    let shared = SharedLedger::new(Ledger::default()).with_store(store);
    assert!(!shared.restore_from_store()?);
    assert_eq!(shared.chain_len(), 1);
    drop(shared);
    temp_dir.close()?;
    Ok(())
}

#[tokio::test]
async fn test_rejected_store_is_rewritten_and_keeps_mined_blocks() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let config = LedgerConfig {
        difficulty: 1,
        mining_reward: 100,
    };
    let mut chain = mined_ledger(2).chain().to_vec();
    chain[1].transactions[0].amount = 1_000_000;
    {
        let store = SledStore::open(temp_dir.path())?;
        store.replace_chain(&chain)?;
    }

    let mined = {
        let store = Arc::new(SledStore::open(temp_dir.path())?);
        let shared = SharedLedger::new(Ledger::new(config.clone())).with_store(store.clone());
        assert!(!shared.restore_from_store()?);
        // The rejected chain no longer lingers on disk.
        assert_eq!(store.load_chain()?, vec![genesis_block()]);

        let mined = shared.mine_pending_transactions("0xA", MiningStrategy::Sequential)?;
        assert_eq!(store.load_chain()?, shared.chain());
        mined
    };

    let store = Arc::new(SledStore::open(temp_dir.path())?);
    let restarted = SharedLedger::new(Ledger::new(config)).with_store(store);
    assert!(restarted.restore_from_store()?);
    assert_eq!(restarted.chain_len(), 2);
    assert_eq!(restarted.latest_block(), mined);
    assert!(restarted.is_chain_valid());
    drop(restarted);
    temp_dir.close()?;
    Ok(())
}
