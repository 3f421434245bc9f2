use std::fs;

use ledger_core::{Ledger, LedgerConfig};
use ledger_storage::SledStore;
use tempfile::{tempdir, TempDir};

pub fn create_temp_store() -> (TempDir, SledStore) {
    // Create a temporary directory for the sled database
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let store = SledStore::open(temp_dir.path()).expect("Failed to open SledStore");
    (temp_dir, store)
}

pub fn teardown_store(temp_dir: TempDir, store: SledStore) {
    let db_path = temp_dir.path().to_path_buf();
    store.clear().expect("Failed to clear the store");
    drop(store);
    temp_dir.close().expect("Failed to delete temp dir");
    let _ = fs::remove_dir_all(&db_path);
    // Verify the directory is removed
    assert!(!db_path.exists(), "Database directory should be removed");
}

/// A ledger with `blocks` mined blocks on top of genesis, each rewarding `0xA`.
pub fn mined_ledger(blocks: usize) -> Ledger {
    let mut ledger = Ledger::new(LedgerConfig {
        difficulty: 1,
        mining_reward: 100,
    });
    for _ in 0..blocks {
        ledger.mine_pending_transactions("0xA").expect("mining");
    }
    ledger
}
