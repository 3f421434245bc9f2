//! A cloneable handle that serialises every ledger operation behind one lock.
//!
//! Proof-of-work runs outside the lock: the candidate is built under it, sealed
//! without it, and appended under it again. Adopting a peer chain cancels any
//! search still running against the old tip.

use crate::chain::ChainStore;
use crate::mine::MiningStrategy;
use crate::{Balance, Block, Ledger, LedgerError, Transaction};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct SharedLedger {
    ledger: Arc<Mutex<Ledger>>,
    /// Cancellation flags of in-flight mining jobs. Only touched with `ledger` held.
    mining: Arc<Mutex<Vec<Arc<AtomicBool>>>>,
    store: Option<Arc<dyn ChainStore>>,
}

impl SharedLedger {
    pub fn new(ledger: Ledger) -> Self {
        Self {
            ledger: Arc::new(Mutex::new(ledger)),
            mining: Arc::new(Mutex::new(Vec::new())),
            store: None,
        }
    }

    /// Writes every appended block and adopted chain through to `store`.
    pub fn with_store(mut self, store: Arc<dyn ChainStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Adopts the persisted chain if it wins under the usual consensus rule.
    /// Otherwise the store is overwritten with the in-memory chain.
    pub fn restore_from_store(&self) -> anyhow::Result<bool> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        let stored = store.load_chain()?;
        let length = stored.len();
        let mut ledger = self.ledger.lock();
        if stored.as_slice() == ledger.chain() {
            return Ok(false);
        }
        if length > 0 && ledger.replace_chain(stored) {
            info!(length, "restored chain from store");
            return Ok(true);
        }
        if length > 0 {
            warn!(length, "stored chain rejected, rewriting store from memory");
        }
        store.replace_chain(ledger.chain())?;
        Ok(false)
    }

    /// Read access for anything the typed accessors below do not cover.
    pub fn read<R>(&self, f: impl FnOnce(&Ledger) -> R) -> R {
        f(&self.ledger.lock())
    }

    pub fn chain(&self) -> Vec<Block> {
        self.ledger.lock().chain().to_vec()
    }

    pub fn chain_len(&self) -> usize {
        self.ledger.lock().chain_len()
    }

    pub fn latest_block(&self) -> Block {
        self.ledger.lock().latest_block().clone()
    }

    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.ledger.lock().pending_transactions().to_vec()
    }

    pub fn create_transaction(&self, tx: Transaction) {
        self.ledger.lock().create_transaction(tx);
    }

    pub fn add_transaction(&self, tx: Transaction) -> Result<(), LedgerError> {
        self.ledger.lock().add_transaction(tx)
    }

    pub fn clear_pending_transactions(&self) {
        self.ledger.lock().clear_pending_transactions();
    }

    pub fn balance_of_address(&self, address: &str) -> Balance {
        self.ledger.lock().balance_of_address(address)
    }

    pub fn transactions_for_wallet(&self, address: &str) -> Vec<Transaction> {
        self.ledger
            .lock()
            .transactions_for_wallet(address)
            .cloned()
            .collect()
    }

    pub fn is_chain_valid(&self) -> bool {
        self.ledger.lock().is_chain_valid()
    }

    pub fn replace_chain(&self, candidate: Vec<Block>) -> bool {
        let mut ledger = self.ledger.lock();
        let adopted = ledger.replace_chain(candidate);
        if adopted {
            self.on_chain_replaced(&ledger);
        }
        adopted
    }

    pub fn force_sync(&self, candidate: Vec<Block>) -> bool {
        let mut ledger = self.ledger.lock();
        let adopted = ledger.force_sync(candidate);
        if adopted {
            self.on_chain_replaced(&ledger);
        }
        adopted
    }

    pub fn is_mining(&self) -> bool {
        !self.mining.lock().is_empty()
    }

    /// Stops every in-flight search; each returns [`LedgerError::MiningCancelled`].
    pub fn cancel_mining(&self) {
        let _ledger = self.ledger.lock();
        self.cancel_all();
    }

    /// Blocking. Run it on a thread that may stall (e.g. `spawn_blocking`).
    pub fn mine_pending_transactions(
        &self,
        reward_address: &str,
        strategy: MiningStrategy,
    ) -> Result<Block, LedgerError> {
        let cancel = Arc::new(AtomicBool::new(false));
        let (candidate, difficulty) = {
            let ledger = self.ledger.lock();
            self.mining.lock().push(cancel.clone());
            (ledger.prepare_block(reward_address), ledger.difficulty())
        };

        let sealed = strategy.seal(candidate, difficulty, &cancel);

        let mut ledger = self.ledger.lock();
        self.mining.lock().retain(|flag| !Arc::ptr_eq(flag, &cancel));
        let block = sealed.ok_or(LedgerError::MiningCancelled)?;
        let block = ledger.commit_block(block)?.clone();
        if let Some(store) = &self.store {
            if let Err(e) = store.put_block(&block) {
                warn!(index = block.index, error = %e, "failed to persist mined block");
            }
        }
        Ok(block)
    }

    fn on_chain_replaced(&self, ledger: &Ledger) {
        self.cancel_all();
        if let Some(store) = &self.store {
            if let Err(e) = store.replace_chain(ledger.chain()) {
                warn!(length = ledger.chain_len(), error = %e, "failed to persist adopted chain");
            }
        }
    }

    fn cancel_all(&self) {
        for flag in self.mining.lock().iter() {
            flag.store(true, Ordering::Relaxed);
        }
    }
}
