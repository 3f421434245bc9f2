use crate::chain::genesis_block;
use crate::constants::{DEFAULT_DIFFICULTY, DEFAULT_MINING_REWARD};
use crate::{now_millis, pow, Amount, Balance, Block, LedgerError, Transaction, TransactionError};
use std::collections::HashMap;
use tracing::{debug, info, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Leading zero hex digits a sealed block hash needs.
    pub difficulty: u32,
    pub mining_reward: Amount,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
            mining_reward: DEFAULT_MINING_REWARD,
        }
    }
}

/// The chain, the pending queue and the mining parameters.
///
/// The chain is never empty and always starts with [`genesis_block`].
#[derive(Clone, Debug)]
pub struct Ledger {
    chain: Vec<Block>,
    pending: Vec<Transaction>,
    difficulty: u32,
    mining_reward: Amount,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new(LedgerConfig::default())
    }
}

impl Ledger {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            chain: vec![genesis_block()],
            pending: Vec::new(),
            difficulty: config.difficulty,
            mining_reward: config.mining_reward,
        }
    }

    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    pub fn chain_len(&self) -> usize {
        self.chain.len()
    }

    pub fn latest_block(&self) -> &Block {
        &self.chain[self.chain.len() - 1]
    }

    pub fn pending_transactions(&self) -> &[Transaction] {
        &self.pending
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn mining_reward(&self) -> Amount {
        self.mining_reward
    }

    /// Enqueues without any check. Use [`Ledger::add_transaction`] for validated submission.
    pub fn create_transaction(&mut self, tx: Transaction) {
        self.pending.push(tx);
    }

    pub fn add_transaction(&mut self, tx: Transaction) -> Result<(), LedgerError> {
        if is_missing(tx.from_address.as_deref()) || tx.to_address.is_empty() {
            return Err(TransactionError::MissingAddress.into());
        }
        self.is_valid_transaction(&tx)?;
        self.pending.push(tx);
        Ok(())
    }

    pub fn clear_pending_transactions(&mut self) {
        self.pending.clear();
    }

    /// Checks `tx` against the balances of the current chain. Issuance always passes.
    pub fn is_valid_transaction(&self, tx: &Transaction) -> Result<(), TransactionError> {
        check_transaction(tx, |address| self.balance_of_address(address))
    }

    /// Builds the next unsealed block: every pending transaction plus the reward.
    /// The pending queue is left untouched until [`Ledger::commit_block`].
    pub fn prepare_block(&self, reward_address: &str) -> Block {
        let mut transactions = self.pending.clone();
        transactions.push(Transaction::issuance(reward_address, self.mining_reward));
        Block::new(
            self.chain.len() as u64,
            now_millis(),
            transactions,
            self.latest_block().hash.clone(),
        )
    }

    /// Appends a sealed block built by [`Ledger::prepare_block`] and drops the
    /// transactions it carries from the pending queue.
    pub fn commit_block(&mut self, block: Block) -> Result<&Block, LedgerError> {
        let tip = self.latest_block();
        if block.index != self.chain.len() as u64 || block.previous_hash != tip.hash {
            warn!(index = block.index, tip = %tip.hash, "mined block lost the race to a newer chain");
            return Err(LedgerError::MiningConflict {
                index: block.index,
                tip: tip.hash.clone(),
            });
        }
        if !block.has_valid_hash() {
            return Err(LedgerError::InvalidBlock {
                index: block.index,
                reason: "hash does not match contents",
            });
        }
        if !pow::meets_difficulty(&block.hash, self.difficulty) {
            return Err(LedgerError::InvalidBlock {
                index: block.index,
                reason: "hash does not meet difficulty",
            });
        }

        // The trailing reward was never queued.
        let carried = block.transactions.split_last().map_or(&[][..], |(_, rest)| rest);
        for tx in carried {
            if let Some(pos) = self.pending.iter().position(|p| p == tx) {
                self.pending.remove(pos);
            }
        }
        info!(index = block.index, txs = block.transactions.len(), "block appended");
        self.chain.push(block);
        Ok(self.latest_block())
    }

    /// Rewards `reward_address`, seals the pending queue into a block and appends it.
    pub fn mine_pending_transactions(&mut self, reward_address: &str) -> Result<&Block, LedgerError> {
        let mut block = self.prepare_block(reward_address);
        block.mine(self.difficulty);
        self.commit_block(block)
    }

    pub fn balance_of_address(&self, address: &str) -> Balance {
        self.chain
            .iter()
            .flat_map(|block| &block.transactions)
            .fold(0, |balance, tx| apply(balance, tx, address))
    }

    /// Every transaction touching `address`, in chain order.
    pub fn transactions_for_wallet<'a>(
        &'a self,
        address: &'a str,
    ) -> impl Iterator<Item = &'a Transaction> + 'a {
        self.chain
            .iter()
            .flat_map(|block| &block.transactions)
            .filter(move |tx| tx.touches(address))
    }

    pub fn is_chain_valid(&self) -> bool {
        is_valid_chain(&self.chain)
    }

    pub fn is_valid_chain(&self, candidate: &[Block]) -> bool {
        is_valid_chain(candidate)
    }

    /// Longest-valid-chain rule. Returns whether `candidate` was adopted.
    pub fn replace_chain(&mut self, candidate: Vec<Block>) -> bool {
        if candidate.len() <= self.chain.len() {
            debug!(
                received = candidate.len(),
                current = self.chain.len(),
                "received chain is not longer than current chain"
            );
            return false;
        }
        if !is_valid_chain(&candidate) {
            warn!(received = candidate.len(), "received chain is not valid");
            return false;
        }
        info!(
            received = candidate.len(),
            current = self.chain.len(),
            "replacing current chain with new chain"
        );
        self.chain = candidate;
        true
    }

    /// Inbound handler for network-delivered chains; same gate as [`Ledger::replace_chain`].
    pub fn force_sync(&mut self, candidate: Vec<Block>) -> bool {
        let current = self.chain.len();
        let received = candidate.len();
        let adopted = self.replace_chain(candidate);
        if adopted {
            info!(received, current, "force sync adopted peer chain");
        }
        adopted
    }
}

/// Structural and transactional validity of a whole chain, genesis included.
pub fn is_valid_chain(chain: &[Block]) -> bool {
    let Some(first) = chain.first() else {
        return false;
    };
    if *first != genesis_block() {
        debug!("chain does not start at the canonical genesis");
        return false;
    }

    let mut balances = Balances::default();
    balances.apply_block(first);

    for pair in chain.windows(2) {
        let (previous, block) = (&pair[0], &pair[1]);
        if let Some(err) = block
            .transactions
            .iter()
            .find_map(|tx| check_transaction(tx, |a| balances.of(a)).err())
        {
            debug!(index = block.index, error = %err, "block carries an invalid transaction");
            return false;
        }
        if !block.has_valid_hash() {
            debug!(index = block.index, "stored hash does not match contents");
            return false;
        }
        if block.previous_hash != previous.hash {
            debug!(index = block.index, "broken link to previous block");
            return false;
        }
        balances.apply_block(block);
    }
    true
}

fn is_missing(address: Option<&str>) -> bool {
    address.map_or(true, str::is_empty)
}

fn check_transaction(
    tx: &Transaction,
    balance_of: impl Fn(&str) -> Balance,
) -> Result<(), TransactionError> {
    let Some(from) = tx.from_address.as_deref() else {
        return Ok(());
    };
    if from.is_empty() || tx.to_address.is_empty() {
        return Err(TransactionError::MissingAddress);
    }
    if tx.amount <= 0 {
        return Err(TransactionError::NonPositiveAmount);
    }
    let balance = balance_of(from);
    if balance < Balance::from(tx.amount) {
        return Err(TransactionError::InsufficientBalance {
            address: from.to_string(),
            balance,
            amount: tx.amount,
        });
    }
    Ok(())
}

fn apply(balance: Balance, tx: &Transaction, address: &str) -> Balance {
    let mut balance = balance;
    if tx.from_address.as_deref() == Some(address) {
        balance -= Balance::from(tx.amount);
    }
    if tx.to_address == address {
        balance += Balance::from(tx.amount);
    }
    balance
}

/// Running balances while walking a chain, so validation stays linear.
#[derive(Default)]
struct Balances(HashMap<String, Balance>);

impl Balances {
    fn of(&self, address: &str) -> Balance {
        self.0.get(address).copied().unwrap_or(0)
    }

    fn apply_block(&mut self, block: &Block) {
        for tx in &block.transactions {
            if let Some(from) = &tx.from_address {
                *self.0.entry(from.clone()).or_default() -= Balance::from(tx.amount);
            }
            *self.0.entry(tx.to_address.clone()).or_default() += Balance::from(tx.amount);
        }
    }
}
