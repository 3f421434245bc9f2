pub mod constants;
pub mod error;
pub mod ledger;
pub mod mine;
pub mod shared;

pub use error::{LedgerError, TransactionError};
pub use ledger::{Ledger, LedgerConfig};
pub use mine::MiningStrategy;
pub use shared::SharedLedger;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

/// Signed so that a non-positive amount decodes and is rejected by validation.
pub type Amount = i64;

/// Derived balances are signed: unvalidated transactions can overdraw an address.
pub type Balance = i128;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// `None` marks an issuance (mining reward).
    pub from_address: Option<String>,
    #[serde(default)]
    pub to_address: String,
    pub amount: Amount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl Transaction {
    pub fn new(from: impl Into<String>, to: impl Into<String>, amount: Amount) -> Self {
        Self {
            from_address: Some(from.into()),
            to_address: to.into(),
            amount,
            payload: None,
        }
    }

    pub fn issuance(to: impl Into<String>, amount: Amount) -> Self {
        Self {
            from_address: None,
            to_address: to.into(),
            amount,
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn is_issuance(&self) -> bool {
        self.from_address.is_none()
    }

    pub fn touches(&self, address: &str) -> bool {
        self.from_address.as_deref() == Some(address) || self.to_address == address
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub index: u64,
    /// Milliseconds since the UNIX epoch.
    pub timestamp: u64,
    pub transactions: Vec<Transaction>,
    pub previous_hash: String,
    pub hash: String,
    pub nonce: u64,
}

impl Block {
    /// Builds an unsealed block with nonce 0 and its initial hash.
    pub fn new(
        index: u64,
        timestamp: u64,
        transactions: Vec<Transaction>,
        previous_hash: impl Into<String>,
    ) -> Self {
        let mut block = Self {
            index,
            timestamp,
            transactions,
            previous_hash: previous_hash.into(),
            hash: String::new(),
            nonce: 0,
        };
        block.hash = block.compute_hash();
        block
    }

    pub fn compute_hash(&self) -> String {
        hash_with_nonce(self.prefix_hasher(), self.nonce)
    }

    pub fn has_valid_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }

    /// Proof-of-work without a way out. Prefer [`Block::mine_until`] off the test path.
    pub fn mine(&mut self, difficulty: u32) {
        let never = AtomicBool::new(false);
        self.mine_until(difficulty, &never);
    }

    /// Increments the nonce until the hash meets `difficulty` or `cancel` is raised.
    /// Returns whether the block was sealed.
    pub fn mine_until(&mut self, difficulty: u32, cancel: &AtomicBool) -> bool {
        let prefix = self.prefix_hasher();
        while !pow::meets_difficulty(&self.hash, difficulty) {
            if cancel.load(Ordering::Relaxed) {
                return false;
            }
            self.nonce = self.nonce.wrapping_add(1);
            self.hash = hash_with_nonce(prefix.clone(), self.nonce);
        }
        info!(
            index = self.index,
            nonce = self.nonce,
            hash = %self.hash,
            "block mined"
        );
        true
    }

    /// Hasher state after everything but the nonce has been fed in.
    pub(crate) fn prefix_hasher(&self) -> Sha256 {
        let mut hasher = Sha256::new();
        hasher.update(self.index.to_string());
        hasher.update(&self.previous_hash);
        hasher.update(self.timestamp.to_string());
        serde_json::to_writer(&mut hasher, &self.transactions)
            .expect("transactions have string keys and a hasher never fails a write");
        hasher
    }
}

pub(crate) fn hash_with_nonce(mut hasher: Sha256, nonce: u64) -> String {
    hasher.update(nonce.to_string());
    hex::encode(hasher.finalize())
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

pub mod pow {
    use super::Block;
    use std::sync::atomic::AtomicBool;

    /// True when the first `difficulty` hex characters of `hash` are all `'0'`.
    pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
        let difficulty = difficulty as usize;
        hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
    }

    pub fn count_leading_zero_digits(hash: &str) -> u32 {
        hash.bytes().take_while(|b| *b == b'0').count() as u32
    }

    /// Sequential nonce search starting from the block's current nonce.
    /// `None` if `cancel` was raised first.
    pub fn mine_block(mut block: Block, difficulty: u32, cancel: &AtomicBool) -> Option<Block> {
        block.mine_until(difficulty, cancel).then_some(block)
    }
}

pub mod chain {
    use super::*;
    use crate::constants::{GENESIS_PREVIOUS_HASH, GENESIS_TIMESTAMP};
    use anyhow::Result;

    /// Trait the storage backends implement to persist the chain.
    /// This lives in `ledger-core` to avoid a circular dependency.
    pub trait ChainStore: Send + Sync {
        fn put_block(&self, block: &Block) -> Result<()>;
        fn get_block(&self, index: u64) -> Result<Option<Block>>;
        fn tip_height(&self) -> Result<u64>;
        fn tip_hash(&self) -> Result<Option<String>>;
        /// Overwrites the stored chain with `chain`.
        fn replace_chain(&self, chain: &[Block]) -> Result<()>;
        fn close(&self) -> Result<()>;

        fn load_chain(&self) -> Result<Vec<Block>> {
            let mut blocks = Vec::new();
            while let Some(block) = self.get_block(blocks.len() as u64)? {
                blocks.push(block);
            }
            Ok(blocks)
        }
    }

    /// The canonical first block. Fully deterministic, so every node builds the same one.
    pub fn genesis_block() -> Block {
        Block::new(0, GENESIS_TIMESTAMP, vec![], GENESIS_PREVIOUS_HASH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_txs() -> Vec<Transaction> {
        vec![
            Transaction::new("Alice", "Bob", 10),
            Transaction::new("Bob", "Charlie", 5),
        ]
    }

    #[test]
    fn leading_zero_digit_counts() {
        assert_eq!(pow::count_leading_zero_digits("000abc"), 3);
        assert_eq!(pow::count_leading_zero_digits("abc"), 0);
        assert_eq!(pow::count_leading_zero_digits("0"), 1);
        assert!(pow::meets_difficulty("00f1", 2));
        assert!(!pow::meets_difficulty("0f01", 2));
        assert!(pow::meets_difficulty("f", 0));
        assert!(!pow::meets_difficulty("00", 3));
    }

    #[test]
    fn mine_block_example() {
        let mut block = Block::new(1, 1_600_000_000_000, sample_txs(), "0");
        block.mine(3);
        assert!(block.hash.starts_with("000"));
        assert!(block.has_valid_hash());
    }

    #[test]
    fn mine_with_zero_difficulty_keeps_first_nonce() {
        let mut block = Block::new(1, 1_600_000_000_000, sample_txs(), "0");
        let before = block.hash.clone();
        block.mine(0);
        assert_eq!(block.nonce, 0);
        assert_eq!(block.hash, before);
    }

    #[test]
    fn cancelled_mining_returns_none() {
        let block = Block::new(1, 1_600_000_000_000, sample_txs(), "0");
        let cancel = AtomicBool::new(true);
        // 64 leading zeros is unreachable, only the flag can stop this.
        assert!(pow::mine_block(block, 64, &cancel).is_none());
    }

    #[test]
    fn block_hash_matches_preimage() {
        let block = Block::new(1, 1_600_000_200_000, sample_txs(), "0");
        let txs_json = serde_json::to_string(&block.transactions).unwrap();
        let preimage = format!("1{}{}{}{}", "0", 1_600_000_200_000u64, txs_json, 0);
        let expected = hex::encode(Sha256::digest(preimage.as_bytes()));
        assert_eq!(block.hash, expected);
        assert_eq!(block.hash.len(), constants::HASH_HEX_SIZE);
    }

    #[test]
    fn block_hash_consistency() {
        let block = Block::new(1, 1_600_000_200_000, sample_txs(), "0");
        assert_eq!(block.compute_hash(), block.compute_hash());
        assert!(block.has_valid_hash());
    }

    #[test]
    fn block_hash_changes_with_nonce() {
        let mut block = Block::new(1, 1_600_000_200_000, sample_txs(), "0");
        let hash1 = block.compute_hash();
        block.nonce += 1;
        let hash2 = block.compute_hash();
        assert_ne!(hash1, hash2);
        assert!(!block.has_valid_hash());
    }

    #[test]
    fn block_hash_changes_with_any_field() {
        let base = Block::new(1, 1_600_000_200_000, sample_txs(), "0");

        let mut amount = base.clone();
        amount.transactions[0].amount = 11;
        let mut address = base.clone();
        address.transactions[1].to_address = "Mallory".into();
        let mut previous = base.clone();
        previous.previous_hash = "1".into();
        let mut timestamp = base.clone();
        timestamp.timestamp += 1;

        for tampered in [amount, address, previous, timestamp] {
            assert!(!tampered.has_valid_hash());
        }
    }

    #[test]
    fn genesis_block_example() {
        let genesis = chain::genesis_block();
        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.previous_hash, "0");
        assert_eq!(genesis.nonce, 0);
        assert!(genesis.transactions.is_empty());
        assert!(genesis.has_valid_hash());
    }

    #[test]
    fn genesis_block_is_reproducible() {
        assert_eq!(chain::genesis_block(), chain::genesis_block());
    }

    #[test]
    fn transaction_serialization_example() {
        let tx = Transaction::new("Alice", "Bob", 10);
        let json = serde_json::to_string(&tx).unwrap();
        assert_eq!(
            json,
            r#"{"fromAddress":"Alice","toAddress":"Bob","amount":10}"#
        );
        let deserialized: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(tx, deserialized);
    }

    #[test]
    fn issuance_serializes_null_sender() {
        let tx = Transaction::issuance("0xA", 100);
        let json = serde_json::to_string(&tx).unwrap();
        assert_eq!(json, r#"{"fromAddress":null,"toAddress":"0xA","amount":100}"#);
        assert!(tx.is_issuance());
    }

    #[test]
    fn missing_fields_deserialize_as_absent() {
        let tx: Transaction = serde_json::from_str(r#"{"amount":3}"#).unwrap();
        assert_eq!(tx.from_address, None);
        assert_eq!(tx.to_address, "");
        assert_eq!(tx.payload, None);
    }

    #[test]
    fn payload_is_part_of_the_hash() {
        let plain = Block::new(1, 1, vec![Transaction::issuance("a", 0)], "0");
        let tagged = Block::new(
            1,
            1,
            vec![Transaction::issuance("a", 0).with_payload(serde_json::json!({"type": "USER"}))],
            "0",
        );
        assert_ne!(plain.hash, tagged.hash);
    }

    #[test]
    fn block_serialization_example() {
        let block = Block::new(1, 1_600_000_000_000, sample_txs(), "0");
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["previousHash"], "0");
        assert_eq!(json["transactions"][0]["toAddress"], "Bob");
        let deserialized: Block = serde_json::from_value(json).unwrap();
        assert_eq!(block, deserialized);
        assert!(deserialized.has_valid_hash());
    }

    #[test]
    fn transaction_touches_both_sides() {
        let tx = Transaction::new("Alice", "Bob", 1);
        assert!(tx.touches("Alice"));
        assert!(tx.touches("Bob"));
        assert!(!tx.touches("Charlie"));
        assert!(!Transaction::issuance("Bob", 1).touches("Alice"));
    }
}
