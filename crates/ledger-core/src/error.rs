use crate::{Amount, Balance};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransactionError {
    #[error("transaction must include from and to address")]
    MissingAddress,

    #[error("transaction amount must be greater than zero")]
    NonPositiveAmount,

    #[error("not enough balance: {address} holds {balance}, needs {amount}")]
    InsufficientBalance {
        address: String,
        balance: Balance,
        amount: Amount,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("invalid transaction: {0}")]
    InvalidTransaction(#[from] TransactionError),

    #[error("mined block {index} no longer extends the chain tip {tip}")]
    MiningConflict { index: u64, tip: String },

    #[error("mining was cancelled")]
    MiningCancelled,

    #[error("invalid block {index}: {reason}")]
    InvalidBlock { index: u64, reason: &'static str },
}
