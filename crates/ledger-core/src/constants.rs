pub const HASH_HEX_SIZE: usize = 64;
pub const DEFAULT_DIFFICULTY: u32 = 2;
pub const DEFAULT_MINING_REWARD: crate::Amount = 100;
/// 2024-01-01T00:00:00Z in milliseconds.
pub const GENESIS_TIMESTAMP: u64 = 1_704_067_200_000;
pub const GENESIS_PREVIOUS_HASH: &str = "0";
