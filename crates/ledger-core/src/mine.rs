use crate::{hash_with_nonce, pow, Block};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// How a candidate block gets sealed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MiningStrategy {
    /// Nonce 0, 1, 2, ... on the calling thread.
    #[default]
    Sequential,
    /// Nonce space split across the rayon pool; any satisfying nonce wins.
    Parallel,
}

impl MiningStrategy {
    pub fn seal(self, block: Block, difficulty: u32, cancel: &AtomicBool) -> Option<Block> {
        match self {
            MiningStrategy::Sequential => pow::mine_block(block, difficulty, cancel),
            MiningStrategy::Parallel => mine_block_parallel(block, difficulty, cancel),
        }
    }
}

/// Mines a block by searching nonces in parallel until its hash has at least
/// `difficulty` leading zero hex digits. Returns `None` if `cancel` is raised first.
pub fn mine_block_parallel(mut block: Block, difficulty: u32, cancel: &AtomicBool) -> Option<Block> {
    // Only the nonce varies per attempt.
    let prefix = block.prefix_hasher();

    // Rayon will split this range across threads. A raised flag ends the search too.
    let found = (0u64..u64::MAX).into_par_iter().find_any(|nonce| {
        cancel.load(Ordering::Relaxed)
            || pow::meets_difficulty(&hash_with_nonce(prefix.clone(), *nonce), difficulty)
    })?;

    let hash = hash_with_nonce(prefix, found);
    if !pow::meets_difficulty(&hash, difficulty) {
        return None;
    }

    info!(
        index = block.index,
        nonce = found,
        hash = %hash,
        "block mined in parallel"
    );

    block.nonce = found;
    block.hash = hash;
    Some(block)
}
