use anyhow::{Context, Result};
use ledger_core::{chain::ChainStore, Block};
use sled::{Db, IVec};
use std::path::Path;
use tracing::{debug, info};

const TREE_BLOCKS: &str = "blocks";
const KEY_TIP_HEIGHT: &[u8] = b"tip_height";
const KEY_TIP_HASH: &[u8] = b"tip_hash";

/// Blocks keyed by big-endian index, stored as the same JSON peers exchange.
#[derive(Clone)]
pub struct SledStore {
  db: Db,
  blocks: sled::Tree,
}

impl SledStore {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
    let path = path.as_ref();
    let db = sled::open(path).with_context(|| format!("opening sled at {}", path.display()))?;
    let blocks = db.open_tree(TREE_BLOCKS)?;
    info!(path = %path.display(), "sled store opened");
    Ok(Self { db, blocks })
  }

  /// Removes every block and the tip markers.
  pub fn clear(&self) -> Result<()> {
    self.blocks.clear()?;
    self.db.remove(KEY_TIP_HEIGHT)?;
    self.db.remove(KEY_TIP_HASH)?;
    self.db.flush()?;
    Ok(())
  }

  fn write_block(&self, block: &Block) -> Result<()> {
    let key = block.index.to_be_bytes();
    let bytes = serde_json::to_vec(block)?;
    self.blocks.insert(key, bytes)?;
    Ok(())
  }

  fn write_tip(&self, block: &Block) -> Result<()> {
    self.db.insert(KEY_TIP_HEIGHT, &block.index.to_be_bytes())?;
    self.db.insert(KEY_TIP_HASH, block.hash.as_bytes())?;
    Ok(())
  }
}

impl ChainStore for SledStore {
  fn put_block(&self, block: &Block) -> Result<()> {
    self.write_block(block)?;
    self.write_tip(block)?;
    self.db.flush()?;
    debug!(index = block.index, "block persisted");
    Ok(())
  }

  fn get_block(&self, index: u64) -> Result<Option<Block>> {
    let key = index.to_be_bytes();
    self
      .blocks
      .get(key)?
      .map(|ivec: IVec| {
        serde_json::from_slice(&ivec).with_context(|| format!("decoding block {index}"))
      })
      .transpose()
  }

  fn tip_height(&self) -> Result<u64> {
    Ok(
      self
        .db
        .get(KEY_TIP_HEIGHT)?
        .map(|v| {
          let mut arr = [0u8; 8];
          arr.copy_from_slice(&v);
          u64::from_be_bytes(arr)
        })
        .unwrap_or(0),
    )
  }

  fn tip_hash(&self) -> Result<Option<String>> {
    self
      .db
      .get(KEY_TIP_HASH)?
      .map(|v| String::from_utf8(v.to_vec()).context("tip hash is not utf-8"))
      .transpose()
  }

  fn replace_chain(&self, chain: &[Block]) -> Result<()> {
    self.blocks.clear()?;
    for block in chain {
      self.write_block(block)?;
    }
    match chain.last() {
      Some(tip) => self.write_tip(tip)?,
      None => {
        self.db.remove(KEY_TIP_HEIGHT)?;
        self.db.remove(KEY_TIP_HASH)?;
      }
    }
    self.db.flush()?;
    info!(length = chain.len(), "chain persisted");
    Ok(())
  }

  fn close(&self) -> Result<()> {
    self.db.flush()?;
    Ok(())
  }
}
