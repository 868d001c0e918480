
//! Keeps encoded code-blocks in memory.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::block::{BlockId, BlockStore, EncodedBlock};
use crate::error::{Error, Result, UnitResult};


/// A thread-safe map from block location to encoded block.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blocks: Mutex<HashMap<BlockId, EncodedBlock>>,
}

impl MemoryStore {

    /// An empty store.
    pub fn new() -> Self { Self::default() }

    /// Number of blocks stored.
    pub fn len(&self) -> Result<usize> { Ok(self.lock()?.len()) }

    /// Whether no block was stored yet.
    pub fn is_empty(&self) -> Result<bool> { Ok(self.lock()?.is_empty()) }

    /// The location of every stored block, in ascending order.
    pub fn ids(&self) -> Result<Vec<BlockId>> {
        let mut ids: Vec<BlockId> = self.lock()?.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    /// Modify a stored block in place. Returns whether the block was present.
    pub fn update(&self, id: &BlockId, update: impl FnOnce(&mut EncodedBlock)) -> Result<bool> {
        Ok(self.lock()?.get_mut(id).map(update).is_some())
    }

    /// Remove all blocks.
    pub fn clear(&self) -> UnitResult {
        self.lock()?.clear();
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<BlockId, EncodedBlock>>> {
        self.blocks.lock().map_err(|_| Error::resource("block store was poisoned by a panicking job"))
    }
}

impl BlockStore for MemoryStore {
    fn store(&self, id: BlockId, block: EncodedBlock) -> UnitResult {
        self.lock()?.insert(id, block);
        Ok(())
    }

    fn load(&self, id: &BlockId) -> Result<EncodedBlock> {
        self.lock()?.get(id).cloned()
            .ok_or_else(|| Error::decode(id.clone(), "no encoded data was stored for this block"))
    }
}
