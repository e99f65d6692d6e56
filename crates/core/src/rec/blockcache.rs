//! Block cache: entry PC to translated block.

use std::collections::HashMap;
use std::rc::Rc;

use crate::rec::block::Block;

/// Maps segmented entry PCs to their blocks.
///
/// The same physical code reached through different segments yields
/// distinct cache entries, but their compiled functions share one code-LUT
/// slot because the LUT is keyed by unsegmented PC.
#[derive(Debug, Default)]
pub struct BlockCache {
    blocks: HashMap<u32, Rc<Block>>,
}

impl BlockCache {
    /// Returns the block registered for `pc`, if any.
    pub fn lookup(&self, pc: u32) -> Option<Rc<Block>> {
        self.blocks.get(&pc).cloned()
    }

    /// Registers a block under its entry PC.
    pub fn register(&mut self, block: Rc<Block>) {
        let _ = self.blocks.insert(block.pc, block);
    }

    /// Removes and returns the block registered for `pc`.
    pub fn unregister(&mut self, pc: u32) -> Option<Rc<Block>> {
        self.blocks.remove(&pc)
    }

    /// Drains every registered block.
    pub fn drain(&mut self) -> Vec<Rc<Block>> {
        self.blocks.drain().map(|(_, block)| block).collect()
    }

    /// Number of registered blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// True when no blocks are registered.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
