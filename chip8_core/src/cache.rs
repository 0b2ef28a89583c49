pub mod cache {
    use std::collections::HashMap;

    use crate::chip8::chip8::Chip8;
    use crate::translate::translate::{translate_block, CodeBlock};

    /// Guest address to translated block. Insert-only: blocks are
    /// immutable once built and live as long as the VM. There is no
    /// invalidation, so a guest that writes into a region a block was
    /// translated from keeps executing the stale translation.
    pub struct BlockCache {
        blocks: HashMap<u16, CodeBlock>,
    }

    impl BlockCache {
        pub fn new() -> BlockCache {
            BlockCache {
                blocks: HashMap::new(),
            }
        }

        /// The block starting at the guest's current PC, translating it
        /// first if this address has never been entered.
        pub fn fetch(&mut self, state: &mut Chip8) -> &CodeBlock {
            self.blocks
                .entry(state.PC)
                .or_insert_with(|| translate_block(state))
        }

        pub fn len(&self) -> usize {
            self.blocks.len()
        }

        pub fn is_empty(&self) -> bool {
            self.blocks.is_empty()
        }
    }

    impl Default for BlockCache {
        fn default() -> BlockCache {
            BlockCache::new()
        }
    }

}
