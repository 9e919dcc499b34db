use std::ops::Range;

use crate::error::{Result, VmError};

/// A zeroed byte array carved into equal blocks. Main memory is a
/// `BlockStore` of frames; the swap device is a `BlockStore` of slots.
#[derive(Debug, Clone)]
pub struct BlockStore {
    bytes: Vec<u8>,
    block_size: usize,
}

impl BlockStore {
    pub fn new(block_count: usize, block_size: usize) -> Self {
        BlockStore {
            bytes: vec![0; block_count * block_size],
            block_size,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn block_count(&self) -> usize {
        self.bytes.len().checked_div(self.block_size).unwrap_or(0)
    }

    fn block_range(&self, idx: usize) -> Result<Range<usize>> {
        if idx >= self.block_count() {
            return Err(VmError::invariant(format!(
                "block {} is outside a store of {} blocks",
                idx,
                self.block_count()
            )));
        }

        Ok(Range {
            start: idx * self.block_size,
            end: (idx + 1) * self.block_size,
        })
    }

    pub fn block(&self, idx: usize) -> Result<&[u8]> {
        let range = self.block_range(idx)?;

        Ok(&self.bytes[range])
    }

    pub fn block_mut(&mut self, idx: usize) -> Result<&mut [u8]> {
        let range = self.block_range(idx)?;

        Ok(&mut self.bytes[range])
    }

    /// Copies block `from` of `src` over block `to` of `self`.
    pub fn copy_block_from(&mut self, to: usize, src: &BlockStore, from: usize) -> Result<()> {
        if src.block_size != self.block_size {
            return Err(VmError::invariant(format!(
                "block size mismatch: {} vs {}",
                src.block_size, self.block_size
            )));
        }

        let source = src.block(from)?;
        self.block_mut(to)?.copy_from_slice(source);

        Ok(())
    }
}
