//! This module implements the storage
//! of a single file. A file's bytes live
//! in an ordered chain of fixed size
//! blocks which only ever grows at its
//! logical end.

use super::{Result, UfsError};
use tracing::{trace, warn};

/// A fixed capacity byte buffer.
/// `occupied` counts the bytes in use,
/// starting at the beginning of the buffer.
#[derive(Debug)]
pub struct Block {
    memory: Box<[u8]>,
    occupied: usize,
}

impl Block {
    fn new(size: usize) -> Result<Self> {
        let mut memory = Vec::new();
        memory
            .try_reserve_exact(size)
            .map_err(|_| UfsError::NoMemory)?;
        memory.resize(size, 0);
        Ok(Self {
            memory: memory.into_boxed_slice(),
            occupied: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.memory.len()
    }

    pub fn occupied(&self) -> usize {
        self.occupied
    }

    pub fn data(&self) -> &[u8] {
        &self.memory[..self.occupied]
    }

    fn is_full(&self) -> bool {
        self.occupied == self.memory.len()
    }

    /// Copies as much of `bytes` as fits into
    /// the free tail of the block, returns the
    /// amount copied.
    fn fill(&mut self, bytes: &[u8]) -> usize {
        let count = bytes.len().min(self.capacity() - self.occupied);
        self.memory[self.occupied..self.occupied + count].copy_from_slice(&bytes[..count]);
        self.occupied += count;
        count
    }
}

/// Returned by [`BlockChain::append`] when not all
/// input could be stored. Bytes counted in `committed`
/// stay part of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortWrite {
    pub committed: usize,
    pub cause: UfsError,
}

/// Ordered blocks of one file. Every block
/// except the last one is full.
#[derive(Debug)]
pub struct BlockChain {
    block_size: usize,
    blocks: Vec<Block>,
    len: usize,
}

impl BlockChain {
    pub fn new(block_size: usize) -> Self {
        debug_assert!(block_size > 0, "block size must be non-zero");
        Self {
            block_size,
            blocks: Vec::new(),
            len: 0,
        }
    }

    /// Total bytes stored
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    fn push_block(&mut self) -> Result<()> {
        self.blocks
            .try_reserve(1)
            .map_err(|_| UfsError::NoMemory)?;
        let block = Block::new(self.block_size)?;
        self.blocks.push(block);
        trace!("Linked block #{} as new tail", self.blocks.len() - 1);
        Ok(())
    }

    /// Appends `bytes` at the logical end of the chain.
    ///
    /// When `limit` is set, the chain never grows past
    /// `limit` bytes: whatever fits is committed and the
    /// rest is rejected with [`UfsError::NoMemory`]. The
    /// same happens when a new block can't be allocated.
    /// There is no rollback of bytes already copied.
    pub fn append(
        &mut self,
        bytes: &[u8],
        limit: Option<usize>,
    ) -> std::result::Result<usize, ShortWrite> {
        let allowed = match limit {
            Some(limit) => bytes.len().min(limit.saturating_sub(self.len)),
            None => bytes.len(),
        };
        let mut committed = 0;
        while committed < allowed {
            if self.blocks.last().map_or(true, Block::is_full) {
                if let Err(cause) = self.push_block() {
                    warn!(committed, "Block allocation failed during append");
                    return Err(ShortWrite { committed, cause });
                }
            }
            if let Some(tail) = self.blocks.last_mut() {
                let count = tail.fill(&bytes[committed..allowed]);
                committed += count;
                self.len += count;
            }
        }
        trace!(committed, len = self.len, "Appended to chain");
        if committed < bytes.len() {
            warn!(
                committed,
                requested = bytes.len(),
                "Append stopped at the file size limit"
            );
            return Err(ShortWrite {
                committed,
                cause: UfsError::NoMemory,
            });
        }
        Ok(committed)
    }

    /// Copies the first `buf.len()` bytes of the chain
    /// (or the whole chain, if shorter) into `buf`.
    pub fn read_from_start(&self, buf: &mut [u8]) -> usize {
        let mut read = 0;
        for block in &self.blocks {
            if read == buf.len() {
                break;
            }
            let data = block.data();
            let count = data.len().min(buf.len() - read);
            buf[read..read + count].copy_from_slice(&data[..count]);
            read += count;
        }
        trace!(read, "Read chain from start");
        read
    }
}
