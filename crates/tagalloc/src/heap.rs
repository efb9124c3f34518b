//! The allocator engine.
//!
//! [`Heap`] owns a [`HeapProvider`] and keeps the region it manages tiled
//! by boundary-tagged blocks between two sentinels:
//!
//! ```text
//! Heap Layout (offsets relative to the provider's start):
//!
//!  0      8          24                                          brk-8    brk
//! ┌──────┬──────────┬────────┬────────┬─────────── ... ─────────┬────────┐
//! │ pad  │ prologue │ block  │ block  │                         │epilogue│
//! │      │ (16, A)  │        │        │                         │ (0, A) │
//! └──────┴──────────┴────────┴────────┴─────────── ... ─────────┴────────┘
//! ```
//!
//! # Algorithm
//!
//! - **Allocation**: the request is rounded up to a block size (header,
//!   footer and 16-byte alignment included), the free list is searched
//!   first-fit, and the chosen block is split when the remainder can hold a
//!   minimum-sized block. If nothing fits the heap grows by at least one
//!   chunk.
//! - **Deallocation**: the block is marked free and immediately merged with
//!   free physical neighbors, so no two adjacent blocks are ever free.
//! - **Growth**: the new region starts at the old epilogue, becomes one free
//!   block, and goes through the same coalescing path as a freed block.
//! - **Reallocation**: always allocate, copy, free.
//!
//! # Preconditions
//!
//! Passing an address that is not currently allocated from this heap to
//! [`Heap::deallocate`], [`Heap::reallocate`] or the payload accessors is a
//! caller bug. It is not detected on the fast path; the bounds-checked word
//! accessors turn it into either a panic or a corrupted heap, which
//! [`Heap::check`] reports.

use core::num::NonZero;

use heap_arena::HeapProvider;
use snafu::{OptionExt as _, ResultExt as _, ensure};

use crate::{
    ALIGNMENT, MIN_BLOCK_SIZE, OVERHEAD, WORD_SIZE,
    block::{Addr, Block},
    config::Config,
    error::{
        AllocError, InitError, InitialChunkSnafu, OutOfMemorySnafu, SizeOverflowSnafu,
        SkeletonSnafu, UninitializedSnafu,
    },
    free_list::FreeList,
    tag::{Tag, store_word},
};

/// Returns the block size needed to serve a `size`-byte request.
///
/// Returns `None` if the computation overflows.
fn adjusted_size(size: usize) -> Option<usize> {
    if size <= ALIGNMENT {
        return Some(MIN_BLOCK_SIZE);
    }
    size.checked_add(OVERHEAD)?.checked_next_multiple_of(ALIGNMENT)
}

/// A boundary-tag heap with an explicit LIFO free list.
///
/// # Examples
///
/// ```
/// use tagalloc::{Arena, Heap};
///
/// let mut heap = Heap::new(Arena::default()).unwrap();
///
/// let p = heap.allocate(100).unwrap().unwrap();
/// heap.payload_mut(p)[..5].copy_from_slice(b"hello");
///
/// let q = heap.reallocate(p, 400).unwrap().unwrap();
/// assert_eq!(&heap.payload(q)[..5], b"hello");
///
/// heap.deallocate(q);
/// heap.check().unwrap();
/// ```
#[derive(Debug)]
pub struct Heap<P> {
    provider: P,
    config: Config,
    /// `None` while the provider region holds no heap, after a failed
    /// [`reset`](Self::reset).
    prologue: Option<Block>,
    free_list: FreeList,
}

impl<P> Heap<P>
where
    P: HeapProvider,
{
    /// Creates a heap on top of `provider` with the default [`Config`].
    ///
    /// Any bytes the provider already handed out are discarded.
    pub fn new(provider: P) -> Result<Self, InitError> {
        Self::with_config(provider, Config::default())
    }

    /// Creates a heap on top of `provider`.
    ///
    /// The heap starts with the prologue/epilogue skeleton and a single free
    /// block of `config.chunk_size()` bytes.
    pub fn with_config(provider: P, config: Config) -> Result<Self, InitError> {
        config.validate()?;
        let mut heap = Self {
            provider,
            config,
            prologue: None,
            free_list: FreeList::new(),
        };
        heap.init()?;
        Ok(heap)
    }

    /// Discards every block and rebuilds the initial heap.
    ///
    /// All previously returned addresses become invalid. If rebuilding
    /// fails the heap is left empty: allocations report
    /// [`AllocError::Uninitialized`] until a later `reset` succeeds.
    pub fn reset(&mut self) -> Result<(), InitError> {
        self.init()
    }

    fn init(&mut self) -> Result<(), InitError> {
        self.clear();
        let res = self.build();
        if let Err(err) = &res {
            log::warn!("heap initialization failed: {err}");
            self.clear();
        }
        res
    }

    /// Releases the whole provider region and forgets every block.
    fn clear(&mut self) {
        self.provider.reset();
        self.free_list = FreeList::new();
        self.prologue = None;
    }

    fn build(&mut self) -> Result<(), InitError> {
        let start = self
            .provider
            .extend(4 * WORD_SIZE)
            .context(SkeletonSnafu)?;
        debug_assert!(start.is_multiple_of(ALIGNMENT));

        let mem = self.provider.bytes_mut();
        store_word(mem, start, 0);
        let prologue = Block::at(start + WORD_SIZE);
        prologue.set_tags(mem, ALIGNMENT, true);
        Tag::EPILOGUE.write(mem, prologue.end(mem));
        self.prologue = Some(prologue);

        self.grow(self.config.chunk_size() / WORD_SIZE)
            .context(InitialChunkSnafu)?;
        log::debug!(
            "heap initialized: {} bytes, chunk size {}",
            self.provider.heap_size(),
            self.config.chunk_size()
        );

        self.verify();
        Ok(())
    }

    /// Returns the configuration the heap was created with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the underlying heap provider.
    #[must_use]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Consumes the heap and returns its provider.
    #[must_use]
    pub fn into_provider(self) -> P {
        self.provider
    }

    pub(crate) fn memory(&self) -> &[u8] {
        self.provider.bytes()
    }

    pub(crate) fn prologue(&self) -> Option<Block> {
        self.prologue
    }

    pub(crate) fn free_list(&self) -> &FreeList {
        &self.free_list
    }

    #[cfg(test)]
    pub(crate) fn parts_mut(&mut self) -> (&mut [u8], &mut FreeList) {
        (self.provider.bytes_mut(), &mut self.free_list)
    }

    /// Allocates a block with at least `size` usable payload bytes.
    ///
    /// Returns `Ok(None)` without touching the heap if `size` is zero. The
    /// returned address is 16-byte aligned relative to the heap start.
    pub fn allocate(&mut self, size: usize) -> Result<Option<Addr>, AllocError> {
        let Some(size) = NonZero::new(size) else {
            log::trace!("allocate(0) -> null");
            return Ok(None);
        };
        let addr = self.allocate_nonzero(size)?;
        self.verify();
        Ok(Some(addr))
    }

    /// Allocates like [`allocate`](Self::allocate) and zeroes the first
    /// `size` payload bytes.
    pub fn allocate_zeroed(&mut self, size: usize) -> Result<Option<Addr>, AllocError> {
        let addr = self.allocate(size)?;
        if let Some(addr) = addr {
            self.payload_mut(addr)[..size].fill(0);
        }
        Ok(addr)
    }

    fn allocate_nonzero(&mut self, size: NonZero<usize>) -> Result<Addr, AllocError> {
        let size = size.get();
        ensure!(self.prologue.is_some(), UninitializedSnafu { requested: size });
        let asize = adjusted_size(size).context(SizeOverflowSnafu { size })?;

        let block = match self.find_fit(asize) {
            Some(block) => block,
            None => self.grow(asize.max(self.config.chunk_size()) / WORD_SIZE)?,
        };
        self.place(block, asize);

        log::trace!("allocate({size}) -> {}", block.addr());
        Ok(block.addr())
    }

    /// Releases the block at `addr`.
    ///
    /// `None` is a no-op. Otherwise `addr` must have been returned by this
    /// heap and not released since.
    pub fn deallocate(&mut self, addr: impl Into<Option<Addr>>) {
        let Some(addr) = addr.into() else {
            return;
        };

        let block = Block::from_addr(addr);
        let mem = self.provider.bytes_mut();
        let size = block.size(mem);
        block.set_tags(mem, size, false);
        self.coalesce(block);

        log::trace!("deallocate({addr})");
        self.verify();
    }

    /// Resizes the block at `addr` to hold at least `size` bytes.
    ///
    /// - `addr == None` behaves like [`allocate(size)`](Self::allocate).
    /// - `size == 0` behaves like [`deallocate(addr)`](Self::deallocate) and
    ///   returns `Ok(None)`.
    /// - Otherwise a new block is allocated, the first
    ///   `min(usable_size(addr), size)` bytes are copied, and the old block is
    ///   released. If the new allocation fails, the old block is left
    ///   untouched and still allocated.
    pub fn reallocate(
        &mut self,
        addr: impl Into<Option<Addr>>,
        size: usize,
    ) -> Result<Option<Addr>, AllocError> {
        let Some(old) = addr.into() else {
            return self.allocate(size);
        };
        let Some(nonzero) = NonZero::new(size) else {
            self.deallocate(old);
            return Ok(None);
        };

        let new = self.allocate_nonzero(nonzero)?;
        let len = self.usable_size(old).min(size);
        self.provider
            .bytes_mut()
            .copy_within(old.offset()..old.offset() + len, new.offset());
        self.deallocate(old);

        log::trace!("reallocate({old}, {size}) -> {new}");
        Ok(Some(new))
    }

    /// Number of payload bytes available in the allocated block at `addr`.
    ///
    /// This can exceed the size originally requested.
    #[must_use]
    pub fn usable_size(&self, addr: Addr) -> usize {
        Block::from_addr(addr).size(self.memory()) - OVERHEAD
    }

    /// Payload bytes of the allocated block at `addr`.
    #[must_use]
    pub fn payload(&self, addr: Addr) -> &[u8] {
        let mem = self.memory();
        &mem[Block::from_addr(addr).payload(mem)]
    }

    /// Payload bytes of the allocated block at `addr`.
    #[must_use]
    pub fn payload_mut(&mut self, addr: Addr) -> &mut [u8] {
        let mem = self.provider.bytes_mut();
        let range = Block::from_addr(addr).payload(mem);
        &mut mem[range]
    }

    /// First free block, in list order, of at least `asize` bytes.
    fn find_fit(&self, asize: usize) -> Option<Block> {
        let mem = self.memory();
        self.free_list
            .iter(mem)
            .find(|block| block.size(mem) >= asize)
    }

    /// Marks the front `asize` bytes of the free `block` as allocated.
    ///
    /// The rest becomes a new free block if it can hold a minimum block;
    /// otherwise the whole block is handed out.
    fn place(&mut self, block: Block, asize: usize) {
        let mem = self.provider.bytes_mut();
        let size = block.size(mem);
        debug_assert!(size >= asize);

        self.free_list.remove(mem, block);
        if size - asize >= MIN_BLOCK_SIZE {
            block.set_tags(mem, asize, true);
            let rest = block.next(mem);
            rest.set_tags(mem, size - asize, false);
            // `block` had no free neighbors, so neither does `rest`.
            self.free_list.insert(mem, rest);
        } else {
            block.set_tags(mem, size, true);
        }
    }

    /// Extends the heap by `words` words (rounded up to an even count).
    ///
    /// Returns the free block that contains the new region after coalescing.
    /// On failure nothing is modified.
    fn grow(&mut self, words: usize) -> Result<Block, AllocError> {
        let size = words.next_multiple_of(2) * WORD_SIZE;
        let start = self
            .provider
            .extend(size)
            .inspect_err(|err| log::warn!("heap growth by {size} bytes failed: {err}"))
            .context(OutOfMemorySnafu { requested: size })?;

        let mem = self.provider.bytes_mut();
        // The old epilogue header becomes the new block's header.
        let block = Block::at(start - WORD_SIZE);
        block.set_tags(mem, size, false);
        Tag::EPILOGUE.write(mem, block.end(mem));

        log::debug!(
            "heap grew by {size} bytes, break at {:#x}",
            self.provider.heap_hi()
        );
        Ok(self.coalesce(block))
    }

    /// Merges the free, unlinked `block` with free physical neighbors and
    /// links the result into the free list.
    fn coalesce(&mut self, block: Block) -> Block {
        let mem = self.provider.bytes_mut();
        let prev_allocated = block.prev_tag(mem).is_allocated();
        let next = block.next(mem);
        let next_allocated = next.is_allocated(mem);
        let mut size = block.size(mem);

        let merged = match (prev_allocated, next_allocated) {
            (true, true) => block,
            (true, false) => {
                self.free_list.remove(mem, next);
                size += next.size(mem);
                block.set_tags(mem, size, false);
                block
            }
            (false, true) => {
                let prev = block.prev(mem);
                self.free_list.remove(mem, prev);
                size += prev.size(mem);
                prev.set_tags(mem, size, false);
                prev
            }
            (false, false) => {
                let prev = block.prev(mem);
                self.free_list.remove(mem, prev);
                self.free_list.remove(mem, next);
                size += prev.size(mem) + next.size(mem);
                prev.set_tags(mem, size, false);
                prev
            }
        };

        self.free_list.insert(mem, merged);
        merged
    }

    /// Iterates over every block between the prologue and the epilogue, in
    /// address order.
    pub fn blocks(&self) -> Blocks<'_> {
        let mem = self.memory();
        Blocks {
            mem,
            cursor: self.prologue.map(|prologue| prologue.next(mem)),
        }
    }

    /// Iterates over the free blocks in free-list order.
    pub fn free_blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        let mem = self.memory();
        self.free_list
            .iter(mem)
            .map(move |block| BlockInfo::new(mem, block))
    }

    /// Summarizes the current heap occupancy.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            heap_size: self.provider.heap_size(),
            ..HeapStats::default()
        };
        for block in self.blocks() {
            if block.is_allocated() {
                stats.allocated_blocks += 1;
                stats.allocated_bytes += block.size();
            } else {
                stats.free_blocks += 1;
                stats.free_bytes += block.size();
                stats.largest_free_block = stats.largest_free_block.max(block.size());
            }
        }
        stats
    }

    #[track_caller]
    fn verify(&self) {
        if !cfg!(feature = "check-heap") {
            return;
        }
        if let Err(err) = self.check() {
            panic!("heap consistency check failed: {err}");
        }
    }
}

/// A snapshot of one block, as seen by [`Heap::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    addr: Addr,
    size: usize,
    allocated: bool,
}

impl BlockInfo {
    fn new(mem: &[u8], block: Block) -> Self {
        let tag = block.tag(mem);
        Self {
            addr: block.addr(),
            size: tag.size(),
            allocated: tag.is_allocated(),
        }
    }

    /// Payload address of the block.
    #[must_use]
    pub fn addr(&self) -> Addr {
        self.addr
    }

    /// Total block size, header and footer included.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn is_allocated(&self) -> bool {
        self.allocated
    }
}

/// Iterator over the blocks of a heap in address order.
pub struct Blocks<'a> {
    mem: &'a [u8],
    cursor: Option<Block>,
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.cursor?;
        let info = BlockInfo::new(self.mem, block);
        if info.size == 0 {
            self.cursor = None;
            return None;
        }
        self.cursor = Some(block.next(self.mem));
        Some(info)
    }
}

/// Heap occupancy, as returned by [`Heap::stats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    /// Bytes claimed from the provider, sentinels included.
    pub heap_size: usize,
    pub allocated_blocks: usize,
    pub allocated_bytes: usize,
    pub free_blocks: usize,
    pub free_bytes: usize,
    pub largest_free_block: usize,
}
