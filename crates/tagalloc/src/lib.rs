//! A boundary-tag heap allocator with an explicit free list.
//!
//! This crate manages a single contiguous region obtained from a
//! [`HeapProvider`], an sbrk-like source of memory that can only grow at its
//! end. The region is carved into blocks that carry a size/status tag at
//! both ends, so the physical neighbors of any block can be reached in
//! constant time. Free blocks are additionally threaded onto a doubly linked
//! list stored inside their own payloads.
//!
//! The crate is `no_std` (it needs `alloc` only for the consistency checker)
//! and never dereferences raw pointers: client handles are [`Addr`] offsets
//! into the provider's byte region.
//!
//! # Block Format
//!
//! ```text
//!          header                                        footer
//!        ┌────────┬──────────────────────────────────┬────────┐
//!  Block │ size|A │ payload (16-byte aligned)        │ size|A │
//!        └────────┴──────────────────────────────────┴────────┘
//!        ^        ^
//!        block    Addr returned to the client
//! ```
//!
//! Block sizes are multiples of [`ALIGNMENT`] and at least
//! [`MIN_BLOCK_SIZE`], which leaves room for the free-list links of a freed
//! block.
//!
//! # Usage
//!
//! ```rust
//! use tagalloc::{Arena, Heap};
//!
//! let mut heap = Heap::new(Arena::default()).unwrap();
//!
//! let addr = heap.allocate(100).unwrap().unwrap();
//! assert_eq!(addr.offset() % 16, 0);
//! heap.payload_mut(addr)[..5].copy_from_slice(b"hello");
//!
//! let addr = heap.reallocate(addr, 4000).unwrap().unwrap();
//! assert_eq!(&heap.payload(addr)[..5], b"hello");
//!
//! heap.deallocate(addr);
//! heap.check().unwrap();
//! assert_eq!(heap.stats().allocated_blocks, 0);
//! ```
//!
//! # Features
//!
//! - `check-heap`: run [`Heap::check`] after every mutating operation and
//!   panic with the reported inconsistency.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

extern crate alloc;

pub use heap_arena::{Arena, ExtendError, HeapProvider, SliceArena};

pub use self::{
    block::Addr,
    check::CheckError,
    config::Config,
    error::{AllocError, InitError},
    heap::{BlockInfo, Blocks, Heap, HeapStats},
};

mod block;
mod check;
mod config;
mod error;
mod free_list;
mod heap;
mod tag;

/// Size of a boundary tag and of a free-list link.
pub const WORD_SIZE: usize = 8;

/// Alignment of every payload and every block size.
pub const ALIGNMENT: usize = 16;

/// Bytes a block spends on its header and footer.
pub(crate) const OVERHEAD: usize = 2 * WORD_SIZE;

/// Smallest block that can hold the header, footer and both free-list links.
pub const MIN_BLOCK_SIZE: usize = 32;

const _: () = assert!(MIN_BLOCK_SIZE >= OVERHEAD + 2 * WORD_SIZE);
const _: () = assert!(MIN_BLOCK_SIZE.is_multiple_of(ALIGNMENT));
