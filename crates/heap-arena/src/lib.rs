//! Growable byte regions that back a heap allocator.
//!
//! A heap allocator built on boundary tags needs exactly one thing from its
//! environment: a contiguous region that can be extended at its high end,
//! the way `sbrk(2)` moves the program break. This crate models that region
//! as a [`HeapProvider`] and ships two implementations:
//!
//! - [`Arena`] owns a `Vec<u8>` and refuses to grow past a fixed maximum.
//! - [`SliceArena`] carves the heap out of a caller-supplied buffer.
//!
//! Every address handed out by a provider is a byte offset from the start of
//! the region. Offsets stay valid when the backing storage moves, so an
//! [`Arena`] is free to reallocate its vector as it grows.
//!
//! ```text
//!   offset 0                              break             max_size
//!   ├──────────── managed heap ────────────┤── unclaimed ──┤
//!                                          ▲
//!                            extend(delta) returns this offset
//!                            and moves the break up by delta
//! ```
//!
//! # Usage Example
//!
//! ```rust
//! use heap_arena::{Arena, HeapProvider as _};
//!
//! let mut arena = Arena::new(4096);
//! let start = arena.extend(64).unwrap();
//! assert_eq!(start, 0);
//! assert_eq!(arena.heap_size(), 64);
//!
//! // Growing beyond the maximum fails without touching the region.
//! assert!(arena.extend(8192).is_err());
//! assert_eq!(arena.heap_size(), 64);
//! ```

#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

extern crate alloc;

use alloc::{collections::TryReserveError, vec::Vec};

use snafu::{Location, ResultExt as _, Snafu, ensure};

/// Errors returned when a provider cannot move its break.
#[derive(Debug, Snafu)]
pub enum ExtendError {
    #[snafu(display(
        "cannot extend heap by {requested} bytes, only {available} bytes remain"
    ))]
    Exhausted {
        requested: usize,
        available: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("failed to reserve {requested} bytes of backing storage"))]
    Reserve {
        requested: usize,
        #[snafu(source)]
        source: TryReserveError,
        #[snafu(implicit)]
        location: Location,
    },
}

/// A contiguous memory region that grows only at its high end.
///
/// Offsets returned by [`extend`](Self::extend) and accepted by the byte
/// accessors are relative to [`heap_lo`](Self::heap_lo).
pub trait HeapProvider {
    /// Moves the break up by `delta` bytes.
    ///
    /// Returns the offset of the first newly claimed byte (the old break).
    /// On failure the region is left exactly as it was.
    fn extend(&mut self, delta: usize) -> Result<usize, ExtendError>;

    /// Moves the break back to the start of the region, releasing every byte.
    fn reset(&mut self);

    /// Returns the bytes between the start of the region and the break.
    fn bytes(&self) -> &[u8];

    /// Returns a mutable view of the bytes between the start of the region
    /// and the break.
    fn bytes_mut(&mut self) -> &mut [u8];

    /// Offset of the first byte of the region.
    fn heap_lo(&self) -> usize {
        0
    }

    /// Offset one past the last claimed byte (the current break).
    fn heap_hi(&self) -> usize {
        self.heap_lo() + self.heap_size()
    }

    /// Number of bytes currently claimed.
    fn heap_size(&self) -> usize {
        self.bytes().len()
    }
}

/// A heap region backed by an owned, bounded vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arena {
    bytes: Vec<u8>,
    max_size: usize,
}

impl Default for Arena {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_SIZE)
    }
}

impl Arena {
    /// Upper bound used by [`Arena::default`] (20 MiB).
    pub const DEFAULT_MAX_SIZE: usize = 20 * 1024 * 1024;

    /// Creates an empty arena that can grow up to `max_size` bytes.
    ///
    /// No storage is reserved until the first [`extend`](HeapProvider::extend).
    #[must_use]
    pub const fn new(max_size: usize) -> Self {
        Self {
            bytes: Vec::new(),
            max_size,
        }
    }

    /// Maximum number of bytes the arena will ever hand out.
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Number of bytes that can still be claimed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.max_size - self.bytes.len()
    }
}

impl HeapProvider for Arena {
    fn extend(&mut self, delta: usize) -> Result<usize, ExtendError> {
        let available = self.remaining();
        ensure!(
            delta <= available,
            ExhaustedSnafu {
                requested: delta,
                available,
            }
        );

        self.bytes
            .try_reserve(delta)
            .context(ReserveSnafu { requested: delta })?;

        let start = self.bytes.len();
        self.bytes.resize(start + delta, 0);
        log::trace!("arena: break moved {start:#x} -> {:#x}", self.bytes.len());
        Ok(start)
    }

    fn reset(&mut self) {
        self.bytes.clear();
    }

    fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

/// A heap region carved out of a borrowed buffer.
///
/// The buffer's length is the hard upper bound of the heap. Bytes past the
/// break keep whatever the caller left in them until they are claimed.
#[derive(Debug)]
pub struct SliceArena<'a> {
    buf: &'a mut [u8],
    brk: usize,
}

impl<'a> SliceArena<'a> {
    /// Creates an empty heap on top of `buf`.
    #[must_use]
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, brk: 0 }
    }

    /// Number of bytes that can still be claimed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.brk
    }
}

impl HeapProvider for SliceArena<'_> {
    fn extend(&mut self, delta: usize) -> Result<usize, ExtendError> {
        let available = self.remaining();
        ensure!(
            delta <= available,
            ExhaustedSnafu {
                requested: delta,
                available,
            }
        );

        let start = self.brk;
        self.brk += delta;
        log::trace!("slice arena: break moved {start:#x} -> {:#x}", self.brk);
        Ok(start)
    }

    fn reset(&mut self) {
        self.brk = 0;
    }

    fn bytes(&self) -> &[u8] {
        &self.buf[..self.brk]
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..self.brk]
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_extend_returns_old_break() {
        let mut arena = Arena::new(1024);
        assert_eq!(arena.extend(32).unwrap(), 0);
        assert_eq!(arena.extend(16).unwrap(), 32);
        assert_eq!(arena.heap_size(), 48);
        assert_eq!(arena.heap_lo(), 0);
        assert_eq!(arena.heap_hi(), 48);
        assert_eq!(arena.bytes().len(), 48);
    }

    #[test]
    fn test_arena_extend_zero() {
        let mut arena = Arena::new(1024);
        arena.extend(16).unwrap();
        assert_eq!(arena.extend(0).unwrap(), 16);
        assert_eq!(arena.heap_size(), 16);
    }

    #[test]
    fn test_arena_exhausted_leaves_region_untouched() {
        let mut arena = Arena::new(64);
        arena.extend(48).unwrap();
        arena.bytes_mut()[0] = 0xaa;

        let err = arena.extend(32).unwrap_err();
        assert!(matches!(
            err,
            ExtendError::Exhausted {
                requested: 32,
                available: 16,
                ..
            }
        ));
        assert_eq!(arena.heap_size(), 48);
        assert_eq!(arena.bytes()[0], 0xaa);

        // The exact remainder can still be claimed.
        assert_eq!(arena.extend(16).unwrap(), 48);
        assert_eq!(arena.remaining(), 0);
    }

    #[test]
    fn test_arena_reset() {
        let mut arena = Arena::default();
        assert_eq!(arena.max_size(), Arena::DEFAULT_MAX_SIZE);
        arena.extend(4096).unwrap();
        arena.reset();
        assert_eq!(arena.heap_size(), 0);
        assert_eq!(arena.extend(8).unwrap(), 0);
    }

    #[test]
    fn test_arena_keeps_contents_across_growth() {
        let mut arena = Arena::new(1 << 20);
        arena.extend(8).unwrap();
        arena.bytes_mut().copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        arena.extend(1 << 19).unwrap();
        assert_eq!(&arena.bytes()[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_slice_arena() {
        let mut buf = [0x11_u8; 128];
        let mut arena = SliceArena::new(&mut buf);
        assert_eq!(arena.heap_size(), 0);
        assert_eq!(arena.extend(64).unwrap(), 0);
        assert_eq!(arena.extend(64).unwrap(), 64);
        assert!(arena.extend(1).is_err());
        assert_eq!(arena.bytes().len(), 128);
        assert!(arena.bytes().iter().all(|&b| b == 0x11));

        arena.reset();
        assert_eq!(arena.heap_size(), 0);
        assert_eq!(arena.remaining(), 128);
    }
}
