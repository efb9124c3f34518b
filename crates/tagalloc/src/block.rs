//! Block references and physical navigation.
//!
//! A block is named by the offset of its header word. Everything else about
//! it (size, status, footer, neighbors) is derived from the boundary tags
//! stored in the heap bytes:
//!
//! ```text
//!            prev footer   header                          footer
//!          ┌────────────┬──────────┬────────────────────┬──────────┬──────────┐
//!    ...   │ (psize, a) │ (size, a)│      payload       │ (size, a)│ next hdr │ ...
//!          └────────────┴──────────┴────────────────────┴──────────┴──────────┘
//!                       ▲          ▲                                ▲
//!                   Block::start   Block::addr          Block::start + size
//! ```
//!
//! Stepping to the previous block reads the word just below the header,
//! which is always a footer because the prologue precedes every real block.

use core::{fmt, ops::Range};

use crate::{WORD_SIZE, tag::Tag};

/// Heap-relative address of an allocated payload.
///
/// Addresses are byte offsets from the start of the heap region, so they
/// remain meaningful when the provider's storage moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Addr(usize);

impl Addr {
    #[cfg(test)]
    pub(crate) const fn from_offset(offset: usize) -> Self {
        Self(offset)
    }

    /// Returns the byte offset of the payload from the start of the heap.
    #[must_use]
    pub const fn offset(self) -> usize {
        self.0
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::LowerHex for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl fmt::UpperHex for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::UpperHex::fmt(&self.0, f)
    }
}

/// A block, identified by the offset of its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct Block(usize);

impl Block {
    pub(crate) const fn at(start: usize) -> Self {
        Self(start)
    }

    pub(crate) const fn from_addr(addr: Addr) -> Self {
        Self(addr.0 - WORD_SIZE)
    }

    /// Offset of the header word.
    pub(crate) const fn start(self) -> usize {
        self.0
    }

    /// Address of the first payload byte.
    pub(crate) const fn addr(self) -> Addr {
        Addr(self.0 + WORD_SIZE)
    }

    pub(crate) fn tag(self, mem: &[u8]) -> Tag {
        Tag::read(mem, self.0)
    }

    pub(crate) fn size(self, mem: &[u8]) -> usize {
        self.tag(mem).size()
    }

    pub(crate) fn is_allocated(self, mem: &[u8]) -> bool {
        self.tag(mem).is_allocated()
    }

    /// Offset of the footer word, derived from the size in the header.
    pub(crate) fn footer(self, mem: &[u8]) -> usize {
        self.0 + self.size(mem) - WORD_SIZE
    }

    /// Offset one past the footer.
    pub(crate) fn end(self, mem: &[u8]) -> usize {
        self.0 + self.size(mem)
    }

    /// The physically following block (possibly the epilogue).
    pub(crate) fn next(self, mem: &[u8]) -> Self {
        Self(self.end(mem))
    }

    /// Tag of the physically preceding block, read from its footer.
    pub(crate) fn prev_tag(self, mem: &[u8]) -> Tag {
        Tag::read(mem, self.0 - WORD_SIZE)
    }

    /// The physically preceding block (possibly the prologue).
    pub(crate) fn prev(self, mem: &[u8]) -> Self {
        Self(self.0 - self.prev_tag(mem).size())
    }

    /// Byte range between the header and the footer.
    pub(crate) fn payload(self, mem: &[u8]) -> Range<usize> {
        self.0 + WORD_SIZE..self.footer(mem)
    }

    /// Writes identical header and footer tags for a block of `size` bytes.
    pub(crate) fn set_tags(self, mem: &mut [u8], size: usize, allocated: bool) {
        let tag = Tag::new(size, allocated);
        tag.write(mem, self.0);
        tag.write(mem, self.0 + size - WORD_SIZE);
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block@{:#x}", self.0)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    /// padding | prologue (16) | a (32, alloc) | b (48, free) | epilogue
    fn sample_heap() -> [u8; 112] {
        let mut mem = [0_u8; 112];
        Block::at(8).set_tags(&mut mem, 16, true);
        Block::at(24).set_tags(&mut mem, 32, true);
        Block::at(56).set_tags(&mut mem, 48, false);
        Tag::EPILOGUE.write(&mut mem, 104);
        mem
    }

    #[test]
    fn test_addr_round_trip() {
        let block = Block::at(24);
        assert_eq!(block.addr().offset(), 32);
        assert_eq!(Block::from_addr(block.addr()), block);
        assert_eq!(Addr::from_offset(32).to_string(), "0x20");
    }

    #[test]
    fn test_tags() {
        let mem = sample_heap();
        let a = Block::at(24);
        assert_eq!(a.size(&mem), 32);
        assert!(a.is_allocated(&mem));
        assert_eq!(a.footer(&mem), 48);
        assert_eq!(Tag::read(&mem, a.footer(&mem)), a.tag(&mem));
        assert_eq!(a.payload(&mem), 32..48);
    }

    #[test]
    fn test_navigation() {
        let mem = sample_heap();
        let prologue = Block::at(8);
        let a = Block::at(24);
        let b = Block::at(56);

        assert_eq!(prologue.next(&mem), a);
        assert_eq!(a.next(&mem), b);
        assert_eq!(b.prev(&mem), a);
        assert_eq!(a.prev(&mem), prologue);
        assert!(a.prev_tag(&mem).is_allocated());
        assert!(!b.is_allocated(&mem));

        let epilogue = b.next(&mem);
        assert_eq!(epilogue.start(), 104);
        assert_eq!(epilogue.tag(&mem), Tag::EPILOGUE);
    }

    #[test]
    fn test_set_tags_overwrites_both_ends() {
        let mut mem = sample_heap();
        let a = Block::at(24);
        a.set_tags(&mut mem, 80, false);
        assert_eq!(a.size(&mem), 80);
        assert_eq!(a.next(&mem).start(), 104);
        assert_eq!(Tag::read(&mem, 96), Tag::new(80, false));
    }
}
