//! Boundary-tag words.
//!
//! Every block carries the same 64-bit word at both ends:
//!
//! ```text
//!  63                                              3   2   1   0
//! ┌─────────────────────────────────────────────────┬───┬───┬───┐
//! │ block size (multiple of 16, so bit 3 is zero)   │ 0 │ 0 │ A │
//! └─────────────────────────────────────────────────┴───┴───┴───┘
//!                                                     reserved  allocated
//! ```

use bitflags::bitflags;
use dataview::DataView;
use platform_cast::{CastFrom as _, CastInto as _};

bitflags! {
    /// Status bits stored in the low end of a boundary tag.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct TagFlags: u64 {
        /// Allocated Bit of a boundary tag.
        ///
        /// If set, the block's payload belongs to a client.
        const ALLOCATED = 1 << 0;
    }
}

const FLAGS_MASK: u64 = 0b001;
const RESERVED_MASK: u64 = 0b110;
const SIZE_MASK: u64 = !0b111;

const _: () = assert!(FLAGS_MASK | RESERVED_MASK | SIZE_MASK == u64::MAX);
const _: () = assert!(FLAGS_MASK & RESERVED_MASK == 0);
const _: () = assert!((FLAGS_MASK | RESERVED_MASK) & SIZE_MASK == 0);

/// Reads the native-endian word at `offset`.
///
/// # Panics
///
/// Panics if the word does not lie entirely inside `mem`.
pub(crate) fn load_word(mem: &[u8], offset: usize) -> u64 {
    DataView::from(mem).read::<u64>(offset)
}

/// Writes `value` as a native-endian word at `offset`.
///
/// # Panics
///
/// Panics if the word does not lie entirely inside `mem`.
pub(crate) fn store_word(mem: &mut [u8], offset: usize, value: u64) {
    DataView::from_mut(mem).write(offset, &value);
}

/// A packed `(size, allocated)` boundary tag.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Tag(u64);

impl Tag {
    /// Tag of the zero-sized, allocated epilogue header.
    pub(crate) const EPILOGUE: Self = Self(TagFlags::ALLOCATED.bits());

    /// Packs a block size and allocation status.
    ///
    /// # Panics
    ///
    /// Panics if `size` has any of its three low bits set.
    pub(crate) fn new(size: usize, allocated: bool) -> Self {
        let size_bits = u64::cast_from(size);
        assert!(
            size_bits & SIZE_MASK == size_bits,
            "block size {size:#x} collides with tag flag bits"
        );

        let flags = if allocated {
            TagFlags::ALLOCATED
        } else {
            TagFlags::empty()
        };
        Self(size_bits | flags.bits())
    }

    pub(crate) fn read(mem: &[u8], offset: usize) -> Self {
        Self(load_word(mem, offset))
    }

    pub(crate) fn write(self, mem: &mut [u8], offset: usize) {
        store_word(mem, offset, self.0);
    }

    pub(crate) fn bits(self) -> u64 {
        self.0
    }

    pub(crate) fn size(self) -> usize {
        (self.0 & SIZE_MASK).cast_into()
    }

    pub(crate) fn flags(self) -> TagFlags {
        TagFlags::from_bits_retain(self.0 & FLAGS_MASK)
    }

    pub(crate) fn is_allocated(self) -> bool {
        self.flags().contains(TagFlags::ALLOCATED)
    }

    /// Bits 1 and 2, which must read as zero in every well-formed tag.
    pub(crate) fn reserved_bits(self) -> u64 {
        self.0 & RESERVED_MASK
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack() {
        let tag = Tag::new(48, true);
        assert_eq!(tag.bits(), 0x31);
        assert_eq!(tag.size(), 48);
        assert!(tag.is_allocated());
        assert_eq!(tag.reserved_bits(), 0);

        let tag = Tag::new(4096, false);
        assert_eq!(tag.bits(), 4096);
        assert_eq!(tag.size(), 4096);
        assert!(!tag.is_allocated());
    }

    #[test]
    fn test_epilogue() {
        assert_eq!(Tag::EPILOGUE, Tag::new(0, true));
        assert_eq!(Tag::EPILOGUE.size(), 0);
        assert!(Tag::EPILOGUE.is_allocated());
    }

    #[test]
    fn test_reserved_bits_are_not_flags() {
        let tag = Tag(64 | 0b110);
        assert_eq!(tag.size(), 64);
        assert!(!tag.is_allocated());
        assert_eq!(tag.reserved_bits(), 0b110);
    }

    #[test]
    #[should_panic(expected = "collides with tag flag bits")]
    fn test_unaligned_size() {
        let _ = Tag::new(20, false);
    }

    #[test]
    fn test_read_write() {
        let mut mem = [0_u8; 24];
        Tag::new(32, true).write(&mut mem, 8);
        assert_eq!(Tag::read(&mem, 8), Tag::new(32, true));
        assert_eq!(load_word(&mem, 0), 0);
        assert_eq!(load_word(&mem, 16), 0);

        store_word(&mut mem, 16, 0xdead_beef);
        assert_eq!(load_word(&mem, 16), 0xdead_beef);
    }

    #[test]
    #[should_panic(expected = "invalid offset")]
    fn test_read_out_of_bounds() {
        let mem = [0_u8; 12];
        let _ = Tag::read(&mem, 8);
    }
}
