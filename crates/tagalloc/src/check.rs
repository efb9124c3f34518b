//! Heap consistency checker.
//!
//! [`Heap::check`] walks every physical block and then the free list, and
//! reports the first broken invariant. It never runs on the allocation or
//! deallocation paths unless the `check-heap` feature is enabled, and it
//! never panics on a corrupted heap: every word it reads is bounds-checked
//! first.

use alloc::collections::BTreeSet;

use heap_arena::HeapProvider;
use snafu::{Location, Snafu, ensure};

use crate::{
    ALIGNMENT, MIN_BLOCK_SIZE, WORD_SIZE,
    block::Block,
    free_list,
    heap::Heap,
    tag::Tag,
};

/// A broken heap invariant, found by [`Heap::check`].
#[derive(Debug, Snafu)]
pub enum CheckError {
    #[snafu(display("word at {offset:#x} lies outside the heap (size {heap_size:#x})"))]
    OutOfBounds {
        offset: usize,
        heap_size: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("malformed prologue at {offset:#x}: header {header:#x}, footer {footer:#x}"))]
    BadPrologue {
        offset: usize,
        header: u64,
        footer: u64,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("malformed epilogue at {offset:#x}: tag {tag:#x}"))]
    BadEpilogue {
        offset: usize,
        tag: u64,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("epilogue at {offset:#x} does not end the heap (break {brk:#x})"))]
    EpilogueNotAtBreak {
        offset: usize,
        brk: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("block at {block:#x} has reserved tag bits {bits:#b} set"))]
    ReservedBits {
        block: usize,
        bits: u64,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display(
        "block at {block:#x} has size {size}, not a multiple of 16 of at least 32"
    ))]
    BadSize {
        block: usize,
        size: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("payload at {addr:#x} is not 16-byte aligned"))]
    Misaligned {
        addr: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("block at {block:#x}: header {header:#x} differs from footer {footer:#x}"))]
    TagMismatch {
        block: usize,
        header: u64,
        footer: u64,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("adjacent free blocks at {first:#x} and {second:#x}"))]
    AdjacentFree {
        first: usize,
        second: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("free list references {block:#x}, which is not a free block"))]
    NotFree {
        block: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("free list visits {block:#x} more than once"))]
    Duplicate {
        block: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("free block at {block:#x} has a stale back link"))]
    BrokenBackLink {
        block: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("free block at {block:#x} is missing from the free list"))]
    NotListed {
        block: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

fn read_tag(mem: &[u8], offset: usize) -> Result<Tag, CheckError> {
    let heap_size = mem.len();
    ensure!(
        offset.checked_add(WORD_SIZE).is_some_and(|end| end <= heap_size),
        OutOfBoundsSnafu { offset, heap_size }
    );
    Ok(Tag::read(mem, offset))
}

impl<P> Heap<P>
where
    P: HeapProvider,
{
    /// Verifies every heap invariant.
    ///
    /// - prologue and epilogue are intact, and the epilogue ends the heap;
    /// - every block has matching header and footer tags, zero reserved
    ///   bits, a size that is a multiple of 16 and at least 32, and an
    ///   aligned payload;
    /// - the blocks tile the heap without gaps, so their sizes sum to the
    ///   distance between the prologue and the epilogue;
    /// - no two adjacent blocks are free;
    /// - the free list contains exactly the free blocks, once each, with
    ///   consistent back links.
    ///
    /// Cost is linear in the number of blocks.
    pub fn check(&self) -> Result<(), CheckError> {
        let mem = self.memory();
        let Some(prologue) = self.prologue() else {
            // A failed reset leaves an empty region and nothing to walk.
            ensure!(
                mem.is_empty(),
                OutOfBoundsSnafu {
                    offset: WORD_SIZE,
                    heap_size: mem.len(),
                }
            );
            return Ok(());
        };
        let free = check_blocks(mem, prologue)?;
        check_free_list(mem, self.free_list().head(), &free)
    }
}

/// Walks the physical blocks and returns the set of free ones.
fn check_blocks(mem: &[u8], prologue: Block) -> Result<BTreeSet<Block>, CheckError> {
    let prologue_tag = Tag::new(ALIGNMENT, true);
    let header = read_tag(mem, prologue.start())?;
    let footer = read_tag(mem, prologue.start() + WORD_SIZE)?;
    ensure!(
        header == prologue_tag && footer == prologue_tag,
        BadPrologueSnafu {
            offset: prologue.start(),
            header: header.bits(),
            footer: footer.bits(),
        }
    );

    let mut free = BTreeSet::new();
    let mut prev_free: Option<Block> = None;
    let mut block = Block::at(prologue.start() + ALIGNMENT);
    loop {
        let start = block.start();
        let header = read_tag(mem, start)?;
        let size = header.size();

        if size == 0 {
            ensure!(
                header == Tag::EPILOGUE,
                BadEpilogueSnafu {
                    offset: start,
                    tag: header.bits(),
                }
            );
            ensure!(
                start + WORD_SIZE == mem.len(),
                EpilogueNotAtBreakSnafu {
                    offset: start,
                    brk: mem.len(),
                }
            );
            return Ok(free);
        }

        ensure!(
            header.reserved_bits() == 0,
            ReservedBitsSnafu {
                block: start,
                bits: header.reserved_bits(),
            }
        );
        ensure!(
            size >= MIN_BLOCK_SIZE && size.is_multiple_of(ALIGNMENT),
            BadSizeSnafu { block: start, size }
        );
        ensure!(
            block.addr().offset().is_multiple_of(ALIGNMENT),
            MisalignedSnafu {
                addr: block.addr().offset(),
            }
        );

        let Some(end) = start.checked_add(size) else {
            return OutOfBoundsSnafu {
                offset: start,
                heap_size: mem.len(),
            }
            .fail();
        };
        let footer = read_tag(mem, end - WORD_SIZE)?;
        ensure!(
            footer == header,
            TagMismatchSnafu {
                block: start,
                header: header.bits(),
                footer: footer.bits(),
            }
        );

        if header.is_allocated() {
            prev_free = None;
        } else {
            if let Some(prev) = prev_free {
                return AdjacentFreeSnafu {
                    first: prev.start(),
                    second: start,
                }
                .fail();
            }
            free.insert(block);
            prev_free = Some(block);
        }

        block = Block::at(end);
    }
}

fn check_free_list(
    mem: &[u8],
    head: Option<Block>,
    free: &BTreeSet<Block>,
) -> Result<(), CheckError> {
    let mut listed = BTreeSet::new();
    let mut expected_prev = None;
    let mut cursor = head;
    while let Some(block) = cursor {
        // Membership first: only verified free blocks have readable links.
        ensure!(
            free.contains(&block),
            NotFreeSnafu {
                block: block.start(),
            }
        );
        ensure!(
            listed.insert(block),
            DuplicateSnafu {
                block: block.start(),
            }
        );
        ensure!(
            free_list::prev(mem, block) == expected_prev,
            BrokenBackLinkSnafu {
                block: block.start(),
            }
        );
        expected_prev = Some(block);
        cursor = free_list::next(mem, block);
    }

    if let Some(missing) = free.difference(&listed).next() {
        return NotListedSnafu {
            block: missing.start(),
        }
        .fail();
    }
    Ok(())
}
