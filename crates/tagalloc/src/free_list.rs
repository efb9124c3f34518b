//! Explicit free list.
//!
//! The list is intrusive: a free block stores its neighbors' header offsets
//! in the first two payload words. Offset zero is the heap's padding word and
//! never starts a block, so it encodes "no neighbor".
//!
//! ```text
//! Free Block Layout:
//! ┌──────────┬────────────┬────────────┬─────────────┬──────────┐
//! │  header  │ next: u64  │ prev: u64  │   unused    │  footer  │
//! └──────────┴────────────┴────────────┴─────────────┴──────────┘
//! ```
//!
//! Insertion happens at the head, so iteration yields the most recently freed
//! block first.

use platform_cast::{CastFrom as _, CastInto as _};

use crate::{
    WORD_SIZE,
    block::Block,
    tag::{load_word, store_word},
};

const NEXT_OFFSET: usize = WORD_SIZE;
const PREV_OFFSET: usize = 2 * WORD_SIZE;

fn load_link(mem: &[u8], offset: usize) -> Option<Block> {
    let raw = load_word(mem, offset);
    (raw != 0).then(|| Block::at(raw.cast_into()))
}

fn store_link(mem: &mut [u8], offset: usize, link: Option<Block>) {
    let raw = link.map_or(0, |block| u64::cast_from(block.start()));
    store_word(mem, offset, raw);
}

/// Returns the successor of `block` in list order.
pub(crate) fn next(mem: &[u8], block: Block) -> Option<Block> {
    load_link(mem, block.start() + NEXT_OFFSET)
}

/// Returns the predecessor of `block` in list order.
pub(crate) fn prev(mem: &[u8], block: Block) -> Option<Block> {
    load_link(mem, block.start() + PREV_OFFSET)
}

fn set_next(mem: &mut [u8], block: Block, link: Option<Block>) {
    store_link(mem, block.start() + NEXT_OFFSET, link);
}

fn set_prev(mem: &mut [u8], block: Block, link: Option<Block>) {
    store_link(mem, block.start() + PREV_OFFSET, link);
}

/// Head of the doubly linked list of free blocks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FreeList {
    head: Option<Block>,
}

impl FreeList {
    pub(crate) const fn new() -> Self {
        Self { head: None }
    }

    pub(crate) fn head(&self) -> Option<Block> {
        self.head
    }

    /// Pushes `block` at the head of the list.
    ///
    /// `block` must be free and not already linked.
    pub(crate) fn insert(&mut self, mem: &mut [u8], block: Block) {
        debug_assert!(!block.is_allocated(mem), "{block} is allocated");
        debug_assert_ne!(self.head, Some(block), "{block} is already the head");

        set_next(mem, block, self.head);
        set_prev(mem, block, None);
        if let Some(head) = self.head {
            set_prev(mem, head, Some(block));
        }
        self.head = Some(block);
    }

    /// Unlinks `block`, which must currently be in the list.
    pub(crate) fn remove(&mut self, mem: &mut [u8], block: Block) {
        let next = next(mem, block);
        let prev = prev(mem, block);

        if let Some(prev) = prev {
            set_next(mem, prev, next);
        } else {
            debug_assert_eq!(self.head, Some(block), "{block} is not linked");
            self.head = next;
        }
        if let Some(next) = next {
            set_prev(mem, next, prev);
        }
    }

    /// Iterates over the free blocks in list order.
    pub(crate) fn iter<'a>(&self, mem: &'a [u8]) -> Iter<'a> {
        Iter {
            mem,
            cursor: self.head,
        }
    }
}

pub(crate) struct Iter<'a> {
    mem: &'a [u8],
    cursor: Option<Block>,
}

impl Iterator for Iter<'_> {
    type Item = Block;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.cursor?;
        self.cursor = next(self.mem, block);
        Some(block)
    }
}
