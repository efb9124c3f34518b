use heap_arena::ExtendError;
use snafu::{Location, Snafu};

/// Errors that prevent a heap from being created or reset.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum InitError {
    #[snafu(display(
        "invalid chunk size {chunk_size}: must be a multiple of 16 and at least 32 bytes"
    ))]
    InvalidChunkSize {
        chunk_size: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("failed to lay out prologue and epilogue"))]
    Skeleton {
        #[snafu(source)]
        source: ExtendError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("failed to create the initial free block"))]
    InitialChunk {
        #[snafu(source)]
        source: AllocError,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Errors returned by allocating operations.
///
/// A zero-sized request is not an error: it yields `Ok(None)`.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AllocError {
    #[snafu(display("out of memory: heap provider refused to grow by {requested} bytes"))]
    OutOfMemory {
        requested: usize,
        #[snafu(source)]
        source: ExtendError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display(
        "cannot allocate {requested} bytes: the heap has no region after a failed reset"
    ))]
    Uninitialized {
        requested: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("request of {size} bytes overflows the block size range"))]
    SizeOverflow {
        size: usize,
        #[snafu(implicit)]
        location: Location,
    },
}
