//! Tunable allocator parameters.

use snafu::ensure;

use crate::{
    ALIGNMENT, MIN_BLOCK_SIZE,
    error::{InitError, InvalidChunkSizeSnafu},
};

/// Parameters fixed for the lifetime of a [`Heap`](crate::Heap).
///
/// # Examples
///
/// ```
/// use tagalloc::Config;
///
/// let config = Config::new().with_chunk_size(64 * 1024);
/// assert_eq!(config.chunk_size(), 64 * 1024);
/// assert_eq!(Config::default().chunk_size(), Config::DEFAULT_CHUNK_SIZE);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    chunk_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Bytes requested from the provider when the heap is created and on
    /// every growth smaller than this.
    pub const DEFAULT_CHUNK_SIZE: usize = 4096;

    #[must_use]
    pub const fn new() -> Self {
        Self {
            chunk_size: Self::DEFAULT_CHUNK_SIZE,
        }
    }

    /// Sets the minimum number of bytes the heap grows by.
    ///
    /// The value must be a multiple of 16 and at least 32; this is checked
    /// when the heap is created.
    #[must_use]
    pub const fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub(crate) fn validate(self) -> Result<(), InitError> {
        let chunk_size = self.chunk_size;
        ensure!(
            chunk_size >= MIN_BLOCK_SIZE && chunk_size.is_multiple_of(ALIGNMENT),
            InvalidChunkSizeSnafu { chunk_size }
        );
        Ok(())
    }
}
