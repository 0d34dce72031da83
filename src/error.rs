//! The allocator's error taxonomy.
use core::fmt;

/// Failure modes of [`Allocator::allocate`](crate::Allocator::allocate).
///
/// Internal invariant violations are never represented here — they
/// indicate a bug in this crate or a caller's misuse of an `unsafe`
/// contract, and are reported via `debug_assert!`/`panic!` in debug
/// builds instead (see the design document's error-handling section).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// No free-list class held a sufficient block, and the configured
    /// [`PoolSource`](crate::PoolSource) refused to hand out another pool.
    OutOfMemory,
    /// A new pool was needed, but the pool registry is already at its
    /// configured capacity (`MAX_POOLS`).
    TooManyPools,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::OutOfMemory => write!(f, "out of memory"),
            AllocError::TooManyPools => write!(f, "too many pools already registered"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for AllocError {}
