//! This crate implements the TLSF (Two-Level Segregated Fit) dynamic memory
//! allocation algorithm¹.
//!
//!  - **Allocation and deallocation operations are guaranteed to complete in
//!    constant time.** TLSF is suitable for real-time applications.
//!
//!  - **The memory pool is provided by an application.** An [`Allocator`] does
//!    not talk to the OS directly; it asks a [`PoolSource`] for backing
//!    memory, lazily, in fixed-size chunks. Examples of a `PoolSource`
//!    include a `static` array for global allocation, or a block carved out
//!    of a parent allocator for arena-style use.
//!
//!  - **This crate supports `#![no_std]`.** It can be used in bare-metal and
//!    RTOS-based applications.
//!
//! <sub>¹ M. Masmano, I. Ripoll, A. Crespo and J. Real, "TLSF: a new dynamic
//! memory allocator for real-time systems," *Proceedings. 16th Euromicro
//! Conference on Real-Time Systems*, 2004. ECRTS 2004., Catania, Italy, 2004,
//! pp. 79-88, doi: 10.1109/EMRTS.2004.1311009.</sub>
//!
//! # Example
//!
//! ```rust,no_run
//! use tlsf::{Allocator, PoolSource};
//! use core::ptr::NonNull;
//!
//! struct StaticPool(Option<&'static mut [u8]>);
//!
//! unsafe impl PoolSource for StaticPool {
//!     fn acquire_pool(&mut self, size: usize) -> Option<NonNull<[u8]>> {
//!         let buf = self.0.take()?;
//!         (buf.len() >= size).then(|| NonNull::new(buf as *mut [u8]).unwrap())
//!     }
//! }
//!
//! let pool_storage: &'static mut [u8] = Box::leak(vec![0u8; 65536].into_boxed_slice());
//! let mut a: Allocator<StaticPool, u8, u8, 8, 4, 1> =
//!     Allocator::new(StaticPool(Some(pool_storage)), 65536);
//!
//! unsafe {
//!     let ptr = a.allocate(256).unwrap();
//!     a.deallocate(ptr);
//! }
//! ```
//!
//! # Details
//!
//! ## Differences from the Original Algorithm
//!
//! Physical-neighbor lookups (used while splitting and coalescing blocks) are
//! answered by consulting the pool registry's address ranges rather than by
//! a last-block-in-pool sentinel bit. This keeps the pool registry
//! load-bearing rather than bookkeeping-only, and avoids ever comparing
//! unrelated raw pointers (comparing their `usize` addresses instead, which
//! is always well-defined).
#![no_std]
#![cfg_attr(feature = "doc_cfg", feature(doc_cfg))]

mod allocator;
mod block;
mod error;
mod index;
pub mod int;
mod pool;

pub use self::{
    allocator::Allocator,
    block::GRANULARITY,
    error::AllocError,
    pool::PoolSource,
};

#[cfg(any(test, feature = "std"))]
extern crate std;
