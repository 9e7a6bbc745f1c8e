use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::trace;

use crate::{CacheError, CacheResult};

#[derive(Debug, Default)]
struct Counters {
    blocks: AtomicUsize,
    bytes: AtomicUsize,
    total_allocations: AtomicUsize,
}

/// Instrumented allocator handle. Clones share one set of counters; every
/// block allocated through a handle reports back to it when dropped, so
/// memory is returned exactly once per block.
#[derive(Debug, Clone, Default)]
pub struct TrackedAlloc {
    counters: Arc<Counters>,
}

/// Point-in-time view of a `TrackedAlloc`'s counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocStats {
    /// Blocks currently live.
    pub blocks: usize,
    /// Bytes currently live.
    pub bytes: usize,
    /// Allocations ever made through this handle.
    pub total_allocations: usize,
}

/// One allocated byte block.
pub struct TrackedBlock {
    bytes: Vec<u8>,
    counters: Arc<Counters>,
}

impl TrackedAlloc {
    pub fn new() -> TrackedAlloc {
        TrackedAlloc::default()
    }

    /// Allocates a zero-filled block of exactly `len` bytes. Failure is
    /// reported instead of aborting the process.
    pub fn allocate(&self, len: usize) -> CacheResult<TrackedBlock> {
        let mut bytes = Vec::new();
        if bytes.try_reserve_exact(len).is_err() {
            return Err(CacheError::OutOfMemory { requested: len });
        }
        bytes.resize(len, 0);

        self.counters.blocks.fetch_add(1, Ordering::Relaxed);
        self.counters.bytes.fetch_add(len, Ordering::Relaxed);
        self.counters.total_allocations.fetch_add(1, Ordering::Relaxed);
        trace!(len, "allocated pixel block");

        Ok(TrackedBlock {
            bytes,
            counters: Arc::clone(&self.counters),
        })
    }

    pub fn stats(&self) -> AllocStats {
        AllocStats {
            blocks: self.counters.blocks.load(Ordering::Relaxed),
            bytes: self.counters.bytes.load(Ordering::Relaxed),
            total_allocations: self.counters.total_allocations.load(Ordering::Relaxed),
        }
    }
}

impl TrackedBlock {
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl Drop for TrackedBlock {
    fn drop(&mut self) {
        self.counters.blocks.fetch_sub(1, Ordering::Relaxed);
        self.counters.bytes.fetch_sub(self.bytes.len(), Ordering::Relaxed);
        trace!(len = self.bytes.len(), "freed pixel block");
    }
}

impl Debug for TrackedBlock {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedBlock")
            .field("capacity", &self.bytes.len())
            .finish()
    }
}
