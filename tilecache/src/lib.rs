use thiserror::Error;

pub mod buffer;
pub mod cache;
#[cfg(feature = "diagnostics")]
pub mod diag;
pub mod image;
pub mod rect;
pub mod registry;
pub mod tracked;

/// The one recoverable failure here: running out of memory while growing or
/// creating a buffer's backing block. Everything else is a caller contract
/// violation and panics.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    #[error("out of memory: failed to allocate {requested} bytes of pixel data")]
    OutOfMemory { requested: usize },
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;
