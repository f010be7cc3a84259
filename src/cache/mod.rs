//! Read-through result cache
//!
//! - `backend`: the `CacheBackend` trait plus the moka-backed and no-op implementations
//! - `keys`: key construction, parameter fingerprints and per-write invalidation sets
//! - `read_through`: hit/miss handling that never lets a cache failure reach the caller

mod backend;
mod keys;
mod read_through;

pub use backend::{glob_match, CacheBackend, MokaBackend, NoopBackend};
pub use keys::{canonical_json, fingerprint, CacheClass, CacheKey, Invalidation};
pub use read_through::{CacheStats, ReadThrough};
