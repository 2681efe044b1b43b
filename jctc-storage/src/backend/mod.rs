//! Blob Store Backends
//!
//! - **local**: filesystem, atomic write-once blobs
//! - **memory**: in-process, for tests

pub mod local;
pub mod memory;
pub mod traits;

pub use local::LocalBlobStore;
pub use memory::MemoryBlobStore;
pub use traits::{sha256_hex, BackendType, BlobInfo, BlobStore, HealthStatus};
