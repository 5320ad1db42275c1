//! A FUSE filesystem backed by a chunked blob store.
//!
//! Paths map one-to-one onto named blob records; POSIX attributes travel in
//! each record's content-type field; reads are served chunk by chunk; writes
//! are buffered per open handle and materialized as a whole new blob on
//! release. Stat results are memoized in a distributed attr cache whose peer
//! list is exposed (and extendable) through a synthetic `/proc` tree.
//!
//! The blob store and the attr cache are consumed through the traits in
//! [`store`] and [`cache`]; [`memory`] ships volatile reference backends.

pub mod cache;
pub mod codec;
pub mod config;
pub mod dir;
pub mod entry;
pub mod error;
pub mod file;
pub mod memory;
pub mod ops;
pub mod pool;
pub mod proc;
pub mod store;
pub mod symlink;

pub use cache::{CacheClient, CacheConn, CacheError, CachePeer};
pub use config::{Config, ConfigError, CHUNK_SIZE};
pub use error::{FsError, FsResult};
pub use memory::{MemoryCache, MemoryStore};
pub use ops::{GridFs, DISPATCH_THREADS};
pub use store::{
    store_pool, BlobId, BlobListing, BlobRecord, BlobStore, Credentials, RecordUpdate, StoreConn,
    StoreError, StorePool,
};
