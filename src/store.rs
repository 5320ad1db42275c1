//
// Client seam for the chunked blob store.
//
// The core only ever needs a handful of verbs: look a record up by filename,
// stream one chunk, store a whole blob, delete, enumerate by filename regex,
// and issue a targeted field update. Connections are leased from a pool and
// carry a per-connection last-error channel used by the synchronize step
// after every mutation.
//

use std::sync::Arc;

use thiserror::Error;

use crate::error::FsError;
use crate::pool::{Lease, Pool};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot reach the blob store: {0}")]
    Connect(String),

    /// The store rejected the configured credentials.
    #[error("authentication refused: {0}")]
    Unauthorized(String),

    /// The record (or chunk) addressed by the operation does not exist.
    #[error("no such record")]
    Missing,

    #[error("{0}")]
    Backend(String),
}

impl From<StoreError> for FsError {
    fn from(err: StoreError) -> FsError {
        match err {
            StoreError::Missing => FsError::NotFound,
            other => FsError::Backend(other.to_string()),
        }
    }
}

/// Opaque record identity, stable for the record's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobId(pub u64);

/// The `files` side of a stored blob. Chunk payloads are fetched separately
/// by `(id, index)`.
#[derive(Debug, Clone)]
pub struct BlobRecord {
    pub id: BlobId,
    pub filename: String,
    pub length: u64,
    pub chunk_size: u32,
    pub content_type: String,
}

/// One row of a filename-regex query. The cursor carries the content type
/// along so directory listings can report entry kinds without extra lookups.
#[derive(Debug, Clone)]
pub struct BlobListing {
    pub filename: String,
    pub content_type: String,
}

/// Targeted in-place update of an existing record. These are the only two
/// fields the core ever mutates without rewriting the whole blob.
#[derive(Debug, Clone)]
pub enum RecordUpdate {
    ContentType(String),
    Length(u64),
}

pub trait StoreConn: Send {
    fn find(&mut self, filename: &str) -> Result<Option<BlobRecord>, StoreError>;

    fn chunk(&mut self, id: BlobId, index: u32) -> Result<Vec<u8>, StoreError>;

    /// Store a whole new blob under `filename`, replacing any live record
    /// with that name. The payload is split into `chunk_size` chunks; only
    /// the last chunk may be short.
    fn store(
        &mut self,
        filename: &str,
        content_type: &str,
        chunk_size: u32,
        data: &[u8],
    ) -> Result<(), StoreError>;

    fn remove(&mut self, filename: &str) -> Result<(), StoreError>;

    /// Enumerate records whose filename matches `filename_regex`. The result
    /// may contain duplicate filenames while the store is replicating.
    fn list(&mut self, filename_regex: &str) -> Result<Vec<BlobListing>, StoreError>;

    fn update(&mut self, id: BlobId, update: RecordUpdate) -> Result<(), StoreError>;

    /// Outcome of the last write on this connection; `Some` is a failure.
    fn last_error(&mut self) -> Option<String>;

    fn authenticate(&mut self, db: &str, user: &str, password: &str) -> Result<(), StoreError>;
}

/// Connection factory. Implemented by the deployment backend; the crate
/// ships `MemoryStore` as the in-process reference implementation.
pub trait BlobStore: Send + Sync {
    fn connect(&self) -> Result<Box<dyn StoreConn>, StoreError>;
}

pub type StorePool = Pool<Box<dyn StoreConn>, StoreError>;
pub type StoreLease = Lease<Box<dyn StoreConn>, StoreError>;

/// Credentials applied to every new connection the pool creates.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub db: String,
    pub user: String,
    pub password: String,
}

/// Build the connection pool, authenticating each fresh connection when
/// credentials are configured.
pub fn store_pool(store: Arc<dyn BlobStore>, auth: Option<Credentials>) -> StorePool {
    Pool::new(move || {
        let mut conn = store.connect()?;
        if let Some(auth) = &auth {
            conn.authenticate(&auth.db, &auth.user, &auth.password)?;
        }
        Ok(conn)
    })
}
