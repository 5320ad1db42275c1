//
// In-process reference backends: a volatile blob store and a volatile attr
// cache. These are what the tests run against, and what the binary mounts
// when asked for a volatile filesystem; deployment backends implement the
// same traits against the real services.
//


use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use regex::Regex;

use crate::cache::{CacheClient, CacheConn, CacheError, CachePeer};
use crate::store::{
    BlobId, BlobListing, BlobRecord, BlobStore, RecordUpdate, StoreConn, StoreError,
};

struct StoredBlob {
    id: u64,
    content_type: String,
    length: u64,
    chunk_size: u32,
    chunks: Vec<Vec<u8>>,
}

struct StoreState {
    blobs: HashMap<String, StoredBlob>,
}

/// Volatile blob store keyed by filename within one namespace
/// (`<db>.<collection_prefix>`).
pub struct MemoryStore {
    namespace: String,
    credentials: Option<(String, String, String)>,
    state: Arc<RwLock<StoreState>>,
    next_id: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new(namespace: impl Into<String>) -> MemoryStore {
        MemoryStore {
            namespace: namespace.into(),
            credentials: None,
            state: Arc::new(RwLock::new(StoreState { blobs: HashMap::new() })),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Require `authenticate` with exactly these credentials.
    pub fn with_credentials(mut self, db: &str, user: &str, password: &str) -> MemoryStore {
        self.credentials = Some((db.into(), user.into(), password.into()));
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

impl BlobStore for MemoryStore {
    fn connect(&self) -> Result<Box<dyn StoreConn>, StoreError> {
        Ok(Box::new(MemoryConn {
            credentials: self.credentials.clone(),
            state: Arc::clone(&self.state),
            next_id: Arc::clone(&self.next_id),
            last_error: None,
        }))
    }
}

struct MemoryConn {
    credentials: Option<(String, String, String)>,
    state: Arc<RwLock<StoreState>>,
    next_id: Arc<AtomicU64>,
    last_error: Option<String>,
}

impl MemoryConn {
    fn record_of(blob: &StoredBlob, filename: &str) -> BlobRecord {
        BlobRecord {
            id: BlobId(blob.id),
            filename: filename.to_owned(),
            length: blob.length,
            chunk_size: blob.chunk_size,
            content_type: blob.content_type.clone(),
        }
    }
}

impl StoreConn for MemoryConn {
    fn find(&mut self, filename: &str) -> Result<Option<BlobRecord>, StoreError> {
        let state = self.state.read().unwrap();
        Ok(state.blobs.get(filename).map(|blob| Self::record_of(blob, filename)))
    }

    fn chunk(&mut self, id: BlobId, index: u32) -> Result<Vec<u8>, StoreError> {
        let state = self.state.read().unwrap();
        state
            .blobs
            .values()
            .find(|blob| blob.id == id.0)
            .and_then(|blob| blob.chunks.get(index as usize))
            .cloned()
            .ok_or(StoreError::Missing)
    }

    fn store(
        &mut self,
        filename: &str,
        content_type: &str,
        chunk_size: u32,
        data: &[u8],
    ) -> Result<(), StoreError> {
        if chunk_size == 0 {
            self.last_error = Some("chunk size must be positive".to_owned());
            return Err(StoreError::Backend("chunk size must be positive".to_owned()));
        }
        let chunks = data.chunks(chunk_size as usize).map(<[u8]>::to_vec).collect();
        let blob = StoredBlob {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            content_type: content_type.to_owned(),
            length: data.len() as u64,
            chunk_size,
            chunks,
        };
        self.state.write().unwrap().blobs.insert(filename.to_owned(), blob);
        self.last_error = None;
        Ok(())
    }

    fn remove(&mut self, filename: &str) -> Result<(), StoreError> {
        let removed = self.state.write().unwrap().blobs.remove(filename);
        self.last_error = None;
        match removed {
            Some(_) => Ok(()),
            None => Err(StoreError::Missing),
        }
    }

    fn list(&mut self, filename_regex: &str) -> Result<Vec<BlobListing>, StoreError> {
        let matcher =
            Regex::new(filename_regex).map_err(|err| StoreError::Backend(err.to_string()))?;
        let state = self.state.read().unwrap();
        Ok(state
            .blobs
            .iter()
            .filter(|(filename, _)| matcher.is_match(filename))
            .map(|(filename, blob)| BlobListing {
                filename: filename.clone(),
                content_type: blob.content_type.clone(),
            })
            .collect())
    }

    fn update(&mut self, id: BlobId, update: RecordUpdate) -> Result<(), StoreError> {
        let mut state = self.state.write().unwrap();
        let blob = state.blobs.values_mut().find(|blob| blob.id == id.0);
        let Some(blob) = blob else {
            self.last_error = Some("no record matched the update filter".to_owned());
            return Err(StoreError::Missing);
        };
        match update {
            RecordUpdate::ContentType(content_type) => blob.content_type = content_type,
            RecordUpdate::Length(length) => blob.length = length,
        }
        self.last_error = None;
        Ok(())
    }

    fn last_error(&mut self) -> Option<String> {
        self.last_error.clone()
    }

    fn authenticate(&mut self, db: &str, user: &str, password: &str) -> Result<(), StoreError> {
        match &self.credentials {
            None => Ok(()),
            Some((want_db, want_user, want_password))
                if want_db == db && want_user == user && want_password == password =>
            {
                Ok(())
            }
            Some((_, want_user, _)) => Err(StoreError::Unauthorized(format!(
                "credentials rejected for user {want_user}"
            ))),
        }
    }
}

/// Volatile attr cache with the client-side peer topology exposed through
/// `/proc/instances`. A new client starts with the conventional local peer.
pub struct MemoryCache {
    data: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    peers: RwLock<Vec<CachePeer>>,
}

impl MemoryCache {
    pub fn new() -> MemoryCache {
        MemoryCache {
            data: Arc::new(RwLock::new(HashMap::new())),
            peers: RwLock::new(vec![CachePeer { host: "localhost".to_owned(), port: 11211 }]),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        MemoryCache::new()
    }
}

impl CacheClient for MemoryCache {
    fn connect(&self) -> Result<Box<dyn CacheConn>, CacheError> {
        Ok(Box::new(MemoryCacheConn { data: Arc::clone(&self.data) }))
    }

    fn peers(&self) -> Vec<CachePeer> {
        self.peers.read().unwrap().clone()
    }

    fn add_peer(&self, peer: CachePeer) {
        let mut peers = self.peers.write().unwrap();
        peers.push(peer);
        peers.sort_by(|a, b| (&a.host, a.port).cmp(&(&b.host, b.port)));
    }
}

struct MemoryCacheConn {
    data: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl CacheConn for MemoryCacheConn {
    fn get(&mut self, key: &str) -> Option<Vec<u8>> {
        self.data.read().unwrap().get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &[u8]) {
        self.data.write().unwrap().insert(key.to_owned(), value.to_vec());
    }

    fn delete(&mut self, key: &str) {
        self.data.write().unwrap().remove(key);
    }
}
