//
// Client seam for the distributed attr cache plus the stat memoization
// built on top of it. The cache is best effort: a connection problem on the
// hot path degrades to a miss, never to a failed callback.
//


use std::fmt;
use std::sync::Arc;

use log::warn;
use thiserror::Error;

use crate::entry::Stat;
use crate::pool::Pool;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cannot reach the attr cache: {0}")]
    Connect(String),
}

/// One cache server endpoint, as shown under `/proc/instances`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePeer {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for CachePeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

pub trait CacheConn: Send {
    fn get(&mut self, key: &str) -> Option<Vec<u8>>;
    fn set(&mut self, key: &str, value: &[u8]);
    fn delete(&mut self, key: &str);
}

/// Connection factory plus client-side peer topology. Peer membership is
/// process-lifetime state, mutated only through `/proc/instances`.
pub trait CacheClient: Send + Sync {
    fn connect(&self) -> Result<Box<dyn CacheConn>, CacheError>;

    fn peers(&self) -> Vec<CachePeer>;

    /// Append a peer and re-sort the list (stable host ordering, like the
    /// memcached SORT_HOSTS behavior). Callers reject duplicates first.
    fn add_peer(&self, peer: CachePeer);
}

pub type CachePool = Pool<Box<dyn CacheConn>, CacheError>;

/// Memoizes stat results per normalized path under `a:<path>` keys. A
/// handle is leased from the pool for each operation and returned at the
/// end of the callback.
pub struct AttrCache {
    pool: CachePool,
}

impl AttrCache {
    pub fn new(client: Arc<dyn CacheClient>) -> AttrCache {
        AttrCache { pool: Pool::new(move || client.connect()) }
    }

    fn key(path: &str) -> String {
        format!("a:{path}")
    }

    pub fn get(&self, path: &str) -> Option<Stat> {
        match self.pool.lease() {
            Ok(mut conn) => conn.get(&Self::key(path)).as_deref().and_then(Stat::from_bytes),
            Err(err) => {
                warn!("attr cache unavailable, treating {path} as a miss: {err}");
                None
            }
        }
    }

    pub fn set(&self, path: &str, stat: &Stat) {
        match self.pool.lease() {
            Ok(mut conn) => conn.set(&Self::key(path), &stat.to_bytes()),
            Err(err) => warn!("attr cache unavailable, not caching {path}: {err}"),
        }
    }

    pub fn remove(&self, path: &str) {
        match self.pool.lease() {
            Ok(mut conn) => conn.delete(&Self::key(path)),
            Err(err) => warn!("attr cache unavailable, not evicting {path}: {err}"),
        }
    }
}
