//
// The synthetic tree under <prefix>/proc. Nothing here touches the blob
// store: the tree exposes the attr cache's client-side peer list, and
// creating a file under /proc/instances appends a peer at runtime.
//
//   <prefix>/proc                    directory
//   <prefix>/proc/instances          directory of peer endpoints
//   <prefix>/proc/instances/host:po  one peer, a mode-0000 regular file
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCache;

    #[test]
    fn classification_by_path() {
        assert!(!is_proc_path("", "/procfile"));
        assert!(is_proc_path("", "/proc"));
        assert!(is_proc_path("", "/proc/instances/h"));
        assert!(is_proc_path("/vol", "/vol/proc"));
        assert!(!is_proc_path("/vol", "/proc"));

        assert!(matches!(ProcPath::parse("", "/proc"), Some(ProcPath::Root)));
        assert!(matches!(ProcPath::parse("", "/proc/instances"), Some(ProcPath::Instances)));
        assert!(matches!(
            ProcPath::parse("", "/proc/instances/h:1"),
            Some(ProcPath::Instance(_))
        ));
        assert!(ProcPath::parse("", "/proc/bogus").is_none());
        assert!(ProcPath::parse("", "/proc/instances/a/b").is_none());
    }

    #[test]
    fn stats_are_synthesized() {
        let root = ProcPath::parse("", "/proc").unwrap().stat(500, 100);
        assert!(root.is_dir());
        assert_eq!((root.uid, root.gid), (500, 100));

        let peer = ProcPath::parse("", "/proc/instances/h").unwrap().stat(500, 100);
        assert_eq!(peer.mode, libc::S_IFREG as u32);
        assert_eq!(peer.mode & 0o777, 0);
    }

    #[test]
    fn listing_walks_the_peer_list() {
        let cache = MemoryCache::new();
        let root = ProcPath::parse("", "/proc").unwrap();
        let names: Vec<String> = root
            .list(&cache)
            .unwrap()
            .into_iter()
            .map(|e| e.name.to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, [".", "..", "instances"]);

        let instances = ProcPath::parse("", "/proc/instances").unwrap();
        let names: Vec<String> = instances
            .list(&cache)
            .unwrap()
            .into_iter()
            .map(|e| e.name.to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, [".", "..", "localhost:11211"]);
    }

    #[test]
    fn create_appends_a_peer_with_default_port() {
        let cache = MemoryCache::new();
        ProcPath::parse("", "/proc/instances/peer1").unwrap().create(&cache).unwrap();
        ProcPath::parse("", "/proc/instances/peer2:1234").unwrap().create(&cache).unwrap();

        let peers: Vec<String> = cache.peers().iter().map(CachePeer::to_string).collect();
        assert_eq!(peers, ["localhost:11211", "peer1:11211", "peer2:1234"]);
    }

    #[test]
    fn duplicate_peers_are_rejected() {
        let cache = MemoryCache::new();
        let peer = ProcPath::parse("", "/proc/instances/localhost:11211").unwrap();
        assert!(matches!(peer.create(&cache), Err(FsError::AlreadyExists)));
        assert_eq!(cache.peers().len(), 1);
    }

    #[test]
    fn malformed_endpoints_are_rejected() {
        let cache = MemoryCache::new();
        let trailing = ProcPath::parse("", "/proc/instances/host:").unwrap();
        assert!(trailing.create(&cache).is_err());
        let word = ProcPath::parse("", "/proc/instances/host:http").unwrap();
        assert!(word.create(&cache).is_err());
    }

    #[test]
    fn directories_refuse_creation() {
        let cache = MemoryCache::new();
        let root = ProcPath::parse("", "/proc").unwrap();
        assert!(matches!(root.create(&cache), Err(FsError::NotPermitted)));
    }
}

use std::ffi::OsString;

use fuse_mt::DirectoryEntry;
use fuser::FileType;

use crate::cache::{CacheClient, CachePeer};
use crate::entry::Stat;
use crate::error::{FsError, FsResult};

const DEFAULT_PEER_PORT: u16 = 11211;

/// True when `path` falls inside the synthetic tree.
pub fn is_proc_path(prefix: &str, path: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest == "/proc" || rest.starts_with("/proc/"),
        None => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcPath {
    Root,
    Instances,
    Instance(String),
}

impl ProcPath {
    /// Classify a normalized path inside the tree. Paths under `/proc` that
    /// name nothing we synthesize resolve to `None`.
    pub fn parse(prefix: &str, path: &str) -> Option<ProcPath> {
        let rest = path.strip_prefix(prefix)?;
        match rest {
            "/proc" => Some(ProcPath::Root),
            "/proc/instances" => Some(ProcPath::Instances),
            _ => {
                let name = rest.strip_prefix("/proc/instances/")?;
                if name.is_empty() || name.contains('/') {
                    return None;
                }
                Some(ProcPath::Instance(name.to_owned()))
            }
        }
    }

    pub fn stat(&self, default_uid: u32, default_gid: u32) -> Stat {
        let (mode, nlink, size) = match self {
            ProcPath::Root | ProcPath::Instances => {
                (libc::S_IFDIR as u32 | 0o755, 2, 4096)
            }
            ProcPath::Instance(_) => (libc::S_IFREG as u32, 1, 0),
        };
        Stat { mode, uid: default_uid, gid: default_gid, nlink, size, mtime: 0 }
    }

    pub fn list(&self, cache: &dyn CacheClient) -> FsResult<Vec<DirectoryEntry>> {
        let mut entries = vec![
            DirectoryEntry { name: OsString::from("."), kind: FileType::Directory },
            DirectoryEntry { name: OsString::from(".."), kind: FileType::Directory },
        ];
        match self {
            ProcPath::Root => {
                entries.push(DirectoryEntry {
                    name: OsString::from("instances"),
                    kind: FileType::Directory,
                });
            }
            ProcPath::Instances => {
                for peer in cache.peers() {
                    entries.push(DirectoryEntry {
                        name: OsString::from(peer.to_string()),
                        kind: FileType::RegularFile,
                    });
                }
            }
            ProcPath::Instance(_) => return Err(FsError::NotFound),
        }
        Ok(entries)
    }

    /// `create` under /proc/instances parses `host[:port]` and appends the
    /// peer to the cache client's server list. Duplicates are refused.
    pub fn create(&self, cache: &dyn CacheClient) -> FsResult<()> {
        let name = match self {
            ProcPath::Instance(name) => name,
            ProcPath::Root | ProcPath::Instances => return Err(FsError::NotPermitted),
        };

        let peer = match name.rsplit_once(':') {
            None => CachePeer { host: name.clone(), port: DEFAULT_PEER_PORT },
            Some((host, port)) => {
                let port = port.parse().map_err(|_| {
                    FsError::Backend(format!("invalid cache peer endpoint {name}"))
                })?;
                CachePeer { host: host.to_owned(), port }
            }
        };

        if cache.peers().contains(&peer) {
            return Err(FsError::AlreadyExists);
        }
        log::info!("adding cache peer {peer}");
        cache.add_peer(peer);
        Ok(())
    }
}
