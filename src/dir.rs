//
// Directories are implicit: a path is a directory iff a blob with a
// directory mode exists under it, and its children are whatever blobs sit
// one path segment below. Enumeration is a filename-regex query against the
// store, deduplicated because a replicating backend may answer twice.
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::pool::Pool;
    use crate::store::{store_pool, BlobId, BlobRecord, BlobStore, RecordUpdate, StoreConn, StoreError};
    use std::sync::Arc;

    #[test]
    fn metacharacters_are_escaped() {
        assert_eq!(sibling_pattern("/a.b"), r"^/a\.b/[^/]*$");
        assert_eq!(sibling_pattern("/we[i]rd*+?"), r"^/we\[i\]rd\*\+\?/[^/]*$");
        assert_eq!(sibling_pattern(r"/back\slash"), r"^/back\\slash/[^/]*$");
        assert_eq!(sibling_pattern("/^($|)"), r"^/\^\(\$\|\)/[^/]*$");
    }

    #[test]
    fn pattern_matches_children_but_not_grandchildren() {
        let matcher = regex::Regex::new(&sibling_pattern("/a.b")).unwrap();
        assert!(matcher.is_match("/a.b/x"));
        assert!(matcher.is_match("/a.b/"));
        assert!(!matcher.is_match("/a.b/x/y"));
        assert!(!matcher.is_match("/aXb/x"));
        assert!(!matcher.is_match("/a.b"));
    }

    #[test]
    fn list_emits_dot_entries_then_unique_basenames() {
        let pool = store_pool(Arc::new(seeded_store()), None);
        let mut dir = Directory::open(&pool, "/d", 0, 0).unwrap();

        let entries = dir.list().unwrap();
        let names: Vec<&str> =
            entries.iter().map(|e| e.name.to_str().unwrap()).collect();
        assert_eq!(names, [".", "..", "sub", "x"]);

        let kinds: Vec<FileType> = entries.iter().map(|e| e.kind).collect();
        assert_eq!(kinds[0], FileType::Directory);
        assert_eq!(kinds[2], FileType::Directory);
        assert_eq!(kinds[3], FileType::RegularFile);
    }

    #[test]
    fn duplicate_rows_collapse_to_one_entry() {
        // a replicating backend may return the same filename twice
        let pool: crate::store::StorePool =
            Pool::new(|| Ok(Box::new(DupConn) as Box<dyn StoreConn>));
        let mut dir = Directory::open(&pool, "/d", 0, 0).unwrap();

        let entries = dir.list().unwrap();
        let names: Vec<&str> =
            entries.iter().map(|e| e.name.to_str().unwrap()).collect();
        assert_eq!(names, [".", "..", "twice"]);
    }

    #[test]
    fn is_empty_reflects_the_sibling_query() {
        let pool = store_pool(Arc::new(seeded_store()), None);
        assert!(!Directory::open(&pool, "/d", 0, 0).unwrap().is_empty().unwrap());
        assert!(Directory::open(&pool, "/d/sub", 0, 0).unwrap().is_empty().unwrap());
    }

    fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new("db.fs");
        let mut conn = store.connect().unwrap();
        let dir_ct = crate::codec::encode(&crate::codec::FileMeta {
            mode: libc::S_IFDIR as u32 | 0o755,
            uid: 0,
            gid: 0,
            mtime: 0,
        });
        let file_ct = crate::codec::encode(&crate::codec::FileMeta {
            mode: libc::S_IFREG as u32 | 0o644,
            uid: 0,
            gid: 0,
            mtime: 0,
        });
        conn.store("/d", &dir_ct, 64, b"").unwrap();
        conn.store("/d/x", &file_ct, 64, b"").unwrap();
        conn.store("/d/sub", &dir_ct, 64, b"").unwrap();
        conn.store("/d/sub/deep", &file_ct, 64, b"").unwrap();
        store
    }

    struct DupConn;

    impl StoreConn for DupConn {
        fn find(&mut self, _: &str) -> Result<Option<BlobRecord>, StoreError> {
            Ok(None)
        }
        fn chunk(&mut self, _: BlobId, _: u32) -> Result<Vec<u8>, StoreError> {
            Err(StoreError::Missing)
        }
        fn store(&mut self, _: &str, _: &str, _: u32, _: &[u8]) -> Result<(), StoreError> {
            Ok(())
        }
        fn remove(&mut self, _: &str) -> Result<(), StoreError> {
            Ok(())
        }
        fn list(&mut self, _: &str) -> Result<Vec<crate::store::BlobListing>, StoreError> {
            let row = crate::store::BlobListing {
                filename: "/d/twice".to_owned(),
                content_type: String::new(),
            };
            Ok(vec![row.clone(), row])
        }
        fn update(&mut self, _: BlobId, _: RecordUpdate) -> Result<(), StoreError> {
            Ok(())
        }
        fn last_error(&mut self) -> Option<String> {
            None
        }
        fn authenticate(&mut self, _: &str, _: &str, _: &str) -> Result<(), StoreError> {
            Ok(())
        }
    }
}

use std::collections::BTreeMap;
use std::ffi::OsString;

use fuse_mt::DirectoryEntry;
use fuser::FileType;

use crate::entry::{as_file_type, Entry};
use crate::error::FsResult;
use crate::store::StorePool;

/// Build the sibling query for `path`: everything exactly one segment below
/// it, with every regex metacharacter in the path escaped.
fn sibling_pattern(path: &str) -> String {
    let mut pattern = String::with_capacity(path.len() + 10);
    pattern.push('^');
    for ch in path.chars() {
        match ch {
            '.' | '^' | '$' | '|' | '(' | ')' | '[' | ']' | '*' | '+' | '?' | '\\' => {
                pattern.push('\\');
                pattern.push(ch);
            }
            _ => pattern.push(ch),
        }
    }
    pattern.push_str("/[^/]*$");
    pattern
}

pub struct Directory {
    entry: Entry,
}

impl Directory {
    pub fn open(
        pool: &StorePool,
        path: impl Into<String>,
        default_uid: u32,
        default_gid: u32,
    ) -> FsResult<Directory> {
        Ok(Directory { entry: Entry::open(pool, path, default_uid, default_gid)? })
    }

    pub fn exists(&mut self) -> FsResult<bool> {
        self.entry.exists()
    }

    pub fn create(&mut self, mode: u32, uid: u32, gid: u32, chunk_size: u32) -> FsResult<()> {
        self.entry.create(mode, uid, gid, b"", chunk_size)
    }

    pub fn remove(&mut self) -> FsResult<()> {
        self.entry.remove()
    }

    pub fn stat(&mut self) -> FsResult<crate::entry::Stat> {
        self.entry.stat()
    }

    /// Enumerate children: `.` and `..` first, then each unique basename in
    /// sorted order with its kind decoded from the sibling's content type.
    /// Listing never touches the attr cache.
    pub fn list(&mut self) -> FsResult<Vec<DirectoryEntry>> {
        let pattern = sibling_pattern(self.entry.path());
        let basename_at = self.entry.path().len() + 1;
        let rows = self.entry.conn_mut().list(&pattern)?;

        let mut unique: BTreeMap<String, String> = BTreeMap::new();
        for row in rows {
            unique.entry(row.filename).or_insert(row.content_type);
        }

        let mut entries = vec![
            DirectoryEntry { name: OsString::from("."), kind: FileType::Directory },
            DirectoryEntry { name: OsString::from(".."), kind: FileType::Directory },
        ];
        for (filename, content_type) in unique {
            let meta = crate::codec::decode(&content_type, 0, 0);
            entries.push(DirectoryEntry {
                name: OsString::from(&filename[basename_at..]),
                kind: as_file_type(meta.mode),
            });
        }
        Ok(entries)
    }

    pub fn is_empty(&mut self) -> FsResult<bool> {
        let pattern = sibling_pattern(self.entry.path());
        Ok(self.entry.conn_mut().list(&pattern)?.is_empty())
    }
}
