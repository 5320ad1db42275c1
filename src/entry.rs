//
// Base abstraction over one stored path: existence, stat, create, remove
// and the in-place attribute mutations. A fresh Entry is built for every
// callback; it leases one backend connection and keeps it until dropped.
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::store::store_pool;
    use std::sync::Arc;

    const CHUNK: u32 = 16;

    fn pool() -> crate::store::StorePool {
        store_pool(Arc::new(MemoryStore::new("db.fs")), None)
    }

    #[test]
    fn stat_reports_decoded_attributes() {
        let pool = pool();
        let mut entry = Entry::open(&pool, "/notes", 500, 100).unwrap();
        entry.create(libc::S_IFREG as u32 | 0o640, 7, 8, b"hello", CHUNK).unwrap();

        let stat = entry.stat().unwrap();
        assert_eq!(stat.mode, libc::S_IFREG as u32 | 0o640);
        assert_eq!(stat.uid, 7);
        assert_eq!(stat.gid, 8);
        assert_eq!(stat.nlink, 1);
        assert_eq!(stat.size, 5);
    }

    #[test]
    fn directories_stat_with_fixed_size() {
        let pool = pool();
        let mut entry = Entry::open(&pool, "/d", 500, 100).unwrap();
        entry.create(libc::S_IFDIR as u32 | 0o755, 0, 0, b"", CHUNK).unwrap();

        let stat = entry.stat().unwrap();
        assert_eq!(stat.nlink, 2);
        assert_eq!(stat.size, 4096);
    }

    #[test]
    fn stat_of_missing_entry_is_not_found() {
        let pool = pool();
        let mut entry = Entry::open(&pool, "/gone", 0, 0).unwrap();
        assert!(!entry.exists().unwrap());
        assert!(matches!(entry.stat(), Err(FsError::NotFound)));
    }

    #[test]
    fn chmod_keeps_the_other_fields() {
        let pool = pool();
        let mut entry = Entry::open(&pool, "/p", 500, 100).unwrap();
        entry.create(libc::S_IFREG as u32 | 0o600, 7, 8, b"", CHUNK).unwrap();
        let before = entry.stat().unwrap();

        entry.chmod(libc::S_IFREG as u32 | 0o644).unwrap();
        entry.chmod(libc::S_IFREG as u32 | 0o644).unwrap();

        let after = entry.stat().unwrap();
        assert_eq!(after.mode & 0o777, 0o644);
        assert_eq!((after.uid, after.gid, after.mtime), (7, 8, before.mtime));
    }

    #[test]
    fn chown_leaves_unset_ids_alone() {
        let pool = pool();
        let mut entry = Entry::open(&pool, "/p", 500, 100).unwrap();
        entry.create(libc::S_IFREG as u32 | 0o600, 7, 8, b"", CHUNK).unwrap();

        entry.chown(Some(9), None).unwrap();
        let stat = entry.stat().unwrap();
        assert_eq!((stat.uid, stat.gid), (9, 8));
    }

    #[test]
    fn remove_twice_reports_not_found() {
        let pool = pool();
        let mut entry = Entry::open(&pool, "/p", 0, 0).unwrap();
        entry.create(libc::S_IFREG as u32 | 0o644, 0, 0, b"", CHUNK).unwrap();
        entry.remove().unwrap();
        assert!(matches!(entry.remove(), Err(FsError::NotFound)));
    }

    #[test]
    fn stat_bytes_round_trip() {
        let stat = Stat { mode: 0o100644, uid: 1, gid: 2, nlink: 1, size: 77, mtime: -3 };
        assert_eq!(Stat::from_bytes(&stat.to_bytes()), Some(stat));
        assert_eq!(Stat::from_bytes(b"short"), None);
    }
}

use std::time::{SystemTime, UNIX_EPOCH};

use byteorder::{ByteOrder, LittleEndian};

use crate::codec::{self, FileMeta};
use crate::error::{FsError, FsResult};
use crate::store::{RecordUpdate, StoreLease, StorePool};

/// The attribute set served to `getattr` and memoized in the attr cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub size: u64,
    pub mtime: i64,
}

impl Stat {
    pub const ENCODED_LEN: usize = 32;

    pub fn to_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut buf = [0u8; Self::ENCODED_LEN];
        LittleEndian::write_u32(&mut buf[0..4], self.mode);
        LittleEndian::write_u32(&mut buf[4..8], self.uid);
        LittleEndian::write_u32(&mut buf[8..12], self.gid);
        LittleEndian::write_u32(&mut buf[12..16], self.nlink);
        LittleEndian::write_u64(&mut buf[16..24], self.size);
        LittleEndian::write_i64(&mut buf[24..32], self.mtime);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Stat> {
        if bytes.len() != Self::ENCODED_LEN {
            return None;
        }
        Some(Stat {
            mode: LittleEndian::read_u32(&bytes[0..4]),
            uid: LittleEndian::read_u32(&bytes[4..8]),
            gid: LittleEndian::read_u32(&bytes[8..12]),
            nlink: LittleEndian::read_u32(&bytes[12..16]),
            size: LittleEndian::read_u64(&bytes[16..24]),
            mtime: LittleEndian::read_i64(&bytes[24..32]),
        })
    }

    pub fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT as u32 == libc::S_IFDIR as u32
    }
}

/// Map a stored mode to the kernel-facing file type. Anything we did not
/// create ourselves falls back to a regular file.
pub(crate) fn as_file_type(mode: u32) -> fuser::FileType {
    let fmt = mode & libc::S_IFMT as u32;
    if fmt == libc::S_IFDIR as u32 {
        fuser::FileType::Directory
    } else if fmt == libc::S_IFLNK as u32 {
        fuser::FileType::Symlink
    } else {
        if fmt != libc::S_IFREG as u32 {
            log::warn!("unexpected file type in mode {mode:o}, treating as regular file");
        }
        fuser::FileType::RegularFile
    }
}

pub(crate) fn unix_now() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs() as i64,
        Err(_) => 0,
    }
}

pub struct Entry {
    path: String,
    conn: StoreLease,
    // Some(None) means the path was probed and no record exists.
    record: Option<Option<crate::store::BlobRecord>>,
    default_uid: u32,
    default_gid: u32,
}

impl Entry {
    pub fn open(
        pool: &StorePool,
        path: impl Into<String>,
        default_uid: u32,
        default_gid: u32,
    ) -> FsResult<Entry> {
        let conn = pool.lease()?;
        Ok(Entry { path: path.into(), conn, record: None, default_uid, default_gid })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Fetch the backing record lazily, once.
    pub(crate) fn record(&mut self) -> FsResult<Option<&crate::store::BlobRecord>> {
        if self.record.is_none() {
            self.record = Some(self.conn.find(&self.path)?);
        }
        Ok(self.record.as_ref().and_then(|r| r.as_ref()))
    }

    pub(crate) fn require_record(&mut self) -> FsResult<&crate::store::BlobRecord> {
        self.record()?.ok_or(FsError::NotFound)
    }

    pub(crate) fn conn_mut(&mut self) -> &mut dyn crate::store::StoreConn {
        &mut **self.conn
    }

    pub fn exists(&mut self) -> FsResult<bool> {
        Ok(self.record()?.is_some())
    }

    /// Decode the piggy-backed attributes of the record under this path.
    pub fn meta(&mut self) -> FsResult<FileMeta> {
        let (default_uid, default_gid) = (self.default_uid, self.default_gid);
        let record = self.require_record()?;
        Ok(codec::decode(&record.content_type, default_uid, default_gid))
    }

    pub fn stat(&mut self) -> FsResult<Stat> {
        let meta = self.meta()?;
        let length = self.require_record()?.length;
        let is_dir = meta.mode & libc::S_IFMT as u32 == libc::S_IFDIR as u32;
        Ok(Stat {
            mode: meta.mode,
            uid: meta.uid,
            gid: meta.gid,
            nlink: if is_dir { 2 } else { 1 },
            size: if is_dir { 4096 } else { length },
            mtime: meta.mtime,
        })
    }

    /// Store a new blob under this path with an encoded content type.
    /// Directories and fresh files pass empty content; symlinks pass the
    /// link target.
    pub fn create(
        &mut self,
        mode: u32,
        uid: u32,
        gid: u32,
        content: &[u8],
        chunk_size: u32,
    ) -> FsResult<()> {
        let meta = FileMeta { mode, uid, gid, mtime: unix_now() };
        let content_type = codec::encode(&meta);
        self.conn.store(&self.path, &content_type, chunk_size, content)?;
        self.synchronize()?;
        self.force_reload();
        Ok(())
    }

    pub fn remove(&mut self) -> FsResult<()> {
        self.require_record()?;
        self.conn.remove(&self.path)?;
        self.synchronize()?;
        self.force_reload();
        Ok(())
    }

    pub fn chmod(&mut self, mode: u32) -> FsResult<()> {
        let mut meta = self.meta()?;
        meta.mode = mode;
        self.update_content_type(meta)
    }

    pub fn chown(&mut self, uid: Option<u32>, gid: Option<u32>) -> FsResult<()> {
        let mut meta = self.meta()?;
        if let Some(uid) = uid {
            meta.uid = uid;
        }
        if let Some(gid) = gid {
            meta.gid = gid;
        }
        self.update_content_type(meta)
    }

    pub fn utimes(&mut self, mtime: i64) -> FsResult<()> {
        let mut meta = self.meta()?;
        meta.mtime = mtime;
        self.update_content_type(meta)
    }

    /// The one in-place mutation the core performs against a live record:
    /// rewrite the encoded content type, leaving payload chunks untouched.
    fn update_content_type(&mut self, meta: FileMeta) -> FsResult<()> {
        let id = self.require_record()?.id;
        self.conn.update(id, RecordUpdate::ContentType(codec::encode(&meta)))?;
        self.synchronize()?;
        self.force_reload();
        Ok(())
    }

    /// Block until the store acknowledges the preceding write. Without this
    /// a getattr issued right after create can miss the record.
    pub(crate) fn synchronize(&mut self) -> FsResult<()> {
        match self.conn.last_error() {
            Some(err) => Err(FsError::UpdateConflict(err)),
            None => Ok(()),
        }
    }

    pub(crate) fn force_reload(&mut self) {
        self.record = None;
    }
}
