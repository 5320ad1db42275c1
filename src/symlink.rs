// Symlinks share the storage shape of regular files; the blob content is
// the literal link target.


use crate::entry::{Entry, Stat};
use crate::error::{FsError, FsResult};
use crate::store::StorePool;

pub struct Symlink {
    entry: Entry,
}

impl Symlink {
    pub fn open(
        pool: &StorePool,
        path: impl Into<String>,
        default_uid: u32,
        default_gid: u32,
    ) -> FsResult<Symlink> {
        Ok(Symlink { entry: Entry::open(pool, path, default_uid, default_gid)? })
    }

    pub fn exists(&mut self) -> FsResult<bool> {
        self.entry.exists()
    }

    pub fn stat(&mut self) -> FsResult<Stat> {
        self.entry.stat()
    }

    pub fn create(&mut self, target: &[u8], uid: u32, gid: u32, chunk_size: u32) -> FsResult<()> {
        self.entry.create(libc::S_IFLNK as u32 | 0o777, uid, gid, target, chunk_size)
    }

    /// Stream the whole blob content back as the link target.
    pub fn read_target(&mut self) -> FsResult<Vec<u8>> {
        let (id, length, chunk_size) = {
            let record = self.entry.require_record()?;
            (record.id, record.length, record.chunk_size)
        };
        if length == 0 {
            return Ok(Vec::new());
        }
        if chunk_size == 0 {
            return Err(FsError::Backend(format!(
                "record {} has a zero chunk size",
                self.entry.path()
            )));
        }

        let mut target = Vec::with_capacity(length as usize);
        let chunks = length.div_ceil(chunk_size as u64) as u32;
        for index in 0..chunks {
            let chunk = self.entry.conn_mut().chunk(id, index)?;
            target.extend_from_slice(&chunk);
        }
        target.truncate(length as usize);
        Ok(target)
    }
}
