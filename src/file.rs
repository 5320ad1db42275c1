//
// Regular files. The blob store only accepts whole files, so the write side
// buffers strictly sequential writes in a chunk-granular growable buffer and
// materializes one new blob at release. The read side serves random access
// from fixed-size immutable chunks through a single cached chunk per open
// handle.
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FsError;
    use crate::memory::MemoryStore;
    use crate::pool::Pool;
    use crate::store::{
        store_pool, BlobId, BlobListing, BlobRecord, BlobStore, RecordUpdate, StoreConn, StoreError,
    };
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    const CHUNK: u32 = 4;

    fn pool_with_store() -> (Arc<MemoryStore>, crate::store::StorePool) {
        let store = Arc::new(MemoryStore::new("db.fs"));
        let pool = store_pool(store.clone(), None);
        (store, pool)
    }

    fn new_file(pool: &crate::store::StorePool, path: &str) -> File {
        let file = File::open(pool, path, 0, 0, CHUNK).unwrap();
        file.create(libc::S_IFREG as u32 | 0o644, 500, 100).unwrap();
        file
    }

    #[test]
    fn sequential_writes_concatenate() {
        let (store, pool) = pool_with_store();
        let file = new_file(&pool, "/f");

        assert_eq!(file.write(b"hel", 0).unwrap(), 3);
        assert_eq!(file.write(b"lo ", 3).unwrap(), 3);
        assert_eq!(file.write(b"world", 6).unwrap(), 5);
        assert!(file.is_dirty());
        file.store().unwrap();
        assert!(!file.is_dirty());

        let mut conn = store.connect().unwrap();
        let record = conn.find("/f").unwrap().unwrap();
        assert_eq!(record.length, 11);
        assert_eq!(conn.chunk(record.id, 0).unwrap(), b"hell");
        assert_eq!(conn.chunk(record.id, 2).unwrap(), b"rld");
    }

    #[test]
    fn non_sequential_write_is_rejected() {
        let (_, pool) = pool_with_store();
        let file = new_file(&pool, "/f");

        file.write(b"AB", 0).unwrap();
        let err = file.write(b"ZZ", 100).unwrap_err();
        assert!(matches!(err, FsError::NonSequentialWrite { offset: 100, written: 2 }));

        // the buffered prefix is still intact and can be released safely
        file.store().unwrap();
        let mut conn = pool.lease().unwrap();
        assert_eq!(conn.find("/f").unwrap().unwrap().length, 2);
    }

    #[test]
    fn store_preserves_the_content_type() {
        let (store, pool) = pool_with_store();
        let file = new_file(&pool, "/f");
        let before = store.connect().unwrap().find("/f").unwrap().unwrap().content_type;

        file.write(b"data", 0).unwrap();
        file.store().unwrap();

        let after = store.connect().unwrap().find("/f").unwrap().unwrap().content_type;
        assert_eq!(after, before);
    }

    #[test]
    fn read_reassembles_across_chunk_boundaries() {
        let (_, pool) = pool_with_store();
        let file = new_file(&pool, "/f");
        file.write(b"0123456789", 0).unwrap();
        file.store().unwrap();

        let reader = File::open(&pool, "/f", 0, 0, CHUNK).unwrap();
        assert_eq!(reader.read(0, 10).unwrap(), b"0123456789");
        assert_eq!(reader.read(3, 4).unwrap(), b"3456");
        assert_eq!(reader.read(8, 100).unwrap(), b"89");
        assert_eq!(reader.read(10, 4).unwrap(), b"");
        assert_eq!(reader.read(500, 4).unwrap(), b"");
    }

    #[test]
    fn reads_within_one_chunk_hit_the_cache() {
        let fetches = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&fetches);
        let pool: crate::store::StorePool =
            Pool::new(move || Ok(Box::new(CountingConn(Arc::clone(&counter))) as Box<dyn StoreConn>));

        let file = File::open(&pool, "/f", 0, 0, CHUNK).unwrap();
        assert_eq!(file.read(0, 2).unwrap(), b"ab");
        assert_eq!(file.read(2, 2).unwrap(), b"cd");
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        // crossing into the next chunk replaces the cache wholesale
        assert_eq!(file.read(4, 2).unwrap(), b"ef");
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn truncate_zeroes_the_length_and_stops_readers() {
        let (store, pool) = pool_with_store();
        let file = new_file(&pool, "/f");
        file.write(b"0123456789", 0).unwrap();
        file.store().unwrap();

        let handle = File::open(&pool, "/f", 0, 0, CHUNK).unwrap();
        handle.truncate().unwrap();

        assert_eq!(store.connect().unwrap().find("/f").unwrap().unwrap().length, 0);
        assert_eq!(handle.read(0, 10).unwrap(), b"");
    }

    // Serves one 8-byte file ("abcdefgh", chunks of 4) and counts chunk
    // fetches so tests can observe the cache.
    struct CountingConn(Arc<AtomicU32>);

    impl StoreConn for CountingConn {
        fn find(&mut self, filename: &str) -> Result<Option<BlobRecord>, StoreError> {
            Ok(Some(BlobRecord {
                id: BlobId(1),
                filename: filename.to_owned(),
                length: 8,
                chunk_size: 4,
                content_type: String::new(),
            }))
        }
        fn chunk(&mut self, _: BlobId, index: u32) -> Result<Vec<u8>, StoreError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            match index {
                0 => Ok(b"abcd".to_vec()),
                1 => Ok(b"efgh".to_vec()),
                _ => Err(StoreError::Missing),
            }
        }
        fn store(&mut self, _: &str, _: &str, _: u32, _: &[u8]) -> Result<(), StoreError> {
            Ok(())
        }
        fn remove(&mut self, _: &str) -> Result<(), StoreError> {
            Ok(())
        }
        fn list(&mut self, _: &str) -> Result<Vec<BlobListing>, StoreError> {
            Ok(Vec::new())
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

use std::sync::Mutex;

use crate::entry::{Entry, Stat};
use crate::error::{FsError, FsResult};
use crate::store::{RecordUpdate, StorePool};

// Read-side state: the scoped connection, lazily initialized record
// geometry, and the one cached chunk. Everything sits under a single mutex
// so a concurrent read on the same handle can never observe the cached
// chunk mid-replacement.
struct Reader {
    entry: Entry,
    // (chunk_size, length), taken from the record on the first read
    geometry: Option<(u32, u64)>,
    cached_index: Option<u32>,
    cached_chunk: Vec<u8>,
}

impl Reader {
    fn geometry(&mut self) -> FsResult<(u32, u64)> {
        if self.geometry.is_none() {
            let record = self.entry.require_record()?;
            self.geometry = Some((record.chunk_size, record.length));
        }
        Ok(self.geometry.unwrap_or((0, 0)))
    }

    /// Serve the cached chunk, fetching and replacing it wholesale when a
    /// different index is asked for. No LRU, one slot.
    fn chunk(&mut self, index: u32) -> FsResult<&[u8]> {
        if self.cached_index != Some(index) {
            let id = self.entry.require_record()?.id;
            self.cached_chunk = self.entry.conn_mut().chunk(id, index)?;
            self.cached_index = Some(index);
            log::debug!("fetched chunk {index} of {}", self.entry.path());
        }
        Ok(&self.cached_chunk)
    }
}

// Write-side state: a buffer that grows a chunk at a time and holds exactly
// the bytes written so far.
struct Writer {
    buf: Vec<u8>,
    chunk_size: usize,
    dirty: bool,
}

impl Writer {
    /// Grow capacity in whole chunks; the first write allocates one chunk.
    fn reserve_for(&mut self, extra: usize) {
        let needed = self.buf.len() + extra;
        let mut target = self.buf.capacity().max(self.chunk_size);
        while target < needed {
            target += self.chunk_size;
        }
        if target > self.buf.capacity() {
            self.buf.reserve_exact(target - self.buf.len());
        }
    }
}

pub struct File {
    path: String,
    reader: Mutex<Reader>,
    writer: Mutex<Writer>,
}

impl File {
    pub fn open(
        pool: &StorePool,
        path: impl Into<String>,
        default_uid: u32,
        default_gid: u32,
        write_chunk_size: u32,
    ) -> FsResult<File> {
        let path = path.into();
        let entry = Entry::open(pool, path.clone(), default_uid, default_gid)?;
        Ok(File {
            path,
            reader: Mutex::new(Reader {
                entry,
                geometry: None,
                cached_index: None,
                cached_chunk: Vec::new(),
            }),
            writer: Mutex::new(Writer {
                buf: Vec::new(),
                chunk_size: write_chunk_size as usize,
                dirty: false,
            }),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn exists(&self) -> FsResult<bool> {
        self.reader.lock().unwrap().entry.exists()
    }

    pub fn stat(&self) -> FsResult<Stat> {
        self.reader.lock().unwrap().entry.stat()
    }

    pub fn create(&self, mode: u32, uid: u32, gid: u32) -> FsResult<()> {
        let chunk_size = self.writer.lock().unwrap().chunk_size as u32;
        self.reader.lock().unwrap().entry.create(mode, uid, gid, b"", chunk_size)
    }

    /// Buffer `data` at `offset`. Only strictly sequential writes are
    /// accepted: the store takes whole files, so the buffer must stay a
    /// contiguous prefix of the final content. Nothing reaches the backend
    /// until `store`.
    pub fn write(&self, data: &[u8], offset: u64) -> FsResult<u32> {
        let mut writer = self.writer.lock().unwrap();
        let written = writer.buf.len() as u64;
        if offset != written {
            return Err(FsError::NonSequentialWrite { offset, written });
        }
        writer.reserve_for(data.len());
        writer.buf.extend_from_slice(data);
        writer.dirty = true;
        Ok(data.len() as u32)
    }

    pub fn is_dirty(&self) -> bool {
        self.writer.lock().unwrap().dirty
    }

    /// Materialize the buffered content as a new whole blob under this
    /// path, preserving the record's content type. The buffer is released
    /// whether or not the store succeeds.
    pub fn store(&self) -> FsResult<()> {
        let mut writer = self.writer.lock().unwrap();
        let mut reader = self.reader.lock().unwrap();

        let data = std::mem::take(&mut writer.buf);
        let chunk_size = writer.chunk_size as u32;
        writer.dirty = false;
        drop(writer);

        let content_type = reader.entry.require_record()?.content_type.clone();
        let path = self.path.clone();
        reader.entry.conn_mut().store(&path, &content_type, chunk_size, &data)?;
        reader.entry.synchronize()?;
        reader.entry.force_reload();
        reader.geometry = Some((chunk_size, data.len() as u64));
        Ok(())
    }

    /// Random-access read assembled chunk by chunk.
    pub fn read(&self, offset: u64, size: u32) -> FsResult<Vec<u8>> {
        let mut reader = self.reader.lock().unwrap();
        let (chunk_size, length) = reader.geometry()?;
        if offset >= length {
            log::debug!(
                "read past the end of {} (offset {offset}, length {length})",
                self.path
            );
            return Ok(Vec::new());
        }
        if chunk_size == 0 {
            return Err(FsError::Backend(format!("record {} has a zero chunk size", self.path)));
        }

        let size = size as u64;
        let mut out = Vec::with_capacity(size.min(length - offset) as usize);
        while (out.len() as u64) < size && offset + (out.len() as u64) < length {
            let pos = offset + out.len() as u64;
            let index = (pos / chunk_size as u64) as u32;
            let chunk_offset = (pos % chunk_size as u64) as usize;
            let take = (size - out.len() as u64)
                .min(length - pos)
                .min(chunk_size as u64 - chunk_offset as u64) as usize;

            let chunk = reader.chunk(index)?;
            if chunk.len() < chunk_offset + take {
                return Err(FsError::Backend(format!(
                    "chunk {index} of {} is shorter than the record claims",
                    self.path
                )));
            }
            out.extend_from_slice(&chunk[chunk_offset..chunk_offset + take]);
        }
        Ok(out)
    }

    /// Truncate to length zero via a targeted record update. Orphaned chunk
    /// payloads are left in place; readers stop at the new length before
    /// ever reaching them.
    pub fn truncate(&self) -> FsResult<()> {
        let mut reader = self.reader.lock().unwrap();
        let id = reader.entry.require_record()?.id;
        reader.entry.conn_mut().update(id, RecordUpdate::Length(0))?;
        reader.entry.synchronize()?;
        reader.entry.force_reload();
        reader.geometry = None;
        Ok(())
    }
}
