//
// The operations layer: dispatches FUSE callbacks onto path-scoped
// entries, owns every open handle keyed by the FUSE cookie, and maps the
// error taxonomy to errnos. Expected outcomes (ENOENT and friends) pass
// through quietly; everything that becomes EIO is logged with its cause.
//

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuse_mt::{
    CallbackResult, CreatedEntry, FileAttr, FilesystemMT, RequestInfo, ResultCreate, ResultData,
    ResultEmpty, ResultEntry, ResultOpen, ResultReaddir, ResultSlice, ResultStatfs, ResultWrite,
    Statfs,
};
use libc::c_int;
use log::{debug, error};

use crate::cache::{AttrCache, CacheClient};
use crate::config::Config;
use crate::dir::Directory;
use crate::entry::{as_file_type, unix_now, Entry, Stat};
use crate::error::{FsError, FsResult};
use crate::file::File;
use crate::proc::{is_proc_path, ProcPath};
use crate::store::StorePool;
use crate::symlink::Symlink;

const TTL: Duration = Duration::from_secs(1); // 1 second

// parallel kernel callbacks are dispatched onto this many threads
pub const DISPATCH_THREADS: usize = 4;

enum Handle {
    File(File),
    Dir(Mutex<Directory>),
    Proc(ProcPath),
}

pub struct GridFs {
    config: Config,
    store: StorePool,
    cache_client: Arc<dyn CacheClient>,
    attrs: AttrCache,
    handles: RwLock<HashMap<u64, Arc<Handle>>>,
    next_handle: AtomicU64,
}

impl GridFs {
    pub fn new(config: Config, store: StorePool, cache_client: Arc<dyn CacheClient>) -> GridFs {
        let attrs = AttrCache::new(Arc::clone(&cache_client));
        GridFs {
            config,
            store,
            cache_client,
            attrs,
            handles: RwLock::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Ensure the root directory blob exists; called once before mounting.
    pub fn create_root(&self) -> FsResult<()> {
        let root = self.config.normalize_path("/");
        let mut entry = self.entry(root)?;
        if !entry.exists()? {
            entry.create(
                libc::S_IFDIR as u32 | 0o755,
                self.config.default_uid,
                self.config.default_gid,
                b"",
                self.config.chunk_size,
            )?;
        }
        Ok(())
    }

    fn npath(&self, path: &Path) -> String {
        self.config.normalize_path(&path.to_string_lossy())
    }

    fn nchild(&self, parent: &Path, name: &OsStr) -> String {
        self.npath(&parent.join(name))
    }

    fn is_proc(&self, path: &str) -> bool {
        is_proc_path(&self.config.path_prefix, path)
    }

    fn proc_path(&self, path: &str) -> FsResult<ProcPath> {
        ProcPath::parse(&self.config.path_prefix, path).ok_or(FsError::NotFound)
    }

    fn entry(&self, path: impl Into<String>) -> FsResult<Entry> {
        Entry::open(&self.store, path, self.config.default_uid, self.config.default_gid)
    }

    fn directory(&self, path: impl Into<String>) -> FsResult<Directory> {
        Directory::open(&self.store, path, self.config.default_uid, self.config.default_gid)
    }

    fn file(&self, path: impl Into<String>) -> FsResult<File> {
        File::open(
            &self.store,
            path,
            self.config.default_uid,
            self.config.default_gid,
            self.config.chunk_size,
        )
    }

    fn symlink_at(&self, path: impl Into<String>) -> FsResult<Symlink> {
        Symlink::open(&self.store, path, self.config.default_uid, self.config.default_gid)
    }

    fn retain(&self, handle: Handle) -> u64 {
        let fh = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.handles.write().unwrap().insert(fh, Arc::new(handle));
        fh
    }

    fn handle(&self, fh: u64) -> Option<Arc<Handle>> {
        self.handles.read().unwrap().get(&fh).cloned()
    }

    fn drop_handle(&self, fh: u64) -> Option<Arc<Handle>> {
        self.handles.write().unwrap().remove(&fh)
    }

    /// Translate an error for the kernel, logging per the taxonomy.
    fn errno(&self, op: &str, path: &str, err: FsError) -> c_int {
        if err.is_expected() {
            debug!("{op} {path}: {err}");
        } else {
            error!("{op} {path}: {err}");
        }
        err.errno()
    }

    fn stat_of(&self, path: &str) -> FsResult<Stat> {
        if self.is_proc(path) {
            Ok(self.proc_path(path)?.stat(self.config.default_uid, self.config.default_gid))
        } else {
            self.entry(path.to_owned())?.stat()
        }
    }

    /// Inherent read used by the trait impl and by the integration tests
    /// (the trait surface only replies through a borrowed-slice callback).
    pub fn read_at(&self, path: &Path, fh: u64, offset: u64, size: u32) -> Result<Vec<u8>, c_int> {
        let npath = self.npath(path);
        debug!("read: {npath} offset {offset} size {size}");
        match self.handle(fh).as_deref() {
            Some(Handle::File(file)) => {
                file.read(offset, size).map_err(|err| self.errno("read", &npath, err))
            }
            _ => Err(self.errno(
                "read",
                &npath,
                FsError::Backend(format!("no open file for handle {fh}")),
            )),
        }
    }
}

fn system_time(secs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}

fn file_attr(stat: &Stat) -> FileAttr {
    let mtime = system_time(stat.mtime);
    FileAttr {
        size: stat.size,
        blocks: 0,
        atime: mtime,
        mtime,
        ctime: mtime,
        crtime: UNIX_EPOCH,
        kind: as_file_type(stat.mode),
        perm: (stat.mode & 0o7777) as u16,
        nlink: stat.nlink,
        uid: stat.uid,
        gid: stat.gid,
        rdev: 0,
        flags: 0,
    }
}

fn mtime_seconds(mtime: Option<SystemTime>) -> i64 {
    match mtime {
        Some(time) => match time.duration_since(UNIX_EPOCH) {
            Ok(elapsed) => elapsed.as_secs() as i64,
            Err(before) => -(before.duration().as_secs() as i64),
        },
        None => unix_now(),
    }
}

impl FilesystemMT for GridFs {
    fn init(&self, _req: RequestInfo) -> ResultEmpty {
        Ok(())
    }

    fn destroy(&self) {}

    /// Get attributes: attr cache first, then the store (or the synthetic
    /// tree), memoizing the answer on success.
    fn getattr(&self, _req: RequestInfo, path: &Path, _fh: Option<u64>) -> ResultEntry {
        let path = self.npath(path);
        if let Some(stat) = self.attrs.get(&path) {
            debug!("getattr: cache hit for {path}");
            return Ok((TTL, file_attr(&stat)));
        }
        match self.stat_of(&path) {
            Ok(stat) => {
                self.attrs.set(&path, &stat);
                Ok((TTL, file_attr(&stat)))
            }
            Err(err) => Err(self.errno("getattr", &path, err)),
        }
    }

    fn chmod(&self, _req: RequestInfo, path: &Path, _fh: Option<u64>, mode: u32) -> ResultEmpty {
        let path = self.npath(path);
        debug!("chmod: {path} to {mode:o}");
        if self.is_proc(&path) {
            return Err(self.errno("chmod", &path, FsError::NotPermitted));
        }
        let result = self.entry(path.clone()).and_then(|mut entry| entry.chmod(mode));
        match result {
            Ok(()) => {
                self.attrs.remove(&path);
                Ok(())
            }
            Err(err) => Err(self.errno("chmod", &path, err)),
        }
    }

    fn chown(
        &self,
        _req: RequestInfo,
        path: &Path,
        _fh: Option<u64>,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> ResultEmpty {
        let path = self.npath(path);
        debug!("chown: {path} to {uid:?}:{gid:?}");
        if self.is_proc(&path) {
            return Err(self.errno("chown", &path, FsError::NotPermitted));
        }
        let result = self.entry(path.clone()).and_then(|mut entry| entry.chown(uid, gid));
        match result {
            Ok(()) => {
                self.attrs.remove(&path);
                Ok(())
            }
            Err(err) => Err(self.errno("chown", &path, err)),
        }
    }

    /// Truncate only supports a full reset to length zero; the blob model
    /// has no way to drop a suffix in place.
    fn truncate(&self, _req: RequestInfo, path: &Path, _fh: Option<u64>, size: u64) -> ResultEmpty {
        let path = self.npath(path);
        debug!("truncate: {path} to {size}");
        if self.is_proc(&path) {
            return Err(self.errno("truncate", &path, FsError::NotPermitted));
        }
        if size != 0 {
            return Err(self.errno("truncate", &path, FsError::PartialTruncate));
        }
        let result = self.file(path.clone()).and_then(|file| file.truncate());
        match result {
            Ok(()) => {
                self.attrs.remove(&path);
                Ok(())
            }
            Err(err) => Err(self.errno("truncate", &path, err)),
        }
    }

    fn utimens(
        &self,
        _req: RequestInfo,
        path: &Path,
        _fh: Option<u64>,
        _atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> ResultEmpty {
        let path = self.npath(path);
        debug!("utimens: {path}");
        if self.is_proc(&path) {
            return Ok(());
        }
        let seconds = mtime_seconds(mtime);
        let result = self.entry(path.clone()).and_then(|mut entry| entry.utimes(seconds));
        match result {
            Ok(()) => {
                self.attrs.remove(&path);
                Ok(())
            }
            Err(err) => Err(self.errno("utimens", &path, err)),
        }
    }

    fn readlink(&self, _req: RequestInfo, path: &Path) -> ResultData {
        let path = self.npath(path);
        debug!("readlink: {path}");
        let result = self.symlink_at(path.clone()).and_then(|mut link| link.read_target());
        result.map_err(|err| self.errno("readlink", &path, err))
    }

    fn mkdir(&self, _req: RequestInfo, parent: &Path, name: &OsStr, mode: u32) -> ResultEntry {
        let path = self.nchild(parent, name);
        debug!("mkdir: {path} mode {mode:o}");
        if self.is_proc(&path) {
            return Err(self.errno("mkdir", &path, FsError::NotPermitted));
        }
        let result = self.directory(path.clone()).and_then(|mut dir| {
            dir.create(
                libc::S_IFDIR as u32 | mode,
                self.config.default_uid,
                self.config.default_gid,
                self.config.chunk_size,
            )?;
            dir.stat()
        });
        match result {
            Ok(stat) => Ok((TTL, file_attr(&stat))),
            Err(err) => Err(self.errno("mkdir", &path, err)),
        }
    }

    fn unlink(&self, _req: RequestInfo, parent: &Path, name: &OsStr) -> ResultEmpty {
        let path = self.nchild(parent, name);
        debug!("unlink: {path}");
        if self.is_proc(&path) {
            return Err(self.errno("unlink", &path, FsError::NotPermitted));
        }
        let result = self.entry(path.clone()).and_then(|mut entry| entry.remove());
        match result {
            Ok(()) => {
                self.attrs.remove(&path);
                Ok(())
            }
            Err(err) => Err(self.errno("unlink", &path, err)),
        }
    }

    fn rmdir(&self, _req: RequestInfo, parent: &Path, name: &OsStr) -> ResultEmpty {
        let path = self.nchild(parent, name);
        debug!("rmdir: {path}");
        if self.is_proc(&path) {
            return Err(self.errno("rmdir", &path, FsError::NotPermitted));
        }
        let result = self.directory(path.clone()).and_then(|mut dir| {
            if !dir.exists()? {
                return Err(FsError::NotFound);
            }
            if !dir.is_empty()? {
                return Err(FsError::NotEmpty);
            }
            dir.remove()
        });
        match result {
            Ok(()) => {
                self.attrs.remove(&path);
                Ok(())
            }
            Err(err) => Err(self.errno("rmdir", &path, err)),
        }
    }

    fn symlink(
        &self,
        _req: RequestInfo,
        parent: &Path,
        name: &OsStr,
        target: &Path,
    ) -> ResultEntry {
        let path = self.nchild(parent, name);
        debug!("symlink: {path} -> {}", target.display());
        if self.is_proc(&path) {
            return Err(self.errno("symlink", &path, FsError::NotPermitted));
        }
        let result = self.symlink_at(path.clone()).and_then(|mut link| {
            if link.exists()? {
                return Err(FsError::AlreadyExists);
            }
            link.create(
                target.to_string_lossy().as_bytes(),
                self.config.default_uid,
                self.config.default_gid,
                self.config.chunk_size,
            )?;
            link.stat()
        });
        match result {
            Ok(stat) => Ok((TTL, file_attr(&stat))),
            Err(err) => Err(self.errno("symlink", &path, err)),
        }
    }

    /// Open keeps a File handle alive until release. Existence is assumed:
    /// the kernel always stats a path before opening it.
    fn open(&self, _req: RequestInfo, path: &Path, _flags: u32) -> ResultOpen {
        let path = self.npath(path);
        debug!("open: {path}");
        if self.is_proc(&path) {
            return match self.proc_path(&path) {
                Ok(proc_path) => Ok((self.retain(Handle::Proc(proc_path)), 0)),
                Err(err) => Err(self.errno("open", &path, err)),
            };
        }
        match self.file(path.clone()) {
            Ok(file) => Ok((self.retain(Handle::File(file)), 0)),
            Err(err) => Err(self.errno("open", &path, err)),
        }
    }

    fn read(
        &self,
        _req: RequestInfo,
        path: &Path,
        fh: u64,
        offset: u64,
        size: u32,
        callback: impl FnOnce(ResultSlice<'_>) -> CallbackResult,
    ) -> CallbackResult {
        match self.read_at(path, fh, offset, size) {
            Ok(data) => callback(Ok(&data)),
            Err(errno) => callback(Err(errno)),
        }
    }

    /// Write buffers into the handle; nothing reaches the store before
    /// release.
    fn write(
        &self,
        _req: RequestInfo,
        path: &Path,
        fh: u64,
        offset: u64,
        data: Vec<u8>,
        _flags: u32,
    ) -> ResultWrite {
        let path = self.npath(path);
        debug!("write: {path} offset {offset} size {}", data.len());
        match self.handle(fh).as_deref() {
            Some(Handle::File(file)) => {
                file.write(&data, offset).map_err(|err| self.errno("write", &path, err))
            }
            _ => Err(self.errno(
                "write",
                &path,
                FsError::Backend(format!("no open file for handle {fh}")),
            )),
        }
    }

    /// Release materializes a dirty buffer as the path's new blob, frees
    /// the handle, and evicts the memoized stat.
    fn release(
        &self,
        _req: RequestInfo,
        path: &Path,
        fh: u64,
        _flags: u32,
        _lock_owner: u64,
        _flush: bool,
    ) -> ResultEmpty {
        let path = self.npath(path);
        debug!("release: {path}");
        let Some(handle) = self.drop_handle(fh) else {
            return Ok(());
        };
        match handle.as_ref() {
            Handle::File(file) if file.is_dirty() => {
                let result = file.store();
                self.attrs.remove(&path);
                result.map_err(|err| self.errno("release", &path, err))
            }
            Handle::File(_) => Ok(()),
            _ => {
                self.attrs.remove(&path);
                Ok(())
            }
        }
    }

    fn opendir(&self, _req: RequestInfo, path: &Path, _flags: u32) -> ResultOpen {
        let path = self.npath(path);
        debug!("opendir: {path}");
        if self.is_proc(&path) {
            return match self.proc_path(&path) {
                Ok(proc_path) => Ok((self.retain(Handle::Proc(proc_path)), 0)),
                Err(err) => Err(self.errno("opendir", &path, err)),
            };
        }
        let result = self.directory(path.clone()).and_then(|mut dir| {
            if !dir.exists()? {
                return Err(FsError::NotFound);
            }
            Ok(dir)
        });
        match result {
            Ok(dir) => Ok((self.retain(Handle::Dir(Mutex::new(dir))), 0)),
            Err(err) => Err(self.errno("opendir", &path, err)),
        }
    }

    fn readdir(&self, _req: RequestInfo, path: &Path, fh: u64) -> ResultReaddir {
        let path = self.npath(path);
        debug!("readdir: {path}");
        match self.handle(fh).as_deref() {
            Some(Handle::Dir(dir)) => {
                dir.lock().unwrap().list().map_err(|err| self.errno("readdir", &path, err))
            }
            Some(Handle::Proc(proc_path)) => proc_path
                .list(self.cache_client.as_ref())
                .map_err(|err| self.errno("readdir", &path, err)),
            _ => Err(self.errno(
                "readdir",
                &path,
                FsError::Backend(format!("no open directory for handle {fh}")),
            )),
        }
    }

    fn releasedir(&self, _req: RequestInfo, path: &Path, fh: u64, _flags: u32) -> ResultEmpty {
        debug!("releasedir: {}", path.display());
        self.drop_handle(fh);
        Ok(())
    }

    fn statfs(&self, _req: RequestInfo, _path: &Path) -> ResultStatfs {
        Ok(Statfs {
            blocks: 0,
            bfree: 0,
            bavail: 0,
            files: 0,
            ffree: 0,
            bsize: 512,
            namelen: 255,
            frsize: 0,
        })
    }

    /// Create and open. Under /proc/instances this mutates the peer list
    /// instead of the store.
    fn create(
        &self,
        _req: RequestInfo,
        parent: &Path,
        name: &OsStr,
        mode: u32,
        _flags: u32,
    ) -> ResultCreate {
        let path = self.nchild(parent, name);
        debug!("create: {path} mode {mode:o}");
        if self.is_proc(&path) {
            let result = self.proc_path(&path).and_then(|proc_path| {
                proc_path.create(self.cache_client.as_ref())?;
                Ok(proc_path)
            });
            return match result {
                Ok(proc_path) => {
                    let stat =
                        proc_path.stat(self.config.default_uid, self.config.default_gid);
                    Ok(CreatedEntry {
                        ttl: TTL,
                        attr: file_attr(&stat),
                        fh: self.retain(Handle::Proc(proc_path)),
                        flags: 0,
                    })
                }
                Err(err) => Err(self.errno("create", &path, err)),
            };
        }

        let result = self.file(path.clone()).and_then(|file| {
            if file.exists()? {
                return Err(FsError::AlreadyExists);
            }
            file.create(
                libc::S_IFREG as u32 | mode,
                self.config.default_uid,
                self.config.default_gid,
            )?;
            let stat = file.stat()?;
            Ok((file, stat))
        });
        match result {
            Ok((file, stat)) => Ok(CreatedEntry {
                ttl: TTL,
                attr: file_attr(&stat),
                fh: self.retain(Handle::File(file)),
                flags: 0,
            }),
            Err(err) => Err(self.errno("create", &path, err)),
        }
    }
}
