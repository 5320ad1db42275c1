#![allow(dead_code)] // each test binary uses its own slice of the fixture

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;

use fuse_mt::{FileAttr, FilesystemMT, RequestInfo};
use gridfs_fuse::{store_pool, Config, GridFs, MemoryCache, MemoryStore};
use libc::c_int;

pub const UID: u32 = 500;
pub const GID: u32 = 100;

/// A mounted-in-memory filesystem: the full operations layer wired to the
/// volatile reference backends, driven through the FUSE callback surface.
pub struct Fixture {
    pub fs: GridFs,
    pub store: Arc<MemoryStore>,
    pub cache: Arc<MemoryCache>,
}

impl Fixture {
    pub fn new() -> Fixture {
        Fixture::with_prefix("")
    }

    pub fn with_prefix(prefix: &str) -> Fixture {
        let mut config =
            Config::from_options(["mongo_db=files".to_owned()]).expect("config parses");
        config.path_prefix = prefix.to_owned();
        config.default_uid = UID;
        config.default_gid = GID;

        let store = Arc::new(MemoryStore::new(config.namespace()));
        let cache = Arc::new(MemoryCache::new());
        let fs = GridFs::new(config, store_pool(store.clone(), None), cache.clone());
        fs.create_root().expect("root directory bootstrap");
        Fixture { fs, store, cache }
    }

    pub fn create(&self, path: &str, mode: u32) -> Result<u64, c_int> {
        let (parent, name) = split(path);
        self.fs.create(req(), parent, name, mode, 0).map(|created| created.fh)
    }

    /// create + write + release in one go.
    pub fn write_file(&self, path: &str, mode: u32, content: &[u8]) {
        let fh = self.create(path, mode).expect("create file");
        if !content.is_empty() {
            let written = self
                .fs
                .write(req(), Path::new(path), fh, 0, content.to_vec(), 0)
                .expect("write file");
            assert_eq!(written as usize, content.len());
        }
        self.release(path, fh);
    }

    pub fn release(&self, path: &str, fh: u64) {
        self.fs.release(req(), Path::new(path), fh, 0, 0, false).expect("release");
    }

    pub fn mkdir(&self, path: &str, mode: u32) {
        let (parent, name) = split(path);
        self.fs.mkdir(req(), parent, name, mode).expect("mkdir");
    }

    pub fn getattr(&self, path: &str) -> Result<FileAttr, c_int> {
        self.fs.getattr(req(), Path::new(path), None).map(|(_, attr)| attr)
    }

    pub fn read(&self, path: &str, offset: u64, size: u32) -> Result<Vec<u8>, c_int> {
        let (fh, _) = self.fs.open(req(), Path::new(path), 0)?;
        let data = self.fs.read_at(Path::new(path), fh, offset, size);
        self.release(path, fh);
        data
    }

    pub fn readdir_names(&self, path: &str) -> Result<Vec<String>, c_int> {
        let (fh, _) = self.fs.opendir(req(), Path::new(path), 0)?;
        let entries = self.fs.readdir(req(), Path::new(path), fh)?;
        self.fs.releasedir(req(), Path::new(path), fh, 0).expect("releasedir");
        Ok(entries.into_iter().map(|e| e.name.to_string_lossy().into_owned()).collect())
    }
}

pub fn req() -> RequestInfo {
    RequestInfo { unique: 0, uid: UID, gid: GID, pid: 1 }
}

pub fn split(path: &str) -> (&Path, &OsStr) {
    let slash = path.rfind('/').expect("absolute path");
    (Path::new(&path[..slash.max(1)]), OsStr::new(&path[slash + 1..]))
}
