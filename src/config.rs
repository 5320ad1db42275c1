//
// Mount configuration, parsed from the comma-separated -o option list.
// Options we do not recognize are kept aside and forwarded to the FUSE
// layer untouched.
//


use std::ffi::OsString;

use thiserror::Error;

use crate::store::Credentials;

/// Fixed blob chunk size. Kernel read/write buffers are aligned to it at
/// mount time so each FUSE request maps onto whole chunks.
pub const CHUNK_SIZE: u32 = 256 * 1024;

// storing a chunk this large in one record is asking for trouble
const MAX_CHUNK_SIZE: u32 = 200 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("mandatory option mongo_db not set")]
    MissingDb,

    #[error("invalid value for option {0}")]
    InvalidValue(String),

    #[error("chunk size {0} is too large, must stay below {MAX_CHUNK_SIZE}")]
    ChunkTooLarge(u32),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mongo_conn_string: Option<String>,
    pub mongo_host: String,
    pub mongo_port: u16,
    pub mongo_user: Option<String>,
    pub mongo_password: String,
    pub mongo_db: String,
    pub mongo_collection_prefix: String,
    pub path_prefix: String,
    pub log_level: String,
    pub log_file: String,
    pub default_uid: u32,
    pub default_gid: u32,
    pub chunk_size: u32,
    /// Options we did not recognize, forwarded to the FUSE layer.
    pub fuse_options: Vec<String>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            mongo_conn_string: None,
            mongo_host: "localhost".to_owned(),
            mongo_port: 27017,
            mongo_user: None,
            mongo_password: String::new(),
            mongo_db: String::new(),
            mongo_collection_prefix: "fs".to_owned(),
            path_prefix: String::new(),
            log_level: "error".to_owned(),
            log_file: "console".to_owned(),
            default_uid: unsafe { libc::geteuid() },
            default_gid: unsafe { libc::getegid() },
            chunk_size: CHUNK_SIZE,
            fuse_options: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_options(options: impl IntoIterator<Item = String>) -> Result<Config, ConfigError> {
        let mut config = Config::default();

        for option in options {
            let (key, value) = match option.split_once('=') {
                Some((key, value)) => (key, value),
                None => (option.as_str(), ""),
            };
            match key {
                "mongo_conn_string" => config.mongo_conn_string = Some(value.to_owned()),
                "mongo_host" => config.mongo_host = value.to_owned(),
                "mongo_port" => config.mongo_port = parse_number(key, value)?,
                "mongo_user" => config.mongo_user = Some(value.to_owned()),
                "mongo_password" => config.mongo_password = value.to_owned(),
                "mongo_db" => config.mongo_db = value.to_owned(),
                "mongo_collection_prefix" => config.mongo_collection_prefix = value.to_owned(),
                "path_prefix" => config.path_prefix = value.to_owned(),
                "log_level" => config.log_level = value.to_owned(),
                "log_file" => config.log_file = value.to_owned(),
                "default_uid" => config.default_uid = parse_number(key, value)?,
                "default_gid" => config.default_gid = parse_number(key, value)?,
                _ => config.fuse_options.push(option),
            }
        }

        if config.mongo_db.is_empty() {
            return Err(ConfigError::MissingDb);
        }
        if config.chunk_size >= MAX_CHUNK_SIZE {
            return Err(ConfigError::ChunkTooLarge(config.chunk_size));
        }
        Ok(config)
    }

    /// Prefix the incoming path and drop one trailing slash; the store
    /// never keeps trailing slashes in filenames. Pure, no I/O.
    pub fn normalize_path(&self, raw: &str) -> String {
        let mut path = String::with_capacity(self.path_prefix.len() + raw.len());
        path.push_str(&self.path_prefix);
        path.push_str(raw);
        if path.ends_with('/') {
            path.pop();
        }
        path
    }

    /// The backend address: an explicit connection string when given,
    /// otherwise host:port.
    pub fn connection_target(&self) -> String {
        match &self.mongo_conn_string {
            Some(conn) => conn.clone(),
            None => format!("{}:{}", self.mongo_host, self.mongo_port),
        }
    }

    /// `<db>.<collection_prefix>`, the namespace holding the `.files` and
    /// `.chunks` collections.
    pub fn namespace(&self) -> String {
        format!("{}.{}", self.mongo_db, self.mongo_collection_prefix)
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.mongo_user.as_ref().map(|user| Credentials {
            db: self.mongo_db.clone(),
            user: user.clone(),
            password: self.mongo_password.clone(),
        })
    }

    /// Arguments handed to the FUSE layer: the kernel I/O sizes aligned to
    /// the chunk size, then whatever the operator passed through.
    pub fn fuse_mount_args(&self) -> Vec<OsString> {
        let mut args = Vec::new();
        let mut push = |opt: String| {
            args.push(OsString::from("-o"));
            args.push(OsString::from(opt));
        };
        push(format!("max_read={}", self.chunk_size));
        push(format!("max_write={}", self.chunk_size));
        push("big_writes".to_owned());
        push("fsname=gridfs".to_owned());
        for option in &self.fuse_options {
            push(option.clone());
        }
        args
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue(format!("{key}={value}")))
}
