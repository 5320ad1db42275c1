use std::ffi::OsStr;
use std::fs::File;
use std::process;
use std::sync::Arc;

use clap::error::ErrorKind;
use clap::{Arg, ArgAction, Command};
use env_logger::Target;
use log::{error, info, warn};

use gridfs_fuse::{
    store_pool, CacheClient, Config, GridFs, MemoryCache, MemoryStore, StoreError,
    DISPATCH_THREADS,
};

// exit codes, stable for scripting around the mount helper
const EXIT_USAGE: i32 = 1;
const EXIT_CACHE_CONNECT: i32 = 2;
const EXIT_AUTH_REFUSED: i32 = 3;
const EXIT_AUTH_ERROR: i32 = 4;

fn main() {
    let command = Command::new("gridfs")
        .version("0.1.0")
        .about("Mount a chunked blob store as a POSIX filesystem")
        .arg(
            Arg::new("MOUNT_POINT")
                .required(true)
                .index(1)
                .help("Mount FUSE at given path"),
        )
        .arg(
            Arg::new("options")
                .short('o')
                .value_name("opt[=val]")
                .action(ArgAction::Append)
                .value_delimiter(',')
                .help("Mount options; mongo_db=NAME is mandatory, unknown options go to FUSE"),
        );

    let matches = match command.try_get_matches() {
        Ok(matches) => matches,
        Err(err)
            if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) =>
        {
            err.exit()
        }
        Err(err) => {
            eprintln!("{err}");
            process::exit(EXIT_USAGE);
        }
    };

    let options: Vec<String> = matches
        .get_many::<String>("options")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    let config = match Config::from_options(options) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("[error] {err} (see gridfs -h)");
            process::exit(EXIT_USAGE);
        }
    };

    init_logging(&config);

    // The translation core talks to the store through the BlobStore trait;
    // this binary wires up the in-process volatile backend. Data written
    // here lives exactly as long as the mount.
    warn!(
        "using the volatile in-process store for namespace {} (target {})",
        config.namespace(),
        config.connection_target()
    );
    let mut store = MemoryStore::new(config.namespace());
    if let Some(creds) = config.credentials() {
        store = store.with_credentials(&creds.db, &creds.user, &creds.password);
    }
    let store = store_pool(Arc::new(store), config.credentials());

    // the cache is probed before the store ever authenticates; a broken
    // cache must report exit code 2 even when the credentials are bad too
    let cache = Arc::new(MemoryCache::new());
    if let Err(err) = cache.connect() {
        eprintln!("could not connect to the attr cache ({err})");
        process::exit(EXIT_CACHE_CONNECT);
    }

    // fail fast on store authentication before the kernel is involved
    match store.lease() {
        Ok(_) => {}
        Err(StoreError::Unauthorized(err)) => {
            eprintln!("[failure] {err}");
            process::exit(EXIT_AUTH_REFUSED);
        }
        Err(err) => {
            eprintln!("[exception] could not authenticate: {err}");
            process::exit(EXIT_AUTH_ERROR);
        }
    }

    let mountpoint = matches
        .get_one::<String>("MOUNT_POINT")
        .cloned()
        .unwrap_or_default();
    let fuse_args = config.fuse_mount_args();
    let filesystem = GridFs::new(config, store, cache);

    if let Err(err) = filesystem.create_root() {
        eprintln!("could not create the root directory: {err}");
        process::exit(EXIT_USAGE);
    }

    info!("mounting gridfs at {mountpoint}");
    let fuse_args: Vec<&OsStr> = fuse_args.iter().map(|arg| arg.as_os_str()).collect();
    let mounted = fuse_mt::mount(
        fuse_mt::FuseMT::new(filesystem, DISPATCH_THREADS),
        &mountpoint,
        &fuse_args,
    );
    if let Err(err) = mounted {
        error!("mount failed: {err}");
        process::exit(EXIT_USAGE);
    }
}

fn init_logging(config: &Config) {
    let filter = match config.log_level.to_ascii_uppercase().as_str() {
        "OFF" => "off",
        "DEBUG" => "debug",
        "INFO" => "info",
        _ => "error",
    };
    let mut builder = env_logger::Builder::new();
    builder.parse_filters(filter);
    match config.log_file.as_str() {
        "console" => {}
        path => match File::create(path) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(err) => eprintln!("cannot open log file {path}: {err}, logging to stderr"),
        },
    }
    builder.init();
}
