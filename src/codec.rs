//
// POSIX attributes piggy-backed on the blob store's content-type field.
//
// The store keeps no per-file metadata besides filename, length, chunk size
// and content type, so mode/uid/gid/mtime travel as a printable string like
// "m:33188|u:1000|g:1000|t:1321927291".
//


/// The four attributes carried by an encoded content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    /// Seconds since the epoch.
    pub mtime: i64,
}

/// Emit the `m:..|u:..|g:..|t:..` form.
pub fn encode(meta: &FileMeta) -> String {
    format!("m:{}|u:{}|g:{}|t:{}", meta.mode, meta.uid, meta.gid, meta.mtime)
}

/// Decode an encoded content type. Total: any field that is missing or
/// malformed keeps its default (regular file 0644, the configured uid/gid,
/// epoch time). Unknown tokens are skipped, so a record whose content type
/// was never encoded by us ("text/plain") decodes to the defaults.
pub fn decode(content_type: &str, default_uid: u32, default_gid: u32) -> FileMeta {
    let mut meta = FileMeta {
        mode: libc::S_IFREG as u32 | 0o644,
        uid: default_uid,
        gid: default_gid,
        mtime: 0,
    };

    let mut tokens = content_type.split(['|', ':']).filter(|t| !t.is_empty());
    while let Some(token) = tokens.next() {
        let Some(slot @ (b'm' | b'u' | b'g' | b't')) = token.as_bytes().first().copied() else {
            continue;
        };
        let Some(value) = tokens.next() else { break };
        match slot {
            b'm' => {
                if let Ok(v) = value.parse() {
                    meta.mode = v;
                }
            }
            b'u' => {
                if let Ok(v) = value.parse() {
                    meta.uid = v;
                }
            }
            b'g' => {
                if let Ok(v) = value.parse() {
                    meta.gid = v;
                }
            }
            _ => {
                if let Ok(v) = value.parse() {
                    meta.mtime = v;
                }
            }
        }
    }

    meta
}
