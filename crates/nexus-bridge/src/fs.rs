//! The `fs` surface: readFile, writeFile, listDir, stat, watch, find.
//!
//! Every method issues its permission check before touching the
//! filesystem. Paths are resolved against the context cwd; the check names
//! the path as the caller passed it.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::UNIX_EPOCH;

use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::debug;

use nexus_types::{CommandContext, NexusError, Value};
use nexus_types::value::map_value;

use crate::handles::NativeResource;
use crate::ObjectBridge;

/// Cap on buffered watch events per handle; oldest are dropped first.
const WATCH_BUFFER_CAP: usize = 1024;

/// How `fs.find` matches names.
pub enum FindPattern<'a> {
    /// Substring of the file name.
    Substring(&'a str),
    /// Anchored regular expression over the file name.
    Regex(regex::Regex),
    /// Arbitrary predicate over the entry value.
    Predicate(&'a dyn Fn(&Value) -> bool),
}

/// Options for `fs.find`.
pub struct FindOptions {
    /// Root to search from; defaults to the context cwd.
    pub path: Option<String>,
    /// Restrict to files or directories.
    pub kind: Option<FindKind>,
    pub max_depth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindKind {
    File,
    Directory,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            path: None,
            kind: None,
            max_depth: 10,
        }
    }
}

/// Resolve `path` against the context cwd without touching the filesystem.
pub(crate) fn resolve_path(cwd: &str, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        Path::new(cwd).join(p)
    }
}

fn entry_value(path: &Path) -> Value {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let meta = std::fs::symlink_metadata(path).ok();
    let (is_file, is_dir, size) = match &meta {
        Some(m) => (m.is_file(), m.is_dir(), m.len()),
        None => (false, false, 0),
    };
    map_value(vec![
        ("name", Value::string(name)),
        ("isFile", Value::bool(is_file)),
        ("isDirectory", Value::bool(is_dir)),
        ("path", Value::string(path.to_string_lossy().into_owned())),
        ("size", Value::int(size as i64)),
    ])
}

fn system_time_ms(t: std::io::Result<std::time::SystemTime>) -> i64 {
    t.ok()
        .and_then(|st| st.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl ObjectBridge {
    /// `fs.readFile(path, {encoding?})` -- returns a string (default UTF-8)
    /// or bytes when `encoding` is `binary`.
    pub fn fs_read_file(
        &self,
        ctx: &CommandContext,
        path: &str,
        encoding: Option<&str>,
    ) -> Result<Value, NexusError> {
        self.caps().require("fs:read", path)?;
        let resolved = resolve_path(&ctx.cwd, path);
        let bytes = std::fs::read(&resolved)
            .map_err(|e| map_fs_err(e, &resolved))?;
        self.memory().check_headroom(bytes.len() as u64)?;
        match encoding.unwrap_or("utf-8") {
            "binary" | "bytes" => Ok(Value::bytes(bytes)),
            "utf-8" | "utf8" => {
                let text = String::from_utf8(bytes).map_err(|_| {
                    NexusError::InvalidArgument(format!(
                        "{} is not valid UTF-8; pass encoding \"binary\"",
                        resolved.display()
                    ))
                })?;
                Ok(Value::string(text))
            }
            other => Err(NexusError::InvalidArgument(format!(
                "unsupported encoding '{other}'"
            ))),
        }
    }

    /// `fs.writeFile(path, content)` -- overwrites, creates the file, fails
    /// when the parent directory is missing.
    pub fn fs_write_file(
        &self,
        ctx: &CommandContext,
        path: &str,
        content: &Value,
    ) -> Result<Value, NexusError> {
        self.caps().require("fs:write", path)?;
        let resolved = resolve_path(&ctx.cwd, path);
        let bytes: Vec<u8> = match &content.kind {
            nexus_types::value::ValueKind::Str(s) => s.clone().into_bytes(),
            nexus_types::value::ValueKind::Bytes(b) => b.clone(),
            other => {
                return Err(NexusError::InvalidArgument(format!(
                    "writeFile content must be string or bytes, got {}",
                    other.tag()
                )))
            }
        };
        std::fs::write(&resolved, bytes).map_err(|e| map_fs_err(e, &resolved))?;
        Ok(Value::bool(true))
    }

    /// `fs.listDir(path)` -- entries in filesystem order.
    pub fn fs_list_dir(&self, ctx: &CommandContext, path: &str) -> Result<Value, NexusError> {
        self.caps().require("fs:read", path)?;
        let resolved = resolve_path(&ctx.cwd, path);
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&resolved).map_err(|e| map_fs_err(e, &resolved))? {
            let entry = entry.map_err(NexusError::from)?;
            entries.push(entry_value(&entry.path()));
        }
        Ok(Value::list(entries))
    }

    /// `fs.stat(path)`.
    pub fn fs_stat(&self, ctx: &CommandContext, path: &str) -> Result<Value, NexusError> {
        self.caps().require("fs:stat", path)?;
        let resolved = resolve_path(&ctx.cwd, path);
        let meta = std::fs::metadata(&resolved).map_err(|e| map_fs_err(e, &resolved))?;
        let mode = {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                meta.permissions().mode() as i64
            }
            #[cfg(not(unix))]
            {
                0
            }
        };
        Ok(map_value(vec![
            ("size", Value::int(meta.len() as i64)),
            ("isFile", Value::bool(meta.is_file())),
            ("isDirectory", Value::bool(meta.is_dir())),
            ("modified", Value::int(system_time_ms(meta.modified()))),
            ("created", Value::int(system_time_ms(meta.created()))),
            ("mode", Value::int(mode)),
        ]))
    }

    /// `fs.watch(path, cb)` -- returns a handle with `stop()`. The callback
    /// receives `{eventType, filename, path}` values; events are also
    /// buffered on the handle for pull-style consumers.
    pub fn fs_watch(
        &self,
        ctx: &CommandContext,
        path: &str,
        callback: Option<Arc<dyn Fn(Value) + Send + Sync>>,
    ) -> Result<u64, NexusError> {
        self.caps().require("fs:watch", path)?;
        let resolved = resolve_path(&ctx.cwd, path);

        let events = Arc::new(Mutex::new(Vec::new()));
        let stopped = Arc::new(AtomicBool::new(false));
        let buffer = Arc::clone(&events);
        let stop_flag = Arc::clone(&stopped);
        let watched = resolved.to_string_lossy().into_owned();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| {
                if stop_flag.load(Ordering::Relaxed) {
                    return;
                }
                let Ok(event) = res else { return };
                let event_type = match event.kind {
                    notify::EventKind::Create(_) => "create",
                    notify::EventKind::Modify(_) => "modify",
                    notify::EventKind::Remove(_) => "remove",
                    _ => "other",
                };
                for p in &event.paths {
                    let filename = p
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    let value = map_value(vec![
                        ("eventType", Value::string(event_type)),
                        ("filename", Value::string(filename)),
                        ("path", Value::string(p.to_string_lossy().into_owned())),
                    ]);
                    {
                        let mut buf = buffer.lock().expect("watch buffer lock poisoned");
                        if buf.len() == WATCH_BUFFER_CAP {
                            buf.remove(0);
                        }
                        buf.push(value.clone());
                    }
                    if let Some(cb) = &callback {
                        cb(value);
                    }
                }
            },
            Config::default(),
        )
        .map_err(|e| NexusError::ExecutionFailure(format!("watch {watched}: {e}")))?;

        watcher
            .watch(&resolved, RecursiveMode::Recursive)
            .map_err(|e| match e.kind {
                notify::ErrorKind::PathNotFound => {
                    NexusError::NotFound(format!("{}", resolved.display()))
                }
                _ => NexusError::ExecutionFailure(format!("watch {}: {e}", resolved.display())),
            })?;

        debug!(path = %resolved.display(), "watch started");
        let reservation = self.memory().pin(64)?;
        let id = self.handles().pin(
            NativeResource::Watch {
                watcher: Box::new(watcher),
                events,
                stopped,
            },
            Some(reservation),
        );
        Ok(id)
    }

    /// Drain buffered events from a watch handle.
    pub fn fs_watch_events(&self, handle: u64) -> Result<Value, NexusError> {
        self.handles().with(handle, |resource| match resource {
            NativeResource::Watch { events, .. } => {
                let mut buf = events.lock().expect("watch buffer lock poisoned");
                Ok(Value::list(std::mem::take(&mut *buf)))
            }
            other => Err(NexusError::InvalidArgument(format!(
                "handle is a {}, not a watch",
                other.kind()
            ))),
        })?
    }

    /// `fs.find(pattern, {path?, type?, maxDepth})` -- recursive search.
    pub fn fs_find(
        &self,
        ctx: &CommandContext,
        pattern: &FindPattern<'_>,
        opts: &FindOptions,
    ) -> Result<Value, NexusError> {
        let root_arg = opts.path.as_deref().unwrap_or(&ctx.cwd);
        self.caps().require("fs:find", root_arg)?;
        let root = resolve_path(&ctx.cwd, root_arg);

        let mut matches = Vec::new();
        walk(&root, 0, opts.max_depth, &mut |path| {
            let entry = entry_value(path);
            let is_dir = entry
                .get("isDirectory")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            match opts.kind {
                Some(FindKind::File) if is_dir => return,
                Some(FindKind::Directory) if !is_dir => return,
                _ => {}
            }
            let name = entry.get("name").and_then(|v| v.as_str()).unwrap_or("");
            let hit = match pattern {
                FindPattern::Substring(needle) => name.contains(needle),
                FindPattern::Regex(re) => re.is_match(name),
                FindPattern::Predicate(pred) => pred(&entry),
            };
            if hit {
                matches.push(entry);
            }
        });
        Ok(Value::list(matches))
    }
}

fn walk(dir: &Path, depth: usize, max_depth: usize, visit: &mut impl FnMut(&Path)) {
    if depth > max_depth {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        visit(&path);
        if path.is_dir() {
            walk(&path, depth + 1, max_depth, visit);
        }
    }
}

fn map_fs_err(e: std::io::Error, path: &Path) -> NexusError {
    match e.kind() {
        std::io::ErrorKind::NotFound => NexusError::NotFound(path.display().to_string()),
        std::io::ErrorKind::PermissionDenied => NexusError::PermissionDenied {
            action: "fs".to_string(),
            resource: path.display().to_string(),
        },
        _ => NexusError::ExecutionFailure(format!("{}: {e}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{bridge, deny_bridge};
    use nexus_types::CommandContext;

    fn ctx_at(dir: &Path) -> CommandContext {
        CommandContext {
            cwd: dir.to_string_lossy().into_owned(),
            ..CommandContext::default()
        }
    }

    #[test]
    fn read_write_round_trip() {
        let b = bridge();
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_at(dir.path());

        b.fs_write_file(&ctx, "note.txt", &Value::string("hello")).unwrap();
        let back = b.fs_read_file(&ctx, "note.txt", None).unwrap();
        assert_eq!(back.as_str(), Some("hello"));
    }

    #[test]
    fn write_into_missing_parent_fails() {
        let b = bridge();
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_at(dir.path());
        let err = b
            .fs_write_file(&ctx, "no/such/dir/f.txt", &Value::string("x"))
            .unwrap_err();
        assert_eq!(err.kind(), nexus_types::ErrorKind::NotFound);
    }

    #[test]
    fn read_binary_encoding_returns_bytes() {
        let b = bridge();
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_at(dir.path());
        b.fs_write_file(&ctx, "raw", &Value::bytes(vec![0, 159, 146, 150]))
            .unwrap();
        let back = b.fs_read_file(&ctx, "raw", Some("binary")).unwrap();
        assert_eq!(back.meta.type_tag, "bytes");
    }

    #[test]
    fn list_dir_reports_entries() {
        let b = bridge();
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_at(dir.path());
        b.fs_write_file(&ctx, "a.txt", &Value::string("aaaa")).unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let listing = b.fs_list_dir(&ctx, ".").unwrap();
        let entries = listing.as_list().unwrap();
        assert_eq!(entries.len(), 2);
        let file = entries
            .iter()
            .find(|e| e.get("name").and_then(|v| v.as_str()) == Some("a.txt"))
            .unwrap();
        assert_eq!(file.get("isFile").and_then(Value::as_bool), Some(true));
        assert_eq!(file.get("size").and_then(Value::as_int), Some(4));
    }

    #[test]
    fn stat_reports_shape() {
        let b = bridge();
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_at(dir.path());
        b.fs_write_file(&ctx, "f", &Value::string("abc")).unwrap();
        let stat = b.fs_stat(&ctx, "f").unwrap();
        assert_eq!(stat.get("size").and_then(Value::as_int), Some(3));
        assert_eq!(stat.get("isFile").and_then(Value::as_bool), Some(true));
        assert!(stat.get("modified").and_then(Value::as_int).unwrap() > 0);
    }

    #[test]
    fn denied_read_is_permission_error_with_audit() {
        let b = deny_bridge();
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_at(dir.path());
        let err = b.fs_read_file(&ctx, "x", None).unwrap_err();
        assert_eq!(err.kind(), nexus_types::ErrorKind::PermissionDenied);
        let audit = b.caps().audit_query(&nexus_caps::AuditQuery {
            granted: Some(false),
            ..Default::default()
        });
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, "fs:read");
    }

    #[test]
    fn find_by_substring_and_kind() {
        let b = bridge();
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_at(dir.path());
        b.fs_write_file(&ctx, "alpha.log", &Value::string("x")).unwrap();
        b.fs_write_file(&ctx, "beta.txt", &Value::string("y")).unwrap();
        std::fs::create_dir(dir.path().join("logs")).unwrap();
        b.fs_write_file(&ctx, "logs/gamma.log", &Value::string("z")).unwrap();

        let found = b
            .fs_find(
                &ctx,
                &FindPattern::Substring(".log"),
                &FindOptions {
                    kind: Some(FindKind::File),
                    ..Default::default()
                },
            )
            .unwrap();
        let names: Vec<&str> = found
            .as_list()
            .unwrap()
            .iter()
            .filter_map(|e| e.get("name").and_then(|v| v.as_str()))
            .collect();
        assert!(names.contains(&"alpha.log"));
        assert!(names.contains(&"gamma.log"));
        assert!(!names.contains(&"beta.txt"));
    }

    #[test]
    fn find_respects_max_depth() {
        let b = bridge();
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_at(dir.path());
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        b.fs_write_file(&ctx, "a/b/deep.txt", &Value::string("d")).unwrap();

        let shallow = b
            .fs_find(
                &ctx,
                &FindPattern::Substring("deep"),
                &FindOptions {
                    max_depth: 0,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(shallow.as_list().unwrap().is_empty());
    }

    #[test]
    fn watch_buffers_events_until_stopped() {
        let b = bridge();
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_at(dir.path());

        let handle = b.fs_watch(&ctx, ".", None).unwrap();
        b.fs_write_file(&ctx, "watched.txt", &Value::string("x")).unwrap();

        // The notify backend delivers asynchronously.
        let mut events = Vec::new();
        for _ in 0..50 {
            std::thread::sleep(std::time::Duration::from_millis(20));
            let drained = b.fs_watch_events(handle).unwrap();
            events.extend(drained.as_list().unwrap().to_vec());
            if !events.is_empty() {
                break;
            }
        }
        assert!(!events.is_empty(), "no watch events arrived");
        assert!(events[0].get("eventType").is_some());

        assert!(b.release_handle(handle));
        assert!(b.fs_watch_events(handle).is_err());
    }
}
