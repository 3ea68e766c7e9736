//! The embedded script host.
//!
//! Scripted lines evaluate on a rhai engine whose scope carries the four
//! surface objects (`fs`, `proc`, `net`, `utils`) plus `input`, the prior
//! pipeline stage's value. Every surface method is a thin shim over the
//! native implementation, so the capability gate and memory cap apply
//! identically to scripted and native callers.
//!
//! Long-lived scripted callbacks (`fs.watch`, `proc.monitor`) cannot be
//! invoked once their script returns; those methods hand back a handle
//! whose `events()` / `samples()` drain buffered data instead. Synchronous
//! callbacks (`utils.retry`, `fs.find` predicates, `net.download`
//! progress) are called in place.

use std::sync::Arc;

use rhai::{Dynamic, Engine, EvalAltResult, FnPtr, NativeCallContext, Position, Scope};

use nexus_types::{CommandContext, ErrorKind, NexusError, Value};

use crate::fs::{FindKind, FindOptions, FindPattern};
use crate::handles::NativeResource;
use crate::marshal::HandleRef;
use crate::net::RequestOptions;
use crate::proc::ExecOptions;
use crate::utils::RetryOptions;
use crate::ObjectBridge;

/// Evaluates scripts against a bridge.
pub struct ScriptHost {
    bridge: Arc<ObjectBridge>,
}

#[derive(Clone)]
struct FsApi {
    bridge: Arc<ObjectBridge>,
    ctx: CommandContext,
}

#[derive(Clone)]
struct ProcApi {
    bridge: Arc<ObjectBridge>,
    ctx: CommandContext,
}

#[derive(Clone)]
struct NetApi {
    bridge: Arc<ObjectBridge>,
    ctx: CommandContext,
}

#[derive(Clone)]
struct UtilsApi {
    bridge: Arc<ObjectBridge>,
    ctx: CommandContext,
}

/// Carry a `NexusError` through the scripting runtime without losing its
/// kind: encode as a runtime error holding a map.
fn script_err(e: NexusError) -> Box<EvalAltResult> {
    let mut map = rhai::Map::new();
    map.insert("kind".into(), Dynamic::from(e.kind().to_string()));
    map.insert("message".into(), Dynamic::from(e.to_string()));
    if let NexusError::PermissionDenied { action, resource } = &e {
        map.insert("action".into(), Dynamic::from(action.clone()));
        map.insert("resource".into(), Dynamic::from(resource.clone()));
    }
    Box::new(EvalAltResult::ErrorRuntime(
        Dynamic::from_map(map),
        Position::NONE,
    ))
}

/// Byte offset of a rhai position within `script`, clamped to its length.
fn position_offset(script: &str, pos: Position) -> usize {
    let (Some(line), Some(col)) = (pos.line(), pos.position()) else {
        return 0;
    };
    let mut offset = 0usize;
    for (idx, text) in script.split('\n').enumerate() {
        if idx + 1 == line {
            offset += col.saturating_sub(1).min(text.len());
            return offset.min(script.len());
        }
        offset += text.len() + 1;
    }
    script.len()
}

/// Map an evaluation failure back into the native taxonomy, recovering the
/// original kind when the error came through [`script_err`].
fn unscript_err(err: &EvalAltResult, script: &str, ctx: &CommandContext) -> NexusError {
    match err {
        EvalAltResult::ErrorRuntime(payload, _) => {
            if let Some(map) = payload.clone().try_cast::<rhai::Map>() {
                let kind = map
                    .get("kind")
                    .and_then(|d| d.clone().into_immutable_string().ok())
                    .map(|s| s.to_string())
                    .unwrap_or_default();
                let message = map
                    .get("message")
                    .and_then(|d| d.clone().into_immutable_string().ok())
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "script error".to_string());
                return rebuild_error(&kind, message, &map);
            }
            NexusError::ExecutionFailure(err.to_string())
        }
        EvalAltResult::ErrorTerminated(_, _) => match &ctx.cancel {
            Some(token) if token.deadline_passed() => {
                NexusError::Timeout("script exceeded its deadline".to_string())
            }
            _ => NexusError::Cancelled("script cancelled".to_string()),
        },
        EvalAltResult::ErrorParsing(parse_err, pos) => {
            NexusError::syntax(parse_err.to_string(), position_offset(script, *pos))
        }
        other => NexusError::ExecutionFailure(other.to_string()),
    }
}

fn rebuild_error(kind: &str, message: String, map: &rhai::Map) -> NexusError {
    let field = |key: &str| {
        map.get(key)
            .and_then(|d| d.clone().into_immutable_string().ok())
            .map(|s| s.to_string())
            .unwrap_or_default()
    };
    match kind {
        k if k == ErrorKind::PermissionDenied.to_string() => NexusError::PermissionDenied {
            action: field("action"),
            resource: field("resource"),
        },
        k if k == ErrorKind::NotFound.to_string() => NexusError::NotFound(message),
        k if k == ErrorKind::InvalidArgument.to_string() => NexusError::InvalidArgument(message),
        k if k == ErrorKind::Timeout.to_string() => NexusError::Timeout(message),
        k if k == ErrorKind::Cancelled.to_string() => NexusError::Cancelled(message),
        k if k == ErrorKind::MemoryExceeded.to_string() => NexusError::MemoryExceeded(message),
        _ => NexusError::ExecutionFailure(message),
    }
}

fn opt_string(map: &rhai::Map, key: &str) -> Option<String> {
    map.get(key)
        .and_then(|d| d.clone().into_immutable_string().ok())
        .map(|s| s.to_string())
}

fn opt_u64(map: &rhai::Map, key: &str) -> Option<u64> {
    map.get(key).and_then(|d| d.as_int().ok()).map(|n| n.max(0) as u64)
}

fn header_pairs(map: &rhai::Map, key: &str) -> Vec<(String, String)> {
    map.get(key)
        .and_then(|d| d.clone().try_cast::<rhai::Map>())
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| {
                    v.clone()
                        .into_immutable_string()
                        .ok()
                        .map(|s| (k.to_string(), s.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn request_options(map: &rhai::Map) -> RequestOptions {
    RequestOptions {
        headers: header_pairs(map, "headers"),
        timeout_ms: opt_u64(map, "timeout"),
    }
}

fn exec_options(map: &rhai::Map) -> ExecOptions {
    let args = map
        .get("args")
        .and_then(|d| d.clone().try_cast::<rhai::Array>())
        .map(|arr| {
            arr.iter()
                .filter_map(|d| d.clone().into_immutable_string().ok())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default();
    let env = map
        .get("env")
        .and_then(|d| d.clone().try_cast::<rhai::Map>())
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| {
                    v.clone()
                        .into_immutable_string()
                        .ok()
                        .map(|s| (k.to_string(), s.to_string()))
                })
                .collect()
        })
        .unwrap_or_default();
    ExecOptions {
        args,
        cwd: opt_string(map, "cwd"),
        env,
        timeout_ms: opt_u64(map, "timeout"),
    }
}

fn find_options(map: &rhai::Map) -> Result<FindOptions, Box<EvalAltResult>> {
    let kind = match opt_string(map, "type").as_deref() {
        None => None,
        Some("file") => Some(FindKind::File),
        Some("dir") | Some("directory") => Some(FindKind::Directory),
        Some(other) => {
            return Err(script_err(NexusError::InvalidArgument(format!(
                "find type must be 'file' or 'dir', got '{other}'"
            ))))
        }
    };
    Ok(FindOptions {
        path: opt_string(map, "path"),
        kind,
        max_depth: opt_u64(map, "maxDepth").unwrap_or(10) as usize,
    })
}

/// Rewrite arrow-function parameter lists to the runtime's closure form:
/// `f => body` and `(a, b) => body` become `|f| body` and `|a, b| body`.
///
/// The shell's scripted surface is advertised with arrow syntax, which the
/// embedded runtime does not parse. Only arrows whose left side is a plain
/// identifier (or a parenthesised identifier list) are rewritten, so the
/// runtime's own `switch` arms (`1 => ...`, `_ => ...`) and arrows inside
/// string literals pass through untouched.
fn rewrite_arrow_params(script: &str) -> String {
    let mut out = script.to_string();
    for pos in arrow_positions(script).into_iter().rev() {
        if let Some((start, params)) = arrow_param_span(&out, pos) {
            let replacement = format!("|{params}|");
            out.replace_range(start..pos + 2, &replacement);
        }
    }
    out
}

/// Byte offsets of every `=>` outside string literals.
fn arrow_positions(script: &str) -> Vec<usize> {
    let mut positions = Vec::new();
    let bytes = script.as_bytes();
    let mut quote: Option<u8> = None;
    let mut escaped = false;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == q {
                    quote = None;
                }
            }
            None => {
                if b == b'"' || b == b'\'' || b == b'`' {
                    quote = Some(b);
                } else if b == b'/' && bytes.get(i + 1) == Some(&b'/') {
                    while i < bytes.len() && bytes[i] != b'\n' {
                        i += 1;
                    }
                    continue;
                } else if b == b'/' && bytes.get(i + 1) == Some(&b'*') {
                    i += 2;
                    while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                        i += 1;
                    }
                    i += 2;
                    continue;
                } else if b == b'=' && bytes.get(i + 1) == Some(&b'>') {
                    positions.push(i);
                    i += 1;
                }
            }
        }
        i += 1;
    }
    positions
}

/// The parameter span preceding the arrow at `arrow_pos`, when it is an
/// arrow function rather than a `switch` arm.
fn arrow_param_span(text: &str, arrow_pos: usize) -> Option<(usize, String)> {
    let bytes = text.as_bytes();
    let mut end = arrow_pos;
    while end > 0 && bytes[end - 1].is_ascii_whitespace() {
        end -= 1;
    }
    if end == 0 {
        return None;
    }

    if bytes[end - 1] == b')' {
        let mut depth = 0usize;
        let mut open = end;
        loop {
            if open == 0 {
                return None;
            }
            open -= 1;
            match bytes[open] {
                b')' => depth += 1,
                b'(' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                _ => {}
            }
        }
        let inner = text[open + 1..end - 1].trim();
        if inner.is_empty() || inner.split(',').all(|p| is_identifier(p.trim())) {
            return Some((open, inner.to_string()));
        }
        return None;
    }

    let mut start = end;
    while start > 0 && (bytes[start - 1].is_ascii_alphanumeric() || bytes[start - 1] == b'_') {
        start -= 1;
    }
    let ident = &text[start..end];
    // A bare `_` or a literal before `=>` is a switch arm, not a parameter.
    if is_identifier(ident) && ident.as_bytes()[0].is_ascii_alphabetic() {
        Some((start, ident.to_string()))
    } else {
        None
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Build a string pattern: `/re/` is a regex, anything else a substring.
fn string_pattern(pat: &str) -> Result<FindPattern<'_>, Box<EvalAltResult>> {
    if pat.len() > 2 && pat.starts_with('/') && pat.ends_with('/') {
        let re = regex::Regex::new(&pat[1..pat.len() - 1])
            .map_err(|e| script_err(NexusError::InvalidArgument(format!("bad regex: {e}"))))?;
        Ok(FindPattern::Regex(re))
    } else {
        Ok(FindPattern::Substring(pat))
    }
}

type ScriptResult = Result<Dynamic, Box<EvalAltResult>>;

impl ScriptHost {
    pub fn new(bridge: Arc<ObjectBridge>) -> Self {
        Self { bridge }
    }

    pub fn bridge(&self) -> &Arc<ObjectBridge> {
        &self.bridge
    }

    /// Evaluate a script under `ctx`, returning the marshalled result.
    /// Arrow-function parameters are rewritten to closure form first.
    pub fn eval(&self, script: &str, ctx: &CommandContext) -> Result<Value, NexusError> {
        let script = rewrite_arrow_params(script);
        let script = script.as_str();
        let engine = self.build_engine(ctx);
        let mut scope = Scope::new();
        scope.push(
            "fs",
            FsApi {
                bridge: Arc::clone(&self.bridge),
                ctx: ctx.clone(),
            },
        );
        scope.push(
            "proc",
            ProcApi {
                bridge: Arc::clone(&self.bridge),
                ctx: ctx.clone(),
            },
        );
        scope.push(
            "net",
            NetApi {
                bridge: Arc::clone(&self.bridge),
                ctx: ctx.clone(),
            },
        );
        scope.push(
            "utils",
            UtilsApi {
                bridge: Arc::clone(&self.bridge),
                ctx: ctx.clone(),
            },
        );
        scope.push(
            "input",
            match &ctx.pipeline_input {
                Some(v) => self.bridge.to_scripted(v),
                None => Dynamic::UNIT,
            },
        );

        match engine.eval_with_scope::<Dynamic>(&mut scope, script) {
            Ok(result) => self.bridge.to_native(&result),
            Err(e) => Err(unscript_err(&e, script, ctx)),
        }
    }

    fn build_engine(&self, ctx: &CommandContext) -> Engine {
        let mut engine = Engine::new();

        if let Some(token) = ctx.cancel.clone() {
            engine.on_progress(move |_| {
                if token.is_cancelled() {
                    Some(Dynamic::UNIT)
                } else {
                    None
                }
            });
        }

        engine.register_type_with_name::<FsApi>("fs");
        engine.register_type_with_name::<ProcApi>("proc");
        engine.register_type_with_name::<NetApi>("net");
        engine.register_type_with_name::<UtilsApi>("utils");
        engine.register_type_with_name::<HandleRef>("handle");

        register_fs(&mut engine);
        register_proc(&mut engine);
        register_net(&mut engine);
        register_utils(&mut engine);
        register_handle(&mut engine, &self.bridge);

        engine
    }
}

fn register_fs(engine: &mut Engine) {
    engine.register_fn("readFile", |fs: &mut FsApi, path: &str| -> ScriptResult {
        fs.bridge
            .fs_read_file(&fs.ctx, path, None)
            .map(|v| fs.bridge.to_scripted(&v))
            .map_err(script_err)
    });
    engine.register_fn(
        "readFile",
        |fs: &mut FsApi, path: &str, opts: rhai::Map| -> ScriptResult {
            fs.bridge
                .fs_read_file(&fs.ctx, path, opt_string(&opts, "encoding").as_deref())
                .map(|v| fs.bridge.to_scripted(&v))
                .map_err(script_err)
        },
    );
    engine.register_fn(
        "writeFile",
        |fs: &mut FsApi, path: &str, content: Dynamic| -> ScriptResult {
            let value = fs.bridge.to_native(&content).map_err(script_err)?;
            fs.bridge
                .fs_write_file(&fs.ctx, path, &value)
                .map(|v| fs.bridge.to_scripted(&v))
                .map_err(script_err)
        },
    );
    for name in ["listDir", "dir"] {
        engine.register_fn(name, |fs: &mut FsApi, path: &str| -> ScriptResult {
            fs.bridge
                .fs_list_dir(&fs.ctx, path)
                .map(|v| fs.bridge.to_scripted(&v))
                .map_err(script_err)
        });
        engine.register_fn(name, |fs: &mut FsApi| -> ScriptResult {
            fs.bridge
                .fs_list_dir(&fs.ctx, ".")
                .map(|v| fs.bridge.to_scripted(&v))
                .map_err(script_err)
        });
    }
    engine.register_fn("stat", |fs: &mut FsApi, path: &str| -> ScriptResult {
        fs.bridge
            .fs_stat(&fs.ctx, path)
            .map(|v| fs.bridge.to_scripted(&v))
            .map_err(script_err)
    });
    engine.register_fn("watch", |fs: &mut FsApi, path: &str| -> ScriptResult {
        fs.bridge
            .fs_watch(&fs.ctx, path, None)
            .map(|id| Dynamic::from(HandleRef { id }))
            .map_err(script_err)
    });
    // The scripted callback cannot outlive its script; events buffer on the
    // handle and the callback form behaves like the handle form.
    engine.register_fn(
        "watch",
        |fs: &mut FsApi, path: &str, _cb: FnPtr| -> ScriptResult {
            fs.bridge
                .fs_watch(&fs.ctx, path, None)
                .map(|id| Dynamic::from(HandleRef { id }))
                .map_err(script_err)
        },
    );
    engine.register_fn("find", |fs: &mut FsApi, pattern: &str| -> ScriptResult {
        let pat = string_pattern(pattern)?;
        fs.bridge
            .fs_find(&fs.ctx, &pat, &FindOptions::default())
            .map(|v| fs.bridge.to_scripted(&v))
            .map_err(script_err)
    });
    engine.register_fn(
        "find",
        |fs: &mut FsApi, pattern: &str, opts: rhai::Map| -> ScriptResult {
            let pat = string_pattern(pattern)?;
            let opts = find_options(&opts)?;
            fs.bridge
                .fs_find(&fs.ctx, &pat, &opts)
                .map(|v| fs.bridge.to_scripted(&v))
                .map_err(script_err)
        },
    );
    engine.register_fn(
        "find",
        |call: NativeCallContext, fs: &mut FsApi, predicate: FnPtr| -> ScriptResult {
            let bridge = Arc::clone(&fs.bridge);
            let pred = |entry: &Value| -> bool {
                let scripted = bridge.to_scripted(entry);
                predicate
                    .call_within_context::<bool>(&call, (scripted,))
                    .unwrap_or(false)
            };
            fs.bridge
                .fs_find(&fs.ctx, &FindPattern::Predicate(&pred), &FindOptions::default())
                .map(|v| fs.bridge.to_scripted(&v))
                .map_err(script_err)
        },
    );
}

fn register_proc(engine: &mut Engine) {
    engine.register_fn("exec", |proc: &mut ProcApi, cmd: &str| -> ScriptResult {
        proc.bridge
            .proc_exec(&proc.ctx, cmd, &ExecOptions::default())
            .map(|v| proc.bridge.to_scripted(&v))
            .map_err(script_err)
    });
    engine.register_fn(
        "exec",
        |proc: &mut ProcApi, cmd: &str, opts: rhai::Map| -> ScriptResult {
            proc.bridge
                .proc_exec(&proc.ctx, cmd, &exec_options(&opts))
                .map(|v| proc.bridge.to_scripted(&v))
                .map_err(script_err)
        },
    );
    engine.register_fn("list", |proc: &mut ProcApi| -> ScriptResult {
        proc.bridge
            .proc_list(&proc.ctx)
            .map(|v| proc.bridge.to_scripted(&v))
            .map_err(script_err)
    });
    engine.register_fn("kill", |proc: &mut ProcApi, pid: i64| -> ScriptResult {
        proc.bridge
            .proc_kill(&proc.ctx, pid as i32, None)
            .map(|v| proc.bridge.to_scripted(&v))
            .map_err(script_err)
    });
    engine.register_fn(
        "kill",
        |proc: &mut ProcApi, pid: i64, signal: &str| -> ScriptResult {
            proc.bridge
                .proc_kill(&proc.ctx, pid as i32, Some(signal))
                .map(|v| proc.bridge.to_scripted(&v))
                .map_err(script_err)
        },
    );
    engine.register_fn("info", |proc: &mut ProcApi, pid: i64| -> ScriptResult {
        proc.bridge
            .proc_info(&proc.ctx, pid as i32)
            .map(|v| proc.bridge.to_scripted(&v))
            .map_err(script_err)
    });
    engine.register_fn(
        "monitor",
        |proc: &mut ProcApi, interval_ms: i64| -> ScriptResult {
            proc.bridge
                .proc_monitor(&proc.ctx, None, interval_ms.max(0) as u64)
                .map(|id| Dynamic::from(HandleRef { id }))
                .map_err(script_err)
        },
    );
    engine.register_fn(
        "monitor",
        |proc: &mut ProcApi, _cb: FnPtr, interval_ms: i64| -> ScriptResult {
            proc.bridge
                .proc_monitor(&proc.ctx, None, interval_ms.max(0) as u64)
                .map(|id| Dynamic::from(HandleRef { id }))
                .map_err(script_err)
        },
    );
}

fn register_net(engine: &mut Engine) {
    engine.register_fn("get", |net: &mut NetApi, url: &str| -> ScriptResult {
        net.bridge
            .net_get(&net.ctx, url, &RequestOptions::default())
            .map(|v| net.bridge.to_scripted(&v))
            .map_err(script_err)
    });
    engine.register_fn(
        "get",
        |net: &mut NetApi, url: &str, opts: rhai::Map| -> ScriptResult {
            net.bridge
                .net_get(&net.ctx, url, &request_options(&opts))
                .map(|v| net.bridge.to_scripted(&v))
                .map_err(script_err)
        },
    );
    engine.register_fn(
        "post",
        |net: &mut NetApi, url: &str, body: Dynamic| -> ScriptResult {
            let value = net.bridge.to_native(&body).map_err(script_err)?;
            net.bridge
                .net_post(&net.ctx, url, &value, &RequestOptions::default())
                .map(|v| net.bridge.to_scripted(&v))
                .map_err(script_err)
        },
    );
    engine.register_fn(
        "post",
        |net: &mut NetApi, url: &str, body: Dynamic, opts: rhai::Map| -> ScriptResult {
            let value = net.bridge.to_native(&body).map_err(script_err)?;
            net.bridge
                .net_post(&net.ctx, url, &value, &request_options(&opts))
                .map(|v| net.bridge.to_scripted(&v))
                .map_err(script_err)
        },
    );
    engine.register_fn(
        "download",
        |net: &mut NetApi, url: &str, path: &str| -> ScriptResult {
            net.bridge
                .net_download(&net.ctx, url, path, None)
                .map(|id| Dynamic::from(HandleRef { id }))
                .map_err(script_err)
        },
    );
    engine.register_fn(
        "download",
        |call: NativeCallContext, net: &mut NetApi, url: &str, path: &str, opts: rhai::Map| -> ScriptResult {
            let progress_fn = opts
                .get("onProgress")
                .and_then(|d| d.clone().try_cast::<FnPtr>());
            let progress = progress_fn.map(|fp| {
                move |written: u64| {
                    let _ = fp.call_within_context::<Dynamic>(&call, (written as i64,));
                }
            });
            net.bridge
                .net_download(
                    &net.ctx,
                    url,
                    path,
                    progress.as_ref().map(|f| f as &dyn Fn(u64)),
                )
                .map(|id| Dynamic::from(HandleRef { id }))
                .map_err(script_err)
        },
    );
}

fn register_utils(engine: &mut Engine) {
    engine.register_fn("sleep", |utils: &mut UtilsApi, ms: i64| {
        utils.bridge.utils_sleep(&utils.ctx, ms.max(0) as u64);
    });
    engine.register_fn("uuid", |utils: &mut UtilsApi| -> Dynamic {
        let v = utils.bridge.utils_uuid();
        utils.bridge.to_scripted(&v)
    });
    engine.register_fn(
        "hash",
        |utils: &mut UtilsApi, data: Dynamic, alg: &str| -> ScriptResult {
            let value = utils.bridge.to_native(&data).map_err(script_err)?;
            utils
                .bridge
                .utils_hash(&value, alg)
                .map(|v| utils.bridge.to_scripted(&v))
                .map_err(script_err)
        },
    );
    engine.register_fn("formatBytes", |utils: &mut UtilsApi, n: i64| -> Dynamic {
        let v = utils.bridge.utils_format_bytes(n.max(0) as u64);
        utils.bridge.to_scripted(&v)
    });
    engine.register_fn(
        "retry",
        |call: NativeCallContext, utils: &mut UtilsApi, f: FnPtr| -> ScriptResult {
            run_retry(&call, utils, f, RetryOptions::default())
        },
    );
    engine.register_fn(
        "retry",
        |call: NativeCallContext, utils: &mut UtilsApi, f: FnPtr, opts: rhai::Map| -> ScriptResult {
            let options = RetryOptions {
                retries: opt_u64(&opts, "retries").unwrap_or(3) as u32,
                delay_ms: opt_u64(&opts, "delay").or(opt_u64(&opts, "delayMs")).unwrap_or(0),
            };
            run_retry(&call, utils, f, options)
        },
    );
    engine.register_fn(
        "deepMerge",
        |utils: &mut UtilsApi, a: rhai::Map, b: rhai::Map| -> ScriptResult {
            let left = utils
                .bridge
                .to_native(&Dynamic::from_map(a))
                .map_err(script_err)?;
            let right = utils
                .bridge
                .to_native(&Dynamic::from_map(b))
                .map_err(script_err)?;
            let merged = utils.bridge.utils_deep_merge(&left, &right);
            Ok(utils.bridge.to_scripted(&merged))
        },
    );
    engine.register_fn(
        "deepClone",
        |utils: &mut UtilsApi, v: Dynamic| -> ScriptResult {
            let value = utils.bridge.to_native(&v).map_err(script_err)?;
            let clone = utils.bridge.utils_deep_clone(&value);
            Ok(utils.bridge.to_scripted(&clone))
        },
    );
}

fn run_retry(
    call: &NativeCallContext,
    utils: &mut UtilsApi,
    f: FnPtr,
    options: RetryOptions,
) -> ScriptResult {
    let bridge = Arc::clone(&utils.bridge);
    let mut attempt = || -> Result<Value, NexusError> {
        match f.call_within_context::<Dynamic>(call, ()) {
            Ok(d) => bridge.to_native(&d),
            Err(e) => Err(NexusError::ExecutionFailure(e.to_string())),
        }
    };
    utils
        .bridge
        .utils_retry(&utils.ctx, &options, &mut attempt)
        .map(|v| utils.bridge.to_scripted(&v))
        .map_err(script_err)
}

fn register_handle(engine: &mut Engine, bridge: &Arc<ObjectBridge>) {
    engine.register_get("id", |h: &mut HandleRef| h.id as i64);

    // `stop` and `release` are the same operation: unpin the resource,
    // which also flags watchers and monitors to stop.
    for name in ["stop", "release"] {
        let b = Arc::clone(bridge);
        engine.register_fn(name, move |h: &mut HandleRef| -> bool {
            b.release_handle(h.id)
        });
    }

    let b = Arc::clone(bridge);
    engine.register_fn("events", move |h: &mut HandleRef| -> ScriptResult {
        b.fs_watch_events(h.id)
            .map(|v| b.to_scripted(&v))
            .map_err(script_err)
    });

    let b = Arc::clone(bridge);
    engine.register_fn("samples", move |h: &mut HandleRef| -> ScriptResult {
        b.proc_monitor_samples(h.id)
            .map(|v| b.to_scripted(&v))
            .map_err(script_err)
    });

    let b = Arc::clone(bridge);
    engine.register_fn("path", move |h: &mut HandleRef| -> ScriptResult {
        b.handles()
            .with(h.id, |r| match r {
                NativeResource::File { path } => Ok(Value::string(path.clone())),
                other => Err(NexusError::InvalidArgument(format!(
                    "handle is a {}, not a file",
                    other.kind()
                ))),
            })
            .map_err(script_err)?
            .map(|v| b.to_scripted(&v))
            .map_err(script_err)
    });
}
