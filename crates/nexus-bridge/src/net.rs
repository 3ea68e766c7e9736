//! The `net` surface: get, post, download.
//!
//! Checks name the target host (`net:http:<host>`, `net:download:<host>`).
//! Bodies that are maps or lists are JSON-serialised; strings and bytes are
//! sent as-is.

use std::io::Write;
use std::time::Duration;

use tracing::debug;

use nexus_types::{CommandContext, NexusError, Value};
use nexus_types::value::{map_value, ValueKind};

use crate::fs::resolve_path;
use crate::handles::NativeResource;
use crate::ObjectBridge;

/// Options shared by `net.get` and `net.post`.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub headers: Vec<(String, String)>,
    pub timeout_ms: Option<u64>,
}

fn host_of(url: &str) -> String {
    let without_scheme = url.split("://").nth(1).unwrap_or(url);
    without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or("")
        .split('@')
        .last()
        .unwrap_or("")
        .split(':')
        .next()
        .unwrap_or("")
        .to_string()
}

fn response_value(response: reqwest::blocking::Response) -> Result<Value, NexusError> {
    let status = response.status();
    let mut headers = std::collections::BTreeMap::new();
    for (name, value) in response.headers() {
        headers.insert(
            name.as_str().to_string(),
            Value::string(value.to_str().unwrap_or("").to_string()),
        );
    }
    let bytes = response
        .bytes()
        .map_err(|e| NexusError::ExecutionFailure(format!("read body: {e}")))?;
    let body = match String::from_utf8(bytes.to_vec()) {
        Ok(text) => Value::string(text),
        Err(_) => Value::bytes(bytes.to_vec()),
    };
    Ok(map_value(vec![
        ("status", Value::int(status.as_u16() as i64)),
        ("ok", Value::bool(status.is_success())),
        ("headers", Value::map(headers)),
        ("body", body),
    ]))
}

fn map_http_err(url: &str, e: reqwest::Error) -> NexusError {
    if e.is_timeout() {
        NexusError::Timeout(format!("{url}"))
    } else if e.is_connect() {
        NexusError::ExecutionFailure(format!("connect {url}: {e}"))
    } else {
        NexusError::ExecutionFailure(format!("{url}: {e}"))
    }
}

impl ObjectBridge {
    /// `net.get(url, {headers?, timeout?})`.
    pub fn net_get(
        &self,
        _ctx: &CommandContext,
        url: &str,
        opts: &RequestOptions,
    ) -> Result<Value, NexusError> {
        self.caps().require("net:http", &host_of(url))?;
        let mut request = self.http().get(url);
        for (k, v) in &opts.headers {
            request = request.header(k, v);
        }
        if let Some(ms) = opts.timeout_ms {
            request = request.timeout(Duration::from_millis(ms));
        }
        debug!(url, "net.get");
        let response = request.send().map_err(|e| map_http_err(url, e))?;
        let value = response_value(response)?;
        self.memory().check_headroom(value.meta.size)?;
        Ok(value)
    }

    /// `net.post(url, body, {headers?, timeout?})`. Map/list bodies are
    /// JSON-serialised with a `application/json` content type.
    pub fn net_post(
        &self,
        _ctx: &CommandContext,
        url: &str,
        body: &Value,
        opts: &RequestOptions,
    ) -> Result<Value, NexusError> {
        self.caps().require("net:http", &host_of(url))?;
        let mut request = self.http().post(url);
        for (k, v) in &opts.headers {
            request = request.header(k, v);
        }
        if let Some(ms) = opts.timeout_ms {
            request = request.timeout(Duration::from_millis(ms));
        }
        request = match &body.kind {
            ValueKind::Str(s) => request.body(s.clone()),
            ValueKind::Bytes(b) => request.body(b.clone()),
            ValueKind::Null => request,
            ValueKind::Map(_) | ValueKind::List(_) => request
                .header("content-type", "application/json")
                .body(serde_json::to_string(&body.to_json())?),
            other => {
                return Err(NexusError::InvalidArgument(format!(
                    "unsupported post body type '{}'",
                    other.tag()
                )))
            }
        };
        let response = request.send().map_err(|e| map_http_err(url, e))?;
        let value = response_value(response)?;
        self.memory().check_headroom(value.meta.size)?;
        Ok(value)
    }

    /// `net.download(url, path, {onProgress?})` -- streams the body to
    /// `path` and returns a handle pinning the file.
    pub fn net_download(
        &self,
        ctx: &CommandContext,
        url: &str,
        path: &str,
        on_progress: Option<&dyn Fn(u64)>,
    ) -> Result<u64, NexusError> {
        self.caps().require("net:download", &host_of(url))?;
        self.caps().require("fs:write", path)?;
        let resolved = resolve_path(&ctx.cwd, path);

        let mut response = self
            .http()
            .get(url)
            .send()
            .map_err(|e| map_http_err(url, e))?;
        if !response.status().is_success() {
            return Err(NexusError::ExecutionFailure(format!(
                "download {url}: status {}",
                response.status()
            )));
        }

        let mut file = std::fs::File::create(&resolved)?;
        let mut written = 0u64;
        let mut buf = [0u8; 64 * 1024];
        loop {
            ctx.observe_cancel()?;
            let n = std::io::Read::read(&mut response, &mut buf)
                .map_err(|e| NexusError::ExecutionFailure(format!("download {url}: {e}")))?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n])?;
            written += n as u64;
            if let Some(progress) = on_progress {
                progress(written);
            }
        }
        debug!(url, bytes = written, path = %resolved.display(), "download complete");

        let reservation = self.memory().pin(resolved.as_os_str().len() as u64)?;
        let id = self.handles().pin(
            NativeResource::File {
                path: resolved.to_string_lossy().into_owned(),
            },
            Some(reservation),
        );
        Ok(id)
    }
}
