//! The `utils` surface: sleep, uuid, hash, formatBytes, retry, deepMerge,
//! deepClone.

use std::collections::BTreeMap;
use std::time::Duration;

use sha2::{Digest, Sha256, Sha512};

use nexus_types::{CommandContext, NexusError, Value};
use nexus_types::value::ValueKind;

use crate::ObjectBridge;

/// Options for [`ObjectBridge::utils_retry`].
#[derive(Debug, Clone)]
pub struct RetryOptions {
    pub retries: u32,
    pub delay_ms: u64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            retries: 3,
            delay_ms: 0,
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

impl ObjectBridge {
    /// `utils.sleep(ms)`. Skipped during replay so recordings stay fast and
    /// deterministic.
    pub fn utils_sleep(&self, ctx: &CommandContext, ms: u64) {
        if ctx.in_replay {
            return;
        }
        std::thread::sleep(Duration::from_millis(ms));
    }

    /// `utils.uuid()` -- a fresh v4 UUID string.
    pub fn utils_uuid(&self) -> Value {
        Value::string(uuid::Uuid::new_v4().to_string())
    }

    /// `utils.hash(data, alg)` -- hex digest; `sha256` and `sha512`.
    pub fn utils_hash(&self, data: &Value, alg: &str) -> Result<Value, NexusError> {
        let bytes: Vec<u8> = match &data.kind {
            ValueKind::Str(s) => s.clone().into_bytes(),
            ValueKind::Bytes(b) => b.clone(),
            other => {
                return Err(NexusError::InvalidArgument(format!(
                    "hash input must be string or bytes, got {}",
                    other.tag()
                )))
            }
        };
        let digest = match alg.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => hex(&Sha256::digest(&bytes)),
            "sha512" | "sha-512" => hex(&Sha512::digest(&bytes)),
            other => {
                return Err(NexusError::InvalidArgument(format!(
                    "unsupported hash algorithm '{other}'"
                )))
            }
        };
        Ok(Value::string(digest))
    }

    /// `utils.formatBytes(n)` -- human-readable size, powers of 1024.
    pub fn utils_format_bytes(&self, n: u64) -> Value {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
        if n < 1024 {
            return Value::string(format!("{n} B"));
        }
        let mut value = n as f64;
        let mut unit = 0;
        while value >= 1024.0 && unit < UNITS.len() - 1 {
            value /= 1024.0;
            unit += 1;
        }
        Value::string(format!("{value:.1} {}", UNITS[unit]))
    }

    /// `utils.retry(fn, opts)` -- run `attempt` until it succeeds or the
    /// retries are used up; the last error propagates.
    pub fn utils_retry(
        &self,
        ctx: &CommandContext,
        opts: &RetryOptions,
        attempt: &mut dyn FnMut() -> Result<Value, NexusError>,
    ) -> Result<Value, NexusError> {
        let mut last_err = None;
        for round in 0..=opts.retries {
            match attempt() {
                Ok(v) => return Ok(v),
                Err(e) => {
                    tracing::debug!(round, error = %e, "retry attempt failed");
                    last_err = Some(e);
                    if round < opts.retries && opts.delay_ms > 0 {
                        self.utils_sleep(ctx, opts.delay_ms);
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| NexusError::Internal("retry with no attempts".into())))
    }

    /// `utils.deepMerge(a, b)` -- recursive map merge, `b` wins conflicts.
    pub fn utils_deep_merge(&self, a: &Value, b: &Value) -> Value {
        match (&a.kind, &b.kind) {
            (ValueKind::Map(left), ValueKind::Map(right)) => {
                let mut merged: BTreeMap<String, Value> = left.clone();
                for (k, rv) in right {
                    let entry = match merged.get(k) {
                        Some(lv) => self.utils_deep_merge(lv, rv),
                        None => rv.clone(),
                    };
                    merged.insert(k.clone(), entry);
                }
                Value::map(merged)
            }
            _ => b.clone(),
        }
    }

    /// `utils.deepClone(v)` -- a structurally equal value with fresh ids.
    pub fn utils_deep_clone(&self, v: &Value) -> Value {
        match &v.kind {
            ValueKind::List(items) => {
                Value::list(items.iter().map(|i| self.utils_deep_clone(i)).collect())
            }
            ValueKind::Map(entries) => Value::map(
                entries
                    .iter()
                    .map(|(k, val)| (k.clone(), self.utils_deep_clone(val)))
                    .collect(),
            ),
            kind => Value::new(kind.clone()),
        }
    }
}
