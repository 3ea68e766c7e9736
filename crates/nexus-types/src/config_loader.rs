//! Configuration loading: built-in defaults, optional JSON file, then
//! `NEXUS_*` environment overrides, merged in that priority order.

use std::path::Path;

use crate::config::{parse_byte_spec, ShellConfig};
use crate::error::NexusError;

/// Config files larger than this are rejected rather than parsed.
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Load the effective configuration.
///
/// `path` is the optional config-file path from the CLI. A missing path is
/// fine (defaults apply); a path that exists but fails to parse is an error.
pub fn load_config(path: Option<&Path>) -> Result<ShellConfig, NexusError> {
    let mut config = match path {
        Some(p) => read_config_file(p)?,
        None => ShellConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<ShellConfig, NexusError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| NexusError::NotFound(format!("config file {}: {e}", path.display())))?;
    if metadata.len() > MAX_CONFIG_FILE_SIZE {
        return Err(NexusError::InvalidArgument(format!(
            "config file {} is {} bytes, larger than the {} byte limit",
            path.display(),
            metadata.len(),
            MAX_CONFIG_FILE_SIZE
        )));
    }
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|e| {
        NexusError::InvalidArgument(format!("config file {}: {e}", path.display()))
    })
}

fn apply_env_overrides(config: &mut ShellConfig) {
    if let Ok(debug) = std::env::var("NEXUS_DEBUG") {
        config.shell.enable_debug = matches!(
            debug.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        );
    }
    if let Ok(mem) = std::env::var("NEXUS_MAX_MEMORY") {
        match parse_byte_spec(&mem) {
            Ok(bytes) => config.shell.max_memory = bytes,
            Err(e) => tracing::warn!(value = %mem, error = %e, "ignoring NEXUS_MAX_MEMORY"),
        }
    }
    if let Ok(path) = std::env::var("NEXUS_PLUGIN_PATH") {
        if !path.is_empty() {
            config.plugin_path = Some(path.into());
        }
    }
    if let Ok(path) = std::env::var("NEXUS_JS_PATH") {
        if !path.is_empty() {
            config.js_path = Some(path.into());
        }
    }
}
