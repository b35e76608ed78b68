//! Configuration loading from `~/.voxkit/config.toml`.
//!
//! A config file may list other TOML files under `include`. Included files
//! are merged in order, and the including file wins on conflicts. Include
//! paths must be relative and may not leave the including file's directory.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};
use voxkit_types::config::RuntimeConfig;
use voxkit_types::error::ConfigError;

const MAX_INCLUDE_DEPTH: u32 = 8;

/// `~/.voxkit/config.toml`, or `./.voxkit/config.toml` without a home dir.
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".voxkit")
        .join("config.toml")
}

/// Load configuration, falling back to defaults on any problem.
///
/// A missing file is not an error. Unreadable or malformed files are logged
/// and replaced by `RuntimeConfig::default()`.
pub fn load_config(path: Option<&Path>) -> RuntimeConfig {
    let config_path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(path = %config_path.display(), "Config file not found, using defaults");
        return RuntimeConfig::default();
    }

    match try_load_config(&config_path) {
        Ok(config) => {
            info!(path = %config_path.display(), "Loaded configuration");
            config
        }
        Err(e) => {
            warn!(error = %e, path = %config_path.display(), "Invalid config, using defaults");
            RuntimeConfig::default()
        }
    }
}

/// Load and validate configuration from `path`, reporting every failure.
pub fn try_load_config(path: &Path) -> Result<RuntimeConfig, ConfigError> {
    let mut visited = HashSet::new();
    visited.insert(std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()));

    let merged = read_with_includes(path, &mut visited, 0)?;
    let config: RuntimeConfig = merged.try_into().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}

fn read_toml(path: &Path) -> Result<toml::Value, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Read `path` and fold its includes underneath it. The returned value has
/// no `include` key.
fn read_with_includes(
    path: &Path,
    visited: &mut HashSet<PathBuf>,
    depth: u32,
) -> Result<toml::Value, ConfigError> {
    if depth > MAX_INCLUDE_DEPTH {
        return Err(ConfigError::Include(format!(
            "nesting deeper than {MAX_INCLUDE_DEPTH} levels"
        )));
    }

    let mut value = read_toml(path)?;
    let includes = take_includes(&mut value)?;
    if includes.is_empty() {
        return Ok(value);
    }

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut base = toml::Value::Table(toml::map::Map::new());
    for include in &includes {
        let resolved = resolve_include(dir, include)?;
        if !visited.insert(resolved.clone()) {
            return Err(ConfigError::Include(format!("circular include of '{include}'")));
        }
        info!(include = %include, "Loading config include");
        let included = read_with_includes(&resolved, visited, depth + 1)?;
        deep_merge_toml(&mut base, &included);
    }
    deep_merge_toml(&mut base, &value);
    Ok(base)
}

fn take_includes(value: &mut toml::Value) -> Result<Vec<String>, ConfigError> {
    let Some(table) = value.as_table_mut() else {
        return Ok(Vec::new());
    };
    match table.remove("include") {
        None => Ok(Vec::new()),
        Some(toml::Value::Array(entries)) => entries
            .into_iter()
            .map(|entry| match entry {
                toml::Value::String(s) => Ok(s),
                other => Err(ConfigError::Include(format!(
                    "include entries must be strings, got {}",
                    other.type_str()
                ))),
            })
            .collect(),
        Some(other) => Err(ConfigError::Include(format!(
            "include must be an array, got {}",
            other.type_str()
        ))),
    }
}

fn resolve_include(dir: &Path, include: &str) -> Result<PathBuf, ConfigError> {
    let relative = Path::new(include);
    if relative.is_absolute() {
        return Err(ConfigError::Include(format!("absolute path '{include}'")));
    }
    if relative.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(ConfigError::Include(format!("path traversal in '{include}'")));
    }

    let canonical_dir = std::fs::canonicalize(dir)
        .map_err(|e| ConfigError::Include(format!("config dir unavailable: {e}")))?;
    let canonical = std::fs::canonicalize(dir.join(relative))
        .map_err(|e| ConfigError::Include(format!("cannot resolve '{include}': {e}")))?;
    if !canonical.starts_with(&canonical_dir) {
        return Err(ConfigError::Include(format!(
            "'{include}' resolves outside the config directory"
        )));
    }
    Ok(canonical)
}

/// Merge `overlay` into `base`. Tables merge key by key; any other value in
/// `overlay` replaces the one in `base`.
pub fn deep_merge_toml(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_tbl), toml::Value::Table(overlay_tbl)) => {
            for (key, overlay_val) in overlay_tbl {
                match base_tbl.get_mut(key) {
                    Some(base_val) if base_val.is_table() && overlay_val.is_table() => {
                        deep_merge_toml(base_val, overlay_val);
                    }
                    _ => {
                        base_tbl.insert(key.clone(), overlay_val.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}
