//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RevuSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply `REVU_*` environment variable overrides
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::RevuSettings;

/// Resolve the path to the settings file (`~/.revu/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".revu").join("settings.json")
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file means defaults. Invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RevuSettings> {
    load_with(path, |name| std::env::var(name).ok())
}

fn load_with(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<RevuSettings> {
    let defaults = serde_json::to_value(RevuSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: RevuSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, env);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply overrides read through `env`. Values that fail strict parsing are
/// ignored with a warning.
fn apply_overrides(settings: &mut RevuSettings, env: impl Fn(&str) -> Option<String>) {
    let env = Env(env);

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.read_string("REVU_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.read_u16("REVU_PORT", 1, 65535) {
        settings.server.port = v;
    }

    // ── Runtime ─────────────────────────────────────────────────────
    if let Some(v) = env.read_string("REVU_RUNTIME_URL") {
        settings.runtime.base_url = v;
    }
    if let Some(v) = env.read_string("REVU_RUNTIME_EVENT_PATH") {
        settings.runtime.event_path = v;
    }
    if let Some(v) = env.read_u64("REVU_RUNTIME_CONNECT_TIMEOUT_MS", 100, 600_000) {
        settings.runtime.connect_timeout_ms = v;
    }

    // ── Broadcast ───────────────────────────────────────────────────
    if let Some(v) = env.read_u64("REVU_IDLE_TEARDOWN_MS", 1, 3_600_000) {
        settings.broadcast.idle_teardown_ms = v;
    }
    if let Some(v) = env.read_u64("REVU_MAX_RETRY_ATTEMPTS", 0, 1_000_000) {
        settings.broadcast.max_retry_attempts = u32::try_from(v).ok();
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.read_string("REVU_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.read_bool("REVU_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers ─────────────────────────────────────────────────────────

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn read_string(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|v| !v.is_empty())
    }

    fn read_bool(&self, name: &str) -> Option<bool> {
        let val = (self.0)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn read_u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = (self.0)(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn read_u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.0)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn write_settings(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 4680, "host": "127.0.0.1"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "127.0.0.1");
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_new_keys_added() {
        let target = serde_json::json!({"broadcast": {"idleTeardownMs": 5000}});
        let source = serde_json::json!({"broadcast": {"maxRetryAttempts": 4}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["broadcast"]["idleTeardownMs"], 5000);
        assert_eq!(merged["broadcast"]["maxRetryAttempts"], 4);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        assert_eq!(deep_merge(target, source)["a"], 42);
    }

    // ── loading ─────────────────────────────────────────────────────

    #[test]
    fn missing_file_returns_defaults() {
        let settings = load_with(Path::new("/nonexistent/settings.json"), no_env).unwrap();
        assert_eq!(settings.server.port, 4680);
        assert_eq!(settings.broadcast.idle_teardown_ms, 5000);
    }

    #[test]
    fn partial_file_overrides() {
        let (_dir, path) = write_settings(
            r#"{"runtime": {"baseUrl": "http://10.0.0.2:4096"}, "broadcast": {"maxRetryAttempts": 5}}"#,
        );
        let settings = load_with(&path, no_env).unwrap();
        assert_eq!(settings.runtime.base_url, "http://10.0.0.2:4096");
        assert_eq!(settings.runtime.event_path, "/event");
        assert_eq!(settings.broadcast.max_retry_attempts, Some(5));
        assert_eq!(settings.broadcast.retry_max_delay_ms, 30_000);
    }

    #[test]
    fn module_levels_from_file() {
        let (_dir, path) = write_settings(r#"{"logging": {"modules": {"revu_runtime": "debug"}}}"#);
        let settings = load_with(&path, no_env).unwrap();
        assert_eq!(settings.logging.modules["revu_runtime"], "debug");
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn invalid_json_is_error() {
        let (_dir, path) = write_settings("not valid json");
        assert!(matches!(load_with(&path, no_env), Err(SettingsError::Json(_))));
    }

    #[test]
    fn invalid_values_fail_validation() {
        let (_dir, path) = write_settings(r#"{"broadcast": {"idleTeardownMs": 0}}"#);
        assert!(matches!(
            load_with(&path, no_env),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    #[test]
    fn env_overrides_file() {
        let (_dir, path) = write_settings(r#"{"server": {"port": 9000}}"#);
        let env = env_of(&[
            ("REVU_PORT", "9100"),
            ("REVU_HOST", "0.0.0.0"),
            ("REVU_RUNTIME_URL", "http://runtime:4096"),
            ("REVU_RUNTIME_EVENT_PATH", "/global/event"),
            ("REVU_RUNTIME_CONNECT_TIMEOUT_MS", "2500"),
            ("REVU_IDLE_TEARDOWN_MS", "750"),
            ("REVU_MAX_RETRY_ATTEMPTS", "8"),
            ("REVU_LOG_LEVEL", "debug"),
            ("REVU_LOG_JSON", "off"),
        ]);
        let settings = load_with(&path, env).unwrap();
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.runtime.base_url, "http://runtime:4096");
        assert_eq!(settings.runtime.event_path, "/global/event");
        assert_eq!(settings.runtime.connect_timeout_ms, 2500);
        assert_eq!(settings.broadcast.idle_teardown_ms, 750);
        assert_eq!(settings.broadcast.max_retry_attempts, Some(8));
        assert_eq!(settings.logging.level, "debug");
        assert!(!settings.logging.json);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let env = env_of(&[
            ("REVU_PORT", "0"),
            ("REVU_IDLE_TEARDOWN_MS", "soon"),
            ("REVU_LOG_JSON", "maybe"),
            ("REVU_HOST", ""),
        ]);
        let settings = load_with(Path::new("/nonexistent/settings.json"), env).unwrap();
        assert_eq!(settings.server.port, 4680);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.broadcast.idle_teardown_ms, 5000);
        assert!(settings.logging.json);
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for val in &["true", "1", "yes", "on", "TRUE", "On"] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
        for val in &["false", "0", "no", "off", "FALSE", "No"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_bool(""), None);
    }

    #[test]
    fn parse_u16_bounds() {
        assert_eq!(parse_u16_range("4680", 1, 65535), Some(4680));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("99999", 1, 65535), None);
        assert_eq!(parse_u16_range("port", 1, 65535), None);
    }

    #[test]
    fn parse_u64_bounds() {
        assert_eq!(parse_u64_range("5000", 1, 3_600_000), Some(5000));
        assert_eq!(parse_u64_range("0", 1, 3_600_000), None);
        assert_eq!(parse_u64_range("-5", 0, 10), None);
    }

    #[test]
    fn settings_path_under_home() {
        let path = settings_path();
        assert!(path.ends_with(".revu/settings.json"));
    }
}
