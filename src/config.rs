//! Configuration module for pingme.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use crate::probe::{Platform, RunnerConfig};

/// Which job store backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    File,
    Sqlite,
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address (default: 0.0.0.0:8176)
    pub bind: SocketAddr,
    pub store: StoreKind,
    /// Directory for file-backed job records (default: ".")
    pub cache_dir: String,
    /// Path to the SQLite database file (default: "pingme.db")
    pub db_path: String,
    pub runner: RunnerConfig,
    /// Period used when a request does not give a usable one.
    pub default_period: Duration,
    /// Duration used when a request does not give a usable one.
    pub default_duration: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8176)),
            store: StoreKind::File,
            cache_dir: ".".to_string(),
            db_path: "pingme.db".to_string(),
            runner: RunnerConfig::default(),
            default_period: Duration::from_secs(1),
            default_duration: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PINGME_BIND`: listen address (default: 0.0.0.0:8176)
    /// - `PINGME_STORE`: `file` or `sqlite` (default: file)
    /// - `PINGME_CACHE_DIR`: record directory for the file store (default: ".")
    /// - `PINGME_DB_PATH`: database path for the sqlite store (default: "pingme.db")
    /// - `PINGME_MAX_CONCURRENT`: ping processes allowed at once (default: 10)
    /// - `PINGME_PING4` / `PINGME_PING6`: probe commands (default: "ping" / "ping6")
    /// - `PINGME_PLATFORM`: `linux` or `darwin` output format (default: host OS)
    /// - `PINGME_TIMESTAMPS`: ask ping to timestamp replies (default: false)
    /// - `PINGME_PROBE_GRACE_SECS`: extra time before a probe is killed (default: 10)
    /// - `PINGME_DEFAULT_PERIOD_SECS` / `PINGME_DEFAULT_DURATION_SECS`: request defaults (1 / 30)
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F: Fn(&str) -> Option<String>>(get: F) -> Self {
        let mut cfg = Self::default();

        if let Some(bind) = get("PINGME_BIND").and_then(|s| s.parse().ok()) {
            cfg.bind = bind;
        }

        if let Some(kind) = get("PINGME_STORE") {
            match kind.trim().to_ascii_lowercase().as_str() {
                "file" => cfg.store = StoreKind::File,
                "sqlite" => cfg.store = StoreKind::Sqlite,
                other => tracing::warn!("ignoring unknown PINGME_STORE {:?}", other),
            }
        }

        if let Some(dir) = get("PINGME_CACHE_DIR") {
            cfg.cache_dir = dir;
        }

        if let Some(path) = get("PINGME_DB_PATH") {
            cfg.db_path = path;
        }

        if let Some(n) = get("PINGME_MAX_CONCURRENT").and_then(|s| s.parse::<usize>().ok()) {
            cfg.runner.max_concurrent = n.max(1);
        }

        if let Some(cmd) = get("PINGME_PING4").and_then(split_command) {
            cfg.runner.ping4 = cmd;
        }

        if let Some(cmd) = get("PINGME_PING6").and_then(split_command) {
            cfg.runner.ping6 = cmd;
        }

        if let Some(platform) = get("PINGME_PLATFORM") {
            match platform.parse::<Platform>() {
                Ok(p) => cfg.runner.platform = p,
                Err(e) => tracing::warn!("ignoring PINGME_PLATFORM: {}", e),
            }
        }

        if let Some(on) = get("PINGME_TIMESTAMPS").and_then(|s| parse_bool(&s)) {
            cfg.runner.timestamps = on;
        }

        if let Some(secs) = get("PINGME_PROBE_GRACE_SECS").and_then(|s| parse_secs(&s)) {
            cfg.runner.grace = secs;
        }

        if let Some(secs) = get("PINGME_DEFAULT_PERIOD_SECS").and_then(|s| parse_secs(&s)) {
            if !secs.is_zero() {
                cfg.default_period = secs;
            }
        }

        if let Some(secs) = get("PINGME_DEFAULT_DURATION_SECS").and_then(|s| parse_secs(&s)) {
            if !secs.is_zero() {
                cfg.default_duration = secs;
            }
        }

        cfg
    }
}

fn split_command(s: String) -> Option<Vec<String>> {
    let words: Vec<String> = s.split_whitespace().map(str::to_string).collect();
    if words.is_empty() {
        None
    } else {
        Some(words)
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_secs(s: &str) -> Option<Duration> {
    s.trim()
        .parse::<f64>()
        .ok()
        .and_then(|f| Duration::try_from_secs_f64(f).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn test_default_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.bind.port(), 8176);
        assert_eq!(cfg.store, StoreKind::File);
        assert_eq!(cfg.cache_dir, ".");
        assert_eq!(cfg.runner.max_concurrent, 10);
        assert_eq!(cfg.runner.ping4, ["ping"]);
        assert_eq!(cfg.runner.ping6, ["ping6"]);
        assert_eq!(cfg.default_period, Duration::from_secs(1));
        assert_eq!(cfg.default_duration, Duration::from_secs(30));
    }

    #[test]
    fn test_env_overrides() {
        let cfg = load(&[
            ("PINGME_BIND", "127.0.0.1:9000"),
            ("PINGME_STORE", "SQLite"),
            ("PINGME_DB_PATH", "/tmp/jobs.db"),
            ("PINGME_MAX_CONCURRENT", "3"),
            ("PINGME_PING4", "sudo -n ping"),
            ("PINGME_PLATFORM", "darwin"),
            ("PINGME_TIMESTAMPS", "yes"),
            ("PINGME_PROBE_GRACE_SECS", "2.5"),
            ("PINGME_DEFAULT_PERIOD_SECS", "0.5"),
        ]);
        assert_eq!(cfg.bind.to_string(), "127.0.0.1:9000");
        assert_eq!(cfg.store, StoreKind::Sqlite);
        assert_eq!(cfg.db_path, "/tmp/jobs.db");
        assert_eq!(cfg.runner.max_concurrent, 3);
        assert_eq!(cfg.runner.ping4, ["sudo", "-n", "ping"]);
        assert_eq!(cfg.runner.platform, Platform::Darwin);
        assert!(cfg.runner.timestamps);
        assert_eq!(cfg.runner.grace, Duration::from_millis(2_500));
        assert_eq!(cfg.default_period, Duration::from_millis(500));
    }

    #[test]
    fn test_bad_values_keep_defaults() {
        let cfg = load(&[
            ("PINGME_BIND", "not an address"),
            ("PINGME_STORE", "redis"),
            ("PINGME_MAX_CONCURRENT", "0"),
            ("PINGME_PING6", "   "),
            ("PINGME_PLATFORM", "plan9"),
            ("PINGME_DEFAULT_DURATION_SECS", "-4"),
        ]);
        assert_eq!(cfg.bind.port(), 8176);
        assert_eq!(cfg.store, StoreKind::File);
        assert_eq!(cfg.runner.max_concurrent, 1);
        assert_eq!(cfg.runner.ping6, ["ping6"]);
        assert_eq!(cfg.runner.platform, Platform::detect());
        assert_eq!(cfg.default_duration, Duration::from_secs(30));
    }
}
