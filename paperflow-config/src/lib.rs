use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

/// Pre-compiled regex for hostname validation (compiled once at first use)
static HOSTNAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][-a-zA-Z0-9\.]*[a-zA-Z0-9]$").unwrap());

#[derive(Debug, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub server: Option<ServerSection>,
    #[serde(default)]
    pub logging: Option<LoggingSection>,
    #[serde(default)]
    pub queue: Option<QueueSection>,
    #[serde(default)]
    pub workers: Option<WorkersSection>,
    #[serde(default)]
    pub timeouts: Option<TimeoutsSection>,
    #[serde(default)]
    pub retry: Option<RetrySection>,
    #[serde(default)]
    pub retention: Option<RetentionSection>,
}

#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub json: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct QueueSection {
    #[serde(default)]
    pub high_watermark: Option<usize>,
    #[serde(default)]
    pub shed_window_secs: Option<u64>,
    #[serde(default)]
    pub export_per_document: Option<usize>,
    #[serde(default)]
    pub ai_rate_per_sec: Option<f64>,
    #[serde(default)]
    pub ai_burst: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct WorkersSection {
    #[serde(default)]
    pub convert: Option<usize>,
    #[serde(default)]
    pub export: Option<usize>,
    #[serde(default)]
    pub ai: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct TimeoutsSection {
    #[serde(default)]
    pub convert_secs: Option<u64>,
    #[serde(default)]
    pub export_secs: Option<u64>,
    #[serde(default)]
    pub ai_secs: Option<u64>,
    #[serde(default)]
    pub liveness_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct RetryPolicySection {
    #[serde(default)]
    pub base_ms: Option<u64>,
    #[serde(default)]
    pub cap_ms: Option<u64>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct RetrySection {
    #[serde(default)]
    pub convert: Option<RetryPolicySection>,
    #[serde(default)]
    pub export: Option<RetryPolicySection>,
    #[serde(default)]
    pub ai: Option<RetryPolicySection>,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct RetentionSection {
    #[serde(default)]
    pub event_ttl_hours: Option<u64>,
    #[serde(default)]
    pub idempotency_ttl_hours: Option<u64>,
    #[serde(default)]
    pub finished_jobs_cap: Option<usize>,
    #[serde(default)]
    pub sweep_interval_secs: Option<u64>,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Load a RawConfigFile from a path. The format is inferred from the extension: .toml, .yaml/.yml, .json
pub fn load_raw_from_file<P: AsRef<Path>>(path: P) -> Result<RawConfigFile, ConfigError> {
    let path = path.as_ref();
    let s = fs::read_to_string(path)?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase());
    parse_config_str(&s, ext.as_deref())
}

/// Parse configuration from a string with optional format hint
#[inline]
fn parse_config_str(s: &str, ext: Option<&str>) -> Result<RawConfigFile, ConfigError> {
    match ext {
        #[cfg(feature = "toml")]
        Some("toml") => toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string())),
        #[cfg(feature = "yaml")]
        Some("yaml" | "yml") => {
            serde_yaml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
        }
        #[cfg(feature = "json")]
        Some("json") => serde_json::from_str(s).map_err(|e| ConfigError::Parse(e.to_string())),
        _ => parse_config_auto(s),
    }
}

/// Try to parse config by attempting each enabled format
#[inline]
fn parse_config_auto(s: &str) -> Result<RawConfigFile, ConfigError> {
    #[cfg(feature = "yaml")]
    if let Ok(cfg) = serde_yaml::from_str(s) {
        return Ok(cfg);
    }

    #[cfg(feature = "toml")]
    if let Ok(cfg) = toml::from_str(s) {
        return Ok(cfg);
    }

    #[cfg(feature = "json")]
    if let Ok(cfg) = serde_json::from_str(s) {
        return Ok(cfg);
    }

    #[cfg(any(feature = "yaml", feature = "toml", feature = "json"))]
    {
        Err(ConfigError::Parse(
            "failed to parse config as any supported format".into(),
        ))
    }

    #[cfg(not(any(feature = "yaml", feature = "toml", feature = "json")))]
    {
        let _ = s; // suppress unused warning
        Err(ConfigError::Parse("no config format enabled".into()))
    }
}

/// Concrete application configuration with defaults.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub queue: QueueConfig,
    pub workers: WorkersConfig,
    pub timeouts: TimeoutsConfig,
    pub retry: RetryConfig,
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueConfig {
    pub high_watermark: usize,
    pub shed_window_secs: u64,
    pub export_per_document: usize,
    pub ai_rate_per_sec: f64,
    pub ai_burst: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkersConfig {
    pub convert: usize,
    pub export: usize,
    pub ai: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeoutsConfig {
    pub convert_secs: u64,
    pub export_secs: u64,
    pub ai_secs: u64,
    pub liveness_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryPolicyConfig {
    pub base_ms: u64,
    pub cap_ms: u64,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryConfig {
    pub convert: RetryPolicyConfig,
    pub export: RetryPolicyConfig,
    pub ai: RetryPolicyConfig,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetentionConfig {
    pub event_ttl_hours: u64,
    pub idempotency_ttl_hours: u64,
    pub finished_jobs_cap: usize,
    pub sweep_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 7400,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
            },
            queue: QueueConfig {
                high_watermark: 100,
                shed_window_secs: 5,
                export_per_document: 2,
                ai_rate_per_sec: 1.0,
                ai_burst: 5,
            },
            workers: WorkersConfig {
                convert: 2,
                export: 2,
                ai: 2,
            },
            timeouts: TimeoutsConfig {
                convert_secs: 60,
                export_secs: 45,
                ai_secs: 30,
                liveness_secs: 30,
            },
            retry: RetryConfig {
                convert: RetryPolicyConfig {
                    base_ms: 2000,
                    cap_ms: 30_000,
                    max_attempts: 3,
                },
                export: RetryPolicyConfig {
                    base_ms: 2000,
                    cap_ms: 30_000,
                    max_attempts: 3,
                },
                ai: RetryPolicyConfig {
                    base_ms: 1000,
                    cap_ms: 10_000,
                    max_attempts: 2,
                },
                seed: None,
            },
            retention: RetentionConfig {
                event_ttl_hours: 24,
                idempotency_ttl_hours: 24,
                finished_jobs_cap: 1000,
                sweep_interval_secs: 60,
            },
        }
    }
}

#[inline]
fn parse_bool(s: &str) -> Result<bool, ()> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => Ok(true),
        "0" | "false" | "no" | "n" => Ok(false),
        _ => Err(()),
    }
}

/// Helper macro to apply optional value if present
macro_rules! apply_opt {
    ($target:expr, $source:expr) => {
        if let Some(v) = $source {
            $target = v;
        }
    };
    ($target:expr, $source:expr, wrap) => {
        if let Some(v) = $source {
            $target = Some(v);
        }
    };
}

fn apply_retry_policy(target: &mut RetryPolicyConfig, section: Option<RetryPolicySection>) {
    if let Some(section) = section {
        apply_opt!(target.base_ms, section.base_ms);
        apply_opt!(target.cap_ms, section.cap_ms);
        apply_opt!(target.max_attempts, section.max_attempts);
    }
}

/// Load concrete `Config` from optional file and environment variables.
/// Environment variables take precedence over file values and defaults.
pub fn load_config<P: AsRef<Path>>(path: Option<P>) -> Result<Config, ConfigError> {
    let mut cfg = Config::default();

    // Start with file values if provided
    if let Some(p) = path {
        let raw = load_raw_from_file(p)?;
        if let Some(server) = raw.server {
            apply_opt!(cfg.server.host, server.host);
            apply_opt!(cfg.server.port, server.port);
        }
        if let Some(logging) = raw.logging {
            apply_opt!(cfg.logging.level, logging.level);
            apply_opt!(cfg.logging.json, logging.json);
        }
        if let Some(queue) = raw.queue {
            apply_opt!(cfg.queue.high_watermark, queue.high_watermark);
            apply_opt!(cfg.queue.shed_window_secs, queue.shed_window_secs);
            apply_opt!(cfg.queue.export_per_document, queue.export_per_document);
            apply_opt!(cfg.queue.ai_rate_per_sec, queue.ai_rate_per_sec);
            apply_opt!(cfg.queue.ai_burst, queue.ai_burst);
        }
        if let Some(workers) = raw.workers {
            apply_opt!(cfg.workers.convert, workers.convert);
            apply_opt!(cfg.workers.export, workers.export);
            apply_opt!(cfg.workers.ai, workers.ai);
        }
        if let Some(timeouts) = raw.timeouts {
            apply_opt!(cfg.timeouts.convert_secs, timeouts.convert_secs);
            apply_opt!(cfg.timeouts.export_secs, timeouts.export_secs);
            apply_opt!(cfg.timeouts.ai_secs, timeouts.ai_secs);
            apply_opt!(cfg.timeouts.liveness_secs, timeouts.liveness_secs);
        }
        if let Some(retry) = raw.retry {
            apply_retry_policy(&mut cfg.retry.convert, retry.convert);
            apply_retry_policy(&mut cfg.retry.export, retry.export);
            apply_retry_policy(&mut cfg.retry.ai, retry.ai);
            apply_opt!(cfg.retry.seed, retry.seed, wrap);
        }
        if let Some(retention) = raw.retention {
            apply_opt!(cfg.retention.event_ttl_hours, retention.event_ttl_hours);
            apply_opt!(
                cfg.retention.idempotency_ttl_hours,
                retention.idempotency_ttl_hours
            );
            apply_opt!(cfg.retention.finished_jobs_cap, retention.finished_jobs_cap);
            apply_opt!(
                cfg.retention.sweep_interval_secs,
                retention.sweep_interval_secs
            );
        }
    }

    // Apply environment variable overrides (env takes precedence)
    apply_env_overrides(&mut cfg)?;

    Ok(cfg)
}

/// Helper to parse env var as a specific type
#[inline]
fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Parse(format!("invalid {}: {}", key, e))),
        Err(_) => Ok(None),
    }
}

/// Helper to parse env var as bool
#[inline]
fn env_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    match env::var(key) {
        Ok(v) => parse_bool(&v)
            .map(Some)
            .map_err(|_| ConfigError::Parse(format!("invalid {}", key))),
        Err(_) => Ok(None),
    }
}

/// Helper to get env var as string
#[inline]
fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

/// Apply all environment variable overrides to config
fn apply_env_overrides(cfg: &mut Config) -> Result<(), ConfigError> {
    // Server
    if let Some(v) = env_str("PAPERFLOW_SERVER_HOST") {
        cfg.server.host = v;
    }
    if let Some(v) = env_parse::<u16>("PAPERFLOW_SERVER_PORT")? {
        cfg.server.port = v;
    }

    // Logging
    if let Some(v) = env_str("PAPERFLOW_LOG_LEVEL") {
        cfg.logging.level = v;
    }
    if let Some(v) = env_bool("PAPERFLOW_LOG_JSON")? {
        cfg.logging.json = v;
    }

    // Queue
    if let Some(v) = env_parse::<usize>("PAPERFLOW_QUEUE_HIGH_WATERMARK")? {
        cfg.queue.high_watermark = v;
    }
    if let Some(v) = env_parse::<u64>("PAPERFLOW_QUEUE_SHED_WINDOW_SECS")? {
        cfg.queue.shed_window_secs = v;
    }
    if let Some(v) = env_parse::<usize>("PAPERFLOW_QUEUE_EXPORT_PER_DOCUMENT")? {
        cfg.queue.export_per_document = v;
    }
    if let Some(v) = env_parse::<f64>("PAPERFLOW_QUEUE_AI_RATE_PER_SEC")? {
        cfg.queue.ai_rate_per_sec = v;
    }
    if let Some(v) = env_parse::<usize>("PAPERFLOW_QUEUE_AI_BURST")? {
        cfg.queue.ai_burst = v;
    }

    // Workers
    if let Some(v) = env_parse::<usize>("PAPERFLOW_WORKERS_CONVERT")? {
        cfg.workers.convert = v;
    }
    if let Some(v) = env_parse::<usize>("PAPERFLOW_WORKERS_EXPORT")? {
        cfg.workers.export = v;
    }
    if let Some(v) = env_parse::<usize>("PAPERFLOW_WORKERS_AI")? {
        cfg.workers.ai = v;
    }

    // Timeouts
    if let Some(v) = env_parse::<u64>("PAPERFLOW_TIMEOUT_CONVERT_SECS")? {
        cfg.timeouts.convert_secs = v;
    }
    if let Some(v) = env_parse::<u64>("PAPERFLOW_TIMEOUT_EXPORT_SECS")? {
        cfg.timeouts.export_secs = v;
    }
    if let Some(v) = env_parse::<u64>("PAPERFLOW_TIMEOUT_AI_SECS")? {
        cfg.timeouts.ai_secs = v;
    }
    if let Some(v) = env_parse::<u64>("PAPERFLOW_LIVENESS_SECS")? {
        cfg.timeouts.liveness_secs = v;
    }

    // Retry
    if let Some(v) = env_parse::<u64>("PAPERFLOW_RETRY_SEED")? {
        cfg.retry.seed = Some(v);
    }

    // Retention
    if let Some(v) = env_parse::<u64>("PAPERFLOW_EVENT_TTL_HOURS")? {
        cfg.retention.event_ttl_hours = v;
    }
    if let Some(v) = env_parse::<u64>("PAPERFLOW_IDEMPOTENCY_TTL_HOURS")? {
        cfg.retention.idempotency_ttl_hours = v;
    }
    if let Some(v) = env_parse::<usize>("PAPERFLOW_FINISHED_JOBS_CAP")? {
        cfg.retention.finished_jobs_cap = v;
    }
    if let Some(v) = env_parse::<u64>("PAPERFLOW_SWEEP_INTERVAL_SECS")? {
        cfg.retention.sweep_interval_secs = v;
    }

    Ok(())
}

/// Validate higher-level constraints on the resolved configuration.
pub fn validate_config(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.server.port == 0 {
        return Err(ConfigError::Validation("server.port must be > 0".into()));
    }
    let host_ok = cfg.server.host.parse::<std::net::IpAddr>().is_ok()
        || HOSTNAME_REGEX.is_match(&cfg.server.host);
    if !host_ok {
        return Err(ConfigError::Validation(format!(
            "invalid server.host: {}",
            cfg.server.host
        )));
    }

    if cfg.queue.high_watermark == 0 {
        return Err(ConfigError::Validation(
            "queue.high_watermark must be > 0".into(),
        ));
    }
    if cfg.queue.export_per_document == 0 {
        return Err(ConfigError::Validation(
            "queue.export_per_document must be > 0".into(),
        ));
    }
    if cfg.queue.ai_rate_per_sec <= 0.0 {
        return Err(ConfigError::Validation(
            "queue.ai_rate_per_sec must be > 0".into(),
        ));
    }

    if cfg.workers.convert == 0 || cfg.workers.export == 0 || cfg.workers.ai == 0 {
        return Err(ConfigError::Validation(
            "workers.* must all be > 0".into(),
        ));
    }

    for (name, policy) in [
        ("convert", &cfg.retry.convert),
        ("export", &cfg.retry.export),
        ("ai", &cfg.retry.ai),
    ] {
        if policy.max_attempts == 0 {
            return Err(ConfigError::Validation(format!(
                "retry.{}.max_attempts must be >= 1",
                name
            )));
        }
        if policy.base_ms == 0 || policy.cap_ms < policy.base_ms {
            return Err(ConfigError::Validation(format!(
                "retry.{}: base_ms must be > 0 and cap_ms >= base_ms",
                name
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn parse_toml() {
        let f = NamedTempFile::new().expect("tmpfile");
        std::fs::write(
            f.path(),
            r#"
[server]
host = "127.0.0.1"
port = 7400

[queue]
high_watermark = 50

[retry.convert]
max_attempts = 5
"#,
        )
        .unwrap();
        let cfg = load_raw_from_file(f.path()).expect("load");
        let s = cfg.server.unwrap();
        assert_eq!(s.host.unwrap(), "127.0.0.1");
        assert_eq!(s.port.unwrap(), 7400);
        assert_eq!(cfg.queue.unwrap().high_watermark.unwrap(), 50);
        assert_eq!(cfg.retry.unwrap().convert.unwrap().max_attempts.unwrap(), 5);
    }

    #[test]
    fn parse_yaml() {
        let f = NamedTempFile::new().expect("tmpfile");
        std::fs::write(
            f.path(),
            r#"
server:
  host: 0.0.0.0
  port: 9000
workers:
  convert: 4
timeouts:
  ai_secs: 15
"#,
        )
        .unwrap();
        let cfg = load_raw_from_file(f.path()).expect("load");
        assert_eq!(cfg.server.unwrap().port.unwrap(), 9000);
        assert_eq!(cfg.workers.unwrap().convert.unwrap(), 4);
        assert_eq!(cfg.timeouts.unwrap().ai_secs.unwrap(), 15);
    }

    #[test]
    fn file_values_override_defaults() {
        let f = NamedTempFile::new().expect("tmpfile");
        std::fs::write(
            f.path(),
            r#"
[queue]
export_per_document = 4

[retention]
event_ttl_hours = 48
"#,
        )
        .unwrap();
        let cfg = load_config(Some(f.path())).expect("load config");
        assert_eq!(cfg.queue.export_per_document, 4);
        assert_eq!(cfg.retention.event_ttl_hours, 48);
        // Untouched values keep their defaults.
        assert_eq!(cfg.queue.high_watermark, 100);
        assert_eq!(cfg.retry.ai.max_attempts, 2);
    }

    #[test]
    fn env_overrides() {
        for k in &[
            "PAPERFLOW_SERVER_HOST",
            "PAPERFLOW_SERVER_PORT",
            "PAPERFLOW_LOG_LEVEL",
            "PAPERFLOW_WORKERS_CONVERT",
            "PAPERFLOW_QUEUE_HIGH_WATERMARK",
        ] {
            std::env::remove_var(k);
        }

        std::env::set_var("PAPERFLOW_SERVER_HOST", "10.1.2.3");
        std::env::set_var("PAPERFLOW_SERVER_PORT", "1234");
        std::env::set_var("PAPERFLOW_LOG_LEVEL", "debug");
        std::env::set_var("PAPERFLOW_WORKERS_CONVERT", "8");
        std::env::set_var("PAPERFLOW_QUEUE_HIGH_WATERMARK", "250");

        let cfg = load_config::<&Path>(None).expect("load config");
        assert_eq!(cfg.server.host, "10.1.2.3");
        assert_eq!(cfg.server.port, 1234);
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.workers.convert, 8);
        assert_eq!(cfg.queue.high_watermark, 250);

        for k in &[
            "PAPERFLOW_SERVER_HOST",
            "PAPERFLOW_SERVER_PORT",
            "PAPERFLOW_LOG_LEVEL",
            "PAPERFLOW_WORKERS_CONVERT",
            "PAPERFLOW_QUEUE_HIGH_WATERMARK",
        ] {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn validation_rejects_zero_workers() {
        let mut cfg = Config::default();
        cfg.workers.ai = 0;
        assert!(matches!(
            validate_config(&cfg),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn validation_rejects_inverted_retry_bounds() {
        let mut cfg = Config::default();
        cfg.retry.export.cap_ms = 100;
        cfg.retry.export.base_ms = 500;
        assert!(matches!(
            validate_config(&cfg),
            Err(ConfigError::Validation(_))
        ));
    }
}
