use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Pre-compiled regex for hostname validation (compiled once at first use)
static HOSTNAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9][-a-zA-Z0-9\.]*[a-zA-Z0-9]$").expect("hostname regex is valid")
});

#[derive(Debug, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub server: Option<ServerSection>,
    #[serde(default)]
    pub logging: Option<LoggingSection>,
    #[serde(default)]
    pub queue: Option<QueueSection>,
    #[serde(default)]
    pub storage: Option<StorageSection>,
    #[serde(default)]
    pub transform: Option<TransformSection>,
}

#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub public_url: Option<String>,
    #[serde(default)]
    pub max_content_length: Option<usize>,
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
    pub always_eager: Option<bool>,
    #[serde(default)]
    pub broker_url: Option<String>,
    #[serde(default)]
    pub worker_concurrency: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct StorageSection {
    #[serde(default)]
    pub backend: Option<StorageBackend>,
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default)]
    pub result_ttl_secs: Option<u64>,
    #[serde(default)]
    pub sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct TransformSection {
    #[serde(default)]
    pub fake: Option<bool>,
    #[serde(default)]
    pub model_path: Option<String>,
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
    #[cfg(feature = "toml")]
    if let Ok(cfg) = toml::from_str(s) {
        return Ok(cfg);
    }

    #[cfg(feature = "json")]
    if let Ok(cfg) = serde_json::from_str(s) {
        return Ok(cfg);
    }

    #[cfg(feature = "yaml")]
    if let Ok(cfg) = serde_yaml::from_str(s) {
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
        let _ = s;
        Err(ConfigError::Parse("no config format enabled".into()))
    }
}

/// Where finished job results are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Redis,
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Memory => "memory",
            Self::Redis => "redis",
        })
    }
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(format!("unknown storage backend: {other}")),
        }
    }
}

/// Concrete application configuration with defaults.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub queue: QueueConfig,
    pub storage: StorageConfig,
    pub transform: TransformConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Base for externally visible URLs; derived from the Host header when unset.
    pub public_url: Option<String>,
    pub max_content_length: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueConfig {
    /// Run jobs inline at submission instead of through a broker.
    pub always_eager: bool,
    /// External broker; `None` uses an in-process broker and worker pool.
    pub broker_url: Option<String>,
    pub worker_concurrency: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub redis_url: Option<String>,
    pub result_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl StorageConfig {
    #[inline]
    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }

    #[inline]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformConfig {
    /// Skip upscaling and store the input unchanged.
    pub fake: bool,
    pub model_path: Option<String>,
}

fn default_worker_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
                public_url: None,
                max_content_length: 50 * 1024 * 1024,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
            },
            queue: QueueConfig {
                always_eager: false,
                broker_url: None,
                worker_concurrency: default_worker_concurrency(),
            },
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                redis_url: None,
                result_ttl_secs: 24 * 3600,
                sweep_interval_secs: 60,
            },
            transform: TransformConfig {
                fake: false,
                model_path: None,
            },
        }
    }
}

#[inline]
fn parse_bool(s: &str) -> Result<bool, ()> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Ok(true),
        "0" | "false" | "no" | "n" | "off" => Ok(false),
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

/// Load concrete `Config` from optional file and environment variables.
/// Environment variables take precedence over file values and defaults.
pub fn load_config<P: AsRef<Path>>(path: Option<P>) -> Result<Config, ConfigError> {
    let mut cfg = Config::default();

    if let Some(p) = path {
        let raw = load_raw_from_file(p)?;
        merge_raw(&mut cfg, raw);
    }

    apply_env_overrides(&mut cfg)?;

    Ok(cfg)
}

/// Overlay values present in a config file onto `cfg`.
fn merge_raw(cfg: &mut Config, raw: RawConfigFile) {
    if let Some(server) = raw.server {
        apply_opt!(cfg.server.host, server.host);
        apply_opt!(cfg.server.port, server.port);
        apply_opt!(cfg.server.public_url, server.public_url, wrap);
        apply_opt!(cfg.server.max_content_length, server.max_content_length);
    }
    if let Some(logging) = raw.logging {
        apply_opt!(cfg.logging.level, logging.level);
        apply_opt!(cfg.logging.json, logging.json);
    }
    if let Some(queue) = raw.queue {
        apply_opt!(cfg.queue.always_eager, queue.always_eager);
        apply_opt!(cfg.queue.broker_url, queue.broker_url, wrap);
        apply_opt!(cfg.queue.worker_concurrency, queue.worker_concurrency);
    }
    if let Some(storage) = raw.storage {
        apply_opt!(cfg.storage.backend, storage.backend);
        apply_opt!(cfg.storage.redis_url, storage.redis_url, wrap);
        apply_opt!(cfg.storage.result_ttl_secs, storage.result_ttl_secs);
        apply_opt!(cfg.storage.sweep_interval_secs, storage.sweep_interval_secs);
    }
    if let Some(transform) = raw.transform {
        apply_opt!(cfg.transform.fake, transform.fake);
        apply_opt!(cfg.transform.model_path, transform.model_path, wrap);
    }
}

/// Helper to parse env var as a specific type
#[inline]
fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .trim()
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

/// Helper to get env var as string; empty values count as unset
#[inline]
fn env_str(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

/// Apply all environment variable overrides to config
fn apply_env_overrides(cfg: &mut Config) -> Result<(), ConfigError> {
    // Server
    if let Some(v) = env_str("UPSCALE_SERVER_HOST") {
        cfg.server.host = v;
    }
    if let Some(v) = env_parse::<u16>("UPSCALE_SERVER_PORT")? {
        cfg.server.port = v;
    }
    if let Some(v) = env_str("UPSCALE_PUBLIC_URL") {
        cfg.server.public_url = Some(v);
    }
    if let Some(v) = env_parse::<usize>("UPSCALE_MAX_CONTENT_LENGTH")? {
        cfg.server.max_content_length = v;
    }

    // Logging
    if let Some(v) = env_str("UPSCALE_LOG_LEVEL") {
        cfg.logging.level = v;
    }
    if let Some(v) = env_bool("UPSCALE_LOG_JSON")? {
        cfg.logging.json = v;
    }

    // Queue
    if let Some(v) = env_bool("UPSCALE_TASK_ALWAYS_EAGER")? {
        cfg.queue.always_eager = v;
    }
    if let Some(v) = env_str("UPSCALE_BROKER_URL") {
        cfg.queue.broker_url = Some(v);
    }
    if let Some(v) = env_parse::<usize>("UPSCALE_WORKER_CONCURRENCY")? {
        cfg.queue.worker_concurrency = v;
    }

    // Storage
    if let Some(v) = env_parse::<StorageBackend>("UPSCALE_STORAGE_BACKEND")? {
        cfg.storage.backend = v;
    }
    if let Some(v) = env_str("UPSCALE_REDIS_URL") {
        cfg.storage.redis_url = Some(v);
    }
    if let Some(v) = env_parse::<u64>("UPSCALE_RESULT_TTL_SECS")? {
        cfg.storage.result_ttl_secs = v;
    }
    if let Some(v) = env_parse::<u64>("UPSCALE_SWEEP_INTERVAL_SECS")? {
        cfg.storage.sweep_interval_secs = v;
    }

    // Transform
    if let Some(v) = env_bool("UPSCALE_FAKE")? {
        cfg.transform.fake = v;
    }
    if let Some(v) = env_str("UPSCALE_MODEL_PATH") {
        cfg.transform.model_path = Some(v);
    }

    Ok(())
}

/// Validate a broker or store URL.
fn validate_url(field: &str, value: &str) -> Result<(), ConfigError> {
    url::Url::parse(value)
        .map(|_| ())
        .map_err(|e| ConfigError::Validation(format!("invalid {}: {} ({})", field, value, e)))
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
    if let Some(public_url) = cfg.server.public_url.as_deref() {
        validate_url("server.public_url", public_url)?;
    }

    if cfg.storage.result_ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "storage.result_ttl_secs must be > 0".into(),
        ));
    }
    if cfg.storage.sweep_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "storage.sweep_interval_secs must be > 0".into(),
        ));
    }
    if cfg.queue.worker_concurrency == 0 {
        return Err(ConfigError::Validation(
            "queue.worker_concurrency must be > 0".into(),
        ));
    }

    match (cfg.storage.backend, cfg.storage.redis_url.as_deref()) {
        (StorageBackend::Redis, None) => {
            return Err(ConfigError::Validation(
                "storage.redis_url must be set for the redis backend".into(),
            ))
        }
        (_, Some(url)) => validate_url("storage.redis_url", url)?,
        _ => {}
    }

    if let Some(broker_url) = cfg.queue.broker_url.as_deref() {
        validate_url("queue.broker_url", broker_url)?;
        // External workers cannot write into this process's memory.
        if !cfg.queue.always_eager && cfg.storage.backend != StorageBackend::Redis {
            return Err(ConfigError::Validation(
                "queue.broker_url requires storage.backend = redis".into(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::Builder;

    fn write_config(ext: &str, body: &str) -> tempfile::NamedTempFile {
        let f = Builder::new().suffix(ext).tempfile().expect("tmpfile");
        std::fs::write(f.path(), body).unwrap();
        f
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        validate_config(&cfg).expect("defaults validate");
        assert_eq!(cfg.storage.result_ttl(), Duration::from_secs(86_400));
        assert!(!cfg.queue.always_eager);
        assert_eq!(cfg.storage.backend, StorageBackend::Memory);
    }

    #[test]
    fn parse_toml() {
        let f = write_config(
            ".toml",
            r#"
[server]
host = "127.0.0.1"
port = 9000

[queue]
always_eager = true

[storage]
backend = "redis"
redis_url = "redis://cache:6379/1"
result_ttl_secs = 600
"#,
        );
        let raw = load_raw_from_file(f.path()).expect("load");
        let mut cfg = Config::default();
        merge_raw(&mut cfg, raw);

        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.server.port, 9000);
        assert!(cfg.queue.always_eager);
        assert_eq!(cfg.storage.backend, StorageBackend::Redis);
        assert_eq!(cfg.storage.redis_url.as_deref(), Some("redis://cache:6379/1"));
        assert_eq!(cfg.storage.result_ttl_secs, 600);
        validate_config(&cfg).expect("valid");
    }

    #[test]
    fn parse_yaml() {
        let f = write_config(
            ".yaml",
            r#"
queue:
  broker_url: redis://broker:6379/0
  worker_concurrency: 3
transform:
  fake: true
"#,
        );
        let raw = load_raw_from_file(f.path()).expect("load");
        let mut cfg = Config::default();
        merge_raw(&mut cfg, raw);

        assert_eq!(cfg.queue.broker_url.as_deref(), Some("redis://broker:6379/0"));
        assert_eq!(cfg.queue.worker_concurrency, 3);
        assert!(cfg.transform.fake);
    }

    #[test]
    fn parse_json_without_extension() {
        let f = write_config("", r#"{"logging": {"level": "debug", "json": true}}"#);
        let raw = load_raw_from_file(f.path()).expect("load");
        let mut cfg = Config::default();
        merge_raw(&mut cfg, raw);

        assert_eq!(cfg.logging.level, "debug");
        assert!(cfg.logging.json);
    }

    #[test]
    fn redis_backend_requires_url() {
        let mut cfg = Config::default();
        cfg.storage.backend = StorageBackend::Redis;
        assert!(matches!(
            validate_config(&cfg),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn external_broker_requires_shared_store() {
        let mut cfg = Config::default();
        cfg.queue.broker_url = Some("redis://broker:6379/0".into());
        assert!(validate_config(&cfg).is_err());

        cfg.storage.backend = StorageBackend::Redis;
        cfg.storage.redis_url = Some("redis://broker:6379/1".into());
        validate_config(&cfg).expect("valid with redis store");
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let mut cfg = Config::default();
        cfg.storage.result_ttl_secs = 0;
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn bool_parsing() {
        assert_eq!(parse_bool("TRUE"), Ok(true));
        assert_eq!(parse_bool(" yes "), Ok(true));
        assert_eq!(parse_bool("0"), Ok(false));
        assert!(parse_bool("maybe").is_err());
    }

    #[test]
    fn storage_backend_from_str() {
        assert_eq!("Redis".parse::<StorageBackend>(), Ok(StorageBackend::Redis));
        assert_eq!("memory".parse::<StorageBackend>(), Ok(StorageBackend::Memory));
        assert!("s3".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn env_overrides() {
        let keys = [
            "UPSCALE_SERVER_PORT",
            "UPSCALE_TASK_ALWAYS_EAGER",
            "UPSCALE_RESULT_TTL_SECS",
            "UPSCALE_FAKE",
            "UPSCALE_STORAGE_BACKEND",
            "UPSCALE_REDIS_URL",
        ];
        for k in &keys {
            std::env::remove_var(k);
        }

        std::env::set_var("UPSCALE_SERVER_PORT", "1234");
        std::env::set_var("UPSCALE_TASK_ALWAYS_EAGER", "true");
        std::env::set_var("UPSCALE_RESULT_TTL_SECS", "120");
        std::env::set_var("UPSCALE_FAKE", "1");
        std::env::set_var("UPSCALE_STORAGE_BACKEND", "redis");
        std::env::set_var("UPSCALE_REDIS_URL", "redis://localhost:6379/1");

        let cfg = load_config::<&Path>(None).expect("load config");
        assert_eq!(cfg.server.port, 1234);
        assert!(cfg.queue.always_eager);
        assert_eq!(cfg.storage.result_ttl_secs, 120);
        assert!(cfg.transform.fake);
        assert_eq!(cfg.storage.backend, StorageBackend::Redis);
        assert_eq!(
            cfg.storage.redis_url.as_deref(),
            Some("redis://localhost:6379/1")
        );

        std::env::set_var("UPSCALE_TASK_ALWAYS_EAGER", "sometimes");
        assert!(matches!(
            load_config::<&Path>(None),
            Err(ConfigError::Parse(_))
        ));

        for k in &keys {
            std::env::remove_var(k);
        }
    }
}
