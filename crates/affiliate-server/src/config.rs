use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub affiliate: AffiliateConfig,
    /// Partner transaction server. Registration and purchase relay are
    /// unavailable while this is unset.
    #[serde(default)]
    pub external_service: Option<ExternalServiceConfig>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

// Default derived via field defaults

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be > 0".into());
        }
        // Affiliate validations
        let rate = self.affiliate.commission_rate;
        if !(0.0..=1.0).contains(&rate) {
            return Err("affiliate.commission_rate must be between 0.0 and 1.0".into());
        }
        if self.affiliate.default_ico_id.trim().is_empty() {
            return Err("affiliate.default_ico_id must not be empty".into());
        }
        if self
            .affiliate
            .data_file_path
            .extension()
            .is_none_or(|ext| ext != "json")
        {
            return Err("affiliate.data_file_path must have .json extension".into());
        }
        // External service validations
        if let Some(ref ext) = self.external_service {
            let parsed = url::Url::parse(&ext.main_server_url)
                .map_err(|e| format!("external_service.main_server_url is invalid: {e}"))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err("external_service.main_server_url must be an http(s) URL".into());
            }
            positive_duration("external_service.request_timeout_secs", ext.request_timeout_secs)?;
            positive_duration("external_service.retry_delay_secs", ext.retry_delay_secs)?;
        }
        // Cache validations
        if self.cache.affiliate_ttl_secs == 0
            || self.cache.metrics_ttl_secs == 0
            || self.cache.health_ttl_secs == 0
        {
            return Err("cache TTLs must be > 0".into());
        }
        if self.cache.health_probe_timeout_secs == 0 {
            return Err("cache.health_probe_timeout_secs must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
    #[serde(default = "default_cors_methods")]
    pub cors_methods: Vec<String>,
    #[serde(default = "default_cors_headers")]
    pub cors_headers: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    5002
}
fn default_body_limit() -> usize {
    1024 * 1024
}
fn default_cors_origins() -> Vec<String> {
    vec!["*".into()]
}
fn default_cors_methods() -> Vec<String> {
    vec!["GET".into(), "POST".into(), "OPTIONS".into()]
}
fn default_cors_headers() -> Vec<String> {
    vec!["Content-Type".into()]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
            cors_origins: default_cors_origins(),
            cors_methods: default_cors_methods(),
            cors_headers: default_cors_headers(),
        }
    }
}

/// Commission accounting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AffiliateConfig {
    /// Fraction of each purchase credited to the referring affiliate.
    #[serde(default = "default_commission_rate")]
    pub commission_rate: f64,
    #[serde(default = "default_ico_id")]
    pub default_ico_id: String,
    /// Backing file of the ledger.
    #[serde(default = "default_data_file_path")]
    pub data_file_path: PathBuf,
}

fn default_commission_rate() -> f64 {
    0.01
}
fn default_ico_id() -> String {
    "main_ico".into()
}
fn default_data_file_path() -> PathBuf {
    PathBuf::from("affiliate_data.json")
}

impl Default for AffiliateConfig {
    fn default() -> Self {
        Self {
            commission_rate: default_commission_rate(),
            default_ico_id: default_ico_id(),
            data_file_path: default_data_file_path(),
        }
    }
}

/// Partner transaction server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalServiceConfig {
    /// Base URL, e.g. `https://ico.example.com`
    pub main_server_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: f64,
    /// Reserved: the relay performs a single attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Reserved: the relay performs a single attempt.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: f64,
}

fn default_request_timeout_secs() -> f64 {
    10.0
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_secs() -> f64 {
    1.0
}

impl ExternalServiceConfig {
    pub fn new(main_server_url: impl Into<String>) -> Self {
        Self {
            main_server_url: main_server_url.into(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }

    /// Base URL without trailing slash, ready for path joining.
    pub fn base_url(&self) -> &str {
        self.main_server_url.trim_end_matches('/')
    }

    /// Falls back to the default when the configured value is not a
    /// representable duration. [`AppConfig::validate`] rejects such values.
    pub fn request_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.request_timeout_secs)
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or_else(|| Duration::from_secs_f64(default_request_timeout_secs()))
    }
}

fn positive_duration(field: &str, secs: f64) -> Result<Duration, String> {
    match Duration::try_from_secs_f64(secs) {
        Ok(d) if !d.is_zero() => Ok(d),
        Ok(_) => Err(format!("{field} must be > 0")),
        Err(e) => Err(format!("{field} is not a valid duration: {e}")),
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_affiliate_ttl_secs")]
    pub affiliate_ttl_secs: u64,
    #[serde(default = "default_metrics_ttl_secs")]
    pub metrics_ttl_secs: u64,
    #[serde(default = "default_health_ttl_secs")]
    pub health_ttl_secs: u64,
    /// Timeout of the partner liveness probe run by health checks.
    #[serde(default = "default_health_probe_timeout_secs")]
    pub health_probe_timeout_secs: u64,
    /// Interval of the background sweep of expired entries; 0 disables it.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_affiliate_ttl_secs() -> u64 {
    300 // 5 minutes
}
fn default_metrics_ttl_secs() -> u64 {
    60
}
fn default_health_ttl_secs() -> u64 {
    30
}
fn default_health_probe_timeout_secs() -> u64 {
    5
}
fn default_cleanup_interval_secs() -> u64 {
    60
}

impl CacheConfig {
    pub fn affiliate_ttl(&self) -> Duration {
        Duration::from_secs(self.affiliate_ttl_secs)
    }
    pub fn metrics_ttl(&self) -> Duration {
        Duration::from_secs(self.metrics_ttl_secs)
    }
    pub fn health_ttl(&self) -> Duration {
        Duration::from_secs(self.health_ttl_secs)
    }
    pub fn health_probe_timeout(&self) -> Duration {
        Duration::from_secs(self.health_probe_timeout_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            affiliate_ttl_secs: default_affiliate_ttl_secs(),
            metrics_ttl_secs: default_metrics_ttl_secs(),
            health_ttl_secs: default_health_ttl_secs(),
            health_probe_timeout_secs: default_health_probe_timeout_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, ConfigError, Environment, File};
    use std::path::PathBuf;

    /// Flat variable names used by earlier deployments, mapped to config keys.
    const FLAT_ENV_OVERRIDES: &[(&str, &str)] = &[
        ("MAIN_SERVER_URL", "external_service.main_server_url"),
        ("REQUEST_TIMEOUT", "external_service.request_timeout_secs"),
        ("MAX_RETRIES", "external_service.max_retries"),
        ("RETRY_DELAY", "external_service.retry_delay_secs"),
        ("COMMISSION_RATE", "affiliate.commission_rate"),
        ("DEFAULT_ICO_ID", "affiliate.default_ico_id"),
        ("AFFILIATE_DATA_FILE", "affiliate.data_file_path"),
        ("LOG_LEVEL", "logging.level"),
        ("FLASK_PORT", "server.port"),
    ];

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or("affiliate.toml"));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., AFFILIATE__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("AFFILIATE")
                .try_parsing(true)
                .separator("__"),
        );
        for (var, key) in FLAT_ENV_OVERRIDES {
            let value = std::env::var(var).ok().filter(|v| !v.is_empty());
            builder = builder
                .set_override_option(*key, value)
                .map_err(|e: ConfigError| format!("config override error: {e}"))?;
        }
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        // Validate
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.affiliate.commission_rate, 0.01);
        assert_eq!(cfg.affiliate.default_ico_id, "main_ico");
        assert!(cfg.external_service.is_none());
        assert_eq!(cfg.cache.affiliate_ttl(), Duration::from_secs(300));
        assert_eq!(cfg.cache.metrics_ttl(), Duration::from_secs(60));
        assert_eq!(cfg.cache.health_ttl(), Duration::from_secs(30));
    }

    #[test]
    fn rejects_out_of_range_commission_rate() {
        let mut cfg = AppConfig::default();
        cfg.affiliate.commission_rate = 1.5;
        assert!(cfg.validate().unwrap_err().contains("commission_rate"));
    }

    #[test]
    fn rejects_non_json_data_file() {
        let mut cfg = AppConfig::default();
        cfg.affiliate.data_file_path = PathBuf::from("affiliates.txt");
        assert!(cfg.validate().unwrap_err().contains(".json"));
    }

    #[test]
    fn rejects_bad_partner_url() {
        let mut cfg = AppConfig::default();
        cfg.external_service = Some(ExternalServiceConfig::new("not a url"));
        assert!(cfg.validate().is_err());

        cfg.external_service = Some(ExternalServiceConfig::new("ftp://example.com"));
        assert!(cfg.validate().unwrap_err().contains("http(s)"));

        cfg.external_service = Some(ExternalServiceConfig::new("https://example.com/"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn base_url_strips_trailing_slash() {
        let ext = ExternalServiceConfig::new("https://ico.example.com/");
        assert_eq!(ext.base_url(), "https://ico.example.com");
        assert_eq!(ext.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn rejects_unrepresentable_durations() {
        let mut cfg = AppConfig::default();
        let mut ext = ExternalServiceConfig::new("https://ico.example.com");
        ext.request_timeout_secs = 1e20;
        cfg.external_service = Some(ext.clone());
        assert!(cfg.validate().unwrap_err().contains("request_timeout_secs"));
        assert_eq!(ext.request_timeout(), Duration::from_secs(10));

        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY, 1e20] {
            let mut ext = ExternalServiceConfig::new("https://ico.example.com");
            ext.retry_delay_secs = bad;
            cfg.external_service = Some(ext);
            assert!(cfg.validate().unwrap_err().contains("retry_delay_secs"), "{bad}");
        }

        let mut ext = ExternalServiceConfig::new("https://ico.example.com");
        ext.request_timeout_secs = 2.5;
        assert_eq!(ext.request_timeout(), Duration::from_millis(2500));
    }
}
