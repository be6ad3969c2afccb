use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "chanwarden.toml";

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub htlc_limits: HtlcLimitsConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub grace_period: GracePeriodConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// LND REST endpoint, including scheme
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
    /// Path to LND's tls.cert
    #[serde(default = "default_tls_cert_path")]
    pub tls_cert_path: PathBuf,
    /// Explicit macaroon file, wins over dir + filename
    #[serde(default)]
    pub macaroon_path: Option<PathBuf>,
    #[serde(default)]
    pub macaroon_dir: Option<PathBuf>,
    #[serde(default = "default_macaroon_filename")]
    pub macaroon_filename: String,
    /// Bitcoin network, used to locate the default macaroon dir
    #[serde(default = "default_network")]
    pub network: String,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Dry-run mode: log decisions but execute nothing
    #[serde(default)]
    pub dry_run: bool,
    /// Deadline for calls that list or mutate channels
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Deadline for identity and node-info lookups
    #[serde(default = "default_lookup_timeout")]
    pub lookup_timeout_secs: u64,
    /// Consecutive pipeline restarts before giving up (0 = never give up)
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    /// Base delay before a restart, doubled per consecutive failure
    #[serde(default = "default_restart_backoff")]
    pub restart_backoff_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct HtlcLimitsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_htlc_limits_interval")]
    pub interval_secs: u64,
    /// Minimum HTLC size we want to advertise (msat)
    #[serde(default = "default_min_htlc_msat")]
    pub min_htlc_msat: u64,
    #[serde(default = "default_time_lock_delta")]
    pub time_lock_delta: u32,
    #[serde(default)]
    pub base_fee_msat: i64,
}

#[derive(Debug, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_breaker_interval")]
    pub interval_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct GracePeriodConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_grace_interval")]
    pub interval_secs: u64,
    /// Blocks before expiry at which an HTLC counts as in the grace period
    #[serde(default = "default_final_cltv_reject_delta")]
    pub final_cltv_reject_delta: u32,
    #[serde(default = "default_reconnect_timeout")]
    pub reconnect_timeout_secs: u64,
    /// Feature bit a peer must advertise to be a reconnect candidate
    #[serde(default = "default_target_feature_bit")]
    pub target_feature_bit: u32,
}

// Default value functions
fn lnd_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(".lnd")
}
fn default_rest_url() -> String {
    "https://127.0.0.1:8080".to_string()
}
fn default_tls_cert_path() -> PathBuf {
    lnd_dir().join("tls.cert")
}
fn default_macaroon_filename() -> String {
    "admin.macaroon".to_string()
}
fn default_network() -> String {
    "mainnet".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_request_timeout() -> u64 {
    60
}
fn default_lookup_timeout() -> u64 {
    10
}
fn default_max_restarts() -> u32 {
    10
}
fn default_restart_backoff() -> u64 {
    30
}
fn default_htlc_limits_interval() -> u64 {
    6 * 60 * 60
}
fn default_min_htlc_msat() -> u64 {
    2_500_000
}
fn default_time_lock_delta() -> u32 {
    144
}
fn default_breaker_interval() -> u64 {
    5 * 60
}
fn default_grace_interval() -> u64 {
    10 * 60
}
fn default_final_cltv_reject_delta() -> u32 {
    19
}
fn default_reconnect_timeout() -> u64 {
    10
}
fn default_target_feature_bit() -> u32 {
    // AMP, optional
    31
}

// Default implementations
impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            rest_url: default_rest_url(),
            tls_cert_path: default_tls_cert_path(),
            macaroon_path: None,
            macaroon_dir: None,
            macaroon_filename: default_macaroon_filename(),
            network: default_network(),
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            dry_run: false,
            request_timeout_secs: default_request_timeout(),
            lookup_timeout_secs: default_lookup_timeout(),
            max_restarts: default_max_restarts(),
            restart_backoff_secs: default_restart_backoff(),
        }
    }
}

impl Default for HtlcLimitsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_htlc_limits_interval(),
            min_htlc_msat: default_min_htlc_msat(),
            time_lock_delta: default_time_lock_delta(),
            base_fee_msat: 0,
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_breaker_interval(),
        }
    }
}

impl Default for GracePeriodConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_grace_interval(),
            final_cltv_reject_delta: default_final_cltv_reject_delta(),
            reconnect_timeout_secs: default_reconnect_timeout(),
            target_feature_bit: default_target_feature_bit(),
        }
    }
}

impl ServerConfig {
    /// Macaroon file to authenticate with.
    pub fn effective_macaroon_path(&self) -> PathBuf {
        if let Some(path) = &self.macaroon_path {
            return path.clone();
        }
        let dir = match &self.macaroon_dir {
            Some(dir) => dir.clone(),
            None => lnd_dir()
                .join("data")
                .join("chain")
                .join("bitcoin")
                .join(&self.network),
        };
        dir.join(&self.macaroon_filename)
    }
}

impl GeneralConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }
}

impl Config {
    /// Load from `path`, or from `chanwarden.toml` if present, or fall back to defaults.
    ///
    /// An explicitly given path must exist.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Error opening config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Error parsing config file {}", path.display()))?;
        Ok(config)
    }

    /// True when at least one control loop is switched on.
    pub fn any_loop_enabled(&self) -> bool {
        self.htlc_limits.enabled || self.circuit_breaker.enabled || self.grace_period.enabled
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        const KNOWN_NETWORKS: &[&str] = &["mainnet", "testnet", "testnet4", "signet", "regtest", "simnet"];
        const MIN_TIME_LOCK_DELTA: u32 = 18;
        const MAX_TIME_LOCK_DELTA: u32 = 2016;

        if !KNOWN_NETWORKS.contains(&self.server.network.as_str()) {
            anyhow::bail!("unknown network {:?}", self.server.network);
        }
        if self.general.request_timeout_secs == 0 || self.general.lookup_timeout_secs == 0 {
            anyhow::bail!("request timeouts must be greater than zero");
        }
        if self.htlc_limits.interval_secs == 0
            || self.circuit_breaker.interval_secs == 0
            || self.grace_period.interval_secs == 0
        {
            anyhow::bail!("loop intervals must be greater than zero");
        }
        if self.htlc_limits.min_htlc_msat == 0 {
            anyhow::bail!("min_htlc_msat must be greater than zero");
        }
        if self.htlc_limits.time_lock_delta < MIN_TIME_LOCK_DELTA
            || self.htlc_limits.time_lock_delta > MAX_TIME_LOCK_DELTA
        {
            anyhow::bail!(
                "time_lock_delta ({}) outside {}..={}",
                self.htlc_limits.time_lock_delta,
                MIN_TIME_LOCK_DELTA,
                MAX_TIME_LOCK_DELTA
            );
        }
        if self.htlc_limits.base_fee_msat < 0 {
            anyhow::bail!("base_fee_msat must not be negative");
        }
        if self.grace_period.reconnect_timeout_secs == 0 {
            anyhow::bail!("reconnect_timeout_secs must be greater than zero");
        }
        if !self.server.tls_cert_path.exists() {
            anyhow::bail!(
                "TLS cert not found at: {}",
                self.server.tls_cert_path.display()
            );
        }
        let macaroon = self.server.effective_macaroon_path();
        if !macaroon.exists() {
            anyhow::bail!("macaroon not found at: {}", macaroon.display());
        }
        Ok(())
    }

    /// Create a config with all defaults for testing purposes.
    /// The credential paths are set to the provided path (must exist for validation).
    #[cfg(test)]
    pub fn test_default(credentials_path: PathBuf) -> Self {
        Self {
            server: ServerConfig {
                rest_url: "https://localhost:8080".to_string(),
                tls_cert_path: credentials_path.clone(),
                macaroon_path: Some(credentials_path),
                ..Default::default()
            },
            general: GeneralConfig::default(),
            htlc_limits: HtlcLimitsConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            grace_period: GracePeriodConfig::default(),
        }
    }
}
