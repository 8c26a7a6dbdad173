use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::Path;

use crate::utils::error::{AppError, AppResult};

fn default_stats_frequency_ms() -> u64 { 1000 }
fn default_igmp_interval_ms() -> u64 { 2000 }
fn default_return_to_master() -> bool { true }
fn default_port() -> u16 { 8080 }

/// Application configuration, loaded from a JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Interface carrying the redirect rules
    pub interface: String,

    /// Port for the REST API server
    #[serde(default = "default_port")]
    pub port: u16,

    /// Capture interface whose traffic is mirrored onto `interface`
    #[serde(default)]
    pub copy_traffic_from: Option<String>,

    /// tc statistics poll period, also the default monitor poll period
    #[serde(default = "default_stats_frequency_ms")]
    pub stats_frequency_ms: u64,

    /// Join report resend period
    #[serde(default = "default_igmp_interval_ms")]
    pub igmp_interval_ms: u64,

    /// Arm the fail-back listener while a filter runs on its slave side
    #[serde(default = "default_return_to_master")]
    pub return_to_master: bool,

    /// Configured master/slave route pairs
    pub filters: Vec<FilterConfig>,
}

/// One master/slave route pair as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterConfig {
    /// Address traffic is redirected to
    pub route: Ipv4Addr,

    /// Stalled polls tolerated before switching
    pub switch_tries: u32,

    /// Start with automatic switching enabled
    #[serde(default)]
    pub auto_switch: bool,

    /// Per-filter monitor poll period, defaults to `statsFrequencyMs`
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,

    pub master: EndpointConfig,
    pub slave: EndpointConfig,
}

/// A source address and the priority its redirect rule is installed with
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub ip: Ipv4Addr,
    pub priority: u16,
}

impl AppConfig {
    /// Read, parse and validate a config file
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }

    /// Parse and validate config text
    pub fn from_json(raw: &str) -> AppResult<Self> {
        let config: AppConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the switch engine cannot run safely
    pub fn validate(&self) -> AppResult<()> {
        if self.interface.trim().is_empty() {
            return Err(AppError::ConfigError("interface must not be empty".into()));
        }
        if self.filters.is_empty() {
            return Err(AppError::ConfigError("at least one filter is required".into()));
        }
        if self.stats_frequency_ms == 0 || self.igmp_interval_ms == 0 {
            return Err(AppError::ConfigError(
                "statsFrequencyMs and igmpIntervalMs must be positive".into(),
            ));
        }

        let mut sources = HashSet::new();
        for (index, filter) in self.filters.iter().enumerate() {
            let n = index + 1;
            if filter.switch_tries == 0 {
                return Err(AppError::ConfigError(format!("filter {}: switchTries must be at least 1", n)));
            }
            if filter.poll_interval_ms == Some(0) {
                return Err(AppError::ConfigError(format!("filter {}: pollIntervalMs must be positive", n)));
            }
            if filter.master.ip == filter.slave.ip {
                return Err(AppError::ConfigError(format!(
                    "filter {}: master and slave share address {}",
                    n, filter.master.ip
                )));
            }
            if filter.master.priority == filter.slave.priority {
                return Err(AppError::ConfigError(format!(
                    "filter {}: master and slave share priority {}",
                    n, filter.master.priority
                )));
            }
            for ip in [filter.master.ip, filter.slave.ip] {
                if !sources.insert(ip) {
                    return Err(AppError::ConfigError(format!(
                        "filter {}: address {} is already used by another filter",
                        n, ip
                    )));
                }
            }
        }

        Ok(())
    }

    /// Log a one-line summary per filter
    pub fn log_summary(&self) {
        log::info!("Total pairs: {} for interface: {}", self.filters.len(), self.interface);
        for (i, filter) in self.filters.iter().enumerate() {
            log::info!(
                " {}) master: {} (prio {}), slave: {} (prio {}), route: {}, tries before switch: {}, auto switch: {}",
                i + 1,
                filter.master.ip,
                filter.master.priority,
                filter.slave.ip,
                filter.slave.priority,
                filter.route,
                filter.switch_tries,
                filter.auto_switch,
            );
        }
    }
}
