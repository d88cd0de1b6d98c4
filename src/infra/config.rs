//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Deployment identifier, used as the Prometheus `site` label
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "geofence".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Samples with a larger accuracy radius are dropped
    #[serde(default = "default_max_accuracy_m")]
    pub max_accuracy_m: f64,
    /// Device state is discarded after this long without an accepted sample
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Rounded up to a power of two
    #[serde(default = "default_device_shards")]
    pub device_shards: usize,
    #[serde(default = "default_alert_queue_capacity")]
    pub alert_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_accuracy_m: default_max_accuracy_m(),
            idle_timeout_secs: default_idle_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            device_shards: default_device_shards(),
            alert_queue_capacity: default_alert_queue_capacity(),
        }
    }
}

fn default_max_accuracy_m() -> f64 {
    50.0
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_device_shards() -> usize {
    64
}

fn default_alert_queue_capacity() -> usize {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfigToml {
    /// Grid cell edge in degrees
    #[serde(default = "default_cell_size_deg")]
    pub cell_size_deg: f64,
    #[serde(default = "default_max_cells_per_zone")]
    pub max_cells_per_zone: usize,
}

impl Default for IndexConfigToml {
    fn default() -> Self {
        Self { cell_size_deg: default_cell_size_deg(), max_cells_per_zone: default_max_cells_per_zone() }
    }
}

fn default_cell_size_deg() -> f64 {
    0.01
}

fn default_max_cells_per_zone() -> usize {
    4096
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZonesConfig {
    /// JSON zone definitions (`danger_zones` array)
    #[serde(default = "default_zones_file")]
    pub file: String,
}

impl Default for ZonesConfig {
    fn default() -> Self {
        Self { file: default_zones_file() }
    }
}

fn default_zones_file() -> String {
    "config/zones.json".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    /// When false the dispatcher drains and discards alerts
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Repeat (device, zone, kind) alerts inside this window are suppressed
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Delivery attempts per sink, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_history_size")]
    pub history_size: usize,
    /// JSONL alert log (omit to disable)
    #[serde(default = "default_alerts_jsonl_file")]
    pub jsonl_file: Option<String>,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_webhook_timeout_ms")]
    pub webhook_timeout_ms: u64,
    /// MQTT topic for alert publishing (omit to disable)
    #[serde(default)]
    pub mqtt_topic: Option<String>,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown_secs: default_cooldown_secs(),
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            history_size: default_history_size(),
            jsonl_file: default_alerts_jsonl_file(),
            webhook_url: None,
            webhook_timeout_ms: default_webhook_timeout_ms(),
            mqtt_topic: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_cooldown_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5000
}

fn default_history_size() -> usize {
    1000
}

fn default_alerts_jsonl_file() -> Option<String> {
    Some("logs/alerts.log".to_string())
}

fn default_webhook_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// Enable MQTT position ingest
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_positions_topic")]
    pub positions_topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            positions_topic: default_positions_topic(),
            username: None,
            password: None,
        }
    }
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_positions_topic() -> String {
    "geofence/positions".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs(), prometheus_port: default_prometheus_port() }
    }
}

fn default_metrics_interval_secs() -> u64 {
    10
}

fn default_prometheus_port() -> u16 {
    9090
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub index: IndexConfigToml,
    #[serde(default)]
    pub zones: ZonesConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    max_accuracy_m: f64,
    idle_timeout_secs: u64,
    sweep_interval_secs: u64,
    device_shards: usize,
    alert_queue_capacity: usize,
    cell_size_deg: f64,
    max_cells_per_zone: usize,
    zones_file: String,
    alerts_enabled: bool,
    cooldown_secs: u64,
    max_attempts: u32,
    base_backoff_ms: u64,
    max_backoff_ms: u64,
    history_size: usize,
    alerts_jsonl_file: Option<String>,
    webhook_url: Option<String>,
    webhook_timeout_ms: u64,
    alerts_mqtt_topic: Option<String>,
    mqtt_enabled: bool,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_positions_topic: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        let TomlConfig { site, engine, index, zones, alerts, mqtt, metrics } = toml_config;
        Self {
            site_id: site.id,
            max_accuracy_m: engine.max_accuracy_m,
            idle_timeout_secs: engine.idle_timeout_secs,
            sweep_interval_secs: engine.sweep_interval_secs,
            device_shards: engine.device_shards,
            alert_queue_capacity: engine.alert_queue_capacity,
            cell_size_deg: index.cell_size_deg,
            max_cells_per_zone: index.max_cells_per_zone,
            zones_file: zones.file,
            alerts_enabled: alerts.enabled,
            cooldown_secs: alerts.cooldown_secs,
            max_attempts: alerts.max_attempts,
            base_backoff_ms: alerts.base_backoff_ms,
            max_backoff_ms: alerts.max_backoff_ms,
            history_size: alerts.history_size,
            alerts_jsonl_file: alerts.jsonl_file.filter(|f| !f.is_empty()),
            webhook_url: alerts.webhook_url.filter(|u| !u.is_empty()),
            webhook_timeout_ms: alerts.webhook_timeout_ms,
            alerts_mqtt_topic: alerts.mqtt_topic.filter(|t| !t.is_empty()),
            mqtt_enabled: mqtt.enabled,
            mqtt_host: mqtt.host,
            mqtt_port: mqtt.port,
            mqtt_positions_topic: mqtt.positions_topic,
            mqtt_username: mqtt.username,
            mqtt_password: mqtt.password,
            metrics_interval_secs: metrics.interval_secs,
            prometheus_port: metrics.prometheus_port,
            config_file,
        }
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(cli_path: Option<&str>) -> String {
        if let Some(path) = cli_path {
            return path.to_string();
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content, path.display().to_string())
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str, config_file: String) -> anyhow::Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content)?;
        let config = Self::from_toml(toml_config, config_file);
        config.validate()?;
        Ok(config)
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        match Self::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.max_accuracy_m.is_finite() && self.max_accuracy_m >= 0.0,
            "engine.max_accuracy_m must be >= 0"
        );
        anyhow::ensure!(self.idle_timeout_secs > 0, "engine.idle_timeout_secs must be > 0");
        anyhow::ensure!(self.sweep_interval_secs > 0, "engine.sweep_interval_secs must be > 0");
        anyhow::ensure!(self.alert_queue_capacity > 0, "engine.alert_queue_capacity must be > 0");
        anyhow::ensure!(
            self.cell_size_deg.is_finite() && self.cell_size_deg > 0.0,
            "index.cell_size_deg must be > 0"
        );
        anyhow::ensure!(self.max_attempts > 0, "alerts.max_attempts must be > 0");
        anyhow::ensure!(self.metrics_interval_secs > 0, "metrics.interval_secs must be > 0");
        Ok(())
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn max_accuracy_m(&self) -> f64 {
        self.max_accuracy_m
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn device_shards(&self) -> usize {
        self.device_shards
    }

    pub fn alert_queue_capacity(&self) -> usize {
        self.alert_queue_capacity
    }

    pub fn cell_size_deg(&self) -> f64 {
        self.cell_size_deg
    }

    pub fn max_cells_per_zone(&self) -> usize {
        self.max_cells_per_zone
    }

    pub fn zones_file(&self) -> &str {
        &self.zones_file
    }

    pub fn alerts_enabled(&self) -> bool {
        self.alerts_enabled
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn history_size(&self) -> usize {
        self.history_size
    }

    pub fn alerts_jsonl_file(&self) -> Option<&str> {
        self.alerts_jsonl_file.as_deref()
    }

    pub fn webhook_url(&self) -> Option<&str> {
        self.webhook_url.as_deref()
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_millis(self.webhook_timeout_ms)
    }

    pub fn alerts_mqtt_topic(&self) -> Option<&str> {
        self.alerts_mqtt_topic.as_deref()
    }

    pub fn mqtt_enabled(&self) -> bool {
        self.mqtt_enabled
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_positions_topic(&self) -> &str {
        &self.mqtt_positions_topic
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder for tests and embedded use: set the cooldown window
    pub fn with_cooldown_secs(mut self, secs: u64) -> Self {
        self.cooldown_secs = secs;
        self
    }

    /// Builder for tests and embedded use: set the idle timeout
    pub fn with_idle_timeout_secs(mut self, secs: u64) -> Self {
        self.idle_timeout_secs = secs;
        self
    }

    /// Builder for tests and embedded use: set the accuracy gate
    pub fn with_max_accuracy_m(mut self, meters: f64) -> Self {
        self.max_accuracy_m = meters;
        self
    }

    /// Builder for tests and embedded use: disable file/network sinks
    pub fn without_sinks(mut self) -> Self {
        self.alerts_jsonl_file = None;
        self.webhook_url = None;
        self.alerts_mqtt_topic = None;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.site_id(), "geofence");
        assert_eq!(config.max_accuracy_m(), 50.0);
        assert_eq!(config.cooldown(), Duration::from_secs(60));
        assert_eq!(config.history_size(), 1000);
        assert_eq!(config.device_shards(), 64);
        assert_eq!(config.alerts_jsonl_file(), Some("logs/alerts.log"));
        assert_eq!(config.webhook_url(), None);
        assert_eq!(config.mqtt_port(), 1883);
    }

    #[test]
    fn test_partial_toml_uses_section_defaults() {
        let config = Config::from_toml_str(
            r#"
[engine]
max_accuracy_m = 25.0

[alerts]
cooldown_secs = 5
"#,
            "inline".to_string(),
        )
        .unwrap();
        assert_eq!(config.max_accuracy_m(), 25.0);
        assert_eq!(config.idle_timeout(), Duration::from_secs(600));
        assert_eq!(config.cooldown(), Duration::from_secs(5));
        assert_eq!(config.max_attempts(), 3);
        assert_eq!(config.zones_file(), "config/zones.json");
    }

    #[test]
    fn test_empty_strings_disable_sinks() {
        let config = Config::from_toml_str(
            r#"
[alerts]
jsonl_file = ""
webhook_url = ""
"#,
            "inline".to_string(),
        )
        .unwrap();
        assert_eq!(config.alerts_jsonl_file(), None);
        assert_eq!(config.webhook_url(), None);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Config::from_toml_str("[alerts]\nmax_attempts = 0\n", "inline".to_string()).is_err());
        assert!(Config::from_toml_str("[index]\ncell_size_deg = 0.0\n", "inline".to_string()).is_err());
        assert!(Config::from_toml_str("[engine]\nmax_accuracy_m = -1.0\n", "inline".to_string()).is_err());
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        assert_eq!(Config::resolve_config_path(Some("config/site.toml")), "config/site.toml");
    }

    #[test]
    fn test_builders() {
        let config = Config::default().with_cooldown_secs(0).with_idle_timeout_secs(1).without_sinks();
        assert_eq!(config.cooldown(), Duration::ZERO);
        assert_eq!(config.idle_timeout(), Duration::from_secs(1));
        assert_eq!(config.alerts_jsonl_file(), None);
    }
}
