//! Integration tests for configuration and zone file loading

use geofence_engine::infra::{load_zones_file, Config};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[site]
id = "test-site"

[engine]
max_accuracy_m = 25.0
idle_timeout_secs = 120
sweep_interval_secs = 5
device_shards = 16
alert_queue_capacity = 64

[index]
cell_size_deg = 0.005
max_cells_per_zone = 1024

[zones]
file = "zones/test.json"

[alerts]
cooldown_secs = 30
max_attempts = 5
base_backoff_ms = 100
max_backoff_ms = 1000
jsonl_file = ""
webhook_url = "http://alerts.local/hook"
mqtt_topic = "geofence/alerts"

[mqtt]
host = "test-host"
port = 1884
positions_topic = "test/positions"

[metrics]
interval_secs = 15
prometheus_port = 9091
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "test-site");
    assert_eq!(config.max_accuracy_m(), 25.0);
    assert_eq!(config.idle_timeout(), Duration::from_secs(120));
    assert_eq!(config.sweep_interval(), Duration::from_secs(5));
    assert_eq!(config.device_shards(), 16);
    assert_eq!(config.alert_queue_capacity(), 64);
    assert_eq!(config.cell_size_deg(), 0.005);
    assert_eq!(config.zones_file(), "zones/test.json");
    assert_eq!(config.cooldown(), Duration::from_secs(30));
    assert_eq!(config.max_attempts(), 5);
    assert_eq!(config.alerts_jsonl_file(), None);
    assert_eq!(config.webhook_url(), Some("http://alerts.local/hook"));
    assert_eq!(config.alerts_mqtt_topic(), Some("geofence/alerts"));
    assert_eq!(config.mqtt_host(), "test-host");
    assert_eq!(config.mqtt_port(), 1884);
    assert_eq!(config.mqtt_positions_topic(), "test/positions");
    assert_eq!(config.prometheus_port(), 9091);
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.mqtt_host(), "localhost");
    assert_eq!(config.mqtt_port(), 1883);
    assert_eq!(config.max_accuracy_m(), 50.0);
    assert_eq!(config.cooldown(), Duration::from_secs(60));
    assert_eq!(config.config_file(), "default");
}

#[test]
fn test_invalid_values_are_rejected() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[engine]\nmax_accuracy_m = -1.0\n").unwrap();
    temp_file.flush().unwrap();

    assert!(Config::from_file(temp_file.path()).is_err());
}

#[test]
fn test_shipped_config_files_load() {
    let root = Path::new(env!("CARGO_MANIFEST_DIR"));
    let config = Config::from_file(root.join("config/dev.toml")).unwrap();

    let zones = load_zones_file(root.join(config.zones_file())).unwrap();
    assert!(!zones.is_empty());
    for zone in &zones {
        zone.validate().unwrap();
    }
}
