//! Infrastructure - configuration, metrics, and zone files
//!
//! - `config` - Application configuration (TOML loading, defaults)
//! - `metrics` - Lock-free metrics collection
//! - `zones_file` - JSON danger zone definitions

pub mod config;
pub mod metrics;
pub mod zones_file;

// Re-export commonly used types
pub use config::Config;
pub use metrics::Metrics;
pub use zones_file::load_zones_file;
