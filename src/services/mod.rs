//! Services - business logic and state management
//!
//! - `zone_store` - atomically swapped zone snapshots with their spatial index
//! - `spatial_index` - grid index from cells to candidate zones
//! - `position_filter` - stale and low-accuracy sample gate
//! - `evaluator` - per-device membership state and enter/exit detection
//! - `dispatcher` - cooldown, retry and fan-out of alerts to sinks
//! - `history` - bounded record of dispatched alerts

pub mod dispatcher;
pub mod evaluator;
pub mod history;
pub mod position_filter;
pub mod spatial_index;
pub mod zone_store;

// Re-export commonly used types
pub use dispatcher::{AlertDispatcher, AlertSink, DispatcherSettings, SinkError};
pub use evaluator::{EvaluatorSettings, MembershipEvaluator, SubmitOutcome};
pub use history::AlertHistory;
pub use zone_store::ZoneStore;
