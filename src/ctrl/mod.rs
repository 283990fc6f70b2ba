//! Validation helpers built on the device API: configuration loading,
//! bounded completion polling and the managed-receive scenario driver.

mod config;
mod poll;
mod scenario;

pub use config::{Config, ConfigError, ScenarioConfig};
pub use poll::{check_wc, poll_at_least, poll_exact, CompletionError};
pub use scenario::{Counters, Scenario, ScenarioError};
