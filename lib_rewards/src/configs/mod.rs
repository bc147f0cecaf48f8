//! # Configs Module
//!
//! Process configuration: built-in defaults, overlaid by a JSON file, overlaid
//! by command-line flags and environment variables.

/// Configuration structs, loading and validation.
pub mod config_sys;

pub use config_sys::{
    load_config, AccrualConfig, AdminHttpConfig, AlertServer, AlertsConfig, CliArgs, ConfigError,
    DatabaseConfig, DispatchConfig, HealthConfig, MessagesConfig, NetworkConfig, ReconnectConfig,
    RemediationConfig, ServiceConfig, VoucherConfig, WithdrawConfig,
};
