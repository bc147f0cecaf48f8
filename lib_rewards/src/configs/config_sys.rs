//! # Service Configuration
//!
//! The service reads one JSON document (`config.json` by default). Every field
//! has a default, so a file only needs the deployment-specific values
//! (credentials, channel, moderators). Command-line flags and their
//! environment variables override the file.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::award::{AwardPolicy, Tier};

const DEFAULT_CONFIG_PATH: &str = "config.json";
/// One week.
const MAX_COOLDOWN_MINUTES: u64 = 7 * 24 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Command-line flags. Each one can also come from the environment.
#[derive(Parser, Debug, Clone, Default)]
#[clap(about = "Presence tracking and points accrual bridge", version)]
pub struct CliArgs {
    #[clap(long, env = "REWARDS_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "REWARDS_LOG_DIR", help = "Directory for rolling log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "REWARDS_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "DATABASE_URL", help = "PostgreSQL connection URL.")]
    pub database_url: Option<String>,

    #[clap(long, env = "REWARDS_ADMIN_BIND", help = "Listen address of the admin HTTP surface.")]
    pub admin_bind: Option<String>,

    #[clap(long, env = "REWARDS_NO_AUTO_RESTART", help = "Never restart services through systemctl.")]
    pub no_auto_restart: bool,
}

/// Messaging daemon endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkConfig {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub ws_port: u16,
    pub token: String,
    pub handshake_timeout_secs: u64,
    /// Notification filter requested when the WebSocket is enabled.
    pub ws_notifications: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            scheme: "http".to_string(),
            host: "127.0.0.1".to_string(),
            port: 22825,
            ws_port: 25000,
            token: String::new(),
            handshake_timeout_secs: 30,
            ws_notifications: "all".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 8,
        }
    }
}

/// Accrual cadence and award policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AccrualConfig {
    pub interval_minutes: u64,
    /// Flat mode: points granted per 24 hours of presence.
    pub points_per_day: f64,
    /// Switches to tiered mode.
    pub use_intervals: bool,
    pub intervals: Vec<Tier>,
}

impl Default for AccrualConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 5,
            points_per_day: 10.0,
            use_intervals: false,
            intervals: Vec::new(),
        }
    }
}

impl AccrualConfig {
    pub fn policy(&self) -> AwardPolicy {
        if self.use_intervals {
            AwardPolicy::Tiered(self.intervals.clone())
        } else {
            AwardPolicy::Flat {
                points_per_day: self.points_per_day,
            }
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthConfig {
    pub interval_minutes: u64,
    /// Treat "connected but empty" reads as failures.
    pub strict_mode: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 10,
            strict_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectConfig {
    pub attempts_per_cycle: u32,
    pub attempt_delay_secs: u64,
    pub escalation_wait_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            attempts_per_cycle: 5,
            attempt_delay_secs: 12,
            escalation_wait_secs: 40,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatchConfig {
    /// Serialize every outbound send behind one process-wide lock.
    pub exclusive: bool,
    pub sends_per_window: u32,
    pub window_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            exclusive: true,
            sends_per_window: 1,
            window_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct VoucherConfig {
    pub prefix: String,
    pub max_amount: f64,
    pub cooldown_minutes: u64,
}

impl Default for VoucherConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            max_amount: 1000.0,
            cooldown_minutes: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RemediationConfig {
    /// Log restart requests instead of running them.
    pub disabled: bool,
    pub systemctl_path: String,
    /// Unit running the messaging daemon.
    pub network_unit: String,
    /// Unit running this service.
    pub service_unit: String,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            systemctl_path: "/usr/bin/systemctl".to_string(),
            network_unit: "startopia".to_string(),
            service_unit: "bankbot".to_string(),
        }
    }
}

/// # Alert Server
///
/// Endpoint and display name of a notification webhook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertServer {
    pub host: String,
    pub name: String,
}

/// Primary and failover notification webhooks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertsConfig {
    pub primary: AlertServer,
    pub failover: AlertServer,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct WithdrawConfig {
    pub min_withdraw: f64,
    pub notify_enabled: bool,
    pub notify_period_secs: u64,
}

impl Default for WithdrawConfig {
    fn default() -> Self {
        Self {
            min_withdraw: 100.0,
            notify_enabled: true,
            notify_period_secs: 120,
        }
    }
}

/// User-facing texts that differ between deployments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MessagesConfig {
    pub welcome: Vec<String>,
    pub manager_contact: String,
    pub fallback_reply: String,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            welcome: vec!["Welcome! Stay online in the channel to earn points.".to_string()],
            manager_contact: String::new(),
            fallback_reply: "Send \"balance\" to see your points.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AdminHttpConfig {
    pub bind: String,
    /// Bearer token required on `/admin/*` when set.
    pub token: Option<String>,
}

impl Default for AdminHttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8088".to_string(),
            token: None,
        }
    }
}

/// # Service Configuration
///
/// Complete runtime configuration, after all layers are applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceConfig {
    pub log_dir: PathBuf,
    pub log_level: String,
    pub network: NetworkConfig,
    pub database: DatabaseConfig,
    /// The monitored channel.
    pub channel_id: String,
    /// Nickname of the daemon's own service account, never credited.
    pub service_account_name: String,
    /// Public keys allowed to run admin commands over direct message.
    pub moderators: Vec<String>,
    pub accrual: AccrualConfig,
    pub health: HealthConfig,
    pub reconnect: ReconnectConfig,
    pub dispatch: DispatchConfig,
    pub vouchers: VoucherConfig,
    pub remediation: RemediationConfig,
    pub alerts: Option<AlertsConfig>,
    pub withdrawals: WithdrawConfig,
    pub messages: MessagesConfig,
    pub admin_http: AdminHttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("./logs"),
            log_level: "info".to_string(),
            network: NetworkConfig::default(),
            database: DatabaseConfig::default(),
            channel_id: String::new(),
            service_account_name: "Utopia".to_string(),
            moderators: Vec::new(),
            accrual: AccrualConfig::default(),
            health: HealthConfig::default(),
            reconnect: ReconnectConfig::default(),
            dispatch: DispatchConfig::default(),
            vouchers: VoucherConfig::default(),
            remediation: RemediationConfig::default(),
            alerts: None,
            withdrawals: WithdrawConfig::default(),
            messages: MessagesConfig::default(),
            admin_http: AdminHttpConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Reads and parses one JSON file on top of the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    // CLI/env values override the file for Some values
    fn merge(self, cli: &CliArgs) -> ServiceConfig {
        let mut merged = self;
        if let Some(dir) = &cli.log_dir {
            merged.log_dir = dir.clone();
        }
        if let Some(level) = &cli.log_level {
            merged.log_level = level.clone();
        }
        if let Some(url) = &cli.database_url {
            merged.database.url = url.clone();
        }
        if let Some(bind) = &cli.admin_bind {
            merged.admin_http.bind = bind.clone();
        }
        if cli.no_auto_restart {
            merged.remediation.disabled = true;
        }
        merged
    }

    /// Rejects configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.network.token.trim().is_empty() {
            return invalid("network.token is required");
        }
        if self.database.url.trim().is_empty() {
            return invalid("database.url is required (or DATABASE_URL)");
        }
        if self.channel_id.trim().is_empty() {
            return invalid("channelId is required");
        }
        if self.accrual.interval_minutes == 0 || self.health.interval_minutes == 0 {
            return invalid("cron intervals must be at least one minute");
        }
        if self.reconnect.attempts_per_cycle == 0 {
            return invalid("reconnect.attemptsPerCycle must be positive");
        }
        if self.dispatch.sends_per_window == 0 || self.dispatch.window_ms == 0 {
            return invalid("dispatch rate must allow at least one send per non-empty window");
        }
        if self.vouchers.cooldown_minutes > MAX_COOLDOWN_MINUTES {
            return Err(ConfigError::Invalid(format!(
                "vouchers.cooldownMinutes must not exceed {MAX_COOLDOWN_MINUTES}"
            )));
        }
        if !(self.vouchers.max_amount > 0.0) {
            return invalid("vouchers.maxAmount must be positive");
        }
        if self.accrual.use_intervals {
            if self.accrual.intervals.is_empty() {
                return invalid("accrual.useIntervals is set but no intervals are configured");
            }
            if let Some(bad) = self.accrual.intervals.iter().find(|t| t.from > t.to) {
                return Err(ConfigError::Invalid(format!(
                    "accrual interval {}..{} is reversed",
                    bad.from, bad.to
                )));
            }
        } else if !(self.accrual.points_per_day >= 0.0) {
            return invalid("accrual.pointsPerDay must not be negative");
        }
        if self.withdrawals.notify_period_secs == 0 {
            return invalid("withdrawals.notifyPeriodSecs must be positive");
        }
        Ok(())
    }
}

impl fmt::Display for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ServiceConfig
    Network: {}://{}:{} (ws {})
    Channel: {}
    Moderators: {}
    Accrual: every {} min, {}
    Health: every {} min, strict {}
    Dispatch: exclusive {}, {} per {} ms
    Auto restart: {}
    Admin HTTP: {}
",
            self.network.scheme,
            self.network.host,
            self.network.port,
            self.network.ws_port,
            self.channel_id,
            self.moderators.len(),
            self.accrual.interval_minutes,
            if self.accrual.use_intervals { "tiered" } else { "flat" },
            self.health.interval_minutes,
            self.health.strict_mode,
            self.dispatch.exclusive,
            self.dispatch.sends_per_window,
            self.dispatch.window_ms,
            !self.remediation.disabled,
            self.admin_http.bind,
        )
    }
}

/// Defaults, then the JSON file, then CLI/env overrides, then validation.
///
/// A missing or unreadable file is an error: the service has no usable
/// defaults for credentials.
pub fn load_config(cli: &CliArgs) -> Result<ServiceConfig, ConfigError> {
    let path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    let config = ServiceConfig::from_file(&path)?.merge(cli);
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    const MINIMAL: &str = r#"{
        "network": { "token": "ABC" },
        "database": { "url": "postgres://bot:pw@localhost/bot" },
        "channelId": "C0FFEE"
    }"#;

    #[test]
    fn test_minimal_file_gets_defaults() {
        let file = write_config(MINIMAL);
        let cli = CliArgs {
            config_path: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let config = load_config(&cli).unwrap();
        assert_eq!(config.network.token, "ABC");
        assert_eq!(config.reconnect.attempts_per_cycle, 5);
        assert_eq!(config.reconnect.attempt_delay_secs, 12);
        assert_eq!(config.reconnect.escalation_wait_secs, 40);
        assert_eq!(config.health.interval_minutes, 10);
        assert_eq!(config.vouchers.cooldown_minutes, 10);
        assert_eq!(config.vouchers.max_amount, 1000.0);
        assert_eq!(config.service_account_name, "Utopia");
    }

    #[test]
    fn test_cli_overrides_file() {
        let file = write_config(MINIMAL);
        let cli = CliArgs {
            config_path: Some(file.path().to_path_buf()),
            database_url: Some("postgres://override/db".to_string()),
            log_level: Some("debug".to_string()),
            no_auto_restart: true,
            ..Default::default()
        };
        let config = load_config(&cli).unwrap();
        assert_eq!(config.database.url, "postgres://override/db");
        assert_eq!(config.log_level, "debug");
        assert!(config.remediation.disabled);
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let cli = CliArgs {
            config_path: Some(PathBuf::from("/definitely/not/here.json")),
            ..Default::default()
        };
        assert!(matches!(load_config(&cli), Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_parse_error_reported() {
        let file = write_config("{ not json");
        let cli = CliArgs {
            config_path: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        assert!(matches!(load_config(&cli), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_tiered_without_intervals_rejected() {
        let file = write_config(
            r#"{
                "network": { "token": "ABC" },
                "database": { "url": "postgres://x" },
                "channelId": "C0FFEE",
                "accrual": { "useIntervals": true }
            }"#,
        );
        let cli = CliArgs {
            config_path: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        assert!(matches!(load_config(&cli), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_absurd_cooldown_rejected() {
        let file = write_config(MINIMAL);
        let cli = CliArgs {
            config_path: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let mut config = load_config(&cli).unwrap();
        config.vouchers.cooldown_minutes = u64::MAX;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        config.vouchers.cooldown_minutes = 7 * 24 * 60;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_policy_selection() {
        let mut accrual = AccrualConfig::default();
        assert!(matches!(accrual.policy(), AwardPolicy::Flat { .. }));
        accrual.use_intervals = true;
        accrual.intervals = vec![Tier { from: 0, to: 10, value: 1.0 }];
        assert!(matches!(accrual.policy(), AwardPolicy::Tiered(ref t) if t.len() == 1));
        assert_eq!(accrual.interval(), Duration::from_secs(300));
    }
}
