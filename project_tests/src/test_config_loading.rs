//! # Configuration Loading Tests
//!
//! Full JSON documents through `load_config`, including the tiered award
//! table and CLI overrides, then into a wired context.

mod support;

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use lib_rewards::configs::{CliArgs, ConfigError, load_config};
use lib_rewards::core::{AwardPolicy, DispatchMode, Tier};

const FULL: &str = r#"{
    "logLevel": "debug",
    "network": { "host": "10.0.0.5", "port": 20000, "wsPort": 20001, "token": "T0KEN" },
    "database": { "url": "postgres://file/db", "maxConnections": 4 },
    "channelId": "CHAN",
    "moderators": ["D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0D0"],
    "accrual": {
        "intervalMinutes": 60,
        "useIntervals": true,
        "intervals": [
            { "from": 0, "to": 10, "value": 1.0 },
            { "from": 11, "to": 50, "value": 2.0 }
        ]
    },
    "dispatch": { "exclusive": false, "sendsPerWindow": 3, "windowMs": 1500 },
    "vouchers": { "prefix": "GAME-", "maxAmount": 250 },
    "alerts": {
        "primary": { "host": "http://alerts-a/hook", "name": "a" },
        "failover": { "host": "http://alerts-b/hook", "name": "b" }
    }
}"#;

fn write_config(body: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(body.as_bytes()).unwrap();
    file
}

fn cli_for(path: PathBuf) -> CliArgs {
    CliArgs {
        config_path: Some(path),
        ..Default::default()
    }
}

#[test]
fn test_full_document() {
    let file = write_config(FULL);
    let config = load_config(&cli_for(file.path().to_path_buf())).unwrap();

    assert_eq!(config.log_level, "debug");
    assert_eq!(config.network.host, "10.0.0.5");
    assert_eq!(config.network.ws_port, 20001);
    assert_eq!(config.database.max_connections, 4);
    assert_eq!(config.accrual.interval(), Duration::from_secs(3600));
    assert_eq!(
        config.accrual.policy(),
        AwardPolicy::Tiered(vec![
            Tier { from: 0, to: 10, value: 1.0 },
            Tier { from: 11, to: 50, value: 2.0 },
        ])
    );
    assert_eq!(config.alerts.unwrap().failover.name, "b");
    // Untouched sections keep their defaults.
    assert_eq!(config.vouchers.cooldown_minutes, 10);
    assert_eq!(config.service_account_name, "Utopia");
}

#[test]
fn test_cli_overrides_file() {
    let file = write_config(FULL);
    let cli = CliArgs {
        config_path: Some(file.path().to_path_buf()),
        log_level: Some("warn".to_string()),
        database_url: Some("postgres://cli/db".to_string()),
        admin_bind: Some("0.0.0.0:9000".to_string()),
        no_auto_restart: true,
        ..Default::default()
    };
    let config = load_config(&cli).unwrap();
    assert_eq!(config.log_level, "warn");
    assert_eq!(config.database.url, "postgres://cli/db");
    assert_eq!(config.admin_http.bind, "0.0.0.0:9000");
    assert!(config.remediation.disabled);
}

#[test]
fn test_missing_file_is_fatal() {
    let err = load_config(&cli_for(PathBuf::from("/nonexistent/rewards.json"))).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[test]
fn test_malformed_file_is_fatal() {
    let file = write_config("{ \"network\": ");
    let err = load_config(&cli_for(file.path().to_path_buf())).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
}

#[test]
fn test_reversed_tier_is_rejected() {
    let body = FULL.replace(r#"{ "from": 11, "to": 50, "value": 2.0 }"#, r#"{ "from": 50, "to": 11, "value": 2.0 }"#);
    let file = write_config(&body);
    let err = load_config(&cli_for(file.path().to_path_buf())).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[tokio::test]
async fn test_loaded_config_wires_context() {
    let file = write_config(FULL);
    let config = load_config(&cli_for(file.path().to_path_buf())).unwrap();
    let f = support::fixture_with(config);

    assert_eq!(f.context.gate.mode(), DispatchMode::Concurrent);
    assert_eq!(f.context.vouchers.code_length(), 22);
    assert!(f.context.vouchers.issue(251.0).await.is_err());
    assert!(f.context.vouchers.issue(250.0).await.is_ok());
}
