use async_trait::async_trait;
use tokio::process::Command;

use super::{RemediationError, RestartEscalation, ServiceUnit};
use crate::configs::RemediationConfig;

/// Restarts units through `systemctl`. When disabled, every restart is a
/// logged no-op that reports success.
pub struct SystemctlRestart {
    config: RemediationConfig,
}

impl SystemctlRestart {
    pub fn new(config: RemediationConfig) -> Self {
        Self { config }
    }

    fn unit_name(&self, unit: ServiceUnit) -> &str {
        match unit {
            ServiceUnit::Network => &self.config.network_unit,
            ServiceUnit::Bot => &self.config.service_unit,
        }
    }
}

#[async_trait]
impl RestartEscalation for SystemctlRestart {
    async fn restart(&self, unit: ServiceUnit) -> Result<(), RemediationError> {
        let name = self.unit_name(unit).to_string();
        if self.config.disabled {
            tracing::warn!(unit = %name, "auto restart disabled, skipping restart");
            return Ok(());
        }

        tracing::warn!(unit = %name, "restarting service");
        let output = Command::new(&self.config.systemctl_path)
            .arg("restart")
            .arg(&name)
            .output()
            .await
            .map_err(|source| RemediationError::Spawn {
                unit: name.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(RemediationError::ExitStatus {
                unit: name,
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        tracing::info!(unit = %name, "service restarted");
        Ok(())
    }
}
