//! Kernel netdev configuration backends.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, instrument};

use sonic_cfgmgr_common::{shell, CfgMgrError, CfgMgrResult};

/// Applies link settings to the kernel netdev of a port.
#[async_trait]
pub trait KernelLink: Send + Sync {
    async fn set_mtu(&self, alias: &str, mtu: &str) -> CfgMgrResult<()>;

    async fn set_admin_status(&self, alias: &str, up: bool) -> CfgMgrResult<()>;
}

/// Configures netdevs with `ip link set`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpLink;

#[async_trait]
impl KernelLink for IpLink {
    #[instrument(skip(self), fields(port = %alias, mtu = %mtu))]
    async fn set_mtu(&self, alias: &str, mtu: &str) -> CfgMgrResult<()> {
        let cmd = format!(
            "{} link set dev {} mtu {}",
            shell::IP_CMD,
            shell::shellquote(alias),
            shell::shellquote(mtu)
        );
        shell::exec_or_throw(&cmd).await?;
        info!("Set MTU for {} to {}", alias, mtu);
        Ok(())
    }

    #[instrument(skip(self), fields(port = %alias, up = %up))]
    async fn set_admin_status(&self, alias: &str, up: bool) -> CfgMgrResult<()> {
        let status = if up { "up" } else { "down" };
        let cmd = format!(
            "{} link set dev {} {}",
            shell::IP_CMD,
            shell::shellquote(alias),
            status
        );
        shell::exec_or_throw(&cmd).await?;
        info!("Set admin status for {} to {}", alias, status);
        Ok(())
    }
}

/// A link setting applied through [`RecordingLink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelCommand {
    Mtu { port: String, mtu: String },
    AdminStatus { port: String, up: bool },
}

#[derive(Debug, Default)]
struct Recorded {
    commands: Vec<KernelCommand>,
    missing: Vec<String>,
}

/// In-memory netdev backend for simulated switches and tests.
///
/// Ports marked missing fail like `ip link` does for an unknown device.
#[derive(Debug, Default)]
pub struct RecordingLink {
    inner: Mutex<Recorded>,
}

impl RecordingLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every command for `alias` fail until [`RecordingLink::restore`].
    pub async fn mark_missing(&self, alias: &str) {
        self.inner.lock().await.missing.push(alias.to_string());
    }

    pub async fn restore(&self, alias: &str) {
        self.inner.lock().await.missing.retain(|p| p != alias);
    }

    /// Settings applied so far, oldest first.
    pub async fn commands(&self) -> Vec<KernelCommand> {
        self.inner.lock().await.commands.clone()
    }

    /// Settings applied to `alias`, oldest first.
    pub async fn commands_for(&self, alias: &str) -> Vec<KernelCommand> {
        self.commands()
            .await
            .into_iter()
            .filter(|c| match c {
                KernelCommand::Mtu { port, .. } | KernelCommand::AdminStatus { port, .. } => {
                    port == alias
                }
            })
            .collect()
    }

    async fn record(&self, alias: &str, command: KernelCommand) -> CfgMgrResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.missing.iter().any(|p| p == alias) {
            return Err(CfgMgrError::ShellCommandFailed {
                command: format!("{} link set dev {}", shell::IP_CMD, shell::shellquote(alias)),
                exit_code: 1,
                output: format!("Cannot find device \"{}\"", alias),
            });
        }
        inner.commands.push(command);
        Ok(())
    }
}

#[async_trait]
impl KernelLink for RecordingLink {
    async fn set_mtu(&self, alias: &str, mtu: &str) -> CfgMgrResult<()> {
        self.record(
            alias,
            KernelCommand::Mtu {
                port: alias.to_string(),
                mtu: mtu.to_string(),
            },
        )
        .await
    }

    async fn set_admin_status(&self, alias: &str, up: bool) -> CfgMgrResult<()> {
        self.record(
            alias,
            KernelCommand::AdminStatus {
                port: alias.to_string(),
                up,
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_recording_link_records_in_order() {
        let link = RecordingLink::new();
        link.set_mtu("Ethernet0", "9100").await.unwrap();
        link.set_admin_status("Ethernet0", false).await.unwrap();
        link.set_mtu("Ethernet4", "1500").await.unwrap();

        assert_eq!(
            link.commands_for("Ethernet0").await,
            vec![
                KernelCommand::Mtu {
                    port: "Ethernet0".to_string(),
                    mtu: "9100".to_string()
                },
                KernelCommand::AdminStatus {
                    port: "Ethernet0".to_string(),
                    up: false
                },
            ]
        );
        assert_eq!(link.commands().await.len(), 3);
    }

    #[tokio::test]
    async fn test_missing_device_fails() {
        let link = RecordingLink::new();
        link.mark_missing("Ethernet0").await;

        let err = link.set_mtu("Ethernet0", "9100").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(link.commands().await.is_empty());

        link.restore("Ethernet0").await;
        link.set_mtu("Ethernet0", "9100").await.unwrap();
        assert_eq!(link.commands().await.len(), 1);
    }
}
