//! Provisioning backends: the tool in the image that applies `config.toml` on first boot.

use crate::errors::ProvisionError;
use crate::paths::FIRST_BOOT_SCRIPT;
use anyhow::Context;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningBackend {
    /// Azure IoT Edge runtime.
    IotEdge,
    /// Azure IoT Identity Service without Edge.
    AzIotCtl,
}

impl ProvisioningBackend {
    /// Detection order.
    pub const PRIORITY: [ProvisioningBackend; 2] =
        [ProvisioningBackend::IotEdge, ProvisioningBackend::AzIotCtl];

    /// Binary whose presence in the root partition selects this backend.
    pub fn binary(self) -> &'static str {
        match self {
            ProvisioningBackend::IotEdge => "usr/bin/iotedge",
            ProvisioningBackend::AzIotCtl => "usr/bin/aziotctl",
        }
    }

    /// Line appended to the first-boot script.
    pub fn activation_command(self) -> &'static str {
        match self {
            ProvisioningBackend::IotEdge => "iotedge config apply",
            ProvisioningBackend::AzIotCtl => "aziotctl config apply",
        }
    }

    /// First backend whose binary exists below `root`.
    ///
    /// A dangling symlink still counts: absolute links resolve against the host, not the image.
    pub fn detect(root: &Path) -> Result<Self, ProvisionError> {
        Self::PRIORITY
            .into_iter()
            .find(|backend| fs::symlink_metadata(root.join(backend.binary())).is_ok())
            .ok_or_else(|| ProvisionError::NoProvisioningBackend {
                root: root.to_path_buf(),
            })
    }

    /// Append the activation command to `<root>/usr/bin/ics_dm_first_boot.sh`.
    pub fn arm_first_boot(self, root: &Path) -> anyhow::Result<PathBuf> {
        let script = root.join(FIRST_BOOT_SCRIPT);
        append_line(&script, self.activation_command())
            .with_context(|| format!("append to first-boot script {}", script.display()))?;
        log::info!(
            "first boot will run '{}' ({})",
            self.activation_command(),
            script.display()
        );
        Ok(script)
    }
}

impl fmt::Display for ProvisioningBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisioningBackend::IotEdge => f.write_str("iotedge"),
            ProvisioningBackend::AzIotCtl => f.write_str("aziotctl"),
        }
    }
}

/// Append `line` as a line of its own, creating the file if needed.
fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let needs_separator = match fs::read(path) {
        Ok(existing) => existing.last().is_some_and(|b| *b != b'\n'),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => false,
        Err(err) => return Err(err),
    };

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    if needs_separator {
        file.write_all(b"\n")?;
    }
    writeln!(file, "{}", line)?;
    file.sync_all()
}
