use provision_hal::HalError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error(transparent)]
    Hal(#[from] HalError),

    #[error("{what} not found: {}", path.display())]
    MissingInput { what: &'static str, path: PathBuf },

    #[error("{what} is not a regular file: {}", path.display())]
    NotAFile { what: &'static str, path: PathBuf },

    #[error("no partition labelled '{label}' on {device}")]
    PartitionNotFound { label: &'static str, device: String },

    #[error("{count} partitions labelled '{label}' on {device}")]
    AmbiguousPartition {
        label: &'static str,
        device: String,
        count: usize,
    },

    #[error("group '{group}' not found in {}", path.display())]
    GroupNotFound { group: String, path: PathBuf },

    #[error("invalid gid '{value}' for group '{group}'")]
    InvalidGroupId { group: String, value: String },

    #[error(
        "no provisioning binary found in {}: expected usr/bin/iotedge or usr/bin/aziotctl",
        root.display()
    )]
    NoProvisioningBackend { root: PathBuf },

    #[error("invalid hostname '{0}'")]
    InvalidHostname(String),

    #[error("refusing to write through symlink {} in the image", path.display())]
    SymlinkInImage { path: PathBuf },
}

/// Process exit code for a failed run.
///
/// A failing external command hands its own exit status through; everything else is 1.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| {
            cause
                .downcast_ref::<HalError>()
                .or_else(|| match cause.downcast_ref::<ProvisionError>() {
                    Some(ProvisionError::Hal(hal)) => Some(hal),
                    _ => None,
                })
        })
        .and_then(HalError::command_exit_code)
        .and_then(|code| u8::try_from(code).ok())
        .filter(|code| *code != 0)
        .unwrap_or(1)
}
