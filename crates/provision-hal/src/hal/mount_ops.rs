//! Mount operations trait.

use crate::HalResult;
use std::path::Path;

/// Trait for mounting and unmounting filesystems.
pub trait MountOps {
    /// Mount a device to a target path.
    ///
    /// # Arguments
    /// * `device` - Device path (e.g., `/dev/loop0p2`)
    /// * `target` - Mount point path
    /// * `fstype` - Optional filesystem type (e.g., `"ext4"`, `"vfat"`)
    fn mount_device(&self, device: &Path, target: &Path, fstype: Option<&str>) -> HalResult<()>;

    /// Unmount a filesystem. Fails with [`HalError::NotMounted`](crate::HalError::NotMounted)
    /// when nothing is mounted at `target`.
    fn unmount(&self, target: &Path) -> HalResult<()>;

    /// Check if a path is currently mounted.
    fn is_mounted(&self, path: &Path) -> HalResult<bool>;

    /// Mount points whose source lives on the given device (e.g. every `/dev/loop0pN`).
    fn mounts_from_device(&self, device: &Path) -> HalResult<Vec<String>>;
}
