//! Attach a wic image and mount its partitions for the lifetime of an [`ImageSession`].

use crate::errors::ProvisionError;
use anyhow::Context;
use provision_hal::{BlockPartition, LoopGuard, MountGuard, SystemHal};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Partitions a provisioning run works on, in mount order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionRole {
    /// Overlay backing `/etc`; writes go below `upper/`.
    Etc,
    Data,
    RootA,
}

impl PartitionRole {
    pub const ALL: [PartitionRole; 3] = [
        PartitionRole::Etc,
        PartitionRole::Data,
        PartitionRole::RootA,
    ];

    /// Partition (or filesystem) label in the image. Also the mount directory name.
    pub fn label(self) -> &'static str {
        match self {
            PartitionRole::Etc => "etc",
            PartitionRole::Data => "data",
            PartitionRole::RootA => "rootA",
        }
    }
}

impl fmt::Display for PartitionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Pick the single partition carrying `role`'s label.
pub fn find_partition<'p>(
    partitions: &'p [BlockPartition],
    role: PartitionRole,
    device: &str,
) -> Result<&'p BlockPartition, ProvisionError> {
    let matches: Vec<&BlockPartition> = partitions
        .iter()
        .filter(|p| p.has_label(role.label()))
        .collect();
    match matches.as_slice() {
        [one] => Ok(one),
        [] => Err(ProvisionError::PartitionNotFound {
            label: role.label(),
            device: device.to_string(),
        }),
        many => Err(ProvisionError::AmbiguousPartition {
            label: role.label(),
            device: device.to_string(),
            count: many.len(),
        }),
    }
}

/// A loop-attached image with its partitions mounted below a private work directory.
///
/// Dropping the session unmounts in reverse mount order, then detaches the loop
/// device, then removes the work directory. Release failures are logged only,
/// and a failed unmount leaves the work directory on disk.
pub struct ImageSession<'a, H: SystemHal + ?Sized> {
    hal: &'a H,
    mounts: Vec<(PartitionRole, MountGuard<'a, H>)>,
    loop_guard: Option<LoopGuard<'a, H>>,
    root: PathBuf,
    work_dir: Option<TempDir>,
}

impl<'a, H: SystemHal + ?Sized> ImageSession<'a, H> {
    /// Attach `image` and mount every [`PartitionRole`].
    pub fn open(hal: &'a H, image: &Path, work_root: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("wic-provision-");
        let work_dir = match work_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .context("create work directory")?;
        // Mount points must match the kernel's resolved paths.
        let root = fs::canonicalize(work_dir.path())
            .with_context(|| format!("resolve {}", work_dir.path().display()))?;
        log::debug!("work directory: {}", root.display());

        let mut session = Self {
            hal,
            mounts: Vec::with_capacity(PartitionRole::ALL.len()),
            loop_guard: None,
            root,
            work_dir: Some(work_dir),
        };

        let loop_device = hal
            .losetup_attach(image, true)
            .with_context(|| format!("attach {} to a loop device", image.display()))?;
        log::info!("attached {} to {}", image.display(), loop_device);
        session.loop_guard = Some(LoopGuard::new(hal, loop_device.clone()));

        hal.udev_settle().context("wait for partition devices")?;
        let partitions = hal
            .list_partitions(Path::new(&loop_device))
            .with_context(|| format!("list partitions of {}", loop_device))?;
        log::debug!("partitions on {}: {:?}", loop_device, partitions);

        for role in PartitionRole::ALL {
            let partition = find_partition(&partitions, role, &loop_device)?;
            session.mount(role, partition)?;
        }

        Ok(session)
    }

    fn mount(&mut self, role: PartitionRole, partition: &BlockPartition) -> anyhow::Result<()> {
        let target = self.path(role);
        fs::create_dir(&target)
            .with_context(|| format!("create mount point {}", target.display()))?;

        self.hal
            .mount_device(
                &partition.path,
                &target,
                partition.fstype.as_deref(),
            )
            .with_context(|| {
                format!(
                    "mount {} partition {} at {}",
                    role,
                    partition.path.display(),
                    target.display()
                )
            })?;
        log::info!("mounted {} ({})", role, partition.path.display());

        self.mounts.push((role, MountGuard::new(self.hal, target)));
        Ok(())
    }

    /// Mount point of `role`.
    pub fn path(&self, role: PartitionRole) -> PathBuf {
        self.root.join(role.label())
    }

    /// Canonical path of the per-run work directory.
    pub fn work_dir(&self) -> &Path {
        &self.root
    }

    /// Flush and release everything. Same as dropping, with a sync first.
    pub fn close(self) {
        if let Err(err) = self.hal.sync() {
            log::warn!("sync before unmount failed: {}", err);
        }
    }
}

impl<'a, H: SystemHal + ?Sized> Drop for ImageSession<'a, H> {
    fn drop(&mut self) {
        let mut unmount_failed = false;
        while let Some((role, guard)) = self.mounts.pop() {
            let target = guard.target().to_path_buf();
            log::debug!("releasing {} at {}", role, target.display());
            if let Err(err) = guard.unmount() {
                log::warn!("failed to unmount {} at {}: {}", role, target.display(), err);
                unmount_failed = true;
            }
        }

        if let Some(guard) = self.loop_guard.take() {
            match self.hal.mounts_from_device(Path::new(guard.device())) {
                Ok(left) if !left.is_empty() => log::warn!(
                    "{} still has mounts before detach: {}",
                    guard.device(),
                    left.join(", ")
                ),
                Ok(_) => {}
                Err(err) => log::debug!("could not read mount table: {}", err),
            }
            drop(guard);
        }

        // Removing the work directory recursively must never reach into a live mount.
        if unmount_failed {
            if let Some(dir) = self.work_dir.take() {
                let kept = dir.keep();
                log::warn!(
                    "leaving {} in place, a partition may still be mounted below it",
                    kept.display()
                );
            }
        }
    }
}
