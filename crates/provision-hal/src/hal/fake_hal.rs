//! Fake HAL implementation for testing.
//!
//! This implementation records all operations without executing them,
//! allowing for CI-safe testing without root privileges or real hardware.
//!
//! Partitions can be backed by plain directories: mounting copies the backing
//! directory into the mount point, unmounting writes the mount point back and
//! empties it. That is enough to observe what a run wrote into an "image".

use super::{LoopOps, MountOps, PermissionOps, ProbeOps, ProcessOps, SystemOps};
use crate::{BlockPartition, HalError, HalResult};
use std::collections::{HashMap, HashSet};
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use walkdir::WalkDir;

/// Operation records for testing and verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Mount {
        device: PathBuf,
        target: PathBuf,
        fstype: Option<String>,
    },
    Unmount {
        target: PathBuf,
    },
    Sync,
    UdevSettle,
    LosetupAttach {
        image: PathBuf,
        scan_partitions: bool,
        loop_device: String,
    },
    LosetupDetach {
        loop_device: String,
    },
    ListPartitions {
        disk: PathBuf,
    },
    SetGroup {
        path: PathBuf,
        gid: u32,
    },
    AddModeBits {
        path: PathBuf,
        bits: u32,
    },
    Command {
        program: String,
        args: Vec<String>,
        timeout_secs: u64,
    },
}

/// Shared state for FakeHal operations.
#[derive(Debug, Clone, Default)]
struct FakeHalState {
    /// All operations that were recorded
    operations: Vec<Operation>,
    /// Currently mounted paths, with the device mounted there
    mounted: HashMap<PathBuf, PathBuf>,
    /// Partitions reported by `list_partitions`
    partitions: Vec<BlockPartition>,
    /// Directory standing in for each device's filesystem
    backing_dirs: HashMap<PathBuf, PathBuf>,
    /// Programs whose invocations fail (`mount`, `umount`, `losetup`, `lsblk`, ...)
    failing_programs: HashSet<String>,
    /// Devices whose mount fails
    failing_mounts: HashSet<PathBuf>,
}

/// Fake HAL implementation that records operations without executing them.
///
/// This is designed for testing and CI environments where real system
/// operations would fail or be dangerous.
#[derive(Debug, Clone, Default)]
pub struct FakeHal {
    state: Arc<Mutex<FakeHalState>>,
}

impl FakeHal {
    pub const LOOP_DEVICE: &'static str = "/dev/loop0";

    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeHalState::default())),
        }
    }

    /// Report `partition` from `list_partitions`.
    pub fn with_partition(self, partition: BlockPartition) -> Self {
        self.state.lock().unwrap().partitions.push(partition);
        self
    }

    /// Back `device` with the directory `dir` (see module docs).
    pub fn with_backing_dir(self, device: impl Into<PathBuf>, dir: impl Into<PathBuf>) -> Self {
        self.state
            .lock()
            .unwrap()
            .backing_dirs
            .insert(device.into(), dir.into());
        self
    }

    /// Make every operation that stands for `program` fail.
    pub fn fail_command(self, program: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_programs
            .insert(program.to_string());
        self
    }

    /// Make mounting `device` fail the way the `mount(2)` syscall does.
    pub fn fail_mount_of(self, device: impl Into<PathBuf>) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_mounts
            .insert(device.into());
        self
    }

    /// Get all recorded operations.
    pub fn operations(&self) -> Vec<Operation> {
        self.state.lock().unwrap().operations.clone()
    }

    /// Get the number of operations recorded.
    pub fn operation_count(&self) -> usize {
        self.state.lock().unwrap().operations.len()
    }

    /// Check if a specific operation was recorded.
    pub fn has_operation(&self, check: impl Fn(&Operation) -> bool) -> bool {
        self.state.lock().unwrap().operations.iter().any(check)
    }

    /// Paths that are still mounted.
    pub fn mounted_paths(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().mounted.keys().cloned().collect()
    }

    fn record_operation(&self, op: Operation) {
        self.state.lock().unwrap().operations.push(op);
    }

    fn check_program(&self, program: &str) -> HalResult<()> {
        if self
            .state
            .lock()
            .unwrap()
            .failing_programs
            .contains(program)
        {
            return Err(HalError::CommandFailed {
                program: program.to_string(),
                code: Some(32),
                stderr: format!("FAKE HAL: {} failed", program),
            });
        }
        Ok(())
    }

    fn backing_dir(&self, device: &Path) -> Option<PathBuf> {
        self.state
            .lock()
            .unwrap()
            .backing_dirs
            .get(device)
            .cloned()
    }
}

/// Copy every entry below `src` into `dst`, keeping permission bits and symlinks as links.
fn copy_tree(src: &Path, dst: &Path) -> HalResult<()> {
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(|e| HalError::Io(e.into()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| HalError::Other(e.to_string()))?;
        let dest = dst.join(rel);
        let file_type = entry.file_type();
        if file_type.is_symlink() {
            if fs::symlink_metadata(&dest).is_ok() {
                fs::remove_file(&dest)?;
            }
            std::os::unix::fs::symlink(fs::read_link(entry.path())?, &dest)?;
        } else if file_type.is_dir() {
            fs::create_dir_all(&dest)?;
        } else {
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

fn empty_dir(dir: &Path) -> HalResult<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

impl ProcessOps for FakeHal {
    fn command_output(&self, program: &str, args: &[&str], timeout: Duration) -> HalResult<Output> {
        self.record_operation(Operation::Command {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            timeout_secs: timeout.as_secs(),
        });
        self.check_program(program)?;

        #[cfg(unix)]
        let status = std::process::ExitStatus::from_raw(0);
        #[cfg(not(unix))]
        let status = std::process::Command::new("true").status().unwrap();

        Ok(Output {
            status,
            stdout: Vec::new(),
            stderr: Vec::new(),
        })
    }

    fn command_status(&self, program: &str, args: &[&str], timeout: Duration) -> HalResult<()> {
        let _ = self.command_output(program, args, timeout)?;
        Ok(())
    }
}

impl MountOps for FakeHal {
    fn mount_device(&self, device: &Path, target: &Path, fstype: Option<&str>) -> HalResult<()> {
        log::info!(
            "FAKE HAL: mount {} -> {} (type: {:?})",
            device.display(),
            target.display(),
            fstype
        );

        self.record_operation(Operation::Mount {
            device: device.to_path_buf(),
            target: target.to_path_buf(),
            fstype: fstype.map(String::from),
        });
        self.check_program("mount")?;
        if self.state.lock().unwrap().failing_mounts.contains(device) {
            // Same shape as a failing mount(2) in LinuxHal: an errno, no exit status.
            return Err(HalError::Nix(nix::errno::Errno::EIO));
        }

        if let Some(backing) = self.backing_dir(device) {
            copy_tree(&backing, target)?;
        }
        self.state
            .lock()
            .unwrap()
            .mounted
            .insert(target.to_path_buf(), device.to_path_buf());

        Ok(())
    }

    fn unmount(&self, target: &Path) -> HalResult<()> {
        log::info!("FAKE HAL: unmount {}", target.display());

        self.record_operation(Operation::Unmount {
            target: target.to_path_buf(),
        });
        self.check_program("umount")?;

        let device = self
            .state
            .lock()
            .unwrap()
            .mounted
            .remove(target)
            .ok_or_else(|| HalError::NotMounted(target.to_path_buf()))?;
        if let Some(backing) = self.backing_dir(&device) {
            copy_tree(target, &backing)?;
            empty_dir(target)?;
        }

        Ok(())
    }

    fn is_mounted(&self, path: &Path) -> HalResult<bool> {
        let is_mounted = self.state.lock().unwrap().mounted.contains_key(path);
        log::info!("FAKE HAL: is_mounted({}) = {}", path.display(), is_mounted);
        Ok(is_mounted)
    }

    fn mounts_from_device(&self, device: &Path) -> HalResult<Vec<String>> {
        let prefix = device.to_string_lossy().to_string();
        let mut mounts: Vec<String> = self
            .state
            .lock()
            .unwrap()
            .mounted
            .iter()
            .filter(|(_, dev)| dev.to_string_lossy().starts_with(&prefix))
            .map(|(target, _)| target.to_string_lossy().to_string())
            .collect();
        mounts.sort();
        Ok(mounts)
    }
}

impl SystemOps for FakeHal {
    fn sync(&self) -> HalResult<()> {
        self.record_operation(Operation::Sync);
        Ok(())
    }

    fn udev_settle(&self) -> HalResult<()> {
        self.record_operation(Operation::UdevSettle);
        Ok(())
    }
}

impl ProbeOps for FakeHal {
    fn list_partitions(&self, disk: &Path) -> HalResult<Vec<BlockPartition>> {
        self.record_operation(Operation::ListPartitions {
            disk: disk.to_path_buf(),
        });
        self.check_program("lsblk")?;
        Ok(self.state.lock().unwrap().partitions.clone())
    }
}

impl LoopOps for FakeHal {
    fn losetup_attach(&self, image: &Path, scan_partitions: bool) -> HalResult<String> {
        let loop_device = Self::LOOP_DEVICE.to_string();
        self.record_operation(Operation::LosetupAttach {
            image: image.to_path_buf(),
            scan_partitions,
            loop_device: loop_device.clone(),
        });
        self.check_program("losetup")?;
        Ok(loop_device)
    }

    fn losetup_detach(&self, loop_device: &str) -> HalResult<()> {
        self.record_operation(Operation::LosetupDetach {
            loop_device: loop_device.to_string(),
        });
        self.check_program("losetup")
    }
}

impl PermissionOps for FakeHal {
    fn set_group(&self, path: &Path, gid: u32) -> HalResult<()> {
        // Only recorded: chgrp to an arbitrary gid needs privileges the tests do not have.
        self.record_operation(Operation::SetGroup {
            path: path.to_path_buf(),
            gid,
        });
        self.check_program("chgrp")
    }

    fn add_mode_bits(&self, path: &Path, bits: u32) -> HalResult<()> {
        self.record_operation(Operation::AddModeBits {
            path: path.to_path_buf(),
            bits,
        });
        self.check_program("chmod")?;
        #[cfg(unix)]
        {
            let mut perms = fs::metadata(path)?.permissions();
            perms.set_mode(perms.mode() | bits);
            fs::set_permissions(path, perms)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fake_hal_records_mount() {
        let hal = FakeHal::new();
        let device = Path::new("/dev/loop0p2");
        let target = Path::new("/tmp/work/rootA");

        hal.mount_device(device, target, Some("ext4")).unwrap();

        assert_eq!(hal.operation_count(), 1);
        assert!(hal.has_operation(|op| matches!(op, Operation::Mount { .. })));
        assert!(hal.is_mounted(target).unwrap());
        assert_eq!(
            hal.mounts_from_device(Path::new(FakeHal::LOOP_DEVICE))
                .unwrap(),
            vec!["/tmp/work/rootA".to_string()]
        );
    }

    #[test]
    fn fake_hal_records_unmount() {
        let hal = FakeHal::new();
        let target = Path::new("/tmp/work/etc");

        hal.mount_device(Path::new("/dev/loop0p5"), target, Some("ext4"))
            .unwrap();
        hal.unmount(target).unwrap();

        assert_eq!(hal.operation_count(), 2);
        assert!(hal.has_operation(|op| matches!(op, Operation::Unmount { .. })));
        assert!(!hal.is_mounted(target).unwrap());
    }

    #[test]
    fn backing_dir_round_trips_through_mount() {
        let backing = tempdir().unwrap();
        let mount_point = tempdir().unwrap();
        fs::create_dir_all(backing.path().join("etc")).unwrap();
        fs::write(backing.path().join("etc/group"), "aziot:x:990:\n").unwrap();

        let hal = FakeHal::new().with_backing_dir("/dev/loop0p2", backing.path());
        hal.mount_device(Path::new("/dev/loop0p2"), mount_point.path(), Some("ext4"))
            .unwrap();

        assert!(mount_point.path().join("etc/group").exists());
        fs::write(mount_point.path().join("marker"), "written").unwrap();

        hal.unmount(mount_point.path()).unwrap();

        assert_eq!(
            fs::read_to_string(backing.path().join("marker")).unwrap(),
            "written"
        );
        assert_eq!(fs::read_dir(mount_point.path()).unwrap().count(), 0);
    }

    #[test]
    fn failing_mount_is_recorded_but_not_mounted() {
        let hal = FakeHal::new().fail_mount_of("/dev/loop0p6");
        let target = Path::new("/tmp/work/data");

        let err = hal
            .mount_device(Path::new("/dev/loop0p6"), target, None)
            .unwrap_err();

        assert!(matches!(err, HalError::Nix(nix::errno::Errno::EIO)));
        assert_eq!(err.command_exit_code(), None);
        assert!(!hal.is_mounted(target).unwrap());
    }

    #[test]
    fn fake_hal_reports_configured_partitions() {
        let hal = FakeHal::new()
            .with_partition(BlockPartition::new("/dev/loop0p5").with_label("etc"));

        let parts = hal.list_partitions(Path::new(FakeHal::LOOP_DEVICE)).unwrap();

        assert_eq!(parts.len(), 1);
        assert!(parts[0].has_label("etc"));
    }

    #[test]
    fn unmount_of_unmounted_path_is_not_mounted() {
        let hal = FakeHal::new();

        let err = hal.unmount(Path::new("/tmp/work/etc")).unwrap_err();

        assert!(matches!(err, HalError::NotMounted(_)));
        assert_eq!(hal.operation_count(), 1);
    }

    #[test]
    fn backing_dir_keeps_symlinks_as_links() {
        let backing = tempdir().unwrap();
        let mount_point = tempdir().unwrap();
        std::os::unix::fs::symlink("/etc", backing.path().join("upper")).unwrap();

        let hal = FakeHal::new().with_backing_dir("/dev/loop0p5", backing.path());
        hal.mount_device(Path::new("/dev/loop0p5"), mount_point.path(), None)
            .unwrap();

        let link = mount_point.path().join("upper");
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("/etc"));

        hal.unmount(mount_point.path()).unwrap();
        assert!(fs::symlink_metadata(backing.path().join("upper"))
            .unwrap()
            .file_type()
            .is_symlink());
        assert_eq!(fs::read_dir(mount_point.path()).unwrap().count(), 0);
    }
}
