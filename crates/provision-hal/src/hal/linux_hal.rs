//! Linux HAL implementation using real system calls.

use super::{
    LoopOps, MountOps, PermissionOps, ProbeOps, ProcessOps, SystemOps,
};
use crate::lsblk::{parse_lsblk_partitions, LSBLK_COLUMNS};
use crate::procfs::mountinfo;
use crate::{BlockPartition, HalError, HalResult};
use std::fs;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

/// Real HAL implementation for Linux systems.
#[derive(Debug, Clone, Default)]
pub struct LinuxHal;

impl LinuxHal {
    pub fn new() -> Self {
        Self
    }
}

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const SYNC_TIMEOUT: Duration = Duration::from_secs(60);
const LOSETUP_TIMEOUT: Duration = Duration::from_secs(30);

const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";

fn map_command_err(program: &str, err: std::io::Error) -> HalError {
    if err.kind() == std::io::ErrorKind::NotFound {
        return HalError::CommandNotFound(program.to_string());
    }
    HalError::Io(err)
}

fn output_failed(program: &str, output: &Output) -> HalError {
    HalError::CommandFailed {
        program: program.to_string(),
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

fn output_with_timeout(program: &str, cmd: &mut Command, timeout: Duration) -> HalResult<Output> {
    log::debug!("exec: {:?}", cmd);
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(|e| map_command_err(program, e))?;

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();

    // Drain pipes concurrently to avoid deadlocks on large output.
    let stdout_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut out) = stdout.take() {
            let _ = out.read_to_end(&mut buf);
        }
        buf
    });
    let stderr_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut err) = stderr.take() {
            let _ = err.read_to_end(&mut buf);
        }
        buf
    });

    let status = match child.wait_timeout(timeout).map_err(HalError::Io)? {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            let _ = stdout_handle.join();
            let _ = stderr_handle.join();
            return Err(HalError::CommandTimeout {
                program: program.to_string(),
                timeout_secs: timeout.as_secs(),
            });
        }
    };

    let stdout = stdout_handle.join().unwrap_or_default();
    let stderr = stderr_handle.join().unwrap_or_default();
    Ok(Output {
        status,
        stdout,
        stderr,
    })
}

fn status_with_timeout(program: &str, cmd: &mut Command, timeout: Duration) -> HalResult<()> {
    let output = output_with_timeout(program, cmd, timeout)?;
    if !output.status.success() {
        return Err(output_failed(program, &output));
    }
    Ok(())
}

fn map_nix_err(err: nix::errno::Errno) -> HalError {
    use nix::errno::Errno;
    match err {
        Errno::EBUSY => HalError::DeviceBusy,
        Errno::EACCES | Errno::EPERM => HalError::PermissionDenied,
        other => HalError::Nix(other),
    }
}

fn read_mountinfo() -> HalResult<Vec<mountinfo::MountInfo>> {
    let content = fs::read_to_string(MOUNTINFO_PATH)?;
    Ok(mountinfo::parse_mountinfo(&content))
}

impl MountOps for LinuxHal {
    fn mount_device(&self, device: &Path, target: &Path, fstype: Option<&str>) -> HalResult<()> {
        log::debug!(
            "mount {} -> {} (type: {:?})",
            device.display(),
            target.display(),
            fstype
        );

        let flags = nix::mount::MsFlags::empty();
        nix::mount::mount(Some(device), target, fstype, flags, None::<&str>)
            .map_err(map_nix_err)?;

        Ok(())
    }

    fn unmount(&self, target: &Path) -> HalResult<()> {
        log::debug!("umount {}", target.display());
        // umount2 without flags only reports EINVAL for a path that is not a mount point.
        nix::mount::umount2(target, nix::mount::MntFlags::empty()).map_err(|err| match err {
            nix::errno::Errno::EINVAL | nix::errno::Errno::ENOENT => {
                HalError::NotMounted(target.to_path_buf())
            }
            other => map_nix_err(other),
        })
    }

    fn is_mounted(&self, path: &Path) -> HalResult<bool> {
        let entries = read_mountinfo()?;
        Ok(mountinfo::is_mounted_from_info(path, &entries))
    }

    fn mounts_from_device(&self, device: &Path) -> HalResult<Vec<String>> {
        let entries = read_mountinfo()?;
        Ok(mountinfo::mounted_under_device(&entries, device))
    }
}

impl SystemOps for LinuxHal {
    fn sync(&self) -> HalResult<()> {
        // Avoid linking libc directly; keep behavior aligned with existing shell usage.
        let mut cmd = Command::new("sync");
        status_with_timeout("sync", &mut cmd, SYNC_TIMEOUT)
    }

    fn udev_settle(&self) -> HalResult<()> {
        let mut cmd = Command::new("udevadm");
        cmd.arg("settle");
        status_with_timeout("udevadm", &mut cmd, SYNC_TIMEOUT)
    }
}

impl ProbeOps for LinuxHal {
    fn list_partitions(&self, disk: &Path) -> HalResult<Vec<BlockPartition>> {
        let mut cmd = Command::new("lsblk");
        cmd.args(["--json", "-o", LSBLK_COLUMNS]).arg(disk);
        let output = output_with_timeout("lsblk", &mut cmd, PROBE_TIMEOUT)?;

        if !output.status.success() {
            return Err(output_failed("lsblk", &output));
        }

        parse_lsblk_partitions(&String::from_utf8_lossy(&output.stdout))
    }
}

impl LoopOps for LinuxHal {
    fn losetup_attach(&self, image: &Path, scan_partitions: bool) -> HalResult<String> {
        let mut args = vec!["--show".to_string(), "-f".to_string()];
        if scan_partitions {
            args.push("-P".to_string());
        }
        args.push(image.display().to_string());

        let mut cmd = Command::new("losetup");
        cmd.args(&args);
        let output = output_with_timeout("losetup", &mut cmd, LOSETUP_TIMEOUT)?;

        if !output.status.success() {
            return Err(output_failed("losetup", &output));
        }

        let device = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if device.is_empty() {
            return Err(HalError::Parse(format!(
                "losetup printed no device for {}",
                image.display()
            )));
        }
        Ok(device)
    }

    fn losetup_detach(&self, loop_device: &str) -> HalResult<()> {
        let mut cmd = Command::new("losetup");
        cmd.args(["-d", loop_device]);
        status_with_timeout("losetup", &mut cmd, LOSETUP_TIMEOUT)
    }
}

impl PermissionOps for LinuxHal {
    fn set_group(&self, path: &Path, gid: u32) -> HalResult<()> {
        let gid = nix::unistd::Gid::from_raw(gid);
        nix::unistd::chown(path, None, Some(gid)).map_err(map_nix_err)
    }

    fn add_mode_bits(&self, path: &Path, bits: u32) -> HalResult<()> {
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(perms.mode() | bits);
        fs::set_permissions(path, perms)?;
        Ok(())
    }
}

impl ProcessOps for LinuxHal {
    fn command_output(&self, program: &str, args: &[&str], timeout: Duration) -> HalResult<Output> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        output_with_timeout(program, &mut cmd, timeout)
    }

    fn command_status(&self, program: &str, args: &[&str], timeout: Duration) -> HalResult<()> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        status_with_timeout(program, &mut cmd, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;
    use tempfile::tempdir;

    #[test]
    fn add_mode_bits_keeps_existing_bits() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("config.toml");
        fs::write(&file, b"hostname = \"dev\"\n").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o600)).unwrap();

        LinuxHal::new().add_mode_bits(&file, 0o464).unwrap();

        let mode = fs::metadata(&file).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o664);
    }

    #[test]
    fn set_group_to_own_gid_succeeds() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("config.toml");
        fs::write(&file, b"").unwrap();
        let gid = nix::unistd::getegid().as_raw();

        LinuxHal::new().set_group(&file, gid).unwrap();

        assert_eq!(fs::metadata(&file).unwrap().gid(), gid);
    }

    #[test]
    fn missing_program_maps_to_command_not_found() {
        let err = LinuxHal::new()
            .command_status("definitely-not-a-real-binary", &[], PROBE_TIMEOUT)
            .unwrap_err();
        assert!(matches!(err, HalError::CommandNotFound(p) if p == "definitely-not-a-real-binary"));
    }

    #[test]
    fn failing_command_reports_exit_code() {
        let err = LinuxHal::new()
            .command_status("sh", &["-c", "echo boom >&2; exit 3"], PROBE_TIMEOUT)
            .unwrap_err();
        assert_eq!(err.command_exit_code(), Some(3));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn tempdir_is_not_a_mount_point() {
        let dir = tempdir().unwrap();
        assert!(!LinuxHal::new().is_mounted(dir.path()).unwrap());
    }

    #[test]
    fn unmounting_a_plain_directory_is_not_mounted() {
        if !nix::unistd::geteuid().is_root() {
            return;
        }
        let dir = tempdir().unwrap();
        let err = LinuxHal::new().unmount(dir.path()).unwrap_err();
        assert!(matches!(err, HalError::NotMounted(p) if p == dir.path()));
    }
}
