use crate::{HalError, HalResult, LoopOps, MountOps};
use std::path::{Path, PathBuf};

/// RAII guard that unmounts a target path when dropped.
///
/// The unmount is always attempted; a target that turns out not to be mounted
/// counts as released.
#[derive(Debug)]
pub struct MountGuard<'a, H: MountOps + ?Sized> {
    hal: &'a H,
    target: PathBuf,
    active: bool,
}

impl<'a, H: MountOps + ?Sized> MountGuard<'a, H> {
    pub fn new(hal: &'a H, target: impl Into<PathBuf>) -> Self {
        Self {
            hal,
            target: target.into(),
            active: true,
        }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Unmount now and report the outcome instead of only logging it.
    pub fn unmount(mut self) -> HalResult<()> {
        self.active = false;
        unmount_target(self.hal, &self.target)
    }
}

fn unmount_target<H: MountOps + ?Sized>(hal: &H, target: &Path) -> HalResult<()> {
    match hal.unmount(target) {
        Ok(()) => {
            log::debug!("unmounted {}", target.display());
            Ok(())
        }
        Err(HalError::NotMounted(_)) => {
            log::debug!("{} already unmounted", target.display());
            Ok(())
        }
        Err(err) => Err(err),
    }
}

impl<'a, H: MountOps + ?Sized> Drop for MountGuard<'a, H> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        if let Err(err) = unmount_target(self.hal, &self.target) {
            log::warn!(
                "mount guard failed to unmount {}: {}",
                self.target.display(),
                err
            );
        }
    }
}

/// RAII guard that detaches a loop device when dropped.
#[derive(Debug)]
pub struct LoopGuard<'a, H: LoopOps + ?Sized> {
    hal: &'a H,
    loop_device: String,
}

impl<'a, H: LoopOps + ?Sized> LoopGuard<'a, H> {
    pub fn new(hal: &'a H, loop_device: impl Into<String>) -> Self {
        Self {
            hal,
            loop_device: loop_device.into(),
        }
    }

    pub fn device(&self) -> &str {
        &self.loop_device
    }
}

impl<'a, H: LoopOps + ?Sized> Drop for LoopGuard<'a, H> {
    fn drop(&mut self) {
        match self.hal.losetup_detach(&self.loop_device) {
            Ok(()) => log::debug!("detached {}", self.loop_device),
            Err(err) => {
                log::warn!("loop guard failed to detach {}: {}", self.loop_device, err)
            }
        }
    }
}
