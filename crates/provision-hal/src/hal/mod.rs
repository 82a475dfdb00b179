//! HAL trait definitions and implementations.
//!
//! This module defines the core traits for system operations and provides
//! both real (LinuxHal) and fake (FakeHal) implementations.

pub mod fake_hal;
pub mod guards;
pub mod linux_hal;
pub mod loop_ops;
pub mod mount_ops;
pub mod permission_ops;
pub mod probe_ops;
pub mod process_ops;
pub mod system_ops;

pub use fake_hal::{FakeHal, Operation};
pub use guards::{LoopGuard, MountGuard};
pub use linux_hal::LinuxHal;
pub use loop_ops::LoopOps;
pub use mount_ops::MountOps;
pub use permission_ops::PermissionOps;
pub use probe_ops::ProbeOps;
pub use process_ops::ProcessOps;
pub use system_ops::SystemOps;

/// Complete HAL combining all system operation traits.
pub trait SystemHal:
    LoopOps + MountOps + ProbeOps + PermissionOps + ProcessOps + SystemOps + Send + Sync
{
}

/// Automatically implement SystemHal for any type implementing all required traits.
impl<T> SystemHal for T where
    T: LoopOps + MountOps + ProbeOps + PermissionOps + ProcessOps + SystemOps + Send + Sync
{
}
