//! Hardware abstraction layer for wic image provisioning.
//!
//! Everything that touches the host (loop devices, mounts, block device probes,
//! ownership changes, external commands) goes through the traits in [`hal`] so the
//! provisioning pipeline can run against [`FakeHal`] in tests.

pub mod error;
pub mod hal;
pub mod lsblk;
pub mod procfs;

pub use error::{HalError, HalResult};
pub use hal::*;
pub use lsblk::BlockPartition;
