//! Ownership and permission changes on files inside mounted images.

use crate::HalResult;
use std::path::Path;

pub trait PermissionOps {
    /// Change the group of `path` to `gid`, leaving the owner untouched (`chgrp`).
    fn set_group(&self, path: &Path, gid: u32) -> HalResult<()>;

    /// OR `bits` into the permission bits of `path` (`chmod` with `+` modes).
    fn add_mode_bits(&self, path: &Path, bits: u32) -> HalResult<()>;
}
