//! Copy the identity config into the `etc` overlay.

use crate::paths::{IDENTITY_CONFIG_DEST, IDENTITY_CONFIG_MODE_BITS};
use anyhow::Context;
use provision_hal::PermissionOps;
use std::fs;
use std::path::{Path, PathBuf};

/// Copy `config` to `<etc_root>/upper/aziot/config.toml`, hand it to `gid` and add `a+r,g+w`.
///
/// The copy is byte-for-byte and keeps the source's permission bits, like `cp`.
pub fn inject_identity_config<H: PermissionOps + ?Sized>(
    hal: &H,
    config: &Path,
    etc_root: &Path,
    gid: u32,
) -> anyhow::Result<PathBuf> {
    let dest = etc_root.join(IDENTITY_CONFIG_DEST);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }

    fs::copy(config, &dest)
        .with_context(|| format!("copy {} to {}", config.display(), dest.display()))?;
    hal.set_group(&dest, gid)
        .with_context(|| format!("chgrp {} {}", gid, dest.display()))?;
    hal.add_mode_bits(&dest, IDENTITY_CONFIG_MODE_BITS)
        .with_context(|| format!("chmod a+r,g+w {}", dest.display()))?;

    log::info!("identity config copied to {}", dest.display());
    Ok(dest)
}
