//! Block map (`.bmap`) generation with `bmaptool`.

use crate::compression::Compression;
use provision_hal::{HalResult, ProcessOps};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

const BMAPTOOL_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// `image.wic` -> `image.wic.bmap`, `image.wic.xz` -> `image.wic.bmap` (same for `.bz2`, `.gz`).
///
/// bmaptool looks for the map of a compressed image without the compression suffix.
pub fn bmap_path(image: &Path) -> PathBuf {
    let compressed = image.extension().is_some_and(|ext| {
        Compression::ALL
            .iter()
            .any(|format| ext == format.extension())
    });
    let base = if compressed {
        image.with_extension("")
    } else {
        image.to_path_buf()
    };
    let mut name: OsString = base.into_os_string();
    name.push(".bmap");
    PathBuf::from(name)
}

/// Run `bmaptool create -o <output> <image>`.
pub fn generate_bmap<H: ProcessOps + ?Sized>(
    hal: &H,
    image: &Path,
    output: &Path,
) -> HalResult<()> {
    let output_arg = output.to_string_lossy();
    let image_arg = image.to_string_lossy();
    log::info!("generating block map {}", output.display());
    hal.command_status(
        "bmaptool",
        &["create", "-o", &output_arg, &image_arg],
        BMAPTOOL_TIMEOUT,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use provision_hal::{FakeHal, Operation};

    #[test]
    fn bmap_path_drops_compression_suffix() {
        for image in [
            "/out/image.wic",
            "/out/image.wic.xz",
            "/out/image.wic.bz2",
            "/out/image.wic.gz",
        ] {
            assert_eq!(
                bmap_path(Path::new(image)),
                PathBuf::from("/out/image.wic.bmap")
            );
        }
        assert_eq!(
            bmap_path(Path::new("/out/image.img.zst")),
            PathBuf::from("/out/image.img.zst.bmap")
        );
    }

    #[test]
    fn generate_runs_bmaptool_create() {
        let hal = FakeHal::new();
        generate_bmap(
            &hal,
            Path::new("/out/image.wic"),
            Path::new("/out/image.wic.bmap"),
        )
        .unwrap();

        assert!(hal.has_operation(|op| matches!(
            op,
            Operation::Command { program, args, .. }
                if program == "bmaptool"
                    && args == &["create", "-o", "/out/image.wic.bmap", "/out/image.wic"]
        )));
    }
}
