//! Input validation guard rails for user-provided paths.

use crate::errors::ProvisionError;
use std::fs;
use std::path::Path;

/// The path must exist and be a regular file (symlinks to files are fine).
pub fn validate_input_file(what: &'static str, path: &Path) -> Result<(), ProvisionError> {
    if path.as_os_str().is_empty() || !path.exists() {
        return Err(ProvisionError::MissingInput {
            what,
            path: path.to_path_buf(),
        });
    }
    if !path.is_file() {
        return Err(ProvisionError::NotAFile {
            what,
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

/// No existing component of `path` below `root` may be a symlink.
///
/// Links inside a mounted image resolve against the host, so writing through
/// one could escape the partition. Components that do not exist yet are fine.
pub fn reject_symlinks_below(root: &Path, path: &Path) -> Result<(), ProvisionError> {
    let Ok(relative) = path.strip_prefix(root) else {
        return Ok(());
    };
    let mut current = root.to_path_buf();
    for component in relative.components() {
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(ProvisionError::SymlinkInImage { path: current });
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    #[test]
    fn accepts_existing_file() {
        let temp = tempdir().expect("tempdir");
        let config = temp.path().join("config.toml");
        File::create(&config).expect("create file");

        assert!(validate_input_file("identity config", &config).is_ok());
    }

    #[test]
    fn rejects_missing_file_and_names_it() {
        let temp = tempdir().expect("tempdir");
        let missing = temp.path().join("missing.wic");

        let err = validate_input_file("image", &missing).unwrap_err();

        assert!(matches!(err, ProvisionError::MissingInput { .. }));
        assert!(err.to_string().contains("missing.wic"));
    }

    #[test]
    fn rejects_directory() {
        let temp = tempdir().expect("tempdir");
        let err = validate_input_file("image", temp.path()).unwrap_err();
        assert!(matches!(err, ProvisionError::NotAFile { .. }));
    }

    #[test]
    fn rejects_empty_path() {
        let err = validate_input_file("identity config", Path::new("")).unwrap_err();
        assert!(matches!(err, ProvisionError::MissingInput { .. }));
    }

    #[test]
    fn plain_and_missing_components_pass() {
        let root = tempdir().unwrap();
        fs::create_dir_all(root.path().join("upper")).unwrap();

        let dest = root.path().join("upper/aziot/config.toml");
        assert!(reject_symlinks_below(root.path(), &dest).is_ok());
    }

    #[test]
    fn symlinked_directory_is_rejected() {
        let root = tempdir().unwrap();
        let host = tempdir().unwrap();
        std::os::unix::fs::symlink(host.path(), root.path().join("upper")).unwrap();

        let err = reject_symlinks_below(root.path(), &root.path().join("upper/hostname"))
            .unwrap_err();

        assert!(matches!(
            err,
            ProvisionError::SymlinkInImage { path } if path == root.path().join("upper")
        ));
    }

    #[test]
    fn symlinked_file_is_rejected_even_if_dangling() {
        let root = tempdir().unwrap();
        fs::create_dir_all(root.path().join("usr/bin")).unwrap();
        let script = root.path().join("usr/bin/ics_dm_first_boot.sh");
        std::os::unix::fs::symlink("/nonexistent/first_boot.sh", &script).unwrap();

        assert!(reject_symlinks_below(root.path(), &script).is_err());
    }
}
