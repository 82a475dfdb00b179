//! Hostname configuration from the identity config's top-level `hostname` key.

use crate::errors::ProvisionError;
use crate::paths::{HOSTNAME_DEST, HOSTS_DEST, HOSTS_SRC};
use anyhow::Context;
use std::fs;
use std::path::Path;

const HOSTS_SELF_ADDR: &str = "127.0.1.1";

/// The `hostname` value of an identity config, if it has one.
///
/// Config contents are not validated here: unparsable TOML just means no hostname.
pub fn hostname_from_config(config: &str) -> Option<String> {
    let table = match toml::from_str::<toml::Table>(config) {
        Ok(table) => table,
        Err(err) => {
            log::debug!("identity config is not valid TOML, skipping hostname: {}", err);
            return None;
        }
    };
    match table.get("hostname") {
        Some(toml::Value::String(name)) => Some(name.trim().to_string()),
        Some(other) => {
            log::debug!("ignoring non-string hostname value: {}", other);
            None
        }
        None => None,
    }
}

/// RFC 1123 host name check.
pub fn validate_hostname(name: &str) -> Result<(), ProvisionError> {
    let valid_label = |label: &str| {
        (1..=63).contains(&label.len())
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            && !label.starts_with('-')
            && !label.ends_with('-')
    };
    if name.is_empty() || name.len() > 253 || !name.split('.').all(valid_label) {
        return Err(ProvisionError::InvalidHostname(name.to_string()));
    }
    Ok(())
}

/// Point every `127.0.1.1` entry at `hostname`, adding one if there is none.
pub fn rewrite_hosts(content: &str, hostname: &str) -> String {
    let entry = format!("{} {}", HOSTS_SELF_ADDR, hostname);
    let mut replaced = false;
    let mut lines: Vec<String> = content
        .lines()
        .map(|line| {
            if line.split_whitespace().next() == Some(HOSTS_SELF_ADDR) {
                replaced = true;
                entry.clone()
            } else {
                line.to_string()
            }
        })
        .collect();
    if !replaced {
        lines.push(entry);
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Write `upper/hostname` and `upper/hosts` on the `etc` overlay.
///
/// The overlay's hosts file is seeded from the root partition's `/etc/hosts` when absent.
pub fn configure_hostname(hostname: &str, etc_root: &Path, root: &Path) -> anyhow::Result<()> {
    validate_hostname(hostname)?;

    let hostname_file = etc_root.join(HOSTNAME_DEST);
    if let Some(parent) = hostname_file.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(&hostname_file, format!("{}\n", hostname))
        .with_context(|| format!("write {}", hostname_file.display()))?;

    let hosts_file = etc_root.join(HOSTS_DEST);
    let current = if hosts_file.exists() {
        fs::read_to_string(&hosts_file)
            .with_context(|| format!("read {}", hosts_file.display()))?
    } else {
        let seed = root.join(HOSTS_SRC);
        match fs::read_to_string(&seed) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("{} not found, starting an empty hosts file", seed.display());
                String::new()
            }
            Err(err) => {
                return Err(err).with_context(|| format!("read {}", seed.display()));
            }
        }
    };
    fs::write(&hosts_file, rewrite_hosts(&current, hostname))
        .with_context(|| format!("write {}", hosts_file.display()))?;

    log::info!("hostname set to {}", hostname);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn reads_top_level_hostname() {
        let config = "hostname = \"gateway-01\"\n\n[provisioning]\nsource = \"manual\"\n";
        assert_eq!(hostname_from_config(config), Some("gateway-01".to_string()));
    }

    #[test]
    fn nested_or_missing_hostname_is_ignored() {
        let config = "[provisioning]\nhostname = \"not-top-level\"\n";
        assert_eq!(hostname_from_config(config), None);
        assert_eq!(hostname_from_config("hostname = 42\n"), None);
    }

    #[test]
    fn invalid_toml_yields_no_hostname() {
        assert_eq!(hostname_from_config("hostname = \"unterminated\n"), None);
    }

    #[test]
    fn hostname_validation() {
        assert!(validate_hostname("device-42").is_ok());
        assert!(validate_hostname("edge.example.com").is_ok());
        assert!(validate_hostname("").is_err());
        assert!(validate_hostname("-leading").is_err());
        assert!(validate_hostname("under_score").is_err());
        assert!(validate_hostname("a..b").is_err());
        assert!(validate_hostname(&"a".repeat(64)).is_err());
    }

    #[test]
    fn rewrite_replaces_existing_entry() {
        let hosts = "127.0.0.1 localhost\n127.0.1.1 omnect-device\n::1 localhost\n";
        assert_eq!(
            rewrite_hosts(hosts, "gateway-01"),
            "127.0.0.1 localhost\n127.0.1.1 gateway-01\n::1 localhost\n"
        );
    }

    #[test]
    fn rewrite_appends_missing_entry() {
        assert_eq!(
            rewrite_hosts("127.0.0.1 localhost\n", "gateway-01"),
            "127.0.0.1 localhost\n127.0.1.1 gateway-01\n"
        );
    }

    #[test]
    fn configure_writes_overlay_files() {
        let etc = tempdir().unwrap();
        let root = tempdir().unwrap();
        fs::create_dir_all(root.path().join("etc")).unwrap();
        fs::write(
            root.path().join("etc/hosts"),
            "127.0.0.1 localhost\n127.0.1.1 old\n",
        )
        .unwrap();

        configure_hostname("gateway-01", etc.path(), root.path()).unwrap();

        assert_eq!(
            fs::read_to_string(etc.path().join("upper/hostname")).unwrap(),
            "gateway-01\n"
        );
        assert_eq!(
            fs::read_to_string(etc.path().join("upper/hosts")).unwrap(),
            "127.0.0.1 localhost\n127.0.1.1 gateway-01\n"
        );
    }

    #[test]
    fn existing_overlay_hosts_takes_precedence() {
        let etc = tempdir().unwrap();
        let root = tempdir().unwrap();
        fs::create_dir_all(etc.path().join("upper")).unwrap();
        fs::write(etc.path().join("upper/hosts"), "10.0.0.5 broker\n").unwrap();

        configure_hostname("gateway-01", etc.path(), root.path()).unwrap();

        assert_eq!(
            fs::read_to_string(etc.path().join("upper/hosts")).unwrap(),
            "10.0.0.5 broker\n127.0.1.1 gateway-01\n"
        );
    }
}
