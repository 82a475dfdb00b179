//! Fixed locations inside the image partitions, relative to each mount point.

/// Group that owns the injected identity config.
pub const AZIOT_GROUP: &str = "aziot";

/// Group database on the root partition.
pub const GROUP_DB: &str = "etc/group";

/// Identity config destination on the `etc` overlay partition.
pub const IDENTITY_CONFIG_DEST: &str = "upper/aziot/config.toml";

/// Bits OR-ed into the injected config's mode (`a+r,g+w`).
pub const IDENTITY_CONFIG_MODE_BITS: u32 = 0o464;

/// Script run once on the first boot of the device, on the root partition.
pub const FIRST_BOOT_SCRIPT: &str = "usr/bin/ics_dm_first_boot.sh";

pub const HOSTNAME_DEST: &str = "upper/hostname";
pub const HOSTS_DEST: &str = "upper/hosts";
pub const HOSTS_SRC: &str = "etc/hosts";
