//! Parsing helpers for `/proc/self/mountinfo` (and similar mountinfo files).

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    pub mount_point: PathBuf,
    pub source: Option<String>,
}

pub fn parse_mountinfo(content: &str) -> Vec<MountInfo> {
    content
        .lines()
        .filter_map(|line| {
            // mountinfo format:
            //   <pre fields...> <mount point> <...> - <fstype> <source> <superopts>
            let (pre, post) = line.split_once(" - ")?;
            let pre_fields: Vec<&str> = pre.split_whitespace().collect();
            if pre_fields.len() < 5 {
                return None;
            }
            let mut post_fields = post.split_whitespace();
            let _fstype = post_fields.next();
            let source = post_fields.next().map(String::from);
            Some(MountInfo {
                mount_point: PathBuf::from(unescape_mount_path(pre_fields[4])),
                source,
            })
        })
        .collect()
}

pub fn is_mounted_from_info(path: &Path, entries: &[MountInfo]) -> bool {
    let target = normalize_path(path);
    entries
        .iter()
        .any(|entry| normalize_path(&entry.mount_point) == target)
}

/// Mount points whose source is `dev_path` itself or one of its partitions.
///
/// `/dev/loop1` matches `/dev/loop1` and `/dev/loop1p3`, never `/dev/loop10p1`.
pub fn mounted_under_device(entries: &[MountInfo], dev_path: &Path) -> Vec<String> {
    let dev = dev_path.to_string_lossy();
    let mut mounts: Vec<String> = entries
        .iter()
        .filter(|e| {
            e.source
                .as_deref()
                .is_some_and(|source| is_device_or_partition(source, &dev))
        })
        .map(|e| e.mount_point.to_string_lossy().to_string())
        .collect();

    mounts.sort();
    mounts.dedup();
    mounts
}

fn is_device_or_partition(source: &str, dev: &str) -> bool {
    let Some(rest) = source.strip_prefix(dev) else {
        return false;
    };
    if rest.is_empty() {
        return true;
    }
    // Devices ending in a digit (loop1, mmcblk0) use a `p` separator before the partition number.
    let number = if dev.ends_with(|c: char| c.is_ascii_digit()) {
        match rest.strip_prefix('p') {
            Some(n) => n,
            None => return false,
        }
    } else {
        rest
    };
    !number.is_empty() && number.chars().all(|c| c.is_ascii_digit())
}

pub fn unescape_mount_path(raw: &str) -> String {
    raw.replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

fn normalize_path(path: &Path) -> String {
    let s = path.to_string_lossy();
    if s.len() > 1 && s.ends_with('/') {
        s.trim_end_matches('/').to_string()
    } else {
        s.to_string()
    }
}
