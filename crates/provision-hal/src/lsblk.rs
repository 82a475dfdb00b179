//! Parsing helpers for `lsblk --json` output.

use crate::{HalError, HalResult};
use serde::Deserialize;
use std::path::PathBuf;

/// Columns requested from `lsblk`; [`parse_lsblk_partitions`] expects exactly these.
pub const LSBLK_COLUMNS: &str = "NAME,PATH,TYPE,FSTYPE,LABEL,PARTLABEL";

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    #[serde(default)]
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: String,
    path: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    fstype: Option<String>,
    label: Option<String>,
    partlabel: Option<String>,
    #[serde(default)]
    children: Vec<LsblkDevice>,
}

/// A partition as reported by `lsblk`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPartition {
    pub path: PathBuf,
    pub fstype: Option<String>,
    /// Filesystem label.
    pub label: Option<String>,
    /// GPT partition name.
    pub partlabel: Option<String>,
}

impl BlockPartition {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fstype: None,
            label: None,
            partlabel: None,
        }
    }

    pub fn with_fstype(mut self, fstype: impl Into<String>) -> Self {
        self.fstype = Some(fstype.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_partlabel(mut self, partlabel: impl Into<String>) -> Self {
        self.partlabel = Some(partlabel.into());
        self
    }

    /// True when either the GPT partition name or the filesystem label equals `name`.
    pub fn has_label(&self, name: &str) -> bool {
        self.partlabel.as_deref() == Some(name) || self.label.as_deref() == Some(name)
    }
}

pub fn parse_lsblk_partitions(json: &str) -> HalResult<Vec<BlockPartition>> {
    let output: LsblkOutput = serde_json::from_str(json)
        .map_err(|e| HalError::Parse(format!("lsblk json: {}", e)))?;

    let mut partitions = Vec::new();
    for device in &output.blockdevices {
        collect_partitions(device, &mut partitions);
    }
    Ok(partitions)
}

fn collect_partitions(device: &LsblkDevice, out: &mut Vec<BlockPartition>) {
    if device.kind.as_deref() == Some("part") {
        let path = device
            .path
            .clone()
            .unwrap_or_else(|| format!("/dev/{}", device.name));
        out.push(BlockPartition {
            path: PathBuf::from(path),
            fstype: non_empty(&device.fstype),
            label: non_empty(&device.label),
            partlabel: non_empty(&device.partlabel),
        });
    }
    for child in &device.children {
        collect_partitions(child, out);
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIC_LSBLK: &str = r#"{
       "blockdevices": [
          {"name":"loop3", "path":"/dev/loop3", "type":"loop", "fstype":null, "label":null, "partlabel":null,
             "children": [
                {"name":"loop3p1", "path":"/dev/loop3p1", "type":"part", "fstype":"vfat", "label":"boot", "partlabel":"boot"},
                {"name":"loop3p2", "path":"/dev/loop3p2", "type":"part", "fstype":"ext4", "label":"rootA", "partlabel":"rootA"},
                {"name":"loop3p5", "path":"/dev/loop3p5", "type":"part", "fstype":"ext4", "label":"etc", "partlabel":""},
                {"name":"loop3p6", "path":"/dev/loop3p6", "type":"part", "fstype":"ext4", "label":null, "partlabel":"data"}
             ]
          }
       ]
    }"#;

    #[test]
    fn parses_partitions_from_nested_children() {
        let parts = parse_lsblk_partitions(WIC_LSBLK).unwrap();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[1].path, PathBuf::from("/dev/loop3p2"));
        assert_eq!(parts[1].fstype.as_deref(), Some("ext4"));
        assert_eq!(parts[2].partlabel, None);
    }

    #[test]
    fn has_label_checks_partlabel_and_fs_label() {
        let parts = parse_lsblk_partitions(WIC_LSBLK).unwrap();
        assert!(parts[2].has_label("etc"));
        assert!(parts[3].has_label("data"));
        assert!(!parts[1].has_label("roota"));
    }

    #[test]
    fn missing_path_falls_back_to_dev_name() {
        let json = r#"{"blockdevices":[{"name":"loop0p1","type":"part","fstype":"ext4","label":"etc","partlabel":null}]}"#;
        let parts = parse_lsblk_partitions(json).unwrap();
        assert_eq!(parts[0].path, PathBuf::from("/dev/loop0p1"));
    }

    #[test]
    fn rejects_garbage() {
        let err = parse_lsblk_partitions("NAME LABEL").unwrap_err();
        assert!(matches!(err, HalError::Parse(_)));
    }
}
