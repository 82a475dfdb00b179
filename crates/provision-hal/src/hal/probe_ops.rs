//! Device probing operations (lsblk).

use crate::{BlockPartition, HalResult};
use std::path::Path;

/// Probing operations trait.
pub trait ProbeOps {
    /// List the partitions of a disk (or partitioned loop device) with their labels.
    fn list_partitions(&self, disk: &Path) -> HalResult<Vec<BlockPartition>>;
}
