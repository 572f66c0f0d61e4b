//! Date partition to output path mapping.

use std::path::{Path, PathBuf};

use crate::model::DatePartition;

/// Relative directory for a partition: `<yyyy>/<mm>/<dd>`.
#[must_use]
pub fn partition_path(partition: DatePartition) -> PathBuf {
    [
        format!("{:04}", partition.year()),
        format!("{:02}", partition.month()),
        format!("{:02}", partition.day()),
    ]
    .iter()
    .collect()
}

/// Absolute directory for a partition under `output_root`.
#[must_use]
pub fn partition_dir(output_root: &Path, partition: DatePartition) -> PathBuf {
    output_root.join(partition_path(partition))
}
