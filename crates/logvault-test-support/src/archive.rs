//! Helpers for reading archive trees back in assertions.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::Result;
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// Decompress a gzip file.
///
/// # Errors
///
/// Returns an error when the file is missing or not valid gzip.
pub fn read_gzip(path: &Path) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    GzDecoder::new(File::open(path)?).read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Hex SHA-256 of a byte slice.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Relative path to raw-file digest for every file under `root`, skipping hidden entries.
///
/// # Errors
///
/// Returns an error when the tree cannot be walked or a file cannot be read.
pub fn tree_digests(root: &Path) -> Result<BTreeMap<PathBuf, String>> {
    let mut digests = BTreeMap::new();
    let walker = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()));
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root)?.to_path_buf();
        digests.insert(relative, sha256_hex(&fs::read(entry.path())?));
    }
    Ok(digests)
}

/// Relative paths of every archive entry (`*.gz`) under `root`.
///
/// # Errors
///
/// Returns an error when the tree cannot be walked.
pub fn archive_entries(root: &Path) -> Result<Vec<PathBuf>> {
    Ok(tree_digests(root)?
        .into_keys()
        .filter(|path| path.extension().is_some_and(|ext| ext == "gz"))
        .collect())
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}
