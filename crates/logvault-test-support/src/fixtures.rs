//! Scratch trees and sample match logs.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use tempfile::TempDir;

/// Temporary workspace with `in/` and `out/` roots.
#[derive(Debug)]
pub struct LogTree {
    dir: TempDir,
}

impl LogTree {
    /// Create an empty tree with an existing input root.
    ///
    /// # Errors
    ///
    /// Returns an error when the temporary directory cannot be created.
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("logvault-").tempdir()?;
        fs::create_dir_all(dir.path().join("in"))?;
        Ok(Self { dir })
    }

    /// Scratch root holding both trees.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Input root.
    #[must_use]
    pub fn input(&self) -> PathBuf {
        self.dir.path().join("in")
    }

    /// Output root (not created until a run does so).
    #[must_use]
    pub fn output(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    /// Write a file under the input root, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be written.
    pub fn write(&self, relative: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.input().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }

    /// Move a file's modification time forward so change detection sees a new version.
    ///
    /// # Errors
    ///
    /// Returns an error when the timestamp cannot be updated.
    pub fn touch_later(path: &Path, seconds: u64) -> Result<()> {
        let file = File::options().write(true).open(path)?;
        let modified = fs::metadata(path)?.modified()?;
        file.set_modified(modified + Duration::from_secs(seconds))?;
        Ok(())
    }

    /// Pin a file's modification time.
    ///
    /// # Errors
    ///
    /// Returns an error when the timestamp cannot be updated.
    pub fn set_modified(path: &Path, at: SystemTime) -> Result<()> {
        File::options().write(true).open(path)?.set_modified(at)?;
        Ok(())
    }
}

/// A tenhou-style match log with `rounds` entries, optionally carrying a disconnect.
#[must_use]
pub fn tenhou_log(reference: &str, rounds: usize, disconnected: bool) -> Vec<u8> {
    let mut log = format!(r#"{{"ver":2.3,"ref":"{reference}","log":["#);
    for round in 0..rounds {
        if round > 0 {
            log.push(',');
        }
        log.push_str(&format!(
            r#"[[{round},0,0],[25000,25000,25000,25000],[11,12,13,21,22,23,31,32,33,41,42,43,44]]"#
        ));
    }
    if disconnected {
        log.push_str(r#",["<BYE who=\"2\"/>"]"#);
    }
    log.push_str(r#"],"name":["A","B","C","D"],"rule":{"disp":"般南喰赤","aka":1}}"#);
    log.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_writes_nested_files() -> Result<()> {
        let tree = LogTree::new()?;
        let path = tree.write("2019/07/a.json", b"{}")?;
        assert!(path.starts_with(tree.input()));
        assert_eq!(fs::read(&path)?, b"{}");
        assert!(!tree.output().exists());
        Ok(())
    }

    #[test]
    fn touch_later_advances_modification_time() -> Result<()> {
        let tree = LogTree::new()?;
        let path = tree.write("a.json", b"{}")?;
        let before = fs::metadata(&path)?.modified()?;
        LogTree::touch_later(&path, 60)?;
        assert!(fs::metadata(&path)?.modified()? > before);
        Ok(())
    }

    #[test]
    fn sample_logs_carry_marker_only_when_disconnected() {
        let clean = String::from_utf8_lossy(&tenhou_log("2019070419gm-0009", 3, false)).into_owned();
        let tainted = String::from_utf8_lossy(&tenhou_log("2019070419gm-0009", 3, true)).into_owned();
        assert!(!clean.contains("BYE"));
        assert!(tainted.contains("BYE"));
        assert!(clean.contains(r#""ref":"2019070419gm-0009""#));
    }
}
