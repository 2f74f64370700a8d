//! Atomic replace-on-write for human-editable state files.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// Write `contents` to a sibling temp file, then rename over `path`.
///
/// Readers never observe a partially written file.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let file_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

/// Read a text file, treating a missing file as empty.
pub fn read_or_empty(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_atomic_creates_parents_and_leaves_no_temp() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested/dir/main-plan.md");
        write_atomic(&path, "plan").expect("write");
        assert_eq!(fs::read_to_string(&path).expect("read"), "plan");
        assert!(!temp.path().join("nested/dir/main-plan.md.tmp").exists());
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert_eq!(read_or_empty(&temp.path().join("nope.md")).expect("read"), "");
    }
}
