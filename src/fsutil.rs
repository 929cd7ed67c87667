//! File and directory helpers with explicit Unix permissions.

use anyhow::Result;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Create a directory (and parents) with specific permission bits.
///
/// Permissions are applied even when the directory already exists, so the
/// mode invariants hold on reruns.
pub fn create_dir_mode(path: &Path, mode: u32) -> Result<()> {
    fs::create_dir_all(path)?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

/// Write a file with specific permission bits, creating parent directories
/// as needed.
pub fn write_file_mode<C: AsRef<[u8]>>(path: &Path, content: C, mode: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_dir_mode() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("a/b/secret");
        create_dir_mode(&dir, 0o700).unwrap();

        assert!(dir.is_dir());
        let mode = fs::metadata(&dir).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode, 0o700, "expected 0700, got {:o}", mode);
    }

    #[test]
    fn test_create_dir_mode_tightens_existing() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("loose");
        fs::create_dir(&dir).unwrap();
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o777)).unwrap();

        create_dir_mode(&dir, 0o700).unwrap();
        let mode = fs::metadata(&dir).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode, 0o700);
    }

    #[test]
    fn test_write_file_mode() {
        let tmp = TempDir::new().unwrap();
        let script = tmp.path().join("nested/run.sh");
        write_file_mode(&script, "#!/bin/bash\n", 0o755).unwrap();

        assert_eq!(fs::read_to_string(&script).unwrap(), "#!/bin/bash\n");
        let mode = fs::metadata(&script).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode, 0o755);
    }
}
