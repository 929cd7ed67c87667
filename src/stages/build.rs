//! Patch & build: turn the verified archive into built binaries.
//!
//! The extracted tree is renamed with a -mitm suffix before anything touches
//! it, so a patched tree can never be confused with a pristine extraction of
//! the same release.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;
use std::thread;

use crate::config::ProvisionContext;
use crate::error::StageError;
use crate::process::Cmd;

/// Binaries `make` must have produced for the build to count as a success.
const EXPECTED_BINARIES: &[&str] = &["sshd", "ssh"];

pub fn run(ctx: &ProvisionContext) -> Result<(), StageError> {
    extract_and_patch(ctx).map_err(StageError::Build)?;
    compile(ctx).map_err(StageError::Build)?;
    check_built_binaries(&ctx.patched_tree()).map_err(StageError::Build)?;
    Ok(())
}

fn extract_and_patch(ctx: &ProvisionContext) -> Result<()> {
    let build_dir = ctx.build_dir();
    fs::create_dir_all(&build_dir)
        .with_context(|| format!("Failed to create {}", build_dir.display()))?;

    println!("Extracting {}...", ctx.spec.archive);
    Cmd::new("tar")
        .arg("xzf")
        .arg_path(&ctx.archive_path())
        .arg("-C")
        .arg_path(&build_dir)
        .error_msg("Archive extraction failed")
        .run()?;

    // A verified-but-differently-packaged archive is its own failure mode,
    // distinct from a failed extraction.
    let source_tree = ctx.source_tree();
    if !source_tree.is_dir() {
        bail!(
            "Unexpected archive layout: {} did not contain a '{}' directory",
            ctx.spec.archive,
            ctx.spec.source_dir
        );
    }

    let patched_tree = ctx.patched_tree();
    fs::rename(&source_tree, &patched_tree).with_context(|| {
        format!(
            "Failed to rename {} to {}",
            source_tree.display(),
            patched_tree.display()
        )
    })?;

    println!("Applying {}...", ctx.spec.patch_file);
    Cmd::new("patch")
        .args(["-p0", "--fuzz=0", "-N", "-i"])
        .arg_path(&ctx.patch_path())
        .dir(&patched_tree)
        .error_msg("Interception patch did not apply cleanly")
        .run()?;

    Ok(())
}

fn compile(ctx: &ProvisionContext) -> Result<()> {
    let tree = ctx.patched_tree();
    let home = ctx.account.home.display().to_string();

    println!("Regenerating build configuration...");
    Cmd::new("autoreconf")
        .dir(&tree)
        .error_msg("autoreconf failed")
        .run()?;

    // The privsep paths point at the service account's home even though the
    // account is only created in the next stage.
    println!("Configuring...");
    Cmd::new("./configure")
        .arg("--with-sandbox=no")
        .arg(format!("--with-privsep-user={}", ctx.account.name))
        .arg(format!(
            "--with-privsep-path={}",
            ctx.account.empty_dir().display()
        ))
        .arg(format!("--with-pid-dir={}", home))
        .arg(format!("--with-lastlog={}", home))
        .dir(&tree)
        .error_msg("configure failed")
        .run_interactive()?;

    let jobs = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    println!("Building with {} parallel jobs...", jobs);
    Cmd::new("make")
        .arg(format!("-j{}", jobs))
        .dir(&tree)
        .error_msg("make failed")
        .run_interactive()?;

    Ok(())
}

/// Post-condition: both output binaries must exist. A silent build failure
/// must not propagate as success.
pub fn check_built_binaries(tree: &Path) -> Result<()> {
    let missing: Vec<&str> = EXPECTED_BINARIES
        .iter()
        .copied()
        .filter(|bin| !tree.join(bin).is_file())
        .collect();

    if !missing.is_empty() {
        bail!(
            "Build completed without producing expected binaries: {} (in {})",
            missing.join(", "),
            tree.display()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_check_built_binaries_all_present() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("sshd"), b"elf").unwrap();
        fs::write(tmp.path().join("ssh"), b"elf").unwrap();
        check_built_binaries(tmp.path()).unwrap();
    }

    #[test]
    fn test_check_built_binaries_missing_daemon() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("ssh"), b"elf").unwrap();

        let err = check_built_binaries(tmp.path()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("sshd"));
        assert!(!msg.contains("ssh,"), "only the missing binary is listed");
    }

    #[test]
    fn test_check_built_binaries_directory_does_not_count() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("sshd")).unwrap();
        fs::write(tmp.path().join("ssh"), b"elf").unwrap();

        assert!(check_built_binaries(tmp.path()).is_err());
    }
}
