//! Environment reset: return the host to its pre-provisioning state.
//!
//! Transient downloads and build trees are removed unconditionally. The
//! service account may hold captured session logs, so removing it requires
//! the explicit --force directive; without it, a pre-existing account aborts
//! the whole pipeline.

use anyhow::{anyhow, Context, Result};
use std::fs;

use crate::config::{ProvisionContext, DAEMON_BIN};
use crate::error::StageError;
use crate::process::{self, Cmd};

pub fn run(ctx: &ProvisionContext, force: bool) -> Result<(), StageError> {
    println!("Resetting environment...");

    remove_transients(ctx).map_err(StageError::Environment)?;
    stop_daemon().map_err(StageError::Environment)?;

    // An interrupted run can leave a passwd entry with no home directory
    // (or vice versa); either trace counts as an existing account.
    let home_exists = ctx.account.home.exists();
    let entry_exists = passwd_entry_exists(&ctx.account.name).map_err(StageError::Environment)?;

    if home_exists || entry_exists {
        if !force {
            let location = if home_exists {
                format!("at {}", ctx.account.home.display())
            } else {
                "as a passwd entry without a home directory".to_string()
            };
            return Err(StageError::Precondition(anyhow!(
                "Service account '{}' already exists {}.\n\
                 Its home directory may contain captured session logs.\n\
                 Re-run with --force to destroy the account and ALL of its data.",
                ctx.account.name,
                location
            )));
        }
        remove_account(ctx).map_err(StageError::Environment)?;
    }

    println!("Environment reset complete.");
    Ok(())
}

/// Remove downloaded artifacts and build trees. Idempotent.
fn remove_transients(ctx: &ProvisionContext) -> Result<()> {
    let mut cleaned = false;

    let downloads = ctx.downloads_dir();
    if downloads.exists() {
        println!("Removing downloads directory...");
        fs::remove_dir_all(&downloads)
            .with_context(|| format!("Failed to remove {}", downloads.display()))?;
        cleaned = true;
    }

    let build = ctx.build_dir();
    if build.exists() {
        println!("Removing build directory...");
        fs::remove_dir_all(&build)
            .with_context(|| format!("Failed to remove {}", build.display()))?;
        cleaned = true;
    }

    if !cleaned {
        println!("No transient artifacts to remove.");
    }
    Ok(())
}

/// Terminate any running instance of the interception daemon. A missing
/// pkill or no matching process is not an error.
fn stop_daemon() -> Result<()> {
    if !process::exists("pkill") {
        return Ok(());
    }
    Cmd::new("pkill")
        .args(["-x", DAEMON_BIN])
        .allow_fail()
        .run()?;
    Ok(())
}

/// True when the account has a passwd entry, whether or not its home
/// directory survives. getent exits 2 for an unknown key, so the lookup
/// itself must tolerate failure.
fn passwd_entry_exists(name: &str) -> Result<bool> {
    if !process::exists("getent") {
        return Ok(false);
    }
    let result = Cmd::new("getent")
        .arg("passwd")
        .arg(name)
        .allow_fail()
        .run()?;
    Ok(result.success())
}

/// Destroy the service account and its home directory. Only reached with
/// --force.
fn remove_account(ctx: &ProvisionContext) -> Result<()> {
    println!(
        "Removing service account '{}' and its home directory...",
        ctx.account.name
    );

    // userdel handles the passwd entry; it is allowed to fail when only a
    // stray home directory is left behind from an interrupted run.
    if process::exists("userdel") {
        Cmd::new("userdel")
            .arg("--remove")
            .arg(&ctx.account.name)
            .allow_fail()
            .run()?;
    }

    if ctx.account.home.exists() {
        fs::remove_dir_all(&ctx.account.home)
            .with_context(|| format!("Failed to remove {}", ctx.account.home.display()))?;
    }

    Ok(())
}
