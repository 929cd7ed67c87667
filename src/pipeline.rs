//! The pipeline driver: strict linear stage composition.
//!
//! reset → prerequisites → acquire+verify → patch&build → privileged setup.
//! Each stage is a precondition for the next; the first failure aborts the
//! entire run.

use anyhow::anyhow;

use crate::config::ProvisionContext;
use crate::error::StageError;
use crate::preflight;
use crate::stages;
use crate::verify::{self, GpgVerifier};

/// Run the full provisioning pipeline.
///
/// `force` authorizes destruction of a pre-existing service account (and
/// its captured session data) during the reset stage.
pub fn provision(ctx: &ProvisionContext, force: bool) -> Result<(), StageError> {
    if !preflight::is_root() {
        return Err(StageError::Precondition(anyhow!(
            "This pipeline must run as root: it creates a system account and \
             installs system-wide AppArmor policy."
        )));
    }

    ctx.print();
    println!();

    preflight::run_preflight_or_fail(ctx).map_err(StageError::Precondition)?;

    stages::reset::run(ctx, force)?;
    stages::prereqs::run(ctx)?;

    verify::acquire(ctx)?;
    let verifier = GpgVerifier::new().map_err(StageError::Environment)?;
    verify::run_trust_gate(ctx, &verifier)?;

    stages::build::run(ctx)?;
    stages::setup::run(ctx)?;

    println!();
    println!("Provisioning complete.");
    println!(
        "Start the daemon with: {}",
        ctx.account.run_script_path().display()
    );
    println!(
        "Daemon config: {}",
        ctx.account.config_path().display()
    );
    Ok(())
}

/// Run the reset stage alone.
pub fn reset(ctx: &ProvisionContext, force: bool) -> Result<(), StageError> {
    if !preflight::is_root() {
        return Err(StageError::Precondition(anyhow!(
            "Reset must run as root: it may remove a system account."
        )));
    }
    stages::reset::run(ctx, force)
}
