//! Privileged setup: service account, binaries, host identity, launch
//! script, and sandbox profiles.

use anyhow::{bail, Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;

use crate::config::{ProvisionContext, DAEMON_BIN};
use crate::error::StageError;
use crate::fsutil::{create_dir_mode, write_file_mode};
use crate::process::{self, Cmd};

pub fn run(ctx: &ProvisionContext) -> Result<(), StageError> {
    create_account(ctx).map_err(StageError::Environment)?;
    install_binaries(ctx).map_err(StageError::Environment)?;
    install_config(ctx).map_err(StageError::Environment)?;
    generate_host_identity(ctx).map_err(StageError::Environment)?;
    write_run_script(ctx).map_err(StageError::Environment)?;
    finalize_ownership(ctx).map_err(StageError::Environment)?;
    install_sandbox_profiles(ctx).map_err(StageError::Environment)?;
    Ok(())
}

/// Create the privilege-separated service account with a locked-down home.
fn create_account(ctx: &ProvisionContext) -> Result<()> {
    println!("Creating service account '{}'...", ctx.account.name);

    Cmd::new("useradd")
        .arg("--create-home")
        .arg("--home-dir")
        .arg_path(&ctx.account.home)
        .args(["--shell", "/bin/bash"])
        .arg(&ctx.account.name)
        .error_msg("Service account creation failed")
        .run()?;

    // Home is 0700: session artifacts written there later are readable by
    // no other principal.
    create_dir_mode(&ctx.account.home, 0o700)?;
    create_dir_mode(&ctx.account.bin_dir(), 0o755)?;
    create_dir_mode(&ctx.account.etc_dir(), 0o755)?;
    create_dir_mode(&ctx.account.tmp_dir(), 0o700)?;
    create_dir_mode(&ctx.account.empty_dir(), 0o700)?;

    Ok(())
}

/// Install the built binaries under the account, renaming the daemon so it
/// cannot collide with a system-wide sshd, and strip debug symbols.
fn install_binaries(ctx: &ProvisionContext) -> Result<()> {
    let tree = ctx.patched_tree();
    println!("Installing binaries to {}...", ctx.account.bin_dir().display());

    let installs = [
        (tree.join("sshd"), ctx.account.daemon_path()),
        (tree.join("ssh"), ctx.account.client_path()),
    ];

    for (src, dest) in &installs {
        fs::copy(src, dest).with_context(|| {
            format!("Failed to install {} to {}", src.display(), dest.display())
        })?;
        fs::set_permissions(dest, fs::Permissions::from_mode(0o755))?;
        Cmd::new("strip")
            .arg_path(dest)
            .error_msg("Stripping debug symbols failed")
            .run()?;
    }

    Ok(())
}

fn install_config(ctx: &ProvisionContext) -> Result<()> {
    let template = ctx.config_template();
    let dest = ctx.account.config_path();
    fs::copy(&template, &dest).with_context(|| {
        format!(
            "Failed to install config template {} to {}",
            template.display(),
            dest.display()
        )
    })?;
    Ok(())
}

/// Generate the host identity key pairs with empty passphrases (the daemon
/// must start unattended). Existing keys are never regenerated: that would
/// invalidate trust established with prior clients.
fn generate_host_identity(ctx: &ProvisionContext) -> Result<()> {
    let keys = [
        (ctx.account.rsa_key_path(), vec!["-t", "rsa", "-b", "4096"]),
        (ctx.account.ed25519_key_path(), vec!["-t", "ed25519"]),
    ];

    for (path, type_args) in keys {
        if path.exists() {
            println!("Host key {} already exists, keeping it.", path.display());
            continue;
        }
        println!("Generating host key {}...", path.display());
        Cmd::new("ssh-keygen")
            .args(type_args)
            .args(["-N", "", "-q", "-f"])
            .arg_path(&path)
            .error_msg("Host key generation failed")
            .run()?;
    }

    Ok(())
}

/// Write the launch script the operator uses to start the daemon.
fn write_run_script(ctx: &ProvisionContext) -> Result<()> {
    let script = format!(
        "#!/bin/bash\n\
         {daemon} -f {config}\n\
         status=$?\n\
         echo \"{name} exited with status ${{status}}\"\n\
         exit ${{status}}\n",
        daemon = ctx.account.daemon_path().display(),
        config = ctx.account.config_path().display(),
        name = DAEMON_BIN,
    );
    write_file_mode(&ctx.account.run_script_path(), script, 0o755)?;
    Ok(())
}

/// Hand the installed tree to the service account.
fn finalize_ownership(ctx: &ProvisionContext) -> Result<()> {
    Cmd::new("chown")
        .arg("-R")
        .arg(format!("{0}:{0}", ctx.account.name))
        .arg_path(&ctx.account.home)
        .error_msg("Changing ownership of the account home failed")
        .run()?;
    Ok(())
}

/// Install one AppArmor profile per installed binary and reload the
/// subsystem. A host without AppArmor gets a warning plus variant-specific
/// remediation guidance; the pipeline still succeeds.
pub fn install_sandbox_profiles(ctx: &ProvisionContext) -> Result<()> {
    let profile_dir = ctx.profile_dir();
    if !profile_dir.is_dir() {
        bail!(
            "Sandbox profile directory {} is missing",
            profile_dir.display()
        );
    }

    if !ctx.apparmor_dir.is_dir() {
        eprintln!(
            "WARNING: AppArmor does not appear to be installed ({} not found).\n\
             The daemon will run WITHOUT a mandatory-access-control sandbox.\n\
             {}",
            ctx.apparmor_dir.display(),
            ctx.host.apparmor_hint()
        );
        return Ok(());
    }

    println!("Installing AppArmor profiles to {}...", ctx.apparmor_dir.display());
    let mut installed = 0;
    for entry in fs::read_dir(&profile_dir)
        .with_context(|| format!("Failed to read {}", profile_dir.display()))?
    {
        let entry = entry?;
        if !entry.path().is_file() {
            continue;
        }
        let dest = ctx.apparmor_dir.join(entry.file_name());
        fs::copy(entry.path(), &dest).with_context(|| {
            format!("Failed to install profile {}", dest.display())
        })?;
        installed += 1;
    }

    if installed == 0 {
        bail!("No profile files found in {}", profile_dir.display());
    }

    reload_apparmor(ctx);
    Ok(())
}

/// Activate the newly installed profiles. Reload failure downgrades to a
/// warning: profiles are in place and will load on the next boot.
fn reload_apparmor(ctx: &ProvisionContext) {
    let reload = if process::exists("systemctl") {
        Cmd::new("systemctl")
            .args(["reload", "apparmor"])
            .allow_fail()
            .run()
    } else {
        Cmd::new("/etc/init.d/apparmor")
            .arg("reload")
            .allow_fail()
            .run()
    };

    match reload {
        Ok(result) if result.success() => println!("AppArmor profiles activated."),
        _ => {
            eprintln!(
                "WARNING: Could not reload AppArmor; profiles will activate on next boot.\n{}",
                ctx.host.apparmor_hint()
            );
        }
    }
}
