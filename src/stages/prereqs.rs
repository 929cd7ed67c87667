//! Prerequisite installer: build toolchain and libraries, via apt.

use anyhow::Result;

use crate::config::ProvisionContext;
use crate::error::StageError;
use crate::host::HostVariant;
use crate::process::Cmd;

/// Packages required on every supported host.
const BASE_PACKAGES: &[&str] = &[
    "build-essential",
    "autoconf",
    "automake",
    "zlib1g-dev",
    "gnupg",
    "patch",
    "openssh-client",
];

/// Deterministic package set for a host variant. Kali ships a newer OpenSSL
/// and substitutes libssl-dev for the pinned release's libssl1.0-dev.
pub fn package_set(host: HostVariant) -> Vec<&'static str> {
    let mut packages = BASE_PACKAGES.to_vec();
    packages.push(match host {
        HostVariant::Kali => "libssl-dev",
        _ => "libssl1.0-dev",
    });
    packages
}

/// The apt invocations, in order: refresh package indexes, then install.
/// On a freshly imaged host the indexes may be stale or empty, so the
/// refresh is a mandatory first step and both failures are fatal.
pub fn apt_plan(host: HostVariant) -> Vec<Vec<&'static str>> {
    let mut install = vec!["install", "-y"];
    install.extend(package_set(host));
    vec![vec!["update"], install]
}

pub fn run(ctx: &ProvisionContext) -> Result<(), StageError> {
    install(ctx).map_err(StageError::Environment)
}

fn install(ctx: &ProvisionContext) -> Result<()> {
    println!(
        "Installing build prerequisites: {}",
        package_set(ctx.host).join(" ")
    );

    for argv in apt_plan(ctx.host) {
        Cmd::new("apt-get")
            .args(argv.iter().copied())
            .env("DEBIAN_FRONTEND", "noninteractive")
            .error_msg(format!(
                "'apt-get {}' failed; fix the package error above and re-run",
                argv[0]
            ))
            .run_interactive()?;
    }

    Ok(())
}
