//! sshmitm-setup - provisioning pipeline for a session-logging SSH
//! interception endpoint.
//!
//! Fetches a pinned OpenSSH release, verifies it against embedded trust pins
//! (release-key fingerprint, detached signature, checksum), applies the
//! local interception patch, builds it, and installs it under a
//! privilege-separated, AppArmor-confined service account.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::process::ExitCode;

use sshmitm_setup::config::ProvisionContext;
use sshmitm_setup::host::HostVariant;
use sshmitm_setup::{pipeline, preflight};

#[derive(Parser)]
#[command(name = "sshmitm-setup")]
#[command(about = "Provision a hardened SSH interception endpoint")]
#[command(
    after_help = "QUICK START:\n  sshmitm-setup preflight  Check host tools and inputs\n  sshmitm-setup provision  Run the full pipeline (as root)\n  sshmitm-setup reset      Remove transient artifacts"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full provisioning pipeline
    Provision {
        /// Destroy a pre-existing service account (and its session logs)
        #[arg(long)]
        force: bool,
    },

    /// Reset the host to its pre-provisioning state
    Reset {
        /// Also destroy the service account and its home directory
        #[arg(long)]
        force: bool,
    },

    /// Check host tools and local inputs without changing anything
    Preflight {
        /// Fail (exit code 1) if any checks fail
        #[arg(long)]
        strict: bool,
    },
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ERROR: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    // Load .env if present; the environment still wins.
    dotenvy::dotenv().ok();

    let base_dir = std::env::current_dir().context("Failed to resolve working directory")?;
    let ctx = ProvisionContext::from_env(&base_dir, HostVariant::detect());

    match cli.command {
        Commands::Provision { force } => {
            pipeline::provision(&ctx, force)?;
        }
        Commands::Reset { force } => {
            pipeline::reset(&ctx, force)?;
        }
        Commands::Preflight { strict } => {
            let report = preflight::run_preflight(&ctx);
            report.print();
            if strict && !report.all_passed() {
                anyhow::bail!("Preflight failed: {} check(s) failed.", report.fail_count());
            }
        }
    }

    Ok(())
}
