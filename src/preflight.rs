//! Preflight checks: host tools and local inputs, before any destructive
//! work.

use anyhow::{bail, Result};

use crate::config::ProvisionContext;

/// External tools every pipeline run needs.
const REQUIRED_TOOLS: &[&str] = &[
    "apt-get",
    "gpg",
    "tar",
    "patch",
    "autoreconf",
    "make",
    "useradd",
    "userdel",
    "ssh-keygen",
    "strip",
    "chown",
];

/// Result of a single preflight check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    /// Provisioning will fail.
    Fail,
    /// Provisioning proceeds with reduced hardening.
    Warn,
}

impl CheckResult {
    pub fn pass(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Pass,
            details: None,
        }
    }

    pub fn pass_with(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Pass,
            details: Some(details.to_string()),
        }
    }

    pub fn fail(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Fail,
            details: Some(details.to_string()),
        }
    }

    pub fn warn(name: &str, details: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warn,
            details: Some(details.to_string()),
        }
    }
}

/// Results of all preflight checks.
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    pub fn all_passed(&self) -> bool {
        !self.checks.iter().any(|c| c.status == CheckStatus::Fail)
    }

    pub fn fail_count(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| c.status == CheckStatus::Fail)
            .count()
    }

    pub fn warn_count(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| c.status == CheckStatus::Warn)
            .count()
    }

    /// Print the report to stdout.
    pub fn print(&self) {
        println!("=== Preflight Check Results ===\n");

        for check in &self.checks {
            let (icon, status_str) = match check.status {
                CheckStatus::Pass => ("✓", "PASS"),
                CheckStatus::Fail => ("✗", "FAIL"),
                CheckStatus::Warn => ("⚠", "WARN"),
            };

            print!("  {} [{}] {}", icon, status_str, check.name);
            if let Some(details) = &check.details {
                println!(": {}", details);
            } else {
                println!();
            }
        }

        println!();
        let passed = self
            .checks
            .iter()
            .filter(|c| c.status == CheckStatus::Pass)
            .count();
        println!("Summary: {}/{} passed", passed, self.checks.len());
        if self.fail_count() > 0 {
            println!(
                "         {} FAILED - provisioning will not succeed",
                self.fail_count()
            );
        }
        if self.warn_count() > 0 {
            println!("         {} warnings", self.warn_count());
        }
    }
}

/// Whether the current process runs with full administrative privilege.
/// Read straight from the kernel: shelling out to `id` would report
/// non-root on any host where the binary is missing or broken.
pub fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Run all preflight checks.
pub fn run_preflight(ctx: &ProvisionContext) -> PreflightReport {
    let mut checks = Vec::new();

    println!("Running preflight checks...\n");

    for tool in REQUIRED_TOOLS {
        match which::which(tool) {
            Ok(path) => checks.push(CheckResult::pass_with(tool, &path.to_string_lossy())),
            Err(_) => checks.push(CheckResult::fail(
                tool,
                "not found in PATH; install it before provisioning",
            )),
        }
    }

    match which::which("apparmor_parser") {
        Ok(_) => checks.push(CheckResult::pass("apparmor_parser")),
        Err(_) => checks.push(CheckResult::warn(
            "apparmor_parser",
            ctx.host.apparmor_hint(),
        )),
    }

    checks.push(input_check(
        "interception patch",
        ctx.patch_path().is_file(),
        &format!(
            "{} not found next to the pipeline",
            ctx.patch_path().display()
        ),
    ));
    checks.push(input_check(
        "sshd_config template",
        ctx.config_template().is_file(),
        &format!("{} not found", ctx.config_template().display()),
    ));
    checks.push(input_check(
        "apparmor profile directory",
        ctx.profile_dir().is_dir(),
        &format!("{} not found", ctx.profile_dir().display()),
    ));

    if is_root() {
        checks.push(CheckResult::pass("running as root"));
    } else {
        checks.push(CheckResult::warn(
            "running as root",
            "preflight may run unprivileged, but provisioning requires root",
        ));
    }

    PreflightReport { checks }
}

fn input_check(name: &str, present: bool, details: &str) -> CheckResult {
    if present {
        CheckResult::pass(name)
    } else {
        CheckResult::fail(name, details)
    }
}

/// Run preflight and bail if any checks fail.
pub fn run_preflight_or_fail(ctx: &ProvisionContext) -> Result<()> {
    let report = run_preflight(ctx);
    report.print();

    if !report.all_passed() {
        bail!(
            "Preflight failed: {} check(s) failed. Fix the issues above before provisioning.",
            report.fail_count()
        );
    }

    println!("All preflight checks passed!\n");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_root_agrees_with_id() {
        // Cross-check the direct euid read against the traditional tool
        // when it is available.
        if which::which("id").is_err() {
            return;
        }
        let out = std::process::Command::new("id").arg("-u").output().unwrap();
        let uid_zero = String::from_utf8_lossy(&out.stdout).trim() == "0";
        assert_eq!(is_root(), uid_zero);
    }

    #[test]
    fn test_report_all_passed() {
        let report = PreflightReport {
            checks: vec![CheckResult::pass("a"), CheckResult::warn("b", "minor")],
        };
        assert!(report.all_passed());
        assert_eq!(report.fail_count(), 0);
        assert_eq!(report.warn_count(), 1);
    }

    #[test]
    fn test_report_with_failure() {
        let report = PreflightReport {
            checks: vec![
                CheckResult::pass("a"),
                CheckResult::fail("b", "missing"),
                CheckResult::fail("c", "missing"),
            ],
        };
        assert!(!report.all_passed());
        assert_eq!(report.fail_count(), 2);
    }

    #[test]
    fn test_input_check() {
        assert_eq!(input_check("x", true, "d").status, CheckStatus::Pass);
        let failed = input_check("x", false, "not found");
        assert_eq!(failed.status, CheckStatus::Fail);
        assert_eq!(failed.details.as_deref(), Some("not found"));
    }
}
