//! Host distribution detection.
//!
//! The prerequisite package set and the AppArmor remediation guidance differ
//! between Debian derivatives. The variant is detected once at startup from
//! /etc/os-release and threaded through the context.

use std::fs;

/// Debian-family host variant this pipeline knows how to provision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostVariant {
    Debian,
    Ubuntu,
    Kali,
    /// Unrecognized distribution; treated like Debian with a caveat in
    /// warnings.
    Other,
}

impl HostVariant {
    /// Detect the running host's variant. Falls back to `Other` when
    /// /etc/os-release is missing or unrecognized.
    pub fn detect() -> Self {
        let content = fs::read_to_string("/etc/os-release").unwrap_or_default();
        Self::from_os_release(&content)
    }

    /// Parse an os-release body. Only the `ID=` field matters.
    pub fn from_os_release(content: &str) -> Self {
        for line in content.lines() {
            let line = line.trim();
            if let Some(value) = line.strip_prefix("ID=") {
                let id = value.trim_matches('"').trim_matches('\'');
                return match id {
                    "kali" => HostVariant::Kali,
                    "ubuntu" => HostVariant::Ubuntu,
                    "debian" => HostVariant::Debian,
                    _ => HostVariant::Other,
                };
            }
        }
        HostVariant::Other
    }

    /// Operator guidance for enabling AppArmor on this host, shown when the
    /// subsystem is absent.
    pub fn apparmor_hint(&self) -> &'static str {
        match self {
            HostVariant::Kali => {
                "Kali does not ship AppArmor by default. Run \
                 'apt install apparmor apparmor-utils', then reboot and re-run setup."
            }
            HostVariant::Debian | HostVariant::Other => {
                "Install AppArmor with 'apt install apparmor apparmor-utils' and \
                 ensure 'apparmor=1 security=apparmor' is on the kernel command line."
            }
            HostVariant::Ubuntu => {
                "Ubuntu normally ships AppArmor; check 'systemctl status apparmor'."
            }
        }
    }
}
