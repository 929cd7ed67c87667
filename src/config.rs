//! Pinned artifact identity, trust pins, and the provisioning context.
//!
//! The context is an explicit value threaded through every stage; nothing in
//! the pipeline reads a module-level working directory. Work dir and account
//! placement can be overridden from .env or environment variables
//! (environment wins), but the trust pins are compile-time constants and are
//! never derived from downloaded data.

use std::env;
use std::path::{Path, PathBuf};

use crate::host::HostVariant;

/// Upstream publisher location for the three fetched files.
pub const UPSTREAM_BASE_URL: &str = "https://ftp.openbsd.org/pub/OpenBSD/OpenSSH/portable";

/// Installed name of the interception daemon. Deliberately distinct from
/// `sshd` so it can never collide with a system-wide OpenSSH install.
pub const DAEMON_BIN: &str = "sshd_mitm";

/// Installed name of the patched client binary.
pub const CLIENT_BIN: &str = "ssh";

/// Identifies exactly one upstream release and its local patch lineage.
#[derive(Debug, Clone)]
pub struct ArtifactSpec {
    /// Upstream version string, e.g. "7.5p1".
    pub version: &'static str,
    /// Source archive file name.
    pub archive: &'static str,
    /// Detached signature file name.
    pub signature: &'static str,
    /// Publisher signing key file name.
    pub signing_key: &'static str,
    /// Directory name the archive is expected to extract to.
    pub source_dir: &'static str,
    /// Name the extracted tree is renamed to once it enters the patched
    /// lineage.
    pub patched_dir: &'static str,
    /// Local interception patch file name.
    pub patch_file: &'static str,
}

impl ArtifactSpec {
    /// The one release this pipeline provisions.
    pub fn openssh_7_5p1() -> Self {
        Self {
            version: "7.5p1",
            archive: "openssh-7.5p1.tar.gz",
            signature: "openssh-7.5p1.tar.gz.asc",
            signing_key: "RELEASE_KEY.asc",
            source_dir: "openssh-7.5p1",
            patched_dir: "openssh-7.5p1-mitm",
            patch_file: "openssh-7.5p1-mitm.patch",
        }
    }

    pub fn archive_url(&self) -> String {
        format!("{}/{}", UPSTREAM_BASE_URL, self.archive)
    }

    pub fn signature_url(&self) -> String {
        format!("{}/{}", UPSTREAM_BASE_URL, self.signature)
    }

    pub fn signing_key_url(&self) -> String {
        format!("{}/{}", UPSTREAM_BASE_URL, self.signing_key)
    }
}

/// Hard-coded expected values used to detect tampering independent of the
/// channel that delivered the data.
#[derive(Debug, Clone)]
pub struct TrustPin {
    /// Expected fingerprint of the publisher's signing key (hex; whitespace
    /// and case are normalized before comparison).
    pub key_fingerprint: &'static str,
    /// Expected SHA-256 digest of the source archive (hex).
    pub archive_sha256: &'static str,
}

impl TrustPin {
    /// Pins for the OpenSSH 7.5p1 release artifacts.
    pub fn openssh_release() -> Self {
        Self {
            key_fingerprint: "59C2 118E D206 D927 E667 EBE3 D3E5 F56B 6D92 0D30",
            archive_sha256: "9846e3c5fab9f0547400b4d2c017992f914222b3fd1f8eee6c7dc6bc5e59f9f0",
        }
    }
}

/// The unprivileged, privilege-separated account the daemon runs under.
#[derive(Debug, Clone)]
pub struct ServiceAccountSpec {
    pub name: String,
    pub home: PathBuf,
}

impl ServiceAccountSpec {
    pub fn new(name: impl Into<String>, home: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            home: home.into(),
        }
    }

    /// Installed binaries, mode 0755.
    pub fn bin_dir(&self) -> PathBuf {
        self.home.join("bin")
    }

    /// Daemon config and host keys, mode 0755.
    pub fn etc_dir(&self) -> PathBuf {
        self.home.join("etc")
    }

    /// Scratch space for session artifacts, mode 0700.
    pub fn tmp_dir(&self) -> PathBuf {
        self.home.join("tmp")
    }

    /// Privilege-separation chroot target, mode 0700.
    pub fn empty_dir(&self) -> PathBuf {
        self.home.join("empty")
    }

    pub fn daemon_path(&self) -> PathBuf {
        self.bin_dir().join(DAEMON_BIN)
    }

    pub fn client_path(&self) -> PathBuf {
        self.bin_dir().join(CLIENT_BIN)
    }

    pub fn config_path(&self) -> PathBuf {
        self.etc_dir().join("sshd_config")
    }

    pub fn rsa_key_path(&self) -> PathBuf {
        self.etc_dir().join("ssh_host_rsa_key")
    }

    pub fn ed25519_key_path(&self) -> PathBuf {
        self.etc_dir().join("ssh_host_ed25519_key")
    }

    pub fn run_script_path(&self) -> PathBuf {
        self.home.join("run.sh")
    }
}

/// Everything a stage needs: pinned spec, trust pins, filesystem layout,
/// account placement, and the detected host variant.
#[derive(Debug, Clone)]
pub struct ProvisionContext {
    /// Directory holding the pipeline's own inputs (patch file, sshd_config
    /// template, apparmor/ profile directory).
    pub base_dir: PathBuf,
    /// Directory for transient downloads and build trees.
    pub work_dir: PathBuf,
    pub spec: ArtifactSpec,
    pub pins: TrustPin,
    pub account: ServiceAccountSpec,
    /// System-wide AppArmor profile directory (normally /etc/apparmor.d).
    pub apparmor_dir: PathBuf,
    pub host: HostVariant,
}

impl ProvisionContext {
    /// Build the context for a real run.
    ///
    /// Overrides (env wins over .env, which `main` loads first):
    /// - `SSHMITM_WORK_DIR`  — downloads/build location (default: base dir)
    /// - `SSHMITM_USER`      — service account name (default: ssh-mitm)
    /// - `SSHMITM_HOME`      — service account home (default: /home/<user>)
    pub fn from_env(base_dir: &Path, host: HostVariant) -> Self {
        let work_dir = env::var("SSHMITM_WORK_DIR")
            .map(|s| {
                let path = PathBuf::from(s);
                if path.is_absolute() {
                    path
                } else {
                    base_dir.join(path)
                }
            })
            .unwrap_or_else(|_| base_dir.to_path_buf());

        let name = env::var("SSHMITM_USER").unwrap_or_else(|_| "ssh-mitm".to_string());
        let home = env::var("SSHMITM_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/home").join(&name));

        Self {
            base_dir: base_dir.to_path_buf(),
            work_dir,
            spec: ArtifactSpec::openssh_7_5p1(),
            pins: TrustPin::openssh_release(),
            account: ServiceAccountSpec::new(name, home),
            apparmor_dir: PathBuf::from("/etc/apparmor.d"),
            host,
        }
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.work_dir.join("downloads")
    }

    pub fn build_dir(&self) -> PathBuf {
        self.work_dir.join("build")
    }

    pub fn archive_path(&self) -> PathBuf {
        self.downloads_dir().join(self.spec.archive)
    }

    pub fn signature_path(&self) -> PathBuf {
        self.downloads_dir().join(self.spec.signature)
    }

    pub fn signing_key_path(&self) -> PathBuf {
        self.downloads_dir().join(self.spec.signing_key)
    }

    /// Pristine extraction target, before the tree enters the patched
    /// lineage.
    pub fn source_tree(&self) -> PathBuf {
        self.build_dir().join(self.spec.source_dir)
    }

    /// The renamed, patched build tree.
    pub fn patched_tree(&self) -> PathBuf {
        self.build_dir().join(self.spec.patched_dir)
    }

    pub fn patch_path(&self) -> PathBuf {
        self.base_dir.join(self.spec.patch_file)
    }

    pub fn config_template(&self) -> PathBuf {
        self.base_dir.join("sshd_config")
    }

    /// Local directory of AppArmor profiles shipped next to the pipeline.
    pub fn profile_dir(&self) -> PathBuf {
        self.base_dir.join("apparmor")
    }

    /// Print the effective configuration for the operator.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  Release:      OpenSSH {}", self.spec.version);
        println!("  Work dir:     {}", self.work_dir.display());
        println!("  Account:      {}", self.account.name);
        println!("  Account home: {}", self.account.home.display());
        println!("  Host variant: {:?}", self.host);
    }
}
