//! The verification gate: fingerprint pin, detached signature, checksum pin.
//!
//! Chain of trust, in strict order:
//! 1. fetch signing key + archive + detached signature
//! 2. import the key into an ephemeral keyring and pin its fingerprint
//! 3. verify the detached signature with the now-trusted key
//! 4. pin the archive checksum
//!
//! Nothing downstream of this module may touch the archive unless every gate
//! passed. A failed signature deletes the archive before aborting so a rerun
//! can never pick up unverified bytes.
//!
//! gpg is driven exclusively through its machine-readable interfaces:
//! `--with-colons` for key listings and `--status-fd` for verification
//! verdicts, parsed into typed values. Human-readable phrasing is never
//! matched.

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

use crate::config::ProvisionContext;
use crate::error::StageError;
use crate::fetch;
use crate::process::Cmd;

/// Structured result of a detached-signature verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureVerdict {
    /// A cryptographically valid signature was made by a key in the keyring;
    /// carries the fingerprint of the primary key that made it.
    Good { primary_fingerprint: String },
    /// The signature does not match the artifact.
    Bad,
    /// The signing key is not in the keyring.
    NoPublicKey,
    /// No usable verdict in the tool's status output.
    Indeterminate,
}

/// A verdict plus the tool's own exit status. Both must pass: the exit
/// status check is intentionally redundant with the structured verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOutcome {
    pub verdict: SignatureVerdict,
    pub exit_ok: bool,
}

/// Seam for the signature tooling, so gate ordering and fail-closed
/// behavior are testable without gpg.
pub trait Verifier {
    /// Import the key file into the verification keyring and return every
    /// fingerprint it carries (primary and subkeys).
    fn key_fingerprints(&self, key_file: &Path) -> Result<Vec<String>>;

    /// Verify a detached signature over the artifact.
    fn verify_detached(&self, signature: &Path, artifact: &Path) -> Result<VerifyOutcome>;
}

/// Production verifier: gpg with an ephemeral temp-dir keyring, so the
/// operator's own keyring is never consulted or polluted.
pub struct GpgVerifier {
    keyring: TempDir,
}

impl GpgVerifier {
    pub fn new() -> Result<Self> {
        let keyring = TempDir::new().context("Failed to create ephemeral keyring directory")?;
        Ok(Self { keyring })
    }

    fn homedir(&self) -> String {
        self.keyring.path().to_string_lossy().into_owned()
    }
}

impl Verifier for GpgVerifier {
    fn key_fingerprints(&self, key_file: &Path) -> Result<Vec<String>> {
        let home = self.homedir();
        Cmd::new("gpg")
            .args(["--homedir", home.as_str(), "--batch", "--quiet", "--import"])
            .arg_path(key_file)
            .error_msg("Signing key import failed")
            .run()?;

        let listing = Cmd::new("gpg")
            .args(["--homedir", home.as_str(), "--batch", "--with-colons", "--fingerprint"])
            .error_msg("Keyring listing failed")
            .run()?;

        Ok(parse_fingerprint_records(&listing.stdout))
    }

    fn verify_detached(&self, signature: &Path, artifact: &Path) -> Result<VerifyOutcome> {
        let home = self.homedir();
        let result = Cmd::new("gpg")
            .args(["--homedir", home.as_str(), "--batch", "--status-fd", "1", "--verify"])
            .arg_path(signature)
            .arg_path(artifact)
            .allow_fail()
            .run()?;

        Ok(VerifyOutcome {
            verdict: parse_status_lines(&result.stdout),
            exit_ok: result.success(),
        })
    }
}

/// Normalize a fingerprint for comparison: strip whitespace, uppercase.
pub fn normalize_fingerprint(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

/// Extract fingerprints from `gpg --with-colons` output (`fpr` records,
/// field 10).
pub fn parse_fingerprint_records(colons: &str) -> Vec<String> {
    colons
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            if fields.first() == Some(&"fpr") {
                fields.get(9).map(|f| f.to_string())
            } else {
                None
            }
        })
        .filter(|f| !f.is_empty())
        .collect()
}

/// Reduce `gpg --status-fd` output to a typed verdict.
///
/// `VALIDSIG` is the authoritative good-signature record; its last field is
/// the fingerprint of the primary key that made the signature. A `BADSIG`
/// anywhere wins over everything else.
pub fn parse_status_lines(stdout: &str) -> SignatureVerdict {
    let mut good: Option<String> = None;
    let mut no_pubkey = false;

    for line in stdout.lines() {
        let Some(rest) = line.strip_prefix("[GNUPG:] ") else {
            continue;
        };
        let mut tokens = rest.split_whitespace();
        match tokens.next() {
            Some("BADSIG") => return SignatureVerdict::Bad,
            Some("VALIDSIG") => {
                let fields: Vec<&str> = tokens.collect();
                if let Some(primary) = fields.last() {
                    good = Some(primary.to_string());
                }
            }
            Some("NO_PUBKEY") => no_pubkey = true,
            _ => {}
        }
    }

    match (good, no_pubkey) {
        (Some(primary_fingerprint), _) => SignatureVerdict::Good { primary_fingerprint },
        (None, true) => SignatureVerdict::NoPublicKey,
        (None, false) => SignatureVerdict::Indeterminate,
    }
}

/// Fetch the signing key, the archive, and its detached signature.
pub fn acquire(ctx: &ProvisionContext) -> Result<(), StageError> {
    let downloads = [
        (ctx.spec.signing_key_url(), ctx.signing_key_path()),
        (ctx.spec.archive_url(), ctx.archive_path()),
        (ctx.spec.signature_url(), ctx.signature_path()),
    ];

    for (url, dest) in downloads {
        println!("Fetching {}...", url);
        fetch::fetch(&url, &dest).map_err(StageError::Acquisition)?;
    }

    Ok(())
}

/// Run the three trust gates over already-downloaded files, in strict order.
///
/// The fingerprint pin is checked before any signature verification: an
/// attacker-supplied key must never be trusted even if it signs the
/// attacker's own artifact. Fingerprints are compared by normalized exact
/// equality.
pub fn run_trust_gate<V: Verifier>(ctx: &ProvisionContext, verifier: &V) -> Result<(), StageError> {
    let archive = ctx.archive_path();

    // Gate 1: key fingerprint pin.
    println!("Checking signing key fingerprint...");
    let fingerprints = verifier
        .key_fingerprints(&ctx.signing_key_path())
        .map_err(StageError::Trust)?;

    let pinned = normalize_fingerprint(ctx.pins.key_fingerprint);
    let pin_matches = fingerprints
        .iter()
        .any(|f| normalize_fingerprint(f) == pinned);
    if !pin_matches {
        return Err(StageError::Trust(anyhow!(
            "Signing key fingerprint mismatch.\n  Expected: {}\n  Got: {}\n\
             The downloaded key is NOT the pinned release key. Do not proceed.",
            pinned,
            if fingerprints.is_empty() {
                "(no fingerprints found)".to_string()
            } else {
                fingerprints.join(", ")
            }
        )));
    }
    println!("Key fingerprint verified OK");

    // Gate 2: detached signature by the pinned key. Fail-closed: the archive
    // is deleted so a rerun must re-fetch it.
    println!("Verifying detached signature over {}...", ctx.spec.archive);
    let outcome = match verifier.verify_detached(&ctx.signature_path(), &archive) {
        Ok(outcome) => outcome,
        Err(e) => {
            let _ = fs::remove_file(&archive);
            return Err(StageError::Trust(e));
        }
    };

    let signed_by_pinned_key = matches!(
        &outcome.verdict,
        SignatureVerdict::Good { primary_fingerprint } if normalize_fingerprint(primary_fingerprint) == pinned
    );
    if !signed_by_pinned_key || !outcome.exit_ok {
        let _ = fs::remove_file(&archive);
        return Err(StageError::Trust(anyhow!(
            "Detached signature verification failed (verdict: {:?}, tool exit ok: {}).\n\
             Deleted the unverified archive; re-run to fetch it again.",
            outcome.verdict,
            outcome.exit_ok
        )));
    }
    println!("Signature verified OK");

    // Gate 3: checksum pin. The signature-valid archive is kept on disk, but
    // it is not promoted to the build stage.
    println!("Verifying SHA-256 checksum...");
    let actual = fetch::sha256_hex(&archive).map_err(StageError::Trust)?;
    let expected = ctx.pins.archive_sha256.to_lowercase();
    if !actual.starts_with(&expected) {
        return Err(StageError::Trust(anyhow!(
            "Checksum mismatch for {}.\n  Expected: {}\n  Actual:   {}",
            ctx.spec.archive,
            expected,
            actual
        )));
    }
    println!("Checksum verified OK");

    Ok(())
}
