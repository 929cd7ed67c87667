//! Stage error taxonomy.
//!
//! Every stage returns `Result<_, StageError>`. All variants are fatal:
//! the driver never retries, it surfaces the failing step's diagnostic and
//! terminates with a non-zero status.

use thiserror::Error;

/// A fatal provisioning failure, tagged by which class of precondition
/// or external operation broke.
#[derive(Debug, Error)]
pub enum StageError {
    /// Missing privilege, missing input file, or an account collision the
    /// operator must resolve (e.g. rerun with --force).
    #[error("precondition failed: {0:#}")]
    Precondition(anyhow::Error),

    /// Network fetch of the key, archive, or signature failed.
    #[error("acquisition failed: {0:#}")]
    Acquisition(anyhow::Error),

    /// Fingerprint pin, detached signature, or checksum pin rejected the
    /// downloaded artifact. Nothing from the artifact has been executed.
    #[error("trust gate rejected the artifact: {0:#}")]
    Trust(anyhow::Error),

    /// Archive layout, patch application, configure/make, or the
    /// built-binary postcondition failed.
    #[error("build failed: {0:#}")]
    Build(anyhow::Error),

    /// Package installation or privileged host setup failed.
    #[error("environment setup failed: {0:#}")]
    Environment(anyhow::Error),
}

impl StageError {
    /// Short tag for summaries and tests.
    pub fn kind(&self) -> &'static str {
        match self {
            StageError::Precondition(_) => "precondition",
            StageError::Acquisition(_) => "acquisition",
            StageError::Trust(_) => "trust",
            StageError::Build(_) => "build",
            StageError::Environment(_) => "environment",
        }
    }
}
