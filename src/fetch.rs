//! Upstream acquisition and checksum computation.
//!
//! Downloads are synchronous and are not retried: the pipeline treats any
//! acquisition failure as fatal and leaves retry decisions to the operator.

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::Path;

/// Download a single file over HTTP(S) to `dest`.
///
/// Any non-success HTTP status is an error; a partially written file is
/// removed so a rerun never resumes from untrusted bytes.
pub fn fetch(url: &str, dest: &Path) -> Result<()> {
    let client = reqwest::blocking::Client::builder()
        .user_agent("sshmitm-setup/0.1")
        .build()
        .context("Failed to create HTTP client")?;

    let response = client
        .get(url)
        .send()
        .with_context(|| format!("HTTP request failed: {}", url))?;

    let status = response.status();
    if !status.is_success() {
        bail!(
            "HTTP {} for {}: {}",
            status.as_u16(),
            url,
            status.canonical_reason().unwrap_or("Unknown error")
        );
    }

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    let mut file = fs::File::create(dest)
        .with_context(|| format!("Failed to create {}", dest.display()))?;

    let mut response = response;
    if let Err(e) = std::io::copy(&mut response, &mut file) {
        let _ = fs::remove_file(dest);
        return Err(e).with_context(|| format!("Failed to write {}", dest.display()));
    }

    Ok(())
}

/// Compute the SHA-256 digest of a file as lowercase hex.
pub fn sha256_hex(path: &Path) -> Result<String> {
    let file = fs::File::open(path)
        .with_context(|| format!("Failed to open {} for checksum", path.display()))?;

    let mut reader = std::io::BufReader::with_capacity(1024 * 1024, file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 1024 * 1024];

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
