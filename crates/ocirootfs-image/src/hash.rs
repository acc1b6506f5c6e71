//! SHA-256 content verification.
//!
//! Validates layer blobs against the digests their descriptors declare.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ocirootfs_common::constants::OCI_BLOBS_DIR;
use ocirootfs_common::error::{OcirootfsError, Result};
use sha2::{Digest as _, Sha256};

/// Length of a hex-encoded SHA-256 digest.
const SHA256_HEX_LENGTH: usize = 64;

/// A content digest of the form `sha256:<hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    hex: String,
}

impl Digest {
    /// Wraps a hex-encoded SHA-256 value.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not 64 lowercase hex characters.
    pub fn sha256(hex: impl Into<String>) -> Result<Self> {
        let hex = hex.into();
        if hex.len() != SHA256_HEX_LENGTH
            || !hex.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        {
            return Err(OcirootfsError::Config {
                message: format!("invalid SHA-256 hex string: {hex}"),
            });
        }
        Ok(Self { hex })
    }

    /// Hex-encoded value without the algorithm prefix.
    #[must_use]
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Location of the blob with this digest inside an OCI layout.
    #[must_use]
    pub fn blob_path(&self, layout_root: &Path) -> PathBuf {
        layout_root.join(OCI_BLOBS_DIR).join("sha256").join(&self.hex)
    }
}

impl FromStr for Digest {
    type Err = OcirootfsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some(("sha256", hex)) => Self::sha256(hex),
            Some((algorithm, _)) => Err(OcirootfsError::Config {
                message: format!("unsupported digest algorithm {algorithm:?} in {s}"),
            }),
            None => Err(OcirootfsError::Config {
                message: format!("digest {s:?} has no algorithm prefix"),
            }),
        }
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.hex)
    }
}

/// Computes the SHA-256 digest of a byte slice.
#[must_use]
pub fn hash_bytes(data: &[u8]) -> Digest {
    Digest {
        hex: format!("{:x}", Sha256::digest(data)),
    }
}

/// Computes the SHA-256 digest of a file.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn hash_file(path: &Path) -> Result<Digest> {
    tracing::debug!(path = %path.display(), "computing SHA-256 hash");
    let mut file = std::fs::File::open(path).map_err(|e| OcirootfsError::io(path, e))?;
    let mut hasher = Sha256::new();
    let _ = std::io::copy(&mut file, &mut hasher).map_err(|e| OcirootfsError::io(path, e))?;
    Ok(Digest {
        hex: format!("{:x}", hasher.finalize()),
    })
}

/// Validates that a file matches the expected digest.
///
/// # Errors
///
/// Returns [`OcirootfsError::HashMismatch`] if the digests differ.
pub fn validate_hash(path: &Path, expected: &Digest) -> Result<()> {
    tracing::debug!(path = %path.display(), expected = %expected, "validating SHA-256 hash");
    let actual = hash_file(path)?;
    if &actual != expected {
        return Err(OcirootfsError::HashMismatch {
            resource: path.display().to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}
