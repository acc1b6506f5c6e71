//! Unified error types for the ocirootfs workspace.
//!
//! Every fatal stage of the unpack pipeline has its own variant so callers
//! can tell which stage failed. A restrictive permission found by the
//! sandbox scanner is deliberately absent: it is advisory, not an error.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum OcirootfsError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A digest validation failed.
    #[error("hash mismatch for {resource}: expected {expected}, got {actual}")]
    HashMismatch {
        /// Resource that failed validation.
        resource: String,
        /// Expected hash value.
        expected: String,
        /// Actual computed hash value.
        actual: String,
    },

    /// Serialization or deserialization of local data failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },

    /// The OCI layout working directory could not be opened.
    #[error("error opening layout at {path}: {source}")]
    LayoutOpen {
        /// Layout directory.
        path: PathBuf,
        /// Cause reported by the layout backend.
        source: Box<OcirootfsError>,
    },

    /// The image source failed to deliver a manifest.
    #[error("error obtaining manifest for {reference}: {source}")]
    ManifestFetch {
        /// Reference the manifest was requested for.
        reference: String,
        /// Cause reported by the image source.
        source: Box<OcirootfsError>,
    },

    /// The manifest has a media type other than the OCI image manifest.
    #[error("error verifying manifest media type: {media_type}")]
    ManifestType {
        /// Media type reported by the image source.
        media_type: String,
    },

    /// The manifest body is not a valid OCI image manifest document.
    #[error("error decoding manifest: {source}")]
    ManifestDecode {
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// A UID/GID mapping descriptor could not be built.
    #[error("error building id mapping: {message}")]
    MappingConstruction {
        /// Why the descriptor was rejected.
        message: String,
    },

    /// The layout backend failed to unpack the rootfs.
    #[error("error unpacking rootfs into {path}: {source}")]
    Unpack {
        /// Rootfs destination.
        path: PathBuf,
        /// Cause reported by the layout backend.
        source: Box<OcirootfsError>,
    },

    /// An entry could not be made owner-manageable.
    #[error("error fixing permissions of {path}: {source}")]
    FixPerms {
        /// Entry that could not be modified.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The rootfs walk hit an access failure that is not a permission error.
    #[error("unable to access rootfs path {path}: {source}")]
    Walk {
        /// Entry that could not be accessed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The OCI layout directory is malformed or of an unsupported version.
    #[error("invalid OCI layout: {message}")]
    InvalidLayout {
        /// What is wrong with the layout.
        message: String,
    },

    /// A layer, or an entry inside it, could not be applied to the rootfs.
    #[error("error extracting {path}: {message}")]
    Extract {
        /// Layer blob or rootfs entry being extracted.
        path: PathBuf,
        /// Why extraction was refused.
        message: String,
    },
}

impl OcirootfsError {
    /// Builds an [`OcirootfsError::Io`] for the given path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, OcirootfsError>;
