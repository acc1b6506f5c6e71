//! Configuration model for the rootfs unpacker.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{OcirootfsError, Result};
use crate::types::{BuildOptions, SystemContext, Verbosity};

/// Settings for one unpacker instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnpackerConfig {
    /// Verbosity handed to the layout extractor.
    pub verbosity: Verbosity,
    /// Verify each layer blob against its descriptor digest.
    pub verify_digests: bool,
    /// Default post-processing options for bundles built from the CLI.
    pub build: BuildOptions,
    /// Registry settings passed through to the image source.
    pub system: SystemContext,
}

impl Default for UnpackerConfig {
    fn default() -> Self {
        Self {
            verbosity: Verbosity::default(),
            verify_digests: true,
            build: BuildOptions::default(),
            system: SystemContext::default(),
        }
    }
}

impl UnpackerConfig {
    /// Loads a configuration from a JSON file. Missing keys take defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "loading unpacker config");
        let content = std::fs::read_to_string(path).map_err(|e| OcirootfsError::io(path, e))?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_verify_digests() {
        let config = UnpackerConfig::default();
        assert!(config.verify_digests);
        assert_eq!(config.verbosity, Verbosity::Normal);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ocirootfs.json");
        std::fs::write(&path, r#"{"verbosity":"debug","build":{"sandbox_target":true}}"#)
            .expect("write");

        let config = UnpackerConfig::from_json_file(&path).expect("load");
        assert_eq!(config.verbosity, Verbosity::Debug);
        assert!(config.build.sandbox_target);
        assert!(!config.build.fix_perms);
        assert!(config.verify_digests);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = UnpackerConfig::from_json_file(&dir.path().join("absent.json"));
        assert!(matches!(result, Err(OcirootfsError::Io { .. })));
    }

    #[test]
    fn malformed_file_is_a_serialization_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").expect("write");
        assert!(matches!(
            UnpackerConfig::from_json_file(&path),
            Err(OcirootfsError::Serialization { .. })
        ));
    }
}
