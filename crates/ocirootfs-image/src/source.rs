//! Image source protocol handlers.
//!
//! An image source yields the raw manifest of one resolved reference. The
//! built-in [`LayoutImageSource`] reads it from an on-disk OCI image layout,
//! which is where the fetch step leaves a pulled image.

use std::path::{Path, PathBuf};

use ocirootfs_common::constants::{ANNOTATION_REF_NAME, OCI_INDEX_FILE};
use ocirootfs_common::error::{OcirootfsError, Result};
use ocirootfs_common::types::SystemContext;
use serde::Deserialize;

use crate::hash::Digest;
use crate::manifest::Descriptor;

/// Something that can hand out the manifest of a resolved image reference.
pub trait ImageSource {
    /// Human-readable reference, used in error messages.
    fn reference(&self) -> &str;

    /// Returns the raw manifest bytes and their media type.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be obtained.
    fn get_manifest(&self, sys_ctx: &SystemContext) -> Result<(Vec<u8>, String)>;
}

#[derive(Debug, Deserialize)]
struct ImageIndex {
    #[serde(default)]
    manifests: Vec<Descriptor>,
}

#[derive(Debug, Deserialize)]
struct MediaTypeProbe {
    #[serde(default, rename = "mediaType")]
    media_type: Option<String>,
}

/// Image source backed by an OCI image layout directory.
#[derive(Debug, Clone)]
pub struct LayoutImageSource {
    dir: PathBuf,
    tag: Option<String>,
    reference: String,
}

impl LayoutImageSource {
    /// Creates a source for `tag` (or the sole manifest) in `dir`.
    pub fn new(dir: impl Into<PathBuf>, tag: Option<String>) -> Self {
        let dir = dir.into();
        let reference = match &tag {
            Some(tag) => format!("oci:{}:{tag}", dir.display()),
            None => format!("oci:{}", dir.display()),
        };
        Self {
            dir,
            tag,
            reference,
        }
    }

    /// Layout directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Requested tag, if any.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    fn select<'a>(&self, manifests: &'a [Descriptor]) -> Result<&'a Descriptor> {
        if let Some(tag) = &self.tag {
            return manifests
                .iter()
                .find(|d| d.annotations.get(ANNOTATION_REF_NAME) == Some(tag))
                .ok_or_else(|| OcirootfsError::NotFound {
                    kind: "manifest tag",
                    id: tag.clone(),
                });
        }
        match manifests {
            [only] => Ok(only),
            [] => Err(OcirootfsError::NotFound {
                kind: "manifest",
                id: self.reference.clone(),
            }),
            _ => Err(OcirootfsError::Config {
                message: format!(
                    "{} lists {} manifests, a tag is required",
                    self.reference,
                    manifests.len()
                ),
            }),
        }
    }
}

impl ImageSource for LayoutImageSource {
    fn reference(&self) -> &str {
        &self.reference
    }

    fn get_manifest(&self, sys_ctx: &SystemContext) -> Result<(Vec<u8>, String)> {
        tracing::debug!(
            reference = %self.reference,
            platform = ?sys_ctx.platform,
            "reading manifest from layout"
        );
        let index_path = self.dir.join(OCI_INDEX_FILE);
        let index_data =
            std::fs::read(&index_path).map_err(|e| OcirootfsError::io(&index_path, e))?;
        let index: ImageIndex = serde_json::from_slice(&index_data)?;

        let descriptor = self.select(&index.manifests)?;
        let digest: Digest = descriptor.digest.parse()?;
        let blob_path = digest.blob_path(&self.dir);
        let body = std::fs::read(&blob_path).map_err(|e| OcirootfsError::io(&blob_path, e))?;

        let media_type = if descriptor.media_type.is_empty() {
            serde_json::from_slice::<MediaTypeProbe>(&body)?
                .media_type
                .unwrap_or_default()
        } else {
            descriptor.media_type.clone()
        };
        Ok((body, media_type))
    }
}

/// Resolves an `oci:<dir>[:<tag>]` reference into a layout source.
///
/// # Errors
///
/// Returns an error if the scheme is unsupported or the directory is missing.
pub fn resolve_source(uri: &str) -> Result<LayoutImageSource> {
    let Some(rest) = uri.strip_prefix("oci:") else {
        return Err(OcirootfsError::Config {
            message: format!("unsupported image source URI scheme: {uri}"),
        });
    };
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (dir, tag) = match rest.rsplit_once(':') {
        Some((dir, tag)) if !dir.is_empty() && !tag.is_empty() && !tag.contains('/') => {
            (dir, Some(tag.to_string()))
        }
        _ => (rest, None),
    };

    let path = PathBuf::from(dir);
    if !path.is_dir() {
        return Err(OcirootfsError::NotFound {
            kind: "OCI layout",
            id: dir.to_string(),
        });
    }
    tracing::info!(path = %path.display(), tag = ?tag, "resolved oci: source");
    Ok(LayoutImageSource::new(path, tag))
}
