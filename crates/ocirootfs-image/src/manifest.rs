//! OCI image manifest model and media type normalization.
//!
//! Registries still serve Docker-dialect layer media types inside OCI
//! manifests, and some tools omit or mis-tag the config media type. The
//! normalizer rewrites both so the extractor only sees OCI-canonical types.

use std::collections::BTreeMap;

use ocirootfs_common::constants::{
    MEDIA_TYPE_DOCKER_LAYER_TAR, MEDIA_TYPE_DOCKER_LAYER_TAR_GZIP, MEDIA_TYPE_IMAGE_CONFIG,
    MEDIA_TYPE_IMAGE_MANIFEST, MEDIA_TYPE_LAYER_TAR, MEDIA_TYPE_LAYER_TAR_GZIP,
};
use ocirootfs_common::error::{OcirootfsError, Result};
use ocirootfs_common::types::SystemContext;
use serde::{Deserialize, Serialize};

use crate::source::ImageSource;

/// Reference to a content-addressed blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced blob.
    #[serde(default)]
    pub media_type: String,
    /// Content digest, e.g. `sha256:<hex>`.
    pub digest: String,
    /// Blob size in bytes.
    pub size: u64,
    /// Alternate download locations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
    /// Arbitrary metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// A single-platform OCI image manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    /// Manifest schema version (2).
    #[serde(default)]
    pub schema_version: u32,
    /// Declared media type, if embedded in the document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Image configuration blob.
    pub config: Descriptor,
    /// Layers, bottom to top.
    #[serde(default)]
    pub layers: Vec<Descriptor>,
    /// Arbitrary metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// OCI equivalent of a legacy layer media type, if it has one.
#[must_use]
pub fn oci_layer_media_type(media_type: &str) -> Option<&'static str> {
    match media_type {
        MEDIA_TYPE_DOCKER_LAYER_TAR_GZIP => Some(MEDIA_TYPE_LAYER_TAR_GZIP),
        MEDIA_TYPE_DOCKER_LAYER_TAR => Some(MEDIA_TYPE_LAYER_TAR),
        _ => None,
    }
}

impl ImageManifest {
    /// Rewrites media types to their OCI-canonical form in place.
    ///
    /// The config is always tagged as an OCI image config. Legacy Docker
    /// layer types become their OCI equivalents; anything else is left for
    /// the extractor to accept or reject. Normalizing twice is a no-op.
    pub fn normalize(&mut self) {
        self.config.media_type = MEDIA_TYPE_IMAGE_CONFIG.to_string();
        for layer in &mut self.layers {
            if let Some(oci) = oci_layer_media_type(&layer.media_type) {
                layer.media_type = oci.to_string();
            }
        }
    }
}

/// Validates, decodes and normalizes a manifest body.
///
/// # Errors
///
/// Returns [`OcirootfsError::ManifestType`] unless `media_type` is the OCI
/// image manifest type, and [`OcirootfsError::ManifestDecode`] if the body
/// is not a valid manifest document.
pub fn decode_manifest(bytes: &[u8], media_type: &str) -> Result<ImageManifest> {
    if media_type != MEDIA_TYPE_IMAGE_MANIFEST {
        return Err(OcirootfsError::ManifestType {
            media_type: media_type.to_string(),
        });
    }
    let mut manifest: ImageManifest = serde_json::from_slice(bytes)
        .map_err(|source| OcirootfsError::ManifestDecode { source })?;
    manifest.normalize();
    Ok(manifest)
}

/// Fetches the manifest from `source` and returns it normalized.
///
/// Manifest lists are rejected; the reference must already resolve to a
/// single-platform manifest.
///
/// # Errors
///
/// Returns [`OcirootfsError::ManifestFetch`] if the source fails, and the
/// errors of [`decode_manifest`] otherwise.
pub fn normalize_manifest(
    source: &dyn ImageSource,
    sys_ctx: &SystemContext,
) -> Result<ImageManifest> {
    let (bytes, media_type) = source
        .get_manifest(sys_ctx)
        .map_err(|e| OcirootfsError::ManifestFetch {
            reference: source.reference().to_string(),
            source: Box::new(e),
        })?;
    tracing::debug!(
        reference = source.reference(),
        media_type = %media_type,
        "obtained manifest"
    );

    let manifest = decode_manifest(&bytes, &media_type)?;
    tracing::debug!(layers = manifest.layers.len(), "normalized manifest");
    Ok(manifest)
}
