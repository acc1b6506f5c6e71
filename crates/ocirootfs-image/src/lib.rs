//! # ocirootfs-image
//!
//! OCI image handling for the ocirootfs unpack pipeline.
//!
//! Handles:
//! - **Manifests**: OCI manifest model and Docker-to-OCI media type normalization.
//! - **Sources**: `oci:` layout references yielding raw manifests.
//! - **Layouts**: on-disk OCI layouts and layer extraction with ID mapping.
//! - **Hashing**: SHA-256 blob verification.
//! - **Unpack**: the end-to-end rootfs materialization pipeline.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod hash;
pub mod layout;
pub mod manifest;
pub mod source;
pub mod unpack;

pub use ocirootfs_core::perms::check_perms;
pub use unpack::{RootfsUnpacker, unpack_rootfs};
