//! # ocirootfs-core
//!
//! Host-side primitives for materializing a container rootfs:
//! - **Privilege**: rootless detection and single-entry UID/GID maps.
//! - **Walk**: a filesystem walk that can stop on the first policy violation.
//! - **Perms**: the sandbox permission scanner and the `--fix-perms` repair.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod perms;
pub mod privilege;
pub mod walk;
