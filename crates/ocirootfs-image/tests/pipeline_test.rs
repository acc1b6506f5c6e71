//! End-to-end tests for the rootfs unpack pipeline.
//!
//! Each test writes a real OCI image layout (blobs, `index.json`,
//! `oci-layout`) into a temporary directory and unpacks it with a synthetic
//! rootless privilege context, so no real root is required:
//! 1. Docker-dialect layers are normalized and extracted in order
//! 2. Sandbox targets keep restrictive modes and only warn
//! 3. `fix_perms` leaves every entry owner-manageable
//! 4. Re-running replaces an existing rootfs
//! 5. Manifest type and digest failures abort with stage-qualified errors

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use ocirootfs_common::config::UnpackerConfig;
use ocirootfs_common::constants::{
    ANNOTATION_REF_NAME, MEDIA_TYPE_DOCKER_LAYER_TAR, MEDIA_TYPE_DOCKER_LAYER_TAR_GZIP,
    MEDIA_TYPE_IMAGE_INDEX, MEDIA_TYPE_IMAGE_MANIFEST,
};
use ocirootfs_common::error::OcirootfsError;
use ocirootfs_common::types::{BuildOptions, Bundle, SystemContext};
use ocirootfs_core::perms::find_restrictive;
use ocirootfs_core::privilege::PrivilegeContext;
use ocirootfs_image::RootfsUnpacker;
use ocirootfs_image::hash::hash_bytes;
use ocirootfs_image::source::LayoutImageSource;

// ── Fixtures ─────────────────────────────────────────────────────────

fn tar_layer(entries: &[(&str, Option<&[u8]>, u32)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, data, mode) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_mode(*mode);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(1_700_000_000);
        match data {
            Some(data) => {
                header.set_size(data.len() as u64);
                header.set_cksum();
                builder.append_data(&mut header, path, *data).unwrap();
            }
            None => {
                header.set_entry_type(tar::EntryType::Directory);
                header.set_size(0);
                header.set_cksum();
                builder.append_data(&mut header, path, std::io::empty()).unwrap();
            }
        }
    }
    builder.into_inner().unwrap()
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn put_blob(layout: &Path, data: &[u8]) -> serde_json::Value {
    let digest = hash_bytes(data);
    let path = digest.blob_path(layout);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, data).unwrap();
    serde_json::json!({ "digest": digest.to_string(), "size": data.len() })
}

/// Writes an OCI layout tagged `latest` and returns its directory.
fn write_layout(root: &Path, manifest_type: &str, layers: &[(&str, Vec<u8>)]) -> PathBuf {
    let layout = root.join("oci");
    fs::create_dir_all(layout.join("blobs/sha256")).unwrap();
    fs::write(layout.join("oci-layout"), r#"{"imageLayoutVersion":"1.0.0"}"#).unwrap();

    // Docker tooling tags the config with its own media type.
    let mut config = put_blob(&layout, br#"{"architecture":"amd64","os":"linux"}"#);
    config["mediaType"] = "application/vnd.docker.container.image.v1+json".into();

    let layer_descriptors: Vec<serde_json::Value> = layers
        .iter()
        .map(|(media_type, data)| {
            let mut d = put_blob(&layout, data);
            d["mediaType"] = (*media_type).into();
            d
        })
        .collect();

    let manifest = serde_json::json!({
        "schemaVersion": 2,
        "mediaType": manifest_type,
        "config": config,
        "layers": layer_descriptors,
    });
    let mut manifest_desc = put_blob(&layout, manifest.to_string().as_bytes());
    manifest_desc["mediaType"] = manifest_type.into();
    let mut annotations = serde_json::Map::new();
    let _ = annotations.insert(ANNOTATION_REF_NAME.to_string(), "latest".into());
    manifest_desc["annotations"] = serde_json::Value::Object(annotations);

    let index = serde_json::json!({ "schemaVersion": 2, "manifests": [manifest_desc] });
    fs::write(layout.join("index.json"), index.to_string()).unwrap();
    layout
}

fn standard_layers() -> Vec<(&'static str, Vec<u8>)> {
    let base = tar_layer(&[
        ("bin", None, 0o755),
        ("bin/sh", Some(b"#!/bin/sh\n".as_slice()), 0o555),
        ("etc", None, 0o755),
        ("etc/hostname", Some(b"base\n".as_slice()), 0o644),
        ("root", None, 0o500),
        ("root/.profile", Some(b"umask 077\n".as_slice()), 0o400),
    ]);
    let top = tar_layer(&[
        ("etc/hostname", Some(b"top\n".as_slice()), 0o644),
        ("etc/.wh.motd", Some(b"".as_slice()), 0o644),
    ]);
    vec![
        (MEDIA_TYPE_DOCKER_LAYER_TAR_GZIP, gzip(&base)),
        (MEDIA_TYPE_DOCKER_LAYER_TAR, top),
    ]
}

fn rootless_unpacker() -> RootfsUnpacker {
    RootfsUnpacker::new(
        PrivilegeContext::synthetic(1000, 1000, true),
        UnpackerConfig::default(),
    )
}

fn mode_of(path: &Path) -> u32 {
    fs::symlink_metadata(path).unwrap().permissions().mode() & 0o777
}

fn unlock(rootfs: &Path) {
    ocirootfs_core::perms::fix_perms(rootfs).unwrap();
}

// ── Pipeline ─────────────────────────────────────────────────────────

#[test]
fn docker_layers_are_normalized_and_extracted_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let layout = write_layout(dir.path(), MEDIA_TYPE_IMAGE_MANIFEST, &standard_layers());
    let bundle = Bundle::new(&layout, dir.path().join("rootfs"));
    let source = LayoutImageSource::new(&layout, Some("latest".into()));

    rootless_unpacker()
        .unpack(&bundle, &source, &SystemContext::default())
        .expect("unpack");

    let rootfs = &bundle.rootfs_path;
    assert_eq!(fs::read_to_string(rootfs.join("etc/hostname")).unwrap(), "top\n");
    assert_eq!(fs::read_to_string(rootfs.join("bin/sh")).unwrap(), "#!/bin/sh\n");
    assert!(!rootfs.join("etc/.wh.motd").exists());
    unlock(rootfs);
}

#[test]
fn sandbox_target_keeps_restrictive_modes_and_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let layout = write_layout(dir.path(), MEDIA_TYPE_IMAGE_MANIFEST, &standard_layers());
    let bundle = Bundle::new(&layout, dir.path().join("rootfs")).with_options(BuildOptions {
        fix_perms: false,
        sandbox_target: true,
    });
    let source = LayoutImageSource::new(&layout, Some("latest".into()));

    rootless_unpacker()
        .unpack(&bundle, &source, &SystemContext::default())
        .expect("restrictive permissions only warn");

    assert_eq!(mode_of(&bundle.rootfs_path.join("root")), 0o500);
    assert_eq!(
        find_restrictive(&bundle.rootfs_path).unwrap(),
        Some(bundle.rootfs_path.join("root"))
    );
    unlock(&bundle.rootfs_path);
}

#[test]
fn fix_perms_leaves_every_entry_owner_manageable() {
    let dir = tempfile::tempdir().unwrap();
    let layout = write_layout(dir.path(), MEDIA_TYPE_IMAGE_MANIFEST, &standard_layers());
    let bundle = Bundle::new(&layout, dir.path().join("rootfs")).with_options(BuildOptions {
        fix_perms: true,
        sandbox_target: true,
    });
    let source = LayoutImageSource::new(&layout, Some("latest".into()));

    rootless_unpacker()
        .unpack(&bundle, &source, &SystemContext::default())
        .expect("unpack");

    let rootfs = &bundle.rootfs_path;
    assert_eq!(mode_of(&rootfs.join("root")), 0o700);
    assert_eq!(mode_of(&rootfs.join("root/.profile")), 0o600);
    assert_eq!(mode_of(&rootfs.join("bin/sh")), 0o755);
    assert_eq!(find_restrictive(rootfs).unwrap(), None);
}

#[test]
fn rerun_replaces_existing_rootfs() {
    let dir = tempfile::tempdir().unwrap();
    let layout = write_layout(dir.path(), MEDIA_TYPE_IMAGE_MANIFEST, &standard_layers());
    let bundle = Bundle::new(&layout, dir.path().join("rootfs")).with_options(BuildOptions {
        fix_perms: true,
        sandbox_target: false,
    });
    fs::create_dir_all(bundle.rootfs_path.join("leftover")).unwrap();
    fs::write(bundle.rootfs_path.join("leftover/file"), b"stale").unwrap();
    let source = LayoutImageSource::new(&layout, Some("latest".into()));

    let unpacker = rootless_unpacker();
    unpacker.unpack(&bundle, &source, &SystemContext::default()).expect("first");
    unpacker.unpack(&bundle, &source, &SystemContext::default()).expect("second");

    assert!(!bundle.rootfs_path.join("leftover").exists());
    assert!(bundle.rootfs_path.join("etc/hostname").exists());
}

// ── Failures ─────────────────────────────────────────────────────────

#[test]
fn index_media_type_fails_before_extraction() {
    let dir = tempfile::tempdir().unwrap();
    let layout = write_layout(dir.path(), MEDIA_TYPE_IMAGE_INDEX, &standard_layers());
    let bundle = Bundle::new(&layout, dir.path().join("rootfs"));
    fs::create_dir_all(&bundle.rootfs_path).unwrap();
    fs::write(bundle.rootfs_path.join("untouched"), b"x").unwrap();
    let source = LayoutImageSource::new(&layout, Some("latest".into()));

    let err = rootless_unpacker()
        .unpack(&bundle, &source, &SystemContext::default())
        .unwrap_err();

    assert!(matches!(err, OcirootfsError::ManifestType { .. }));
    assert!(bundle.rootfs_path.join("untouched").exists());
}

#[test]
fn tampered_layer_is_an_unpack_error() {
    let dir = tempfile::tempdir().unwrap();
    let layers = standard_layers();
    let layout = write_layout(dir.path(), MEDIA_TYPE_IMAGE_MANIFEST, &layers);
    let top = hash_bytes(&layers[1].1);
    fs::write(top.blob_path(&layout), b"not the layer you are looking for").unwrap();
    let bundle = Bundle::new(&layout, dir.path().join("rootfs"));
    let source = LayoutImageSource::new(&layout, Some("latest".into()));

    let err = rootless_unpacker()
        .unpack(&bundle, &source, &SystemContext::default())
        .unwrap_err();

    match &err {
        OcirootfsError::Unpack { source, .. } => {
            assert!(matches!(**source, OcirootfsError::HashMismatch { .. }));
        }
        other => panic!("unexpected error {other}"),
    }
    assert!(err.to_string().starts_with("error unpacking rootfs into"));
    if bundle.rootfs_path.exists() {
        unlock(&bundle.rootfs_path);
    }
}

#[test]
fn missing_layout_is_a_layout_open_error() {
    let dir = tempfile::tempdir().unwrap();
    let bundle = Bundle::new(dir.path().join("absent"), dir.path().join("rootfs"));
    let source = LayoutImageSource::new(dir.path().join("absent"), None);

    let err = rootless_unpacker()
        .unpack(&bundle, &source, &SystemContext::default())
        .unwrap_err();
    assert!(matches!(err, OcirootfsError::LayoutOpen { .. }));
}
