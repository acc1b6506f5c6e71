//! OCI image layout access and rootfs extraction.
//!
//! [`LayoutBackend`] and [`LayoutHandle`] are the seam the unpack pipeline
//! talks to. [`OciLayout`] is the built-in implementation: it applies the
//! manifest's layers in order with `tar` and `flate2`, honours OCI
//! whiteouts, and translates entry ownership through the map options.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs::{self, File, Metadata, Permissions};
use std::io::{self, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use ocirootfs_common::constants::{
    MEDIA_TYPE_LAYER_TAR, MEDIA_TYPE_LAYER_TAR_GZIP, OCI_BLOBS_DIR, OCI_LAYOUT_FILE,
    OCI_LAYOUT_VERSION, OWNER_RWX, WHITEOUT_OPAQUE, WHITEOUT_PREFIX,
};
use ocirootfs_common::error::{OcirootfsError, Result};
use ocirootfs_common::types::{MapOptions, Verbosity};
use serde::Deserialize;
use tracing::Level;

use crate::hash::{self, Digest};
use crate::manifest::ImageManifest;

/// Options for a single rootfs extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpackOptions {
    /// Ownership translation.
    pub map_options: MapOptions,
    /// How much the extractor may log.
    pub verbosity: Verbosity,
    /// Check each layer blob against its digest before applying it.
    pub verify_digests: bool,
}

impl Default for UnpackOptions {
    fn default() -> Self {
        Self {
            map_options: MapOptions::default(),
            verbosity: Verbosity::default(),
            verify_digests: true,
        }
    }
}

/// Opens OCI layouts.
pub trait LayoutBackend {
    /// Handle to an opened layout.
    type Handle: LayoutHandle;

    /// Opens the layout rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if `dir` is not a usable OCI layout.
    fn open_layout(&self, dir: &Path) -> Result<Self::Handle>;
}

/// An opened OCI layout that can materialize a rootfs.
pub trait LayoutHandle {
    /// Extracts every layer of `manifest` into `dest`, which must not exist.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed layers, digest mismatches, unsupported
    /// layer types, unmapped IDs, or I/O failures.
    fn unpack_rootfs(
        &self,
        dest: &Path,
        manifest: &ImageManifest,
        options: &UnpackOptions,
    ) -> Result<()>;
}

/// Backend that opens [`OciLayout`]s from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct OciLayoutBackend;

impl LayoutBackend for OciLayoutBackend {
    type Handle = OciLayout;

    fn open_layout(&self, dir: &Path) -> Result<OciLayout> {
        OciLayout::open(dir)
    }
}

#[derive(Debug, Deserialize)]
struct LayoutMarker {
    #[serde(rename = "imageLayoutVersion")]
    image_layout_version: String,
}

/// An OCI image layout directory on disk.
#[derive(Debug, Clone)]
pub struct OciLayout {
    root: PathBuf,
}

impl OciLayout {
    /// Opens the layout at `root`, checking its marker file and blob store.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker is missing, malformed, or names an
    /// unsupported version, or if there is no `blobs` directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tracing::debug!(path = %root.display(), "opening OCI layout");

        let marker_path = root.join(OCI_LAYOUT_FILE);
        let marker_data =
            fs::read(&marker_path).map_err(|e| OcirootfsError::io(&marker_path, e))?;
        let marker: LayoutMarker = serde_json::from_slice(&marker_data)?;
        if marker.image_layout_version != OCI_LAYOUT_VERSION {
            return Err(OcirootfsError::InvalidLayout {
                message: format!(
                    "unsupported image layout version {}",
                    marker.image_layout_version
                ),
            });
        }

        if !root.join(OCI_BLOBS_DIR).is_dir() {
            return Err(OcirootfsError::NotFound {
                kind: "blob directory",
                id: root.join(OCI_BLOBS_DIR).display().to_string(),
            });
        }
        Ok(Self { root })
    }

    /// Root directory of the layout.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the blob with the given digest.
    #[must_use]
    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        digest.blob_path(&self.root)
    }
}

impl LayoutHandle for OciLayout {
    fn unpack_rootfs(
        &self,
        dest: &Path,
        manifest: &ImageManifest,
        options: &UnpackOptions,
    ) -> Result<()> {
        if fs::symlink_metadata(dest).is_ok() {
            return Err(OcirootfsError::Extract {
                path: dest.to_path_buf(),
                message: "rootfs destination already exists".to_string(),
            });
        }
        fs::create_dir_all(dest).map_err(|e| OcirootfsError::io(dest, e))?;

        for (index, layer) in manifest.layers.iter().enumerate() {
            let digest: Digest = layer.digest.parse()?;
            let blob = self.blob_path(&digest);
            if options.verify_digests {
                hash::validate_hash(&blob, &digest)?;
            }
            if options.verbosity.allows(Level::INFO) {
                tracing::info!(
                    layer = index,
                    digest = %digest,
                    media_type = %layer.media_type,
                    "applying layer"
                );
            }
            apply_layer(&blob, &layer.media_type, dest, options)?;
        }
        Ok(())
    }
}

fn apply_layer(
    blob: &Path,
    media_type: &str,
    dest: &Path,
    options: &UnpackOptions,
) -> Result<()> {
    let open = || File::open(blob).map_err(|e| OcirootfsError::io(blob, e));
    let extractor = LayerExtractor::new(dest, options);
    match media_type {
        MEDIA_TYPE_LAYER_TAR => extractor.extract(tar::Archive::new(open()?)),
        MEDIA_TYPE_LAYER_TAR_GZIP => {
            extractor.extract(tar::Archive::new(flate2::read::GzDecoder::new(open()?)))
        }
        other => Err(OcirootfsError::Extract {
            path: blob.to_path_buf(),
            message: format!("unsupported layer media type {other}"),
        }),
    }
}

/// Applies one layer archive onto a rootfs.
struct LayerExtractor<'a> {
    dest: &'a Path,
    options: &'a UnpackOptions,
    /// Directory modes loosened during extraction, restored in reverse order.
    deferred: Vec<(PathBuf, u32)>,
    /// Rootfs-relative paths this layer has extracted so far.
    written: HashSet<PathBuf>,
}

impl<'a> LayerExtractor<'a> {
    fn new(dest: &'a Path, options: &'a UnpackOptions) -> Self {
        Self {
            dest,
            options,
            deferred: Vec::new(),
            written: HashSet::new(),
        }
    }

    fn extract<R: Read>(mut self, mut archive: tar::Archive<R>) -> Result<()> {
        archive.set_preserve_permissions(true);
        archive.set_preserve_mtime(true);
        archive.set_preserve_ownerships(false);
        archive.set_unpack_xattrs(false);
        archive.set_overwrite(true);

        let result = self.apply_entries(&mut archive);
        let restored = self.restore_modes();
        result.and(restored)
    }

    fn apply_entries<R: Read>(&mut self, archive: &mut tar::Archive<R>) -> Result<()> {
        let entries = archive
            .entries()
            .map_err(|e| OcirootfsError::io(self.dest, e))?;
        for entry in entries {
            let mut entry = entry.map_err(|e| OcirootfsError::io(self.dest, e))?;
            let raw_path = entry
                .path()
                .map_err(|e| OcirootfsError::io(self.dest, e))?
                .into_owned();
            let rel = sanitize(&raw_path)?;
            if rel.as_os_str().is_empty() {
                continue;
            }
            self.loosen_parents(&rel)?;

            if let Some(name) = rel.file_name().and_then(OsStr::to_str) {
                if name.starts_with(WHITEOUT_PREFIX) {
                    self.apply_whiteout(&rel, name)?;
                    continue;
                }
            }

            let target = self.dest.join(&rel);
            let header = entry.header();
            let mode = header.mode().map_err(|e| OcirootfsError::io(&target, e))? & 0o7777;
            let kind = header.entry_type();
            // Rootless extraction keeps the invoking user as owner, so the
            // archived ids are never consulted.
            let owner = if self.options.map_options.rootless {
                None
            } else {
                Some((
                    header_id(header.uid(), &target)?,
                    header_id(header.gid(), &target)?,
                ))
            };

            let unpacked = entry
                .unpack_in(self.dest)
                .map_err(|e| OcirootfsError::io(&target, e))?;
            if !unpacked {
                return Err(escape_error(&raw_path));
            }
            if self.options.verbosity.allows(Level::DEBUG) {
                tracing::debug!(path = %rel.display(), mode, "unpacked entry");
            }

            if let Some((uid, gid)) = owner {
                self.apply_owner(&target, uid, gid)?;
                if !kind.is_symlink() && !kind.is_hard_link() {
                    // chown clears set-id bits, so the mode goes back on afterwards.
                    set_mode(&target, mode)?;
                }
            }
            if kind.is_dir() && mode & OWNER_RWX != OWNER_RWX {
                set_mode(&target, mode | OWNER_RWX)?;
                self.deferred.push((target, mode));
            }
            let _ = self.written.insert(rel);
        }
        Ok(())
    }

    fn apply_owner(&self, target: &Path, uid: u32, gid: u32) -> Result<()> {
        let map = &self.options.map_options;
        let host_uid = map.map_uid(uid).ok_or_else(|| unmapped("uid", uid, target))?;
        let host_gid = map.map_gid(gid).ok_or_else(|| unmapped("gid", gid, target))?;
        std::os::unix::fs::lchown(target, Some(host_uid), Some(host_gid))
            .map_err(|e| OcirootfsError::io(target, e))
    }

    /// Makes every existing ancestor of `rel` owner-writable so the entry
    /// can be created or removed without root.
    fn loosen_parents(&mut self, rel: &Path) -> Result<()> {
        let mut current = self.dest.to_path_buf();
        let Some(parent) = rel.parent() else {
            return Ok(());
        };
        for component in parent.components() {
            current.push(component);
            let Ok(meta) = fs::symlink_metadata(&current) else {
                break;
            };
            if !meta.is_dir() {
                break;
            }
            self.loosen_dir(&current, &meta)?;
        }
        Ok(())
    }

    fn loosen_dir(&mut self, dir: &Path, meta: &Metadata) -> Result<()> {
        let mode = meta.permissions().mode() & 0o7777;
        if mode & OWNER_RWX != OWNER_RWX {
            set_mode(dir, mode | OWNER_RWX)?;
            self.deferred.push((dir.to_path_buf(), mode));
        }
        Ok(())
    }

    fn apply_whiteout(&mut self, rel: &Path, name: &str) -> Result<()> {
        let parent = rel.parent().unwrap_or_else(|| Path::new(""));
        let Some(dir) = self.existing_dir(parent)? else {
            return Ok(());
        };

        if name == WHITEOUT_OPAQUE {
            return self.clear_lower(parent);
        }

        let hidden = name.strip_prefix(WHITEOUT_PREFIX).unwrap_or(name);
        if hidden.is_empty() || hidden == "." || hidden == ".." {
            return Err(escape_error(rel));
        }
        remove_entry(&dir.join(hidden))
    }

    /// Resolves `rel` to a real directory inside the rootfs, or `None` if
    /// it does not exist. Symlinked or non-directory components are refused.
    fn existing_dir(&self, rel: &Path) -> Result<Option<PathBuf>> {
        let mut current = self.dest.to_path_buf();
        for component in rel.components() {
            current.push(component);
            match fs::symlink_metadata(&current) {
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => {
                    return Err(OcirootfsError::Extract {
                        path: current,
                        message: "whiteout parent is not a directory in the rootfs".to_string(),
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(OcirootfsError::io(&current, e)),
            }
        }
        Ok(Some(current))
    }

    /// Removes everything under `rel` that did not come from this layer.
    fn clear_lower(&mut self, rel: &Path) -> Result<()> {
        let dir = self.dest.join(rel);
        let children = fs::read_dir(&dir).map_err(|e| OcirootfsError::io(&dir, e))?;
        for child in children {
            let child = child.map_err(|e| OcirootfsError::io(&dir, e))?;
            let child_path = child.path();
            let child_rel = rel.join(child.file_name());
            if !self.written.iter().any(|w| w.starts_with(&child_rel)) {
                remove_entry(&child_path)?;
                continue;
            }
            let meta = fs::symlink_metadata(&child_path)
                .map_err(|e| OcirootfsError::io(&child_path, e))?;
            if meta.is_dir() {
                self.loosen_dir(&child_path, &meta)?;
                self.clear_lower(&child_rel)?;
            }
        }
        Ok(())
    }

    fn restore_modes(&mut self) -> Result<()> {
        while let Some((path, mode)) = self.deferred.pop() {
            if fs::symlink_metadata(&path).is_ok() {
                set_mode(&path, mode)?;
            }
        }
        Ok(())
    }
}

/// Turns an archive path into a path relative to the rootfs.
fn sanitize(path: &Path) -> Result<PathBuf> {
    let mut rel = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => rel.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => return Err(escape_error(path)),
        }
    }
    Ok(rel)
}

fn remove_entry(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(OcirootfsError::io(path, e)),
    };
    if meta.is_dir() {
        ocirootfs_core::perms::fix_perms(path)?;
        fs::remove_dir_all(path).map_err(|e| OcirootfsError::io(path, e))
    } else {
        fs::remove_file(path).map_err(|e| OcirootfsError::io(path, e))
    }
}

fn set_mode(path: &Path, mode: u32) -> Result<()> {
    fs::set_permissions(path, Permissions::from_mode(mode))
        .map_err(|e| OcirootfsError::io(path, e))
}

fn header_id(id: io::Result<u64>, target: &Path) -> Result<u32> {
    let id = id.map_err(|e| OcirootfsError::io(target, e))?;
    u32::try_from(id).map_err(|_| OcirootfsError::Extract {
        path: target.to_path_buf(),
        message: format!("owner id {id} does not fit in 32 bits"),
    })
}

fn unmapped(kind: &str, id: u32, target: &Path) -> OcirootfsError {
    OcirootfsError::Extract {
        path: target.to_path_buf(),
        message: format!("{kind} {id} is not covered by the id mappings"),
    }
}

fn escape_error(path: &Path) -> OcirootfsError {
    OcirootfsError::Extract {
        path: path.to_path_buf(),
        message: "layer entry escapes the rootfs".to_string(),
    }
}
