//! System-wide constants: OCI media types, layout file names and
//! the advisory texts printed by the permission scanner.

/// Media type of a single-platform OCI image manifest.
pub const MEDIA_TYPE_IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";

/// Media type of an OCI image index (multi-platform manifest list).
pub const MEDIA_TYPE_IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Media type of an OCI image configuration blob.
pub const MEDIA_TYPE_IMAGE_CONFIG: &str = "application/vnd.oci.image.config.v1+json";

/// Uncompressed OCI layer.
pub const MEDIA_TYPE_LAYER_TAR: &str = "application/vnd.oci.image.layer.v1.tar";

/// Gzip-compressed OCI layer.
pub const MEDIA_TYPE_LAYER_TAR_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

/// Zstd-compressed OCI layer.
pub const MEDIA_TYPE_LAYER_TAR_ZSTD: &str = "application/vnd.oci.image.layer.v1.tar+zstd";

/// Legacy Docker uncompressed layer.
pub const MEDIA_TYPE_DOCKER_LAYER_TAR: &str = "application/vnd.docker.image.rootfs.diff.tar";

/// Legacy Docker gzip-compressed layer.
pub const MEDIA_TYPE_DOCKER_LAYER_TAR_GZIP: &str =
    "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// Annotation carrying the tag of a manifest inside `index.json`.
pub const ANNOTATION_REF_NAME: &str = "org.opencontainers.image.ref.name";

/// Marker file at the root of an OCI image layout.
pub const OCI_LAYOUT_FILE: &str = "oci-layout";

/// Index file at the root of an OCI image layout.
pub const OCI_INDEX_FILE: &str = "index.json";

/// Blob directory at the root of an OCI image layout.
pub const OCI_BLOBS_DIR: &str = "blobs";

/// Layout version written to and expected in the `oci-layout` marker.
pub const OCI_LAYOUT_VERSION: &str = "1.0.0";

/// Prefix of a whiteout entry in a layer archive.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Opaque whiteout marker: hides every lower-layer entry of its directory.
pub const WHITEOUT_OPAQUE: &str = ".wh..wh..opq";

/// Contents of `/proc/self/uid_map` when no user namespace remaps IDs.
pub const FULL_ID_MAP: (u32, u32, u64) = (0, 0, 4_294_967_295);

/// Owner read/write/execute permission bits.
pub const OWNER_RWX: u32 = 0o700;

/// Owner read/write permission bits.
pub const OWNER_RW: u32 = 0o600;

/// Advisory shown before `--fix-perms` rewrites modes.
pub const FIX_PERMS_WARNING: &str =
    "The --fix-perms option modifies the filesystem permissions on the resulting container.";

/// Advisory lines shown when a sandbox holds entries `rm` cannot remove.
pub const RESTRICTIVE_PERMS_WARNINGS: [&str; 3] = [
    "The sandbox contain files/dirs that cannot be removed with 'rm'.",
    "Use 'chmod -R u+rwX' to set permissions that allow removal.",
    "Use the '--fix-perms' option to 'ocirootfs unpack' to modify permissions at build time.",
];
