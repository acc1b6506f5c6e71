//! Domain primitive types used across the ocirootfs workspace.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{OcirootfsError, Result};

/// Options that select the post-unpack permission policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
    /// Force owner `rwX` on every entry after unpacking.
    pub fix_perms: bool,
    /// The output is a writable sandbox directory rather than an image file.
    pub sandbox_target: bool,
}

/// Build context for a single unpack invocation.
///
/// The caller creates the directories before unpacking and removes them
/// once the build step is over; the pipeline never shares a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    /// OCI image layout the image was copied into.
    pub tmp_dir: PathBuf,
    /// Destination of the extracted root filesystem.
    pub rootfs_path: PathBuf,
    /// Post-processing options.
    pub opts: BuildOptions,
}

impl Bundle {
    /// Creates a bundle with default options.
    #[must_use]
    pub fn new(tmp_dir: impl Into<PathBuf>, rootfs_path: impl Into<PathBuf>) -> Self {
        Self {
            tmp_dir: tmp_dir.into(),
            rootfs_path: rootfs_path.into(),
            opts: BuildOptions::default(),
        }
    }

    /// Replaces the build options.
    #[must_use]
    pub const fn with_options(mut self, opts: BuildOptions) -> Self {
        self.opts = opts;
        self
    }
}

/// One contiguous UID or GID range mapped from the container to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdMapping {
    /// First ID inside the container.
    pub container_id: u32,
    /// First ID on the host.
    pub host_id: u32,
    /// Number of consecutive IDs in the range.
    pub size: u32,
}

impl IdMapping {
    /// Creates a mapping, rejecting empty or overflowing ranges.
    ///
    /// # Errors
    ///
    /// Returns [`OcirootfsError::MappingConstruction`] if `size` is zero or
    /// either range runs past `u32::MAX`.
    pub fn new(container_id: u32, host_id: u32, size: u32) -> Result<Self> {
        if size == 0 {
            return Err(OcirootfsError::MappingConstruction {
                message: format!("empty range in {container_id}:{host_id}:{size}"),
            });
        }
        let limit = u64::from(u32::MAX) + 1;
        if u64::from(container_id) + u64::from(size) > limit
            || u64::from(host_id) + u64::from(size) > limit
        {
            return Err(OcirootfsError::MappingConstruction {
                message: format!("range overflows in {container_id}:{host_id}:{size}"),
            });
        }
        Ok(Self {
            container_id,
            host_id,
            size,
        })
    }

    /// Translates a container ID through this range.
    #[must_use]
    pub fn map(&self, id: u32) -> Option<u32> {
        let offset = id.checked_sub(self.container_id)?;
        if offset < self.size {
            self.host_id.checked_add(offset)
        } else {
            None
        }
    }
}

impl FromStr for IdMapping {
    type Err = OcirootfsError;

    /// Parses `container:host:size`.
    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.split(':').collect();
        let [container, host, size] = fields.as_slice() else {
            return Err(OcirootfsError::MappingConstruction {
                message: format!("expected container:host:size, got {s:?}"),
            });
        };
        let parse = |field: &str| {
            field
                .trim()
                .parse::<u32>()
                .map_err(|e| OcirootfsError::MappingConstruction {
                    message: format!("invalid id {field:?} in {s:?}: {e}"),
                })
        };
        Self::new(parse(*container)?, parse(*host)?, parse(*size)?)
    }
}

impl fmt::Display for IdMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.container_id, self.host_id, self.size)
    }
}

/// UID/GID translation applied while extracting layers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapOptions {
    /// Extraction runs without real root privilege.
    pub rootless: bool,
    /// UID ranges; empty means identity.
    pub uid_mappings: Vec<IdMapping>,
    /// GID ranges; empty means identity.
    pub gid_mappings: Vec<IdMapping>,
}

impl MapOptions {
    /// Host UID for a container UID, `None` if no range covers it.
    #[must_use]
    pub fn map_uid(&self, uid: u32) -> Option<u32> {
        map_id(&self.uid_mappings, uid)
    }

    /// Host GID for a container GID, `None` if no range covers it.
    #[must_use]
    pub fn map_gid(&self, gid: u32) -> Option<u32> {
        map_id(&self.gid_mappings, gid)
    }
}

fn map_id(mappings: &[IdMapping], id: u32) -> Option<u32> {
    if mappings.is_empty() {
        return Some(id);
    }
    mappings.iter().find_map(|m| m.map(id))
}

/// Verbosity requested for the extraction step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    /// Only errors.
    Silent,
    /// Errors and warnings.
    Quiet,
    /// Default output.
    #[default]
    Normal,
    /// Verbose output.
    Verbose,
    /// Everything, including per-entry events.
    Debug,
}

impl Verbosity {
    /// Most detailed level the extractor may emit at this verbosity.
    #[must_use]
    pub const fn max_level(self) -> tracing::Level {
        match self {
            Self::Silent => tracing::Level::ERROR,
            Self::Quiet => tracing::Level::WARN,
            Self::Normal | Self::Verbose => tracing::Level::INFO,
            Self::Debug => tracing::Level::DEBUG,
        }
    }

    /// Whether an event at `level` passes this verbosity.
    #[must_use]
    pub fn allows(self, level: tracing::Level) -> bool {
        level <= self.max_level()
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Silent => write!(f, "silent"),
            Self::Quiet => write!(f, "quiet"),
            Self::Normal => write!(f, "normal"),
            Self::Verbose => write!(f, "verbose"),
            Self::Debug => write!(f, "debug"),
        }
    }
}

/// Registry settings handed through to the image source untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemContext {
    /// Registry credentials file.
    pub auth_file: Option<PathBuf>,
    /// Skip TLS verification when talking to the registry.
    pub insecure_skip_tls_verify: bool,
    /// Platform to select, e.g. `linux/amd64`.
    pub platform: Option<String>,
}
