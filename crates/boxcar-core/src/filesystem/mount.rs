//! Mount utilities for container filesystem setup.
//!
//! Handles mounting `/proc`, `/sys`, `/dev` and `/dev/pts` under the
//! container's new root, and answers whether a path is already a mount
//! point of the calling process.

use std::path::{Path, PathBuf};

use boxcar_common::error::{BoxcarError, Result};
#[cfg(target_os = "linux")]
use nix::mount::MsFlags;

/// Mount table of the calling process.
const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";

/// A single `mount(2)` request.
#[cfg(target_os = "linux")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    /// Mount source (device or pseudo-filesystem name).
    pub source: Option<String>,
    /// Absolute target path.
    pub target: PathBuf,
    /// Filesystem type.
    pub fstype: Option<String>,
    /// Mount flags.
    pub flags: MsFlags,
    /// Filesystem-specific options string.
    pub data: Option<String>,
}

#[cfg(target_os = "linux")]
impl MountSpec {
    /// Describes a pseudo-filesystem whose source name equals its type,
    /// e.g. `proc` on `proc`.
    #[must_use]
    pub fn pseudo(fstype: &str, target: impl Into<PathBuf>) -> Self {
        Self {
            source: Some(fstype.to_string()),
            target: target.into(),
            fstype: Some(fstype.to_string()),
            flags: MsFlags::empty(),
            data: None,
        }
    }

    /// Replaces the mount flags.
    #[must_use]
    pub const fn with_flags(mut self, flags: MsFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Replaces the options string.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Issues the `mount(2)` call.
    ///
    /// # Errors
    ///
    /// Returns [`BoxcarError::MountFailed`] naming the target and flags.
    pub fn mount(&self) -> Result<()> {
        tracing::debug!(
            source = ?self.source,
            target = %self.target.display(),
            fstype = ?self.fstype,
            flags = %describe_flags(self.flags),
            data = ?self.data,
            "mount"
        );
        nix::mount::mount(
            self.source.as_deref(),
            self.target.as_path(),
            self.fstype.as_deref(),
            self.flags,
            self.data.as_deref(),
        )
        .map_err(|e| BoxcarError::MountFailed {
            target: self.target.clone(),
            flags: describe_flags(self.flags),
            source: e.into(),
        })
    }
}

/// Renders mount flags as `MS_A | MS_B`, or `none`.
#[cfg(target_os = "linux")]
#[must_use]
pub fn describe_flags(flags: MsFlags) -> String {
    if flags.is_empty() {
        return "none".to_string();
    }
    flags
        .iter_names()
        .map(|(name, _)| name)
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Returns the kernel filesystem mounts for `root`, in mount order.
///
/// `dev` precedes `dev/pts` because `devpts` lives on the `dev` tmpfs,
/// and the device node factory later writes into that same tmpfs.
#[cfg(target_os = "linux")]
#[must_use]
pub fn system_mounts(root: &Path) -> Vec<MountSpec> {
    vec![
        MountSpec::pseudo("proc", root.join("proc")),
        MountSpec::pseudo("sysfs", root.join("sys")),
        MountSpec::pseudo("tmpfs", root.join("dev"))
            .with_flags(MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME)
            .with_data("mode=755"),
        MountSpec::pseudo("devpts", root.join("dev").join("pts")),
    ]
}

/// Mounts `/proc`, `/sys`, `/dev` and `/dev/pts` inside the container root,
/// creating each target directory first.
///
/// # Errors
///
/// Returns an error if a target cannot be created or a mount fails.
#[cfg(target_os = "linux")]
pub fn mount_system_filesystems(root: &Path) -> Result<()> {
    for mount in system_mounts(root) {
        std::fs::create_dir_all(&mount.target).map_err(|e| BoxcarError::io(&mount.target, e))?;
        mount.mount()?;
    }
    tracing::info!(root = %root.display(), "system filesystems mounted");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: kernel filesystem mounts require Linux.
#[cfg(not(target_os = "linux"))]
pub fn mount_system_filesystems(_root: &Path) -> Result<()> {
    Err(BoxcarError::Unsupported {
        feature: "system mounts",
    })
}

/// Reports whether `path` is currently a mount point in the calling
/// process's mount namespace.
///
/// A path that does not exist is not a mount point.
///
/// # Errors
///
/// Returns an error if the mount table cannot be read.
pub fn is_mount_point(path: &Path) -> Result<bool> {
    let Ok(path) = std::fs::canonicalize(path) else {
        return Ok(false);
    };
    let mountinfo =
        std::fs::read_to_string(MOUNTINFO_PATH).map_err(|e| BoxcarError::io(MOUNTINFO_PATH, e))?;
    Ok(mount_points(&mountinfo).any(|mount_point| mount_point == path))
}

/// Iterates the mount point column of a `/proc/<pid>/mountinfo` table.
fn mount_points(mountinfo: &str) -> impl Iterator<Item = PathBuf> + '_ {
    mountinfo
        .lines()
        .filter_map(|line| line.split(' ').nth(4))
        .map(|field| PathBuf::from(unescape_octal(field)))
}

/// Decodes the `\NNN` octal escapes the kernel uses for spaces, tabs,
/// newlines and backslashes in mount paths.
fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            if let Some(value) = bytes.get(i + 1..i + 4).and_then(parse_octal) {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn parse_octal(digits: &[u8]) -> Option<u8> {
    digits.iter().try_fold(0u8, |acc, &d| {
        if (b'0'..=b'7').contains(&d) {
            acc.checked_mul(8)?.checked_add(d - b'0')
        } else {
            None
        }
    })
}
