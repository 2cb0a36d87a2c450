//! `OverlayFS` management for layered container filesystems.
//!
//! Stacks a read-only image layer under a per-container writable upper
//! layer, giving each container copy-on-write semantics over a shared,
//! extracted image.

use std::path::PathBuf;

use boxcar_common::error::{BoxcarError, Result};

/// Configuration for an `OverlayFS` mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayConfig {
    /// Read-only lower layers (bottom to top).
    pub lower_dirs: Vec<PathBuf>,
    /// Writable upper layer directory.
    pub upper_dir: PathBuf,
    /// Work directory required by `OverlayFS`.
    pub work_dir: PathBuf,
    /// Final merged mount point.
    pub merged_dir: PathBuf,
}

/// Result of [`mount_overlay`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayMount {
    /// A new overlay was attached at the merged directory.
    Mounted,
    /// The merged directory was already a mount point; nothing was done.
    AlreadyMounted,
}

impl OverlayConfig {
    /// Renders the `lowerdir=…,upperdir=…,workdir=…` option string.
    ///
    /// `OverlayFS` expects the top-most lower layer first, the reverse of
    /// [`Self::lower_dirs`].
    #[must_use]
    pub fn options(&self) -> String {
        let lowers = self
            .lower_dirs
            .iter()
            .rev()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":");
        format!(
            "lowerdir={},upperdir={},workdir={}",
            lowers,
            self.upper_dir.display(),
            self.work_dir.display()
        )
    }

    /// Creates the upper, work, and merged directories if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be created.
    pub fn create_dirs(&self) -> Result<()> {
        for dir in [&self.upper_dir, &self.work_dir, &self.merged_dir] {
            std::fs::create_dir_all(dir).map_err(|e| BoxcarError::io(dir, e))?;
        }
        Ok(())
    }
}

/// Mounts an `OverlayFS` with the given configuration.
///
/// Creates the upper, work, and merged directories if they do not exist,
/// then mounts with `MS_NODEV` so device files in any layer are inert.
/// If the merged directory is already a mount point the call is a no-op,
/// keeping at most one mount per target.
///
/// # Errors
///
/// Returns an error if directory creation fails or if the mount syscall fails.
#[cfg(target_os = "linux")]
pub fn mount_overlay(config: &OverlayConfig) -> Result<OverlayMount> {
    use nix::mount::MsFlags;

    use super::mount::MountSpec;

    if config.lower_dirs.is_empty() {
        return Err(BoxcarError::Config {
            message: "overlay requires at least one lower layer".into(),
        });
    }
    config.create_dirs()?;

    if super::mount::is_mount_point(&config.merged_dir)? {
        tracing::warn!(merged = %config.merged_dir.display(), "overlay already mounted");
        return Ok(OverlayMount::AlreadyMounted);
    }

    MountSpec::pseudo("overlay", config.merged_dir.clone())
        .with_flags(MsFlags::MS_NODEV)
        .with_data(config.options())
        .mount()?;

    tracing::info!(merged = %config.merged_dir.display(), "overlayfs mounted");
    Ok(OverlayMount::Mounted)
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: `OverlayFS` mounting requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn mount_overlay(_config: &OverlayConfig) -> Result<OverlayMount> {
    Err(BoxcarError::Unsupported { feature: "overlayfs" })
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn config(root: &Path) -> OverlayConfig {
        OverlayConfig {
            lower_dirs: vec![root.join("images/busybox/rootfs")],
            upper_dir: root.join("c/cow_rw"),
            work_dir: root.join("c/cow_workdir"),
            merged_dir: root.join("c/rootfs"),
        }
    }

    #[test]
    fn options_name_every_layer() {
        let cfg = config(Path::new("/w"));
        assert_eq!(
            cfg.options(),
            "lowerdir=/w/images/busybox/rootfs,upperdir=/w/c/cow_rw,workdir=/w/c/cow_workdir"
        );
    }

    #[test]
    fn options_list_top_lower_layer_first() {
        let mut cfg = config(Path::new("/w"));
        cfg.lower_dirs = vec!["/base".into(), "/top".into()];
        assert!(cfg.options().starts_with("lowerdir=/top:/base,"));
    }

    #[test]
    fn create_dirs_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        cfg.create_dirs().unwrap();
        cfg.create_dirs().unwrap();
        assert!(cfg.upper_dir.is_dir());
        assert!(cfg.work_dir.is_dir());
        assert!(cfg.merged_dir.is_dir());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn mount_without_lower_layer_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.lower_dirs.clear();
        assert!(matches!(
            mount_overlay(&cfg),
            Err(BoxcarError::Config { .. })
        ));
        assert!(!cfg.upper_dir.exists());
    }
}
