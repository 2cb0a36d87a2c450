//! Per-container directory layout.

use std::path::{Path, PathBuf};

use boxcar_common::constants::{
    CONTAINER_COW_RW_DIR, CONTAINER_COW_WORKDIR_DIR, CONTAINER_ROOTFS_DIR,
};
use boxcar_common::types::ContainerId;
use boxcar_core::filesystem::overlayfs::OverlayConfig;

/// Directories owned by a single container under
/// `{containers_dir}/{id}/`.
///
/// A layout is never shared: every launch mints a fresh [`ContainerId`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerLayout {
    /// Container identifier.
    pub id: ContainerId,
    /// `{containers_dir}/{id}`.
    pub dir: PathBuf,
    /// Writable upper layer.
    pub cow_rw: PathBuf,
    /// Overlay scratch directory; never read by boxcar.
    pub cow_workdir: PathBuf,
    /// Mount point of the composed root filesystem.
    pub rootfs: PathBuf,
}

impl ContainerLayout {
    /// Computes the layout of container `id`. Nothing is created.
    #[must_use]
    pub fn new(containers_dir: &Path, id: ContainerId) -> Self {
        let dir = containers_dir.join(id.as_str());
        Self {
            cow_rw: dir.join(CONTAINER_COW_RW_DIR),
            cow_workdir: dir.join(CONTAINER_COW_WORKDIR_DIR),
            rootfs: dir.join(CONTAINER_ROOTFS_DIR),
            dir,
            id,
        }
    }

    /// Overlay configuration stacking this container's upper layer on
    /// `image_layer`.
    #[must_use]
    pub fn overlay_config(&self, image_layer: PathBuf) -> OverlayConfig {
        OverlayConfig {
            lower_dirs: vec![image_layer],
            upper_dir: self.cow_rw.clone(),
            work_dir: self.cow_workdir.clone(),
            merged_dir: self.rootfs.clone(),
        }
    }
}
