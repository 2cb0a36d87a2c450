//! Root filesystem composition.

use std::path::PathBuf;

use boxcar_common::error::Result;
use boxcar_common::types::ImageName;
use boxcar_core::filesystem::overlayfs::{self, OverlayMount};
use boxcar_image::ImageStore;

use crate::container::ContainerLayout;

/// Builds the writable root filesystem of a container and returns its
/// mount point.
///
/// Extracts the image on first use, creates the container's `cow_rw`,
/// `cow_workdir` and `rootfs` directories, and mounts an overlay of the
/// image layer under `cow_rw` at `rootfs`. Must run inside the private
/// mount namespace.
///
/// # Errors
///
/// Returns [`boxcar_common::error::BoxcarError::ImageNotFound`] if the
/// archive is missing, and extraction or mount errors otherwise.
pub fn build_rootfs(
    store: &ImageStore,
    image: &ImageName,
    layout: &ContainerLayout,
) -> Result<PathBuf> {
    let image_layer = store.prepare(image)?;
    let overlay = layout.overlay_config(image_layer);

    if overlayfs::mount_overlay(&overlay)? == OverlayMount::AlreadyMounted {
        tracing::debug!(rootfs = %layout.rootfs.display(), "reusing mounted rootfs");
    }
    tracing::info!(
        id = %layout.id,
        rootfs = %layout.rootfs.display(),
        "created a new root fs for the container"
    );
    Ok(layout.rootfs.clone())
}
