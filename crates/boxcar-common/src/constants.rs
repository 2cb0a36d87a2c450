//! System-wide constants and default paths.

/// Default directory holding image archives and extracted image layers.
pub const DEFAULT_IMAGE_DIR: &str = "/workshop/images";

/// Default directory holding per-container state.
pub const DEFAULT_CONTAINERS_DIR: &str = "/workshop/containers";

/// Image used when none is given on the command line.
pub const DEFAULT_IMAGE: &str = "busybox";

/// File extension of image archives.
pub const IMAGE_ARCHIVE_EXTENSION: &str = "tar";

/// Name of the extracted layer directory inside an image directory.
pub const IMAGE_ROOTFS_DIR: &str = "rootfs";

/// Extension of the per-image advisory lock file.
pub const IMAGE_LOCK_EXTENSION: &str = "lock";

/// Writable upper layer of a container's overlay.
pub const CONTAINER_COW_RW_DIR: &str = "cow_rw";

/// Overlay scratch directory of a container.
pub const CONTAINER_COW_WORKDIR_DIR: &str = "cow_workdir";

/// Mount point of a container's composed root filesystem.
pub const CONTAINER_ROOTFS_DIR: &str = "rootfs";

/// Directory under the new root that receives the old root during the pivot.
pub const OLD_ROOT_DIR: &str = "old_root";

/// Application name used in CLI output.
pub const APP_NAME: &str = "boxcar";
