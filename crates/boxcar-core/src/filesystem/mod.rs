//! Filesystem management for container isolation.
//!
//! Provides `OverlayFS` composition, kernel filesystem mounts, `/dev`
//! population, and `pivot_root` for switching into the new root.

pub mod devices;
pub mod mount;
pub mod overlayfs;
pub mod pivot_root;
