//! Mount namespace isolation.
//!
//! Gives the container its own mount table and cuts it off from the
//! host's mount propagation group.

use boxcar_common::error::{BoxcarError, Result};

/// Moves the calling process into a new mount namespace whose mounts are
/// private to it.
///
/// After `unshare(CLONE_NEWNS)` the copied mount table is still a peer of
/// the host's shared mounts. The root is therefore remounted with
/// `MS_PRIVATE | MS_REC`: the private flag is not inherited by mounts that
/// already exist below `/`, so a non-recursive remount would leave them
/// shared with the host.
///
/// Must be called before any other mount operation of the launch.
///
/// # Errors
///
/// Returns [`BoxcarError::NamespaceSetupFailed`] if either step fails.
#[cfg(target_os = "linux")]
pub fn isolate_mount_namespace() -> Result<()> {
    use nix::mount::{MsFlags, mount};
    use nix::sched::{CloneFlags, unshare};

    unshare(CloneFlags::CLONE_NEWNS).map_err(|e| BoxcarError::NamespaceSetupFailed {
        step: "unshare(CLONE_NEWNS)",
        source: e.into(),
    })?;
    tracing::debug!("mount namespace created");

    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_PRIVATE | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| BoxcarError::NamespaceSetupFailed {
        step: "remount / private",
        source: e.into(),
    })?;
    tracing::debug!("root remounted MS_PRIVATE | MS_REC");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: mount namespaces require Linux.
#[cfg(not(target_os = "linux"))]
pub fn isolate_mount_namespace() -> Result<()> {
    Err(BoxcarError::Unsupported {
        feature: "mount namespace",
    })
}
