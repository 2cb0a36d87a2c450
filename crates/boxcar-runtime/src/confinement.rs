//! The confinement pipeline run by the forked child.
//!
//! Each stage is a distinct type that can only be produced by the stage
//! before it, so the order
//!
//! ```text
//! LaunchRequest → Isolated → RootfsReady → SystemMounted → DevicesReady → Confined → exec
//! ```
//!
//! is enforced by the compiler. Every stage carries a
//! [`ConfinementContext`] describing what has been set up so far.
//!
//! A failed stage is not unwound. The child exits, and the kernel tears
//! down its private mount namespace together with every mount made in it.

use std::convert::Infallible;
use std::path::PathBuf;

use boxcar_common::error::Result;
use boxcar_common::types::{ContainerId, DevicePolicy, ImageName};
use boxcar_core::filesystem::{devices, mount, pivot_root};
use boxcar_core::namespace;
use boxcar_image::ImageStore;

use crate::container::ContainerLayout;

/// Everything the child needs to confine itself and exec.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    /// Image store holding the image.
    pub store: ImageStore,
    /// Image to build the root filesystem from.
    pub image: ImageName,
    /// Directories of this container.
    pub layout: ContainerLayout,
    /// Reaction to device nodes that cannot be created.
    pub device_policy: DevicePolicy,
    /// Command and arguments to exec.
    pub command: Vec<String>,
}

/// A completed confinement step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Entered a private mount namespace.
    Isolated,
    /// Mounted the container overlay.
    RootfsMounted,
    /// Mounted `/proc`, `/sys`, `/dev` and `/dev/pts`.
    SystemMounted,
    /// Populated `/dev`.
    DevicesPopulated,
    /// Pivoted into the container root.
    RootSwitched,
}

/// What the pipeline has established so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfinementContext {
    /// Root filesystem the process is being confined to.
    pub new_root: PathBuf,
    /// Steps completed, in order.
    pub completed: Vec<Step>,
}

impl ConfinementContext {
    /// Starts a context for a process that will be confined to `new_root`.
    #[must_use]
    pub const fn new(new_root: PathBuf) -> Self {
        Self {
            new_root,
            completed: Vec::new(),
        }
    }

    /// Records `step` as done.
    #[must_use]
    pub fn with(mut self, step: Step) -> Self {
        self.completed.push(step);
        self
    }
}

/// The process is in a private mount namespace.
#[derive(Debug)]
pub struct Isolated {
    request: LaunchRequest,
    context: ConfinementContext,
}

/// The container root filesystem is mounted.
#[derive(Debug)]
pub struct RootfsReady {
    request: LaunchRequest,
    context: ConfinementContext,
}

/// Kernel filesystems are mounted under the new root.
#[derive(Debug)]
pub struct SystemMounted {
    request: LaunchRequest,
    context: ConfinementContext,
}

/// `/dev` is populated.
#[derive(Debug)]
pub struct DevicesReady {
    request: LaunchRequest,
    context: ConfinementContext,
}

/// The process root is the container root; only exec remains.
#[derive(Debug)]
pub struct Confined {
    request: LaunchRequest,
    context: ConfinementContext,
}

impl LaunchRequest {
    /// Container this request launches.
    #[must_use]
    pub const fn container_id(&self) -> &ContainerId {
        &self.layout.id
    }

    /// Detaches from the host's mount propagation.
    ///
    /// # Errors
    ///
    /// Returns [`boxcar_common::error::BoxcarError::NamespaceSetupFailed`].
    pub fn isolate(self) -> Result<Isolated> {
        namespace::isolate_mount_namespace()?;
        tracing::info!(id = %self.layout.id, "entered private mount namespace");
        let context = ConfinementContext::new(self.layout.rootfs.clone()).with(Step::Isolated);
        Ok(Isolated {
            request: self,
            context,
        })
    }
}

impl Isolated {
    /// Extracts the image if needed and mounts the container overlay.
    ///
    /// # Errors
    ///
    /// Returns image, extraction, or mount errors.
    pub fn build_rootfs(self) -> Result<RootfsReady> {
        let root = crate::rootfs::build_rootfs(
            &self.request.store,
            &self.request.image,
            &self.request.layout,
        )?;
        Ok(RootfsReady {
            context: ConfinementContext {
                new_root: root,
                ..self.context
            }
            .with(Step::RootfsMounted),
            request: self.request,
        })
    }
}

impl RootfsReady {
    /// Mounts `proc`, `sysfs`, the `/dev` tmpfs and `devpts`.
    ///
    /// # Errors
    ///
    /// Returns [`boxcar_common::error::BoxcarError::MountFailed`].
    pub fn mount_system(self) -> Result<SystemMounted> {
        mount::mount_system_filesystems(&self.context.new_root)?;
        Ok(SystemMounted {
            context: self.context.with(Step::SystemMounted),
            request: self.request,
        })
    }
}

impl SystemMounted {
    /// Creates the standard device nodes and symlinks in `/dev`.
    ///
    /// # Errors
    ///
    /// Under [`DevicePolicy::Strict`], returns
    /// [`boxcar_common::error::BoxcarError::DeviceNodeCreationFailed`].
    pub fn populate_devices(self) -> Result<DevicesReady> {
        let dev = self.context.new_root.join("dev");
        let _ = devices::populate_dev(&dev, self.request.device_policy)?;
        Ok(DevicesReady {
            context: self.context.with(Step::DevicesPopulated),
            request: self.request,
        })
    }
}

impl DevicesReady {
    /// Pivots into the container root and detaches the old root.
    ///
    /// # Errors
    ///
    /// Returns [`boxcar_common::error::BoxcarError::PivotRootFailed`] if the
    /// pivot fails; the process must then not exec.
    pub fn switch_root(self) -> Result<Confined> {
        pivot_root::pivot_root(&self.context.new_root)?;
        tracing::info!(id = %self.request.layout.id, "switched root");
        Ok(Confined {
            context: self.context.with(Step::RootSwitched),
            request: self.request,
        })
    }
}

impl Confined {
    /// Execs the requested command. Never returns on success.
    ///
    /// # Errors
    ///
    /// Returns [`boxcar_common::error::BoxcarError::ExecFailed`].
    pub fn exec(self) -> Result<Infallible> {
        tracing::debug!(
            new_root = %self.context.new_root.display(),
            steps = ?self.context.completed,
            "confinement complete"
        );
        crate::exec::exec_command(&self.request.command)
    }
}

/// Runs the whole pipeline and execs the command.
///
/// # Errors
///
/// Returns the error of the first stage that failed.
pub fn confine_and_exec(request: LaunchRequest) -> Result<Infallible> {
    request
        .isolate()?
        .build_rootfs()?
        .mount_system()?
        .populate_devices()?
        .switch_root()?
        .exec()
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn new_context_has_no_completed_steps() {
        let context = ConfinementContext::new(PathBuf::from("/c/abc/rootfs"));
        assert_eq!(context.new_root, Path::new("/c/abc/rootfs"));
        assert!(context.completed.is_empty());
    }

    #[test]
    fn steps_are_recorded_in_order() {
        let context = ConfinementContext::new(PathBuf::from("/r"))
            .with(Step::Isolated)
            .with(Step::RootfsMounted)
            .with(Step::SystemMounted);
        assert_eq!(
            context.completed,
            vec![Step::Isolated, Step::RootfsMounted, Step::SystemMounted]
        );
    }

    #[test]
    fn request_exposes_container_id() {
        let layout = ContainerLayout::new(Path::new("/c"), ContainerId::new("abc"));
        let request = LaunchRequest {
            store: ImageStore::open("/i"),
            image: ImageName::new("busybox").unwrap(),
            layout,
            device_policy: DevicePolicy::Strict,
            command: vec!["/bin/sh".into()],
        };
        assert_eq!(request.container_id().as_str(), "abc");
    }
}
