//! Forking the container process and reporting how it ended.
//!
//! The launcher runs in the host context. It validates the request, checks
//! that the image exists, then forks exactly once. The child runs
//! [`crate::confinement::confine_and_exec`]; the parent blocks until the
//! child terminates.

use std::fmt;
use std::path::{Path, PathBuf};

use boxcar_common::config::BoxcarConfig;
use boxcar_common::error::{BoxcarError, Result};
use boxcar_common::types::{ContainerId, DevicePolicy, ImageName};
use boxcar_image::ImageStore;
use nix::errno::Errno;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, fork};

use crate::confinement::{self, LaunchRequest};
use crate::container::ContainerLayout;

/// How the container process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    /// The process exited normally with this code.
    Exited(i32),
    /// The process was killed by a signal.
    Signaled {
        /// Signal number.
        signal: i32,
        /// Whether a core dump was produced.
        core_dumped: bool,
    },
}

impl ChildExit {
    /// The status encoded the way `wait(2)` reports it.
    #[must_use]
    pub const fn raw(self) -> i32 {
        match self {
            Self::Exited(code) => (code & 0xff) << 8,
            Self::Signaled {
                signal,
                core_dumped,
            } => {
                if core_dumped {
                    signal | 0x80
                } else {
                    signal
                }
            }
        }
    }

    /// Exit code a shell would report: the code itself, or `128 + signal`.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Exited(code) => code,
            Self::Signaled { signal, .. } => 128 + signal,
        }
    }

    /// Returns `true` if the process exited with code zero.
    #[must_use]
    pub const fn success(self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

/// Result of a completed launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchReport {
    /// PID of the forked child, as seen by the host.
    pub pid: i32,
    /// Identifier of the container's directories.
    pub container_id: ContainerId,
    /// How the child terminated.
    pub status: ChildExit,
}

impl fmt::Display for LaunchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} exited with status {}", self.pid, self.status.raw())
    }
}

/// Launches containers from a fixed image store and containers directory.
#[derive(Debug, Clone)]
pub struct Launcher {
    store: ImageStore,
    containers_dir: PathBuf,
    device_policy: DevicePolicy,
}

impl Launcher {
    /// Creates a launcher from a resolved configuration.
    ///
    /// Relative directories are made absolute against the current working
    /// directory, since the child changes its root before it is done with
    /// them.
    ///
    /// # Errors
    ///
    /// Returns [`BoxcarError::Io`] if a directory cannot be made absolute.
    pub fn new(config: &BoxcarConfig) -> Result<Self> {
        let image_dir = absolute(&config.image_dir)?;
        let containers_dir = absolute(&config.containers_dir)?;
        Ok(Self {
            store: ImageStore::open(image_dir),
            containers_dir,
            device_policy: config.device_policy,
        })
    }

    /// Returns the image store.
    #[must_use]
    pub const fn store(&self) -> &ImageStore {
        &self.store
    }

    /// Returns the containers directory.
    #[must_use]
    pub fn containers_dir(&self) -> &Path {
        &self.containers_dir
    }

    /// Runs `command` in a fresh container built from `image` and waits for
    /// it to terminate.
    ///
    /// Nothing is created on disk if the image archive does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`BoxcarError::Config`] for an empty command,
    /// [`BoxcarError::ImageNotFound`] for a missing archive, and
    /// [`BoxcarError::ForkFailed`] if the child cannot be created or
    /// waited for. Failures inside the child surface as its exit status.
    pub fn run(&self, image: &ImageName, command: &[String]) -> Result<LaunchReport> {
        let _ = crate::exec::to_argv(command)?;
        let _ = self.store.resolve(image)?;

        let layout = ContainerLayout::new(&self.containers_dir, ContainerId::generate());
        let container_id = layout.id.clone();
        let request = LaunchRequest {
            store: self.store.clone(),
            image: image.clone(),
            layout,
            device_policy: self.device_policy,
            command: command.to_vec(),
        };

        tracing::info!(id = %container_id, image = %image, command = ?command, "launching container");

        // SAFETY: the child only runs the confinement pipeline and then
        // either execs or terminates through `_exit`.
        match unsafe { fork() } {
            Ok(ForkResult::Child) => run_child(request),
            Ok(ForkResult::Parent { child }) => {
                tracing::debug!(pid = child.as_raw(), "forked container process");
                let status = wait_for(child)?;
                tracing::info!(id = %container_id, pid = child.as_raw(), ?status, "container exited");
                Ok(LaunchReport {
                    pid: child.as_raw(),
                    container_id,
                    status,
                })
            }
            Err(errno) => Err(BoxcarError::ForkFailed {
                source: errno.into(),
            }),
        }
    }
}

/// Body of the forked child. Never returns.
fn run_child(request: LaunchRequest) -> ! {
    let Err(err) = confinement::confine_and_exec(request);
    tracing::error!(error = %err, exit_code = err.exit_code(), "container setup failed");
    // SAFETY: `_exit` skips atexit handlers and stdio flushing that belong
    // to the parent's copy of the process.
    unsafe { libc::_exit(err.exit_code()) }
}

/// Blocks until `child` terminates, retrying interrupted waits.
fn wait_for(child: Pid) -> Result<ChildExit> {
    loop {
        match waitpid(child, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(ChildExit::Exited(code)),
            Ok(WaitStatus::Signaled(_, signal, core_dumped)) => {
                return Ok(ChildExit::Signaled {
                    signal: signal as i32,
                    core_dumped,
                });
            }
            Ok(other) => tracing::debug!(status = ?other, "ignoring non-terminal wait status"),
            Err(Errno::EINTR) => {}
            Err(errno) => {
                return Err(BoxcarError::ForkFailed {
                    source: errno.into(),
                });
            }
        }
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|e| BoxcarError::io(path, e))
}
