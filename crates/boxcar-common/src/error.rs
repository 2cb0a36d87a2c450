//! Unified error types for the boxcar workspace.
//!
//! Every fatal condition of a launch maps to one variant here. Inside the
//! forked child each variant also maps to a distinct process exit code, so
//! the parent can tell failure kinds apart from the wait status alone.

use std::path::PathBuf;

use thiserror::Error;

/// Exit code used by the child for failures without a dedicated code.
pub const EXIT_GENERIC_FAILURE: i32 = 1;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum BoxcarError {
    /// The image archive does not exist.
    #[error("unable to locate image {image}: {archive} does not exist")]
    ImageNotFound {
        /// Name of the requested image.
        image: String,
        /// Archive path that was looked up.
        archive: PathBuf,
    },

    /// The image archive could not be read or unpacked.
    #[error("failed to extract {archive} into {target}: {source}")]
    ExtractionFailed {
        /// Archive being extracted.
        archive: PathBuf,
        /// Destination directory.
        target: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A `mount(2)` or `umount2(2)` call failed.
    #[error("mount at {target} (flags {flags}) failed: {source}")]
    MountFailed {
        /// Mount target path.
        target: PathBuf,
        /// Mount flags, rendered for diagnostics.
        flags: String,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// Creating the private mount namespace failed.
    #[error("mount namespace setup failed during {step}: {source}")]
    NamespaceSetupFailed {
        /// Which step of the isolation failed.
        step: &'static str,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// A device node or `/dev` symlink could not be created.
    #[error("failed to create device node {path}: {source}")]
    DeviceNodeCreationFailed {
        /// Path of the device node.
        path: PathBuf,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// `pivot_root(2)` failed.
    #[error("pivot_root into {new_root} failed: {source}")]
    PivotRootFailed {
        /// Root the process attempted to switch to.
        new_root: PathBuf,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// The target command could not be executed.
    #[error("failed to exec {command}: {source}")]
    ExecFailed {
        /// Program that was executed.
        command: String,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// `fork(2)` failed in the launching process.
    #[error("fork failed: {source}")]
    ForkFailed {
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// The requested operation is not available on this platform.
    #[error("{feature} requires Linux")]
    Unsupported {
        /// Name of the unavailable feature.
        feature: &'static str,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl BoxcarError {
    /// Exit code the confined child terminates with for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::ImageNotFound { .. } => 10,
            Self::ExtractionFailed { .. } => 11,
            Self::MountFailed { .. } => 12,
            Self::NamespaceSetupFailed { .. } => 13,
            Self::DeviceNodeCreationFailed { .. } => 14,
            Self::PivotRootFailed { .. } => 15,
            Self::ExecFailed { .. } => 16,
            Self::ForkFailed { .. }
            | Self::Io { .. }
            | Self::Config { .. }
            | Self::Unsupported { .. }
            | Self::Serialization { .. } => EXIT_GENERIC_FAILURE,
        }
    }

    /// Builds an [`BoxcarError::Io`] for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, BoxcarError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn os_err() -> std::io::Error {
        std::io::Error::from_raw_os_error(1)
    }

    #[test]
    fn launch_failures_have_distinct_exit_codes() {
        let errors = [
            BoxcarError::ImageNotFound {
                image: "busybox".into(),
                archive: "/images/busybox.tar".into(),
            },
            BoxcarError::ExtractionFailed {
                archive: "a.tar".into(),
                target: "out".into(),
                source: os_err(),
            },
            BoxcarError::MountFailed {
                target: "/proc".into(),
                flags: "MS_NODEV".into(),
                source: os_err(),
            },
            BoxcarError::NamespaceSetupFailed {
                step: "unshare",
                source: os_err(),
            },
            BoxcarError::DeviceNodeCreationFailed {
                path: "/dev/null".into(),
                source: os_err(),
            },
            BoxcarError::PivotRootFailed {
                new_root: "/rootfs".into(),
                source: os_err(),
            },
            BoxcarError::ExecFailed {
                command: "/bin/sh".into(),
                source: os_err(),
            },
        ];

        let mut codes: Vec<i32> = errors.iter().map(BoxcarError::exit_code).collect();
        assert!(codes.iter().all(|&c| c != 0 && c != EXIT_GENERIC_FAILURE));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn generic_errors_use_generic_exit_code() {
        let err = BoxcarError::Config {
            message: "empty command".into(),
        };
        assert_eq!(err.exit_code(), EXIT_GENERIC_FAILURE);
        assert_eq!(BoxcarError::io("/x", os_err()).exit_code(), EXIT_GENERIC_FAILURE);
    }

    #[test]
    fn mount_failure_message_names_target_and_flags() {
        let err = BoxcarError::MountFailed {
            target: "/containers/abc/rootfs/dev".into(),
            flags: "MS_NOSUID | MS_STRICTATIME".into(),
            source: os_err(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/containers/abc/rootfs/dev"));
        assert!(msg.contains("MS_NOSUID | MS_STRICTATIME"));
    }
}
