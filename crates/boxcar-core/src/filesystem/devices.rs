//! Device node population for the container's `/dev`.
//!
//! The container gets a fresh `tmpfs` on `/dev` (see
//! [`super::mount::mount_system_filesystems`]); this module fills it with a
//! fixed set of character devices and the standard stream symlinks.

use std::path::{Path, PathBuf};

use boxcar_common::error::{BoxcarError, Result};
use boxcar_common::types::DevicePolicy;

/// Permission bits of every device node: read/write for everyone.
pub const DEVICE_MODE: u32 = 0o666;

/// A character special file under `/dev`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceNode {
    /// File name under `/dev`.
    pub name: &'static str,
    /// Major device number.
    pub major: u64,
    /// Minor device number.
    pub minor: u64,
}

/// Character devices created in every container.
pub const DEVICE_NODES: [DeviceNode; 7] = [
    DeviceNode { name: "null", major: 1, minor: 3 },
    DeviceNode { name: "zero", major: 1, minor: 5 },
    DeviceNode { name: "random", major: 1, minor: 8 },
    DeviceNode { name: "urandom", major: 1, minor: 9 },
    DeviceNode { name: "console", major: 136, minor: 1 },
    DeviceNode { name: "tty", major: 5, minor: 0 },
    DeviceNode { name: "full", major: 1, minor: 7 },
];

/// Symlinks created in every container, as `(name, target)`.
pub const DEVICE_SYMLINKS: [(&str, &str); 4] = [
    ("stdin", "/proc/self/fd/0"),
    ("stdout", "/proc/self/fd/1"),
    ("stderr", "/proc/self/fd/2"),
    ("fd", "/proc/self/fd"),
];

/// What [`populate_dev`] actually created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DevReport {
    /// Names of the entries that were created.
    pub created: Vec<&'static str>,
    /// Names of the entries that were skipped under
    /// [`DevicePolicy::BestEffort`].
    pub skipped: Vec<&'static str>,
}

/// Creates the standard symlinks and device nodes in `dev_dir`.
///
/// Runs against the container's `dev` tmpfs while the host root is still
/// the process root, i.e. after the system mounts and before the pivot.
///
/// # Errors
///
/// Under [`DevicePolicy::Strict`], returns
/// [`BoxcarError::DeviceNodeCreationFailed`] for the first entry that
/// cannot be created. Under [`DevicePolicy::BestEffort`] failures are
/// logged and recorded in the report instead.
pub fn populate_dev(dev_dir: &Path, policy: DevicePolicy) -> Result<DevReport> {
    let mut report = DevReport::default();

    for (name, target) in DEVICE_SYMLINKS {
        let path = dev_dir.join(name);
        let outcome = std::os::unix::fs::symlink(target, &path);
        record(&mut report, policy, name, path, outcome)?;
    }

    for node in DEVICE_NODES {
        let path = dev_dir.join(node.name);
        let outcome = make_char_device(&path, node);
        record(&mut report, policy, node.name, path, outcome)?;
    }

    tracing::info!(
        dev = %dev_dir.display(),
        created = report.created.len(),
        skipped = report.skipped.len(),
        "device nodes populated"
    );
    Ok(report)
}

fn record(
    report: &mut DevReport,
    policy: DevicePolicy,
    name: &'static str,
    path: PathBuf,
    outcome: std::io::Result<()>,
) -> Result<()> {
    match (outcome, policy) {
        (Ok(()), _) => {
            tracing::debug!(path = %path.display(), "created");
            report.created.push(name);
            Ok(())
        }
        (Err(source), DevicePolicy::Strict) => {
            Err(BoxcarError::DeviceNodeCreationFailed { path, source })
        }
        (Err(error), DevicePolicy::BestEffort) => {
            tracing::warn!(path = %path.display(), %error, "skipping device node");
            report.skipped.push(name);
            Ok(())
        }
    }
}

/// `mknod` followed by an explicit chmod, so the umask cannot narrow the
/// mode below [`DEVICE_MODE`].
#[cfg(target_os = "linux")]
fn make_char_device(path: &Path, node: DeviceNode) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    use nix::sys::stat::{Mode, SFlag, makedev, mknod};

    mknod(
        path,
        SFlag::S_IFCHR,
        Mode::from_bits_truncate(DEVICE_MODE),
        makedev(node.major, node.minor),
    )?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(DEVICE_MODE))
}

#[cfg(not(target_os = "linux"))]
fn make_char_device(_path: &Path, _node: DeviceNode) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "device nodes require Linux",
    ))
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};

    use super::*;

    #[test]
    fn device_table_matches_linux_numbers() {
        let lookup = |name: &str| {
            DEVICE_NODES
                .iter()
                .find(|n| n.name == name)
                .map(|n| (n.major, n.minor))
        };
        assert_eq!(lookup("null"), Some((1, 3)));
        assert_eq!(lookup("zero"), Some((1, 5)));
        assert_eq!(lookup("random"), Some((1, 8)));
        assert_eq!(lookup("urandom"), Some((1, 9)));
        assert_eq!(lookup("console"), Some((136, 1)));
        assert_eq!(lookup("tty"), Some((5, 0)));
        assert_eq!(lookup("full"), Some((1, 7)));
    }

    #[test]
    fn best_effort_always_creates_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let report = populate_dev(dir.path(), DevicePolicy::BestEffort).unwrap();

        for (name, target) in DEVICE_SYMLINKS {
            let link = std::fs::read_link(dir.path().join(name)).unwrap();
            assert_eq!(link, Path::new(target));
        }
        assert_eq!(report.created.len() + report.skipped.len(), 11);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn created_nodes_have_expected_numbers_and_mode() {
        let dir = tempfile::tempdir().unwrap();
        let report = populate_dev(dir.path(), DevicePolicy::BestEffort).unwrap();

        for node in DEVICE_NODES.iter().filter(|n| report.created.contains(&n.name)) {
            let meta = std::fs::symlink_metadata(dir.path().join(node.name)).unwrap();
            assert!(meta.file_type().is_char_device(), "{} not a char device", node.name);
            let rdev = meta.rdev();
            assert_eq!(nix::sys::stat::major(rdev), node.major);
            assert_eq!(nix::sys::stat::minor(rdev), node.minor);
            assert_eq!(meta.permissions().mode() & 0o777, DEVICE_MODE);
        }
    }

    #[test]
    fn strict_policy_fails_on_existing_entry() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stdin"), b"").unwrap();

        let err = populate_dev(dir.path(), DevicePolicy::Strict).unwrap_err();
        match err {
            BoxcarError::DeviceNodeCreationFailed { path, .. } => {
                assert_eq!(path, dir.path().join("stdin"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn best_effort_skips_existing_entry() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stdout"), b"").unwrap();

        let report = populate_dev(dir.path(), DevicePolicy::BestEffort).unwrap();
        assert!(report.skipped.contains(&"stdout"));
        assert!(report.created.contains(&"stderr"));
    }
}
