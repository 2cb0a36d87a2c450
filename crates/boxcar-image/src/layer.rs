//! Filesystem layer extraction.
//!
//! An image is a single tar archive unpacked into a directory that later
//! serves as the read-only lower layer of every container built from it.
//! Archives may carry character or block device entries; unpacking those
//! would create real device nodes on the host, so they are always skipped.

use std::fs::{File, Permissions};
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use boxcar_common::error::{BoxcarError, Result};
use tar::EntryType;

/// Leading bytes of a gzip stream.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Summary of an extracted layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layer {
    /// Size of the source archive in bytes.
    pub size_bytes: u64,
    /// Number of entries written to the target.
    pub entries: usize,
    /// Number of device entries that were skipped.
    pub skipped_devices: usize,
}

/// Extracts a tar archive to the target directory, leaving out character
/// and block device entries.
///
/// Both plain and gzip-compressed archives are accepted; compression is
/// detected from the stream's magic bytes rather than the file name.
/// Ownership is preserved only when running as root, with blank uid and
/// gid header fields read as 0.
///
/// # Errors
///
/// Returns [`BoxcarError::ExtractionFailed`] if the archive cannot be
/// opened, decoded, or unpacked.
pub fn extract_layer(archive_path: &Path, target: &Path) -> Result<Layer> {
    tracing::info!(
        archive = %archive_path.display(),
        target = %target.display(),
        "extracting layer"
    );

    let failed = |source: std::io::Error| BoxcarError::ExtractionFailed {
        archive: archive_path.to_path_buf(),
        target: target.to_path_buf(),
        source,
    };

    std::fs::create_dir_all(target).map_err(failed)?;
    let mut file = File::open(archive_path).map_err(failed)?;
    let size_bytes = file.metadata().map_err(failed)?.len();

    let (entries, skipped_devices) = if is_gzip_archive(&mut file).map_err(failed)? {
        unpack_without_devices(tar::Archive::new(flate2::read::GzDecoder::new(file)), target)
    } else {
        unpack_without_devices(tar::Archive::new(file), target)
    }
    .map_err(failed)?;

    tracing::info!(
        size = size_bytes,
        entries,
        skipped_devices,
        "layer extracted"
    );
    Ok(Layer {
        size_bytes,
        entries,
        skipped_devices,
    })
}

/// Unpacks every entry except device files, returning
/// `(written, skipped_devices)`.
///
/// Directory entries are applied last, deepest first, so a read-only
/// directory does not block the creation of its own children and its
/// mtime is not disturbed by them.
fn unpack_without_devices<R: Read>(
    mut archive: tar::Archive<R>,
    target: &Path,
) -> std::io::Result<(usize, usize)> {
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    archive.set_preserve_ownerships(false);
    archive.set_overwrite(true);
    let restore_owners = nix::unistd::geteuid().is_root();

    let mut written = 0;
    let mut skipped = 0;
    let mut directories = Vec::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        match entry.header().entry_type() {
            EntryType::Char | EntryType::Block => {
                let path = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
                tracing::debug!(%path, "skipping device entry");
                skipped += 1;
            }
            EntryType::Directory => directories.push(entry),
            _ => {
                if unpack_entry(&mut entry, target, restore_owners)? {
                    written += 1;
                } else {
                    let path = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
                    tracing::warn!(%path, "skipping entry outside the layer root");
                }
            }
        }
    }

    directories.sort_by(|a, b| b.path_bytes().cmp(&a.path_bytes()));
    for mut dir in directories {
        if unpack_entry(&mut dir, target, restore_owners)? {
            written += 1;
        }
    }

    Ok((written, skipped))
}

/// Unpacks one entry and, when `restore_owners` is set, applies its owner.
fn unpack_entry<R: Read>(
    entry: &mut tar::Entry<'_, R>,
    target: &Path,
    restore_owners: bool,
) -> std::io::Result<bool> {
    if !entry.unpack_in(target)? {
        return Ok(false);
    }
    if restore_owners {
        restore_ownership(entry, target)?;
    }
    Ok(true)
}

/// Applies the uid/gid recorded in the entry header.
///
/// Blank or malformed numeric fields read as 0. The mode is written again
/// afterwards because `chown(2)` clears the set-id bits; links keep the
/// mode of what they point to.
fn restore_ownership<R: Read>(entry: &tar::Entry<'_, R>, target: &Path) -> std::io::Result<()> {
    let header = entry.header();
    let uid = header.uid().ok().and_then(|id| u32::try_from(id).ok()).unwrap_or(0);
    let gid = header.gid().ok().and_then(|id| u32::try_from(id).ok()).unwrap_or(0);
    let path = entry_destination(target, &entry.path()?);

    std::os::unix::fs::lchown(&path, Some(uid), Some(gid))?;
    if !matches!(header.entry_type(), EntryType::Symlink | EntryType::Link) {
        if let Ok(mode) = header.mode() {
            std::fs::set_permissions(&path, Permissions::from_mode(mode & 0o7777))?;
        }
    }
    Ok(())
}

/// Where `unpack_in` placed an entry: only the normal components of its
/// path, joined onto `target`.
fn entry_destination(target: &Path, entry_path: &Path) -> PathBuf {
    entry_path
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .fold(target.to_path_buf(), |path, part| path.join(part))
}

/// Checks for the gzip magic and rewinds the file.
fn is_gzip_archive(file: &mut File) -> std::io::Result<bool> {
    let mut magic = Vec::with_capacity(GZIP_MAGIC.len());
    let _ = file.by_ref().take(GZIP_MAGIC.len() as u64).read_to_end(&mut magic)?;
    let _ = file.seek(SeekFrom::Start(0))?;
    Ok(magic == GZIP_MAGIC)
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::MetadataExt;

    use super::*;

    fn owned_header() -> tar::Header {
        let mut header = tar::Header::new_gnu();
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(1_700_000_000);
        header
    }

    fn file_header(size: usize, mode: u32) -> tar::Header {
        let mut header = owned_header();
        header.set_size(size as u64);
        header.set_mode(mode);
        header.set_cksum();
        header
    }

    fn device_header(kind: EntryType, major: u32, minor: u32) -> tar::Header {
        let mut header = owned_header();
        header.set_entry_type(kind);
        header.set_device_major(major).expect("major");
        header.set_device_minor(minor).expect("minor");
        header.set_size(0);
        header.set_mode(0o666);
        header.set_cksum();
        header
    }

    fn create_test_tar(dir: &Path) -> PathBuf {
        let tar_path = dir.join("test.tar");
        let file = File::create(&tar_path).expect("failed to create tar file");
        let mut builder = tar::Builder::new(file);
        let data = b"hello from layer";
        builder
            .append_data(&mut file_header(data.len(), 0o644), "hello.txt", &data[..])
            .expect("failed to append data");
        builder
            .append_data(
                &mut device_header(EntryType::Char, 1, 3),
                "dev/null",
                std::io::empty(),
            )
            .expect("failed to append char device");
        builder
            .append_data(
                &mut device_header(EntryType::Block, 8, 0),
                "dev/sda",
                std::io::empty(),
            )
            .expect("failed to append block device");
        builder.finish().expect("failed to finish tar");
        tar_path
    }

    fn create_test_tar_gz(dir: &Path) -> PathBuf {
        let tar_gz_path = dir.join("gz-image.tar");
        let file = File::create(&tar_gz_path).expect("failed to create tar.gz");
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let data = b"hello from gzipped layer";
        builder
            .append_data(&mut file_header(data.len(), 0o644), "gzhello.txt", &data[..])
            .expect("failed to append data");
        let encoder = builder.into_inner().expect("failed to finish encoder");
        let _ = encoder.finish().expect("failed to finish gzip");
        tar_gz_path
    }

    #[test]
    fn extract_plain_tar_creates_expected_files() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let tar_path = create_test_tar(dir.path());
        let target = dir.path().join("extracted");

        let layer = extract_layer(&tar_path, &target).expect("extract failed");
        assert!(layer.size_bytes > 0);
        assert_eq!(layer.entries, 1);

        let content = std::fs::read_to_string(target.join("hello.txt")).expect("read failed");
        assert_eq!(content, "hello from layer");
    }

    #[test]
    fn device_entries_are_never_created() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let tar_path = create_test_tar(dir.path());
        let target = dir.path().join("extracted");

        let layer = extract_layer(&tar_path, &target).expect("extract failed");
        assert_eq!(layer.skipped_devices, 2);
        assert!(std::fs::symlink_metadata(target.join("dev/null")).is_err());
        assert!(std::fs::symlink_metadata(target.join("dev/sda")).is_err());
    }

    #[test]
    fn extract_gzip_tar_detected_by_magic() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let tar_gz_path = create_test_tar_gz(dir.path());
        let target = dir.path().join("extracted_gz");

        let layer = extract_layer(&tar_gz_path, &target).expect("extract failed");
        assert_eq!(layer.entries, 1);

        let content = std::fs::read_to_string(target.join("gzhello.txt")).expect("read failed");
        assert_eq!(content, "hello from gzipped layer");
    }

    #[test]
    fn read_only_directory_still_receives_children() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let tar_path = dir.path().join("ro.tar");
        let mut builder = tar::Builder::new(File::create(&tar_path).expect("create"));

        let mut dir_header = owned_header();
        dir_header.set_entry_type(EntryType::Directory);
        dir_header.set_size(0);
        dir_header.set_mode(0o555);
        dir_header.set_cksum();
        builder
            .append_data(&mut dir_header, "bin/", std::io::empty())
            .expect("append dir");
        let data = b"#!/bin/sh\n";
        builder
            .append_data(&mut file_header(data.len(), 0o755), "bin/sh", &data[..])
            .expect("append file");
        builder.finish().expect("finish");

        let target = dir.path().join("out");
        let layer = extract_layer(&tar_path, &target).expect("extract failed");
        assert_eq!(layer.entries, 2);
        assert!(target.join("bin/sh").is_file());

        let mode = std::fs::metadata(target.join("bin"))
            .expect("stat")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o555);
        std::fs::set_permissions(target.join("bin"), std::fs::Permissions::from_mode(0o755))
            .expect("restore permissions for cleanup");
    }

    #[test]
    fn blank_owner_fields_read_as_root_owner() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let tar_path = dir.path().join("blank.tar");
        let mut builder = tar::Builder::new(File::create(&tar_path).expect("create"));
        let data = b"no owner";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "f", &data[..])
            .expect("append");
        builder.finish().expect("finish");

        let target = dir.path().join("out");
        let layer = extract_layer(&tar_path, &target).expect("extract failed");
        assert_eq!(layer.entries, 1);

        let meta = std::fs::metadata(target.join("f")).expect("stat");
        assert_eq!(meta.permissions().mode() & 0o777, 0o644);
        if nix::unistd::geteuid().is_root() {
            assert_eq!((meta.uid(), meta.gid()), (0, 0));
        }
    }

    #[test]
    fn recorded_owner_and_setuid_bit_survive_as_root() {
        if !nix::unistd::geteuid().is_root() {
            return;
        }
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let tar_path = dir.path().join("owned.tar");
        let mut builder = tar::Builder::new(File::create(&tar_path).expect("create"));
        let data = b"#!/bin/sh\n";
        let mut header = owned_header();
        header.set_uid(1234);
        header.set_gid(5678);
        header.set_size(data.len() as u64);
        header.set_mode(0o4755);
        header.set_cksum();
        builder
            .append_data(&mut header, "bin/su", &data[..])
            .expect("append");
        builder.finish().expect("finish");

        let target = dir.path().join("out");
        let _ = extract_layer(&tar_path, &target).expect("extract failed");

        let meta = std::fs::metadata(target.join("bin/su")).expect("stat");
        assert_eq!((meta.uid(), meta.gid()), (1234, 5678));
        assert_eq!(meta.permissions().mode() & 0o7777, 0o4755);
    }

    #[test]
    fn destination_keeps_only_normal_components() {
        let target = Path::new("/layer");
        assert_eq!(entry_destination(target, Path::new("./bin/sh")), Path::new("/layer/bin/sh"));
        assert_eq!(entry_destination(target, Path::new("/etc/passwd")), Path::new("/layer/etc/passwd"));
        assert_eq!(entry_destination(target, Path::new("bin/")), Path::new("/layer/bin"));
    }

    #[test]
    fn extract_nonexistent_archive_returns_error() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let result = extract_layer(&dir.path().join("missing.tar"), &dir.path().join("out"));
        assert!(matches!(result, Err(BoxcarError::ExtractionFailed { .. })));
    }

    #[test]
    fn corrupt_archive_returns_extraction_error() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let bogus = dir.path().join("bogus.tar");
        std::fs::write(&bogus, vec![0x1f, 0x8b, 0x00, 0x01, 0x02]).expect("write");
        let result = extract_layer(&bogus, &dir.path().join("out"));
        assert!(matches!(result, Err(BoxcarError::ExtractionFailed { .. })));
    }

    #[test]
    fn gzip_detection_rewinds_the_file() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let tar_gz_path = create_test_tar_gz(dir.path());
        let mut file = File::open(&tar_gz_path).expect("open");
        assert!(is_gzip_archive(&mut file).expect("probe"));
        assert_eq!(file.stream_position().expect("position"), 0);

        let plain = create_test_tar(dir.path());
        let mut file = File::open(plain).expect("open");
        assert!(!is_gzip_archive(&mut file).expect("probe"));
    }
}
