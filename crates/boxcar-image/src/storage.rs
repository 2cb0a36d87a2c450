//! Local image store.
//!
//! Layout under the image directory:
//!
//! ```text
//! {image_dir}/{name}.tar        source archive
//! {image_dir}/{name}.lock       extraction lock
//! {image_dir}/{name}/rootfs/    extracted, reusable layer
//! ```

use std::path::{Path, PathBuf};

use boxcar_common::constants::{IMAGE_ARCHIVE_EXTENSION, IMAGE_LOCK_EXTENSION, IMAGE_ROOTFS_DIR};
use boxcar_common::error::{BoxcarError, Result};
use boxcar_common::types::ImageName;

use crate::layer::{self, Layer};
use crate::lock::ImageLock;

/// Staging directory an extraction is unpacked into before being renamed
/// to [`IMAGE_ROOTFS_DIR`].
const STAGING_DIR: &str = ".rootfs.partial";

/// Manages the archives and extracted layers of local images.
#[derive(Debug, Clone)]
pub struct ImageStore {
    /// Root directory for all images.
    root: PathBuf,
}

/// An image whose archive is known to exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    /// Image name.
    pub name: ImageName,
    /// Path of the source archive.
    pub archive: PathBuf,
    /// Path of the extracted layer (may not exist yet).
    pub layer_dir: PathBuf,
}

/// Outcome of [`ImageStore::ensure_extracted`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// The archive was unpacked by this call.
    Extracted(Layer),
    /// The layer already existed; nothing was done.
    AlreadyPresent,
}

impl ImageStore {
    /// Opens the image store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        tracing::debug!(path = %root.display(), "opening image store");
        Self { root }
    }

    /// Returns the root storage path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns `{root}/{name}.tar`.
    #[must_use]
    pub fn archive_path(&self, name: &ImageName) -> PathBuf {
        self.root
            .join(format!("{}.{IMAGE_ARCHIVE_EXTENSION}", name.as_str()))
    }

    /// Returns `{root}/{name}/rootfs`.
    #[must_use]
    pub fn layer_path(&self, name: &ImageName) -> PathBuf {
        self.root.join(name.as_str()).join(IMAGE_ROOTFS_DIR)
    }

    /// Returns `{root}/{name}.lock`.
    #[must_use]
    pub fn lock_path(&self, name: &ImageName) -> PathBuf {
        self.root
            .join(format!("{}.{IMAGE_LOCK_EXTENSION}", name.as_str()))
    }

    /// Checks whether the image has already been extracted.
    #[must_use]
    pub fn has_layer(&self, name: &ImageName) -> bool {
        self.layer_path(name).exists()
    }

    /// Resolves an image name to its archive and layer paths.
    ///
    /// Performs no mutation, so it is safe to call before any container
    /// state is created.
    ///
    /// # Errors
    ///
    /// Returns [`BoxcarError::ImageNotFound`] if the archive does not exist.
    pub fn resolve(&self, name: &ImageName) -> Result<ResolvedImage> {
        let archive = self.archive_path(name);
        if !archive.is_file() {
            return Err(BoxcarError::ImageNotFound {
                image: name.to_string(),
                archive,
            });
        }
        Ok(ResolvedImage {
            name: name.clone(),
            archive,
            layer_dir: self.layer_path(name),
        })
    }

    /// Extracts the image into its layer directory unless that directory
    /// already exists.
    ///
    /// The check and the extraction run under the image's exclusive lock,
    /// and the archive is unpacked into a staging directory that is renamed
    /// into place only once complete. A concurrent launch therefore either
    /// sees no layer or a complete one.
    ///
    /// # Errors
    ///
    /// Returns an error if locking, unpacking, or the final rename fails.
    pub fn ensure_extracted(&self, image: &ResolvedImage) -> Result<Extraction> {
        if image.layer_dir.exists() {
            tracing::debug!(image = %image.name, "layer already extracted");
            return Ok(Extraction::AlreadyPresent);
        }

        let _lock = ImageLock::acquire(&self.lock_path(&image.name))?;
        if image.layer_dir.exists() {
            tracing::debug!(image = %image.name, "layer extracted by a concurrent launch");
            return Ok(Extraction::AlreadyPresent);
        }

        let image_dir = self.root.join(image.name.as_str());
        let staging = image_dir.join(STAGING_DIR);
        if staging.exists() {
            tracing::warn!(path = %staging.display(), "removing stale partial extraction");
            std::fs::remove_dir_all(&staging).map_err(|e| BoxcarError::io(&staging, e))?;
        }

        let layer = match layer::extract_layer(&image.archive, &staging) {
            Ok(layer) => layer,
            Err(e) => {
                let _ = std::fs::remove_dir_all(&staging);
                return Err(e);
            }
        };
        std::fs::rename(&staging, &image.layer_dir)
            .map_err(|e| BoxcarError::io(&image.layer_dir, e))?;

        tracing::info!(image = %image.name, layer = %image.layer_dir.display(), "image extracted");
        Ok(Extraction::Extracted(layer))
    }

    /// Resolves and extracts an image in one step, returning the layer
    /// directory.
    ///
    /// # Errors
    ///
    /// See [`Self::resolve`] and [`Self::ensure_extracted`].
    pub fn prepare(&self, name: &ImageName) -> Result<PathBuf> {
        let image = self.resolve(name)?;
        let _ = self.ensure_extracted(&image)?;
        Ok(image.layer_dir)
    }
}
