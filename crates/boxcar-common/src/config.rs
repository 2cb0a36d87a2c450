//! Global configuration model for the boxcar runtime.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BoxcarError, Result};
use crate::types::DevicePolicy;

/// Root configuration for the boxcar runtime.
///
/// Every field has a default, so a config file only needs to name the
/// values it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BoxcarConfig {
    /// Directory holding `{image}.tar` archives and extracted layers.
    pub image_dir: PathBuf,
    /// Directory holding per-container overlay directories.
    pub containers_dir: PathBuf,
    /// Image used when none is requested explicitly.
    pub default_image: String,
    /// Reaction to device nodes that cannot be created.
    pub device_policy: DevicePolicy,
}

impl Default for BoxcarConfig {
    fn default() -> Self {
        Self {
            image_dir: PathBuf::from(crate::constants::DEFAULT_IMAGE_DIR),
            containers_dir: PathBuf::from(crate::constants::DEFAULT_CONTAINERS_DIR),
            default_image: crate::constants::DEFAULT_IMAGE.to_string(),
            device_policy: DevicePolicy::default(),
        }
    }
}

impl BoxcarConfig {
    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not parse.
    pub fn load(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "loading configuration");
        let content = std::fs::read_to_string(path).map_err(|e| BoxcarError::io(path, e))?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Loads `path` if given, otherwise returns the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the given file cannot be loaded.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }
}
