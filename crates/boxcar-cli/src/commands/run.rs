//! `boxcar run`: launch one container and wait for it.

use std::path::PathBuf;
use std::process::ExitCode;

use boxcar_common::config::BoxcarConfig;
use boxcar_common::types::{DevicePolicy, ImageName};
use boxcar_runtime::Launcher;
use clap::Args;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Image to build the container from (`{image-dir}/{IMAGE}.tar`).
    #[arg(short, long)]
    pub image: Option<ImageName>,

    /// Directory holding image archives and extracted layers.
    #[arg(long, env = "BOXCAR_IMAGE_DIR")]
    pub image_dir: Option<PathBuf>,

    /// Directory holding per-container overlay directories.
    #[arg(long, env = "BOXCAR_CONTAINER_DIR")]
    pub container_dir: Option<PathBuf>,

    /// Reaction to device nodes that cannot be created: `strict` or `best-effort`.
    #[arg(long)]
    pub device_policy: Option<DevicePolicy>,

    /// JSON configuration file.
    #[arg(long, env = "BOXCAR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Command to run inside the container, followed by its arguments.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl RunArgs {
    /// Merges the command line over the configuration file and defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be loaded or the default
    /// image name is invalid.
    pub fn resolve(&self) -> anyhow::Result<(BoxcarConfig, ImageName)> {
        let mut config = BoxcarConfig::load_or_default(self.config.as_deref())?;
        if let Some(dir) = &self.image_dir {
            config.image_dir.clone_from(dir);
        }
        if let Some(dir) = &self.container_dir {
            config.containers_dir.clone_from(dir);
        }
        if let Some(policy) = self.device_policy {
            config.device_policy = policy;
        }
        let image = match &self.image {
            Some(image) => image.clone(),
            None => config.default_image.parse()?,
        };
        Ok((config, image))
    }
}

/// Executes the `run` command.
///
/// Exits with the container's exit code, or `128 + signal` if it was
/// killed.
///
/// # Errors
///
/// Returns an error if the launch fails before the container process
/// starts.
pub fn execute(args: RunArgs) -> anyhow::Result<ExitCode> {
    let (config, image) = args.resolve()?;
    tracing::debug!(?config, %image, "resolved configuration");

    let launcher = Launcher::new(&config)?;
    let report = launcher.run(&image, &args.command)?;

    eprintln!("{report}");
    Ok(ExitCode::from(
        u8::try_from(report.status.exit_code()).unwrap_or(u8::MAX),
    ))
}
