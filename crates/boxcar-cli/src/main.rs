//! # boxcar
//!
//! Runs a single command in a minimal container built from a local image
//! archive, then reports how it exited.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

mod commands;

use std::process::ExitCode;

use boxcar_common::error::{BoxcarError, EXIT_GENERIC_FAILURE};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::commands::{Cli, LogFormat};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match commands::execute(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("boxcar: {err:#}");
            let code = err
                .downcast_ref::<BoxcarError>()
                .map_or(EXIT_GENERIC_FAILURE, BoxcarError::exit_code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
