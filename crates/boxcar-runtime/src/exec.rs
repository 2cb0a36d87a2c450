//! Replacing the confined child with the target command.

use std::convert::Infallible;
use std::ffi::CString;

use boxcar_common::error::{BoxcarError, Result};

/// Converts a command line into the `argv` passed to `execvp(3)`.
///
/// # Errors
///
/// Returns [`BoxcarError::Config`] if the command is empty or an argument
/// contains a NUL byte.
pub fn to_argv(command: &[String]) -> Result<Vec<CString>> {
    if command.is_empty() {
        return Err(BoxcarError::Config {
            message: "command must not be empty".into(),
        });
    }
    command
        .iter()
        .map(|arg| {
            CString::new(arg.as_bytes()).map_err(|_| BoxcarError::Config {
                message: format!("argument contains a NUL byte: {arg:?}"),
            })
        })
        .collect()
}

/// Replaces the process image with `command`, searching `PATH` for
/// `command[0]`.
///
/// Only returns on failure; `Ok` is uninhabited.
///
/// # Errors
///
/// Returns [`BoxcarError::ExecFailed`] if the program is missing or not
/// executable, or [`BoxcarError::Config`] for an invalid command.
pub fn exec_command(command: &[String]) -> Result<Infallible> {
    let argv = to_argv(command)?;
    tracing::debug!(command = ?command, "exec");

    let Err(errno) = nix::unistd::execvp(argv[0].as_c_str(), &argv);
    Err(BoxcarError::ExecFailed {
        command: command[0].clone(),
        source: errno.into(),
    })
}
