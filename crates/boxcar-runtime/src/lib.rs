//! Container launch for the boxcar runtime.
//!
//! A launch forks exactly one child. The child walks the confinement
//! pipeline (mount namespace, root filesystem, system mounts, device
//! nodes, root switch) and execs the target command; the parent waits for
//! it and reports its exit status.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod confinement;
pub mod container;
pub mod exec;
pub mod process;
pub mod rootfs;

pub use process::{ChildExit, LaunchReport, Launcher};
