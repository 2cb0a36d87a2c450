//! # boxcar-core
//!
//! Low-level Linux isolation primitives for the boxcar runtime.
//!
//! This crate provides safe abstractions over:
//! - **Namespaces**: a private, non-propagating mount namespace.
//! - **Filesystem**: `OverlayFS` composition, `/proc` `/sys` `/dev` mounts,
//!   device node creation, and `pivot_root`.
//!
//! Every syscall failure is mapped to a [`boxcar_common::error::BoxcarError`]
//! variant that names the path involved.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod filesystem;
pub mod namespace;
