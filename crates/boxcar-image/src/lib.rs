//! # boxcar-image
//!
//! Local image handling for the boxcar runtime.
//!
//! Handles:
//! - **Storage**: the `{image_dir}/{name}.tar` / `{image_dir}/{name}/rootfs`
//!   layout and image resolution.
//! - **Layers**: tar extraction that never materialises device files.
//! - **Locking**: per-image advisory locks around first-time extraction.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod layer;
pub mod lock;
pub mod storage;

pub use storage::{Extraction, ImageStore, ResolvedImage};
