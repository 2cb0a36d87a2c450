//! Linux namespace management for container isolation.
//!
//! Only the mount namespace is created; network, PID and user isolation
//! are outside the scope of this runtime.

pub mod mount;

pub use mount::isolate_mount_namespace;
