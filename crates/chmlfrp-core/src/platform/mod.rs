//! Platform abstraction layer.
//!
//! All `#[cfg]` blocks for OS-specific behavior live here rather than in the
//! supervisor:
//! - `permissions` - marking the frpc binary executable
//! - `process` - spawn flags and process-tree termination

pub mod permissions;
pub mod process;

pub use permissions::set_executable;
pub use process::{
    configure_command, kill_leftover_group, kill_process_tree, terminate_process_tree,
};
