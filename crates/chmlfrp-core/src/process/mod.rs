//! frpc process management.
//!
//! Launches the frpc client for a tunnel or tunnel group, classifies its
//! output into a status, and stops it on request.
//!
//! # Example
//!
//! ```rust,no_run
//! use chmlfrp_core::process::{StartOptions, TunnelSupervisor};
//! use chmlfrp_core::{TunnelGroup, TunnelId, TunnelStatus};
//!
//! #[tokio::main]
//! async fn main() -> chmlfrp_core::Result<()> {
//!     let supervisor = TunnelSupervisor::new();
//!     let group = TunnelGroup::new([TunnelId(101), TunnelId(102)])?;
//!
//!     let options = StartOptions::new()
//!         .with_executable("/opt/frp/frpc")
//!         .on_status(|update| {
//!             if update.status == TunnelStatus::Succeeded {
//!                 println!("tunnels {:?} are up", update.tunnels);
//!             }
//!         });
//!     supervisor.start("user-token", group, options).await?;
//!
//!     // Stopping one member stops the whole group
//!     supervisor.stop([TunnelId(101)]).await?;
//!     assert!(!supervisor.is_running(TunnelId(102)));
//!     Ok(())
//! }
//! ```

mod log_sink;
mod options;
mod registry;
mod supervisor;

pub use log_sink::LogSink;
pub use options::{LineHandler, StartOptions, StatusHandler};
pub use registry::{ProcessRecord, ProcessRegistry};
pub use supervisor::TunnelSupervisor;
