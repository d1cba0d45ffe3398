//! ChmlFrp Core - supervisor for the frpc tunnel client.
//!
//! Starts the ChmlFrp build of `frpc` for one tunnel or a group of tunnels,
//! watches its output to decide whether the tunnel came up, and stops it on
//! request. Talking to the ChmlFrp web API is left to the caller: the
//! supervisor only needs the user token and the tunnel ids.
//!
//! # Example
//!
//! ```rust,no_run
//! use chmlfrp_core::{StartOptions, TunnelId, TunnelSupervisor};
//!
//! #[tokio::main]
//! async fn main() -> chmlfrp_core::Result<()> {
//!     let supervisor = TunnelSupervisor::new();
//!     let options = StartOptions::new().on_status(|update| {
//!         println!("{}: {}", update.status, update.message);
//!     });
//!
//!     supervisor.start("user-token", TunnelId(42), options).await?;
//!     assert!(supervisor.is_running(TunnelId(42)));
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod platform;
pub mod process;
pub mod status;
pub mod tunnel;

// Re-export commonly used types
pub use config::{FrpcConfig, SupervisorConfig};
pub use error::{Result, TunnelError};
pub use process::{ProcessRecord, ProcessRegistry, StartOptions, TunnelSupervisor};
pub use status::{LineClass, OutputClassifier, StatusUpdate, TunnelStatus};
pub use tunnel::{Tunnel, TunnelGroup, TunnelId};
