//! Centralized configuration for the tunnel supervisor.
//!
//! Constants describing the `frpc` client contract and supervisor timing.

use std::time::Duration;

/// The `frpc` executable contract.
pub struct FrpcConfig;

impl FrpcConfig {
    #[cfg(windows)]
    pub const EXECUTABLE_NAME: &'static str = "frpc.exe";
    #[cfg(not(windows))]
    pub const EXECUTABLE_NAME: &'static str = "frpc";

    pub const TOKEN_PLACEHOLDER: &'static str = "%token%";
    pub const ID_PLACEHOLDER: &'static str = "%id%";
    pub const ARGUMENT_TEMPLATE: &'static str = "-u %token% -p %id%";

    /// Prefix frpc puts on informational log lines.
    pub const INFO_MARKER: &'static str = "[I]";
    /// Printed by the ChmlFrp build of frpc once a proxy is up ("started successfully").
    pub const SUCCESS_MARKER: &'static str = "启动成功";

    /// Separator used when several tunnels share one process.
    pub const ID_SEPARATOR: &'static str = ",";
}

/// Supervisor timing and file naming.
pub struct SupervisorConfig;

impl SupervisorConfig {
    /// Grace period after SIGTERM before the process tree is force killed.
    pub const STOP_TIMEOUT: Duration = Duration::from_secs(2);
    /// How long to wait for the exit notification after a force kill.
    pub const KILL_TIMEOUT: Duration = Duration::from_secs(1);
    /// How long to keep reading output after frpc itself has exited, in case
    /// a leftover child still holds the pipe open.
    pub const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

    pub const LOG_FILE_PREFIX: &'static str = "chmlfrp-";
    pub const LOG_FILE_EXTENSION: &'static str = "log";
}
