//! Tunnel status reporting and frpc output classification.

use crate::config::FrpcConfig;
use crate::tunnel::TunnelId;
use serde::{Deserialize, Serialize};

/// Outcome of a start request, reported through the status handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelStatus {
    /// frpc printed something other than an informational line before the
    /// tunnel came up. The process has been killed.
    Failed,
    /// frpc reported the tunnel as started.
    Succeeded,
    /// At least one tunnel of the request already had a live process;
    /// nothing was spawned.
    AlreadyRunning,
}

impl TunnelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelStatus::Failed => "failed",
            TunnelStatus::Succeeded => "succeeded",
            TunnelStatus::AlreadyRunning => "already_running",
        }
    }
}

impl std::fmt::Display for TunnelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status emission: the classification plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: TunnelStatus,
    /// For `Failed`/`Succeeded` this is the frpc line that decided the outcome.
    pub message: String,
    /// Tunnels the update refers to.
    pub tunnels: Vec<TunnelId>,
}

/// How a single output line was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass {
    /// Blank line; not logged, not forwarded.
    Ignored,
    /// Forwarded but did not change state (progress line, or any line after
    /// a terminal state was reached).
    Info,
    /// This line decided the outcome. Emitted at most once per classifier.
    Terminal(TunnelStatus),
}

/// Per-process state machine over frpc's stdout.
///
/// Before a terminal state: a line without the info marker is a failure, a
/// line with the success marker is a success. The first terminal state wins
/// and nothing afterwards is reclassified.
#[derive(Debug, Clone)]
pub struct OutputClassifier {
    info_marker: String,
    success_marker: String,
    outcome: Option<TunnelStatus>,
}

impl Default for OutputClassifier {
    fn default() -> Self {
        Self::new(FrpcConfig::INFO_MARKER, FrpcConfig::SUCCESS_MARKER)
    }
}

impl OutputClassifier {
    pub fn new(info_marker: impl Into<String>, success_marker: impl Into<String>) -> Self {
        Self {
            info_marker: info_marker.into(),
            success_marker: success_marker.into(),
            outcome: None,
        }
    }

    pub fn classify(&mut self, line: &str) -> LineClass {
        if line.trim().is_empty() {
            return LineClass::Ignored;
        }
        if self.outcome.is_some() {
            return LineClass::Info;
        }

        let status = if !line.contains(&self.info_marker) {
            TunnelStatus::Failed
        } else if line.contains(&self.success_marker) {
            TunnelStatus::Succeeded
        } else {
            return LineClass::Info;
        };

        self.outcome = Some(status);
        LineClass::Terminal(status)
    }

    /// Terminal status reached so far, if any.
    pub fn outcome(&self) -> Option<TunnelStatus> {
        self.outcome
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }
}
