//! Platform-specific process management.
//!
//! frpc children are started as the leader of their own process group (unix)
//! or in a new process group (Windows) so that the whole tree, including any
//! helpers frpc forks, can be signalled at once.

use crate::error::{Result, TunnelError};
use tracing::{debug, warn};

#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the spawn flags every supervised process needs.
///
/// # Platform Behavior
/// - **Linux/macOS**: Puts the child in a new process group with itself as leader
/// - **Windows**: `CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW`
pub fn configure_command(cmd: &mut tokio::process::Command) {
    #[cfg(unix)]
    {
        cmd.process_group(0);
    }

    #[cfg(windows)]
    {
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW);
    }
}

/// Ask a process tree to exit.
///
/// # Platform Behavior
/// - **Linux/macOS**: Sends SIGTERM to the process group led by `pid`
/// - **Windows**: `taskkill /PID {pid} /T /F` (console apps ignore a polite taskkill)
pub async fn terminate_process_tree(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        signal_group(pid, nix::sys::signal::Signal::SIGTERM)
    }

    #[cfg(windows)]
    {
        taskkill_tree(pid).await
    }
}

/// Force kill a process tree.
///
/// # Platform Behavior
/// - **Linux/macOS**: Sends SIGKILL to the process group led by `pid`
/// - **Windows**: `taskkill /PID {pid} /T /F`
pub async fn kill_process_tree(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        signal_group(pid, nix::sys::signal::Signal::SIGKILL)
    }

    #[cfg(windows)]
    {
        taskkill_tree(pid).await
    }
}

/// Kill whatever is left in the group of a leader that has already been
/// reaped.
///
/// # Platform Behavior
/// - **Linux/macOS**: SIGKILL to the group. The kernel does not hand out a
///   pid that is still in use as a group id, so this cannot hit a stranger.
/// - **Windows**: No-op. Once the parent is gone `taskkill /T` can no longer
///   find its children, and the pid may already belong to another process.
pub async fn kill_leftover_group(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        signal_group(pid, nix::sys::signal::Signal::SIGKILL)
    }

    #[cfg(windows)]
    {
        debug!("Not killing leftovers of exited process {} on Windows", pid);
        Ok(())
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| TunnelError::Terminate {
        pid,
        message: "pid out of range".to_string(),
    })?;

    debug!("Sending {:?} to process group {}", signal, pid);
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) => Ok(()),
        // Group already gone
        Err(Errno::ESRCH) => {
            debug!("Process group {} no longer exists", pid);
            Ok(())
        }
        Err(e) => {
            warn!("Failed to send {:?} to process group {}: {}", signal, pid, e);
            Err(TunnelError::Terminate {
                pid,
                message: e.to_string(),
            })
        }
    }
}

/// `taskkill` exit code when no process matches the pid.
#[cfg(windows)]
const TASKKILL_NOT_FOUND: i32 = 128;

#[cfg(windows)]
async fn taskkill_tree(pid: u32) -> Result<()> {
    use tokio::process::Command;

    debug!("Terminating process tree {} with taskkill", pid);
    let mut cmd = Command::new("taskkill");
    cmd.args(["/PID", &pid.to_string(), "/T", "/F"])
        .creation_flags(CREATE_NO_WINDOW);
    let output = cmd.output().await.map_err(|e| TunnelError::Terminate {
        pid,
        message: format!("failed to run taskkill: {e}"),
    })?;

    // The message text is localized, so only the exit code is checked
    match output.status.code() {
        Some(0) => Ok(()),
        Some(TASKKILL_NOT_FOUND) => {
            debug!("Process {} no longer exists", pid);
            Ok(())
        }
        code => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("taskkill failed for {} ({:?}): {}", pid, code, stderr);
            Err(TunnelError::Terminate {
                pid,
                message: format!("taskkill exited with {code:?}"),
            })
        }
    }
}
