//! frpc process supervision.

use super::log_sink::LogSink;
use super::options::{LineHandler, StartOptions, StatusHandler};
use super::registry::{ProcessRecord, ProcessRegistry, Registration};
use crate::config::{FrpcConfig, SupervisorConfig};
use crate::error::{Result, TunnelError};
use crate::platform;
use crate::status::{LineClass, OutputClassifier, StatusUpdate, TunnelStatus};
use crate::tunnel::{TunnelGroup, TunnelId};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, error, info, warn};

/// Starts, watches and stops frpc processes for tunnels.
///
/// Cloning is cheap; clones share one registry.
///
/// # Threading
///
/// Each spawned process gets a tokio task that reads its stdout line by
/// line. `on_line` and `on_status` run inside that task, on whichever
/// runtime worker thread drives it. They must be `Send + Sync`, should
/// return quickly, and are never called concurrently for the same process.
#[derive(Debug, Clone, Default)]
pub struct TunnelSupervisor {
    registry: Arc<ProcessRegistry>,
}

impl TunnelSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    /// Start one frpc process serving every tunnel in `tunnels`.
    ///
    /// Returns as soon as the process is spawned and registered; the outcome
    /// arrives later through `options.on_status`. Returns `Ok(false)` without
    /// spawning anything if any tunnel of the request is already running, in
    /// which case the status handler receives [`TunnelStatus::AlreadyRunning`].
    ///
    /// # Errors
    /// Missing token, bad argument template, missing executable, log file
    /// creation and spawn failures. Nothing is registered in those cases.
    pub async fn start(
        &self,
        token: &str,
        tunnels: impl Into<TunnelGroup>,
        options: StartOptions,
    ) -> Result<bool> {
        let group = tunnels.into();
        if token.trim().is_empty() {
            return Err(TunnelError::MissingToken);
        }

        let executable = options.resolve_executable()?;
        let args = options.build_args(token, &group)?;
        let log_path = options.resolve_log_path(&group);

        if !executable.exists() {
            return Err(TunnelError::ExecutableNotFound(executable));
        }
        if let Err(e) = platform::set_executable(&executable) {
            warn!(
                "Could not mark {} executable, trying to start it anyway: {}",
                executable.display(),
                e
            );
        }

        let registration = self.registry.register_if_idle(&group, || {
            // Only truncate the log once we know the tunnels are idle
            let sink = log_path.as_deref().map(LogSink::create).transpose()?;
            let child = spawn_frpc(&executable, &args, &options)?;
            let pid = child.id().ok_or_else(|| TunnelError::SpawnFailed {
                executable: executable.clone(),
                message: "process exited before its pid could be read".to_string(),
            })?;
            let record = Arc::new(ProcessRecord::new(pid, group.clone(), log_path.clone()));
            Ok((record, (child, sink)))
        })?;

        match registration {
            Registration::Busy(running) => {
                let message = format!("Tunnel(s) {} already running", join_ids(&running));
                warn!("{}; not starting {}", message, group);
                emit(&options.on_status, TunnelStatus::AlreadyRunning, message, running);
                Ok(false)
            }
            Registration::Registered((record, (child, sink))) => {
                info!(
                    "Started frpc (pid {}) for tunnel(s) {}",
                    record.pid(),
                    group
                );
                let classifier = OutputClassifier::new(FrpcConfig::INFO_MARKER, options.success_marker());
                let task = SupervisedProcess {
                    guard: ExitGuard {
                        registry: Arc::clone(&self.registry),
                        record,
                        released: false,
                    },
                    child,
                    sink,
                    classifier,
                    on_line: options.on_line,
                    on_status: options.on_status,
                };
                tokio::spawn(task.run());
                Ok(true)
            }
        }
    }

    /// Stop the processes serving `tunnels`.
    ///
    /// Tunnels without a live process are skipped. Stopping any member of a
    /// group stops the shared process, so every member of that group stops.
    pub async fn stop(&self, tunnels: impl IntoIterator<Item = TunnelId>) -> Result<()> {
        let mut records: Vec<Arc<ProcessRecord>> = Vec::new();
        for id in tunnels {
            match self.registry.get(id) {
                Some(record) => {
                    if !records.iter().any(|r| Arc::ptr_eq(r, &record)) {
                        records.push(record);
                    }
                }
                None => debug!("Tunnel {} is not running, nothing to stop", id),
            }
        }

        let mut first_error = None;
        for record in records {
            if let Err(e) = self.terminate(&record).await {
                error!("Failed to stop frpc (pid {}): {}", record.pid(), e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Stop every registered process. Returns how many were stopped.
    pub async fn stop_all(&self) -> Result<usize> {
        let records = self.registry.records();
        info!("stop_all: {} frpc process(es) to stop", records.len());

        let mut stopped = 0;
        let mut first_error = None;
        for record in records {
            match self.terminate(&record).await {
                Ok(()) => stopped += 1,
                Err(e) => {
                    error!("Failed to stop frpc (pid {}): {}", record.pid(), e);
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(stopped), Err)
    }

    /// Whether `tunnel` has a process that has not exited.
    pub fn is_running(&self, tunnel: TunnelId) -> bool {
        self.registry.is_running(tunnel)
    }

    pub fn running_tunnels(&self) -> Vec<TunnelId> {
        self.registry.running_ids()
    }

    /// Pid of the process serving `tunnel`.
    pub fn process_id(&self, tunnel: TunnelId) -> Option<u32> {
        self.registry.get(tunnel).map(|record| record.pid())
    }

    pub fn log_path(&self, tunnel: TunnelId) -> Option<PathBuf> {
        self.registry
            .get(tunnel)
            .and_then(|record| record.log_path().map(Path::to_path_buf))
    }

    /// SIGTERM the process group, then SIGKILL if it outlives the grace period.
    async fn terminate(&self, record: &Arc<ProcessRecord>) -> Result<()> {
        let pid = record.pid();
        if record.has_exited() {
            self.registry.remove_record(record);
            return Ok(());
        }

        info!(
            "Stopping frpc (pid {}) for tunnel(s) {}",
            pid,
            record.tunnels()
        );
        if let Err(e) = platform::terminate_process_tree(pid).await {
            warn!("Graceful stop of {} failed, force killing: {}", pid, e);
        }

        let exited =
            tokio::time::timeout(SupervisorConfig::STOP_TIMEOUT, record.wait_exited()).await;
        if exited.is_err() {
            debug!(
                "frpc (pid {}) still running after {:?}, sending SIGKILL",
                pid,
                SupervisorConfig::STOP_TIMEOUT
            );
            platform::kill_process_tree(pid).await?;
            let killed =
                tokio::time::timeout(SupervisorConfig::KILL_TIMEOUT, record.wait_exited()).await;
            if killed.is_err() {
                warn!(
                    "frpc (pid {}) has not been reaped {:?} after SIGKILL",
                    pid,
                    SupervisorConfig::KILL_TIMEOUT
                );
            }
        }

        self.registry.remove_record(record);
        Ok(())
    }
}

fn spawn_frpc(executable: &Path, args: &[String], options: &StartOptions) -> Result<Child> {
    let mut cmd = Command::new(executable);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = &options.working_dir {
        cmd.current_dir(dir);
    }
    for (key, value) in &options.env_vars {
        cmd.env(key, value);
    }
    platform::configure_command(&mut cmd);

    cmd.spawn().map_err(|e| {
        error!("Failed to spawn {}: {}", executable.display(), e);
        TunnelError::SpawnFailed {
            executable: executable.to_path_buf(),
            message: e.to_string(),
        }
    })
}

fn emit(handler: &Option<StatusHandler>, status: TunnelStatus, message: String, tunnels: Vec<TunnelId>) {
    if let Some(handler) = handler {
        handler(StatusUpdate {
            status,
            message,
            tunnels,
        });
    }
}

fn join_ids(ids: &[TunnelId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(FrpcConfig::ID_SEPARATOR)
}

/// Marks the record exited and drops its registry entries, even if the
/// supervision task unwinds from a panicking handler.
struct ExitGuard {
    registry: Arc<ProcessRegistry>,
    record: Arc<ProcessRecord>,
    released: bool,
}

impl ExitGuard {
    fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        self.record.mark_exited();
        let removed = self.registry.remove_record(&self.record);
        debug!(
            "Deregistered frpc (pid {}): {} registry entries removed",
            self.record.pid(),
            removed
        );
    }
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// One step of the supervision loop.
enum Event {
    Exited(std::io::Result<ExitStatus>),
    Read(std::io::Result<usize>),
}

/// State owned by the per-process supervision task.
struct SupervisedProcess {
    guard: ExitGuard,
    child: Child,
    sink: Option<LogSink>,
    classifier: OutputClassifier,
    on_line: Option<LineHandler>,
    on_status: Option<StatusHandler>,
}

impl SupervisedProcess {
    async fn run(mut self) {
        let pid = self.guard.record.pid();

        if let Some(stderr) = self.child.stderr.take() {
            tokio::spawn(drain_stderr(pid, stderr));
        }

        // Exit is observed through `wait()`, not stdout EOF: a leftover child
        // can keep the pipe open long after frpc itself is gone.
        let mut stdout = self.child.stdout.take().map(BufReader::new);
        let mut buf = Vec::new();
        let exit = loop {
            let event = match stdout.as_mut() {
                Some(reader) => tokio::select! {
                    status = self.child.wait() => Event::Exited(status),
                    read = reader.read_until(b'\n', &mut buf) => Event::Read(read),
                },
                None => Event::Exited(self.child.wait().await),
            };

            match event {
                Event::Exited(status) => break status,
                Event::Read(Ok(0)) => stdout = None,
                Event::Read(Ok(_)) => {
                    self.forward(&buf).await;
                    buf.clear();
                }
                Event::Read(Err(e)) => {
                    warn!("Error reading frpc (pid {}) stdout: {}", pid, e);
                    stdout = None;
                }
            }
        };

        match exit {
            Ok(status) => info!(
                "frpc (pid {}) for tunnel(s) {} exited: {}",
                pid,
                self.guard.record.tunnels(),
                status
            ),
            Err(e) => warn!("Failed to wait for frpc (pid {}): {}", pid, e),
        }
        self.guard.release();

        if let Some(reader) = stdout {
            self.drain_after_exit(reader, buf).await;
        }
    }

    /// Forward output still buffered in the pipe after frpc exited. If the
    /// pipe stays open past `DRAIN_TIMEOUT`, whatever is holding it is killed.
    async fn drain_after_exit(&mut self, mut reader: BufReader<ChildStdout>, mut buf: Vec<u8>) {
        let pid = self.guard.record.pid();
        let drain = async {
            loop {
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => {
                        // Last line without a trailing newline
                        if !buf.is_empty() {
                            self.forward(&buf).await;
                        }
                        break;
                    }
                    Ok(_) => {
                        self.forward(&buf).await;
                        buf.clear();
                    }
                    Err(e) => {
                        debug!("Stopped reading frpc (pid {}) stdout: {}", pid, e);
                        break;
                    }
                }
            }
        };

        if tokio::time::timeout(SupervisorConfig::DRAIN_TIMEOUT, drain)
            .await
            .is_err()
        {
            debug!(
                "Output pipe of exited frpc (pid {}) still open, killing leftovers",
                pid
            );
            if let Err(e) = platform::kill_leftover_group(pid).await {
                warn!("Failed to kill leftovers of frpc (pid {}): {}", pid, e);
            }
        }
    }

    async fn forward(&mut self, raw: &[u8]) {
        let line = String::from_utf8_lossy(raw);
        self.handle_line(line.trim_end_matches(['\r', '\n'])).await;
    }

    async fn handle_line(&mut self, line: &str) {
        let class = self.classifier.classify(line);
        if class == LineClass::Ignored {
            return;
        }

        if let Some(sink) = self.sink.as_mut() {
            sink.append(line);
        }
        if let Some(on_line) = &self.on_line {
            on_line(line);
        }

        let LineClass::Terminal(status) = class else {
            return;
        };
        let record = Arc::clone(&self.guard.record);
        let tunnels = record.tunnels().ids().to_vec();

        match status {
            TunnelStatus::Succeeded => {
                info!("Tunnel(s) {} started (pid {})", record.tunnels(), record.pid());
                emit(&self.on_status, status, line.to_string(), tunnels);
            }
            TunnelStatus::Failed => {
                warn!(
                    "Tunnel(s) {} failed to start (pid {}): {}",
                    record.tunnels(),
                    record.pid(),
                    line
                );
                emit(&self.on_status, status, line.to_string(), tunnels);
                if record.has_exited() {
                    return;
                }
                if let Err(e) = platform::kill_process_tree(record.pid()).await {
                    warn!("Process group kill failed, killing frpc directly: {}", e);
                    if let Err(e) = self.child.start_kill() {
                        warn!("Failed to kill frpc (pid {}): {}", record.pid(), e);
                    }
                }
            }
            TunnelStatus::AlreadyRunning => {}
        }
    }
}

async fn drain_stderr(pid: u32, stderr: impl AsyncRead + Unpin) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!("[frpc {}] stderr: {}", pid, line),
            Ok(None) => break,
            Err(e) => {
                debug!("Stopped reading frpc (pid {}) stderr: {}", pid, e);
                break;
            }
        }
    }
}
