//! Start configuration for frpc processes.

use crate::config::{FrpcConfig, SupervisorConfig};
use crate::error::{Result, TunnelError};
use crate::status::StatusUpdate;
use crate::tunnel::TunnelGroup;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Receives every non-blank frpc output line, verbatim.
pub type LineHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Receives terminal status updates and `AlreadyRunning` refusals.
pub type StatusHandler = Arc<dyn Fn(StatusUpdate) + Send + Sync>;

/// Configuration for starting a tunnel or tunnel group.
///
/// Every field has a default, so `StartOptions::default()` starts
/// `./frpc -u <token> -p <ids>` and logs to a file in the temp directory.
///
/// Handlers are called from the tokio task that reads the process output,
/// which runs on a runtime worker thread rather than the caller's thread.
#[derive(Clone)]
pub struct StartOptions {
    /// Path to frpc. Defaults to `frpc` in the current working directory.
    pub executable: Option<PathBuf>,
    /// Command line with `%token%` and `%id%` placeholders.
    pub argument_template: Option<String>,
    /// Whether to copy frpc output to a log file.
    pub use_log_file: bool,
    /// Log file path. Defaults to a per-group file in the temp directory.
    pub log_path: Option<PathBuf>,
    /// Working directory for frpc. Inherited when unset.
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables for frpc.
    pub env_vars: HashMap<String, String>,
    /// Overrides the success marker the output classifier looks for.
    pub success_marker: Option<String>,
    pub on_line: Option<LineHandler>,
    pub on_status: Option<StatusHandler>,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            executable: None,
            argument_template: None,
            use_log_file: true,
            log_path: None,
            working_dir: None,
            env_vars: HashMap::new(),
            success_marker: None,
            on_line: None,
            on_status: None,
        }
    }
}

impl fmt::Debug for StartOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartOptions")
            .field("executable", &self.executable)
            .field("argument_template", &self.argument_template)
            .field("use_log_file", &self.use_log_file)
            .field("log_path", &self.log_path)
            .field("working_dir", &self.working_dir)
            .field("env_vars", &self.env_vars.keys().collect::<Vec<_>>())
            .field("success_marker", &self.success_marker)
            .field("on_line", &self.on_line.is_some())
            .field("on_status", &self.on_status.is_some())
            .finish()
    }
}

impl StartOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the frpc executable path.
    pub fn with_executable(mut self, path: impl AsRef<Path>) -> Self {
        self.executable = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the argument template.
    pub fn with_argument_template(mut self, template: impl Into<String>) -> Self {
        self.argument_template = Some(template.into());
        self
    }

    /// Set the log file path (also enables the log file).
    pub fn with_log_file(mut self, path: impl AsRef<Path>) -> Self {
        self.use_log_file = true;
        self.log_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Disable the log file.
    pub fn without_log_file(mut self) -> Self {
        self.use_log_file = false;
        self
    }

    pub fn with_working_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }

    pub fn with_success_marker(mut self, marker: impl Into<String>) -> Self {
        self.success_marker = Some(marker.into());
        self
    }

    /// Set the raw output line handler.
    pub fn on_line(mut self, handler: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_line = Some(Arc::new(handler));
        self
    }

    /// Set the status handler.
    pub fn on_status(mut self, handler: impl Fn(StatusUpdate) + Send + Sync + 'static) -> Self {
        self.on_status = Some(Arc::new(handler));
        self
    }

    /// Resolve the frpc path, falling back to `<cwd>/frpc`.
    pub fn resolve_executable(&self) -> Result<PathBuf> {
        match &self.executable {
            Some(path) => Ok(path.clone()),
            None => {
                let cwd = std::env::current_dir()?;
                Ok(cwd.join(FrpcConfig::EXECUTABLE_NAME))
            }
        }
    }

    /// Resolve the log file path, or `None` when logging to file is disabled.
    pub fn resolve_log_path(&self, group: &TunnelGroup) -> Option<PathBuf> {
        if !self.use_log_file {
            return None;
        }
        Some(self.log_path.clone().unwrap_or_else(|| {
            std::env::temp_dir().join(format!(
                "{}{}.{}",
                SupervisorConfig::LOG_FILE_PREFIX,
                group.joined_with("-"),
                SupervisorConfig::LOG_FILE_EXTENSION
            ))
        }))
    }

    /// Build the frpc argument list.
    ///
    /// The template is split with POSIX shell quoting rules first and the
    /// `%token%`/`%id%` placeholders are substituted per argument, so a
    /// token can never introduce extra arguments. Placeholders are optional:
    /// `-c frpc.ini` is a valid template. Backslashes outside quotes are
    /// escapes, so Windows paths belong in quotes.
    pub fn build_args(&self, token: &str, group: &TunnelGroup) -> Result<Vec<String>> {
        let template = self
            .argument_template
            .as_deref()
            .unwrap_or(FrpcConfig::ARGUMENT_TEMPLATE);

        let invalid = |message: &str| TunnelError::InvalidTemplate {
            template: template.to_string(),
            message: message.to_string(),
        };
        if template.trim().is_empty() {
            return Err(invalid("template is empty"));
        }
        let words = shlex::split(template).ok_or_else(|| invalid("unbalanced quotes"))?;

        let ids = group.joined();
        Ok(words
            .into_iter()
            .map(|arg| {
                // Ids first: the joined ids cannot contain a placeholder, the token can
                arg.replace(FrpcConfig::ID_PLACEHOLDER, &ids)
                    .replace(FrpcConfig::TOKEN_PLACEHOLDER, token)
            })
            .collect())
    }

    pub(crate) fn success_marker(&self) -> &str {
        self.success_marker
            .as_deref()
            .unwrap_or(FrpcConfig::SUCCESS_MARKER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::TunnelId;

    fn group(ids: &[u64]) -> TunnelGroup {
        TunnelGroup::new(ids.iter().copied().map(TunnelId)).unwrap()
    }

    #[test]
    fn test_default_args() {
        let options = StartOptions::default();
        let args = options.build_args("abc123", &group(&[5])).unwrap();
        assert_eq!(args, vec!["-u", "abc123", "-p", "5"]);
    }

    #[test]
    fn test_group_args_keep_caller_order() {
        let options = StartOptions::default();
        let args = options.build_args("t", &group(&[9, 2, 14])).unwrap();
        assert_eq!(args, vec!["-u", "t", "-p", "9,2,14"]);
    }

    #[test]
    fn test_custom_template() {
        let options = StartOptions::new().with_argument_template("-u %token% -p %id% --log_level debug");
        let args = options.build_args("t", &group(&[1])).unwrap();
        assert_eq!(args, vec!["-u", "t", "-p", "1", "--log_level", "debug"]);
    }

    #[test]
    fn test_template_without_placeholders_is_kept() {
        let options = StartOptions::new().with_argument_template("-c frpc.ini");
        let args = options.build_args("t", &group(&[1])).unwrap();
        assert_eq!(args, vec!["-c", "frpc.ini"]);

        let options = StartOptions::new().with_argument_template("-p %id%");
        let args = options.build_args("t", &group(&[1, 2])).unwrap();
        assert_eq!(args, vec!["-p", "1,2"]);
    }

    #[test]
    fn test_quoted_template_arguments() {
        let options = StartOptions::new()
            .with_argument_template(r#"-c "/opt/my frp/frpc.ini" -u %token% -p %id%"#);
        let args = options.build_args("t", &group(&[1])).unwrap();
        assert_eq!(args, vec!["-c", "/opt/my frp/frpc.ini", "-u", "t", "-p", "1"]);

        let options =
            StartOptions::new().with_argument_template(r"-c 'C:\frp\my frpc.ini' -p %id%");
        let args = options.build_args("t", &group(&[7])).unwrap();
        assert_eq!(args, vec!["-c", r"C:\frp\my frpc.ini", "-p", "7"]);
    }

    #[test]
    fn test_token_with_spaces_stays_one_argument() {
        let options = StartOptions::default();
        let args = options.build_args("a b %id%", &group(&[3])).unwrap();
        assert_eq!(args, vec!["-u", "a b %id%", "-p", "3"]);
    }

    #[test]
    fn test_invalid_templates_rejected() {
        for template in ["", "   ", r#"-c "unterminated"#] {
            let options = StartOptions::new().with_argument_template(template);
            let err = options.build_args("t", &group(&[1])).unwrap_err();
            assert!(
                matches!(err, TunnelError::InvalidTemplate { .. }),
                "{template:?} was accepted"
            );
        }
    }

    #[test]
    fn test_log_path_defaults() {
        let options = StartOptions::default();
        let path = options.resolve_log_path(&group(&[3, 4])).unwrap();
        assert!(path.starts_with(std::env::temp_dir()));
        assert!(path.ends_with("chmlfrp-3-4.log"));

        let options = StartOptions::new().with_log_file("/var/log/frpc.log");
        assert_eq!(
            options.resolve_log_path(&group(&[3])),
            Some(PathBuf::from("/var/log/frpc.log"))
        );

        let options = StartOptions::new().without_log_file();
        assert!(options.resolve_log_path(&group(&[3])).is_none());
    }

    #[test]
    fn test_executable_default_is_in_cwd() {
        let options = StartOptions::default();
        let path = options.resolve_executable().unwrap();
        assert_eq!(path, std::env::current_dir().unwrap().join(FrpcConfig::EXECUTABLE_NAME));

        let options = StartOptions::new().with_executable("/opt/frp/frpc");
        assert_eq!(options.resolve_executable().unwrap(), PathBuf::from("/opt/frp/frpc"));
    }

    #[test]
    fn test_builder() {
        let options = StartOptions::new()
            .with_env("HTTP_PROXY", "http://127.0.0.1:7890")
            .with_success_marker("start proxy success")
            .on_line(|_| {})
            .on_status(|_| {});

        assert_eq!(
            options.env_vars.get("HTTP_PROXY"),
            Some(&"http://127.0.0.1:7890".to_string())
        );
        assert_eq!(options.success_marker(), "start proxy success");
        assert!(options.on_line.is_some());
        assert!(format!("{options:?}").contains("on_status: true"));
    }
}
