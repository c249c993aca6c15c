//! Local environment: execute shell commands on the host.
//!
//! Commands run through `sh -c` (`cmd /C` on Windows) with a per-command
//! timeout. The observation is stdout followed by stderr.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use stepwise_config::EnvironmentConfig;
use stepwise_core::environment::{Environment, ExecutionOutput};
use stepwise_core::error::EnvironmentError;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Runs commands as child processes of the agent.
pub struct LocalEnvironment {
    cwd: Option<PathBuf>,
    timeout: Duration,
    env: HashMap<String, String>,
}

impl LocalEnvironment {
    pub fn new(config: &EnvironmentConfig) -> Self {
        Self {
            cwd: config.cwd.as_ref().map(PathBuf::from),
            timeout: Duration::from_secs(config.timeout),
            env: config.env.clone(),
        }
    }

    /// Run commands in `cwd` unless a call names another directory.
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Directory for one call: the argument, else the configured cwd, else
    /// the process cwd.
    fn resolve_cwd(&self, cwd: &str) -> PathBuf {
        if !cwd.is_empty() {
            return PathBuf::from(cwd);
        }
        self.cwd
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn shell_command(command: &str, cwd: &Path) -> Command {
        let mut cmd = if cfg!(target_os = "windows") {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", command]);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.args(["-c", command]);
            cmd
        };
        cmd.current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

fn combine(stdout: &[u8], stderr: &[u8]) -> String {
    let mut output = String::from_utf8_lossy(stdout).into_owned();
    output.push_str(&String::from_utf8_lossy(stderr));
    output
}

#[async_trait]
impl Environment for LocalEnvironment {
    async fn execute(
        &self,
        command: &str,
        cwd: &str,
    ) -> Result<ExecutionOutput, EnvironmentError> {
        let dir = self.resolve_cwd(cwd);
        if !dir.is_dir() {
            return Err(EnvironmentError::InvalidWorkdir(dir.display().to_string()));
        }

        debug!(command = %command, cwd = %dir.display(), "Executing command");

        let mut child = Self::shell_command(command, &dir)
            .envs(&self.env)
            .spawn()
            .map_err(|e| EnvironmentError::SpawnFailed {
                command: command.to_string(),
                reason: e.to_string(),
            })?;

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();

        let run = async {
            let read_stdout = async {
                if let Some(out) = stdout.as_mut() {
                    out.read_to_end(&mut stdout_buf).await?;
                }
                Ok::<_, std::io::Error>(())
            };
            let read_stderr = async {
                if let Some(err) = stderr.as_mut() {
                    err.read_to_end(&mut stderr_buf).await?;
                }
                Ok::<_, std::io::Error>(())
            };
            let (a, b, status) = tokio::join!(read_stdout, read_stderr, child.wait());
            a?;
            b?;
            let status = status?;
            Ok::<_, std::io::Error>(status)
        };

        let outcome = tokio::time::timeout(self.timeout, run).await;
        match outcome {
            Ok(Ok(status)) => {
                let returncode = status.code();
                if !status.success() {
                    debug!(command = %command, exit_code = ?returncode, "Command exited non-zero");
                }
                Ok(ExecutionOutput::new(combine(&stdout_buf, &stderr_buf), returncode))
            }
            Ok(Err(e)) => Err(EnvironmentError::SpawnFailed {
                command: command.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => {
                warn!(command = %command, timeout_secs = self.timeout.as_secs(), "Command timed out");
                let _ = child.start_kill();
                Err(EnvironmentError::Timeout {
                    command: command.to_string(),
                    timeout_secs: self.timeout.as_secs(),
                    partial_output: combine(&stdout_buf, &stderr_buf),
                })
            }
        }
    }

    fn cwd(&self) -> String {
        self.resolve_cwd("").display().to_string()
    }

    fn template_vars(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut vars = serde_json::Map::new();
        vars.insert("cwd".into(), self.cwd().into());
        vars.insert("timeout".into(), self.timeout.as_secs().into());
        vars.insert("os".into(), std::env::consts::OS.into());
        vars.insert("arch".into(), std::env::consts::ARCH.into());
        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> LocalEnvironment {
        LocalEnvironment::new(&EnvironmentConfig::default())
    }

    #[tokio::test]
    async fn execute_echo() {
        let result = env().execute("echo hello", "").await.unwrap();
        assert_eq!(result.returncode, Some(0));
        assert_eq!(result.output, "hello\n");
    }

    #[tokio::test]
    async fn stderr_follows_stdout() {
        let result = env().execute("echo out; echo err 1>&2", "").await.unwrap();
        assert_eq!(result.output, "out\nerr\n");
    }

    #[tokio::test]
    async fn non_zero_exit_is_not_an_error() {
        let result = env().execute("exit 3", "").await.unwrap();
        assert_eq!(result.returncode, Some(3));
        assert!(result.output.is_empty());
    }

    #[tokio::test]
    async fn runs_in_requested_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();

        let cwd = dir.path().to_str().unwrap();
        let result = env().execute("ls", cwd).await.unwrap();
        assert!(result.output.contains("marker.txt"));

        let configured = env().with_cwd(dir.path());
        let result = configured.execute("ls", "").await.unwrap();
        assert!(result.output.contains("marker.txt"));
    }

    #[tokio::test]
    async fn missing_directory_is_rejected() {
        let result = env().execute("ls", "/definitely/not/here").await;
        assert!(matches!(result, Err(EnvironmentError::InvalidWorkdir(_))));
    }

    #[tokio::test]
    async fn configured_variables_are_visible() {
        let mut config = EnvironmentConfig::default();
        config.env.insert("STEPWISE_TEST_VAR".into(), "forty-two".into());
        let result = LocalEnvironment::new(&config)
            .execute("echo $STEPWISE_TEST_VAR", "")
            .await
            .unwrap();
        assert_eq!(result.output.trim(), "forty-two");
    }

    #[tokio::test]
    async fn timeout_is_reported() {
        let env = env().with_timeout(Duration::from_millis(200));
        let result = env.execute("echo started; sleep 5", "").await;
        match result {
            Err(EnvironmentError::Timeout { timeout_secs, command, .. }) => {
                assert_eq!(timeout_secs, 0);
                assert!(command.contains("sleep 5"));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn template_vars_describe_host() {
        let vars = env().template_vars();
        assert_eq!(vars["timeout"], 120);
        assert_eq!(vars["os"], std::env::consts::OS);
        assert!(vars["cwd"].as_str().is_some_and(|c| !c.is_empty()));
    }
}
