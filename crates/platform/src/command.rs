//! Shell command execution
//!
//! Commands run through `/bin/sh -c` in their own process group with stdout
//! and stderr merged into a single pipe. Every output line is logged at the
//! caller's level and returned with its trailing newline.

use std::collections::BTreeMap;
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::unix::pipe;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn, Level};
use upaas_errors::{CommandError, Error};

use crate::env::EnvScope;

/// Shell used to interpret commands
pub const SHELL: &str = "/bin/sh";

/// How long to keep reading output after the shell exited, in case
/// background children still hold the pipe open
const DRAIN_QUIET_PERIOD: Duration = Duration::from_millis(200);

/// Upper bound on reading after the shell exited; the process group is
/// killed once it is reached
const DRAIN_LIMIT: Duration = Duration::from_secs(1);

/// Captured result of a successful command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub retcode: i32,
    /// Output lines, stdout and stderr interleaved, newline included
    pub lines: Vec<String>,
}

impl CommandOutput {
    /// Output joined into a single string with surrounding whitespace trimmed
    #[must_use]
    pub fn text(&self) -> String {
        self.lines.concat().trim().to_string()
    }
}

/// Builder for one shell command
#[derive(Debug, Clone)]
pub struct ShellCommand {
    command: String,
    timeout: Option<Duration>,
    cwd: Option<PathBuf>,
    env: BTreeMap<String, String>,
    valid_retcodes: Vec<i32>,
    strip_unsafe_env: bool,
    output_level: Level,
    cancel: Option<CancellationToken>,
}

impl ShellCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout: None,
            cwd: None,
            env: BTreeMap::new(),
            valid_retcodes: vec![0],
            strip_unsafe_env: false,
            output_level: Level::DEBUG,
            cancel: None,
        }
    }

    /// Kill the command and fail if it runs longer than `timeout`
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn timeout_opt(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Working directory of the command. The caller's own working directory is not changed.
    #[must_use]
    pub fn cwd(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_path_buf());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    #[must_use]
    pub fn valid_retcodes(mut self, retcodes: impl Into<Vec<i32>>) -> Self {
        self.valid_retcodes = retcodes.into();
        self
    }

    /// Drop inherited variables outside the safe list
    #[must_use]
    pub fn strip_unsafe_env(mut self, strip: bool) -> Self {
        self.strip_unsafe_env = strip;
        self
    }

    /// Level at which output lines are logged
    #[must_use]
    pub fn output_level(mut self, level: Level) -> Self {
        self.output_level = level;
        self
    }

    /// Kill the command when the token is cancelled
    #[must_use]
    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Run the command to completion
    ///
    /// # Errors
    ///
    /// Returns `CommandError::Timeout` if the deadline fired,
    /// `CommandError::Failed` if the exit code is not valid or the command
    /// was cancelled, and `CommandError::Spawn` if the shell could not start.
    pub async fn execute(&self) -> Result<CommandOutput, Error> {
        info!(command = %self.command, "executing command");
        let scope = EnvScope::from_current(&self.env, self.strip_unsafe_env);

        let (mut child, reader) = self.spawn(&scope)?;
        let pgid = child.id().and_then(|id| i32::try_from(id).ok());
        let mut reader = BufReader::new(reader);
        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        let cancel = self.cancel.clone().unwrap_or_default();

        let mut lines = Vec::new();
        let mut buf = Vec::new();
        let mut eof = false;

        let status = loop {
            tokio::select! {
                read = reader.read_until(b'\n', &mut buf), if !eof => match read {
                    Ok(0) => eof = true,
                    Ok(_) => self.push_line(&mut buf, &mut lines),
                    Err(e) => {
                        warn!(command = %self.command, error = %e, "failed to read command output");
                        eof = true;
                    }
                },
                exited = child.wait() => {
                    let status = exited.map_err(|e| self.spawn_error(&e))?;
                    if !eof {
                        self.drain(&mut reader, &mut buf, &mut lines, pgid, deadline, &cancel)
                            .await?;
                    }
                    break status;
                }
                () = sleep_until_opt(deadline) => {
                    kill_group(&mut child).await;
                    return Err(self.timeout_error());
                }
                () = cancel.cancelled() => {
                    kill_group(&mut child).await;
                    return Err(self.interrupted_error());
                }
            }
        };

        if !buf.is_empty() {
            self.push_line(&mut buf, &mut lines);
        }

        let Some(retcode) = status.code() else {
            error!(command = %self.command, %status, "command terminated by signal");
            return Err(CommandError::Failed {
                command: self.command.clone(),
                exit_code: None,
                message: status.to_string(),
            }
            .into());
        };

        if !self.valid_retcodes.contains(&retcode) {
            error!(command = %self.command, retcode, "command failed");
            return Err(CommandError::Failed {
                command: self.command.clone(),
                exit_code: Some(retcode),
                message: format!("command failed with status {retcode}"),
            }
            .into());
        }

        Ok(CommandOutput { retcode, lines })
    }

    fn spawn(&self, scope: &EnvScope) -> Result<(Child, pipe::Receiver), Error> {
        let (read_end, write_end) = std::io::pipe().map_err(|e| self.spawn_error(&e))?;
        let write_err = write_end.try_clone().map_err(|e| self.spawn_error(&e))?;

        // The command owns the write ends; dropping it at the end of this
        // block leaves the child as the only writer so EOF is observed.
        let child = {
            let mut command = Command::new(SHELL);
            command
                .arg("-c")
                .arg(&self.command)
                .stdin(Stdio::null())
                .stdout(Stdio::from(write_end))
                .stderr(Stdio::from(write_err))
                .process_group(0)
                .kill_on_drop(true);
            if let Some(cwd) = &self.cwd {
                debug!(cwd = %cwd.display(), "command working directory");
                command.current_dir(cwd);
            }
            scope.apply(&mut command);
            command.spawn().map_err(|e| self.spawn_error(&e))?
        };

        let receiver = pipe::Receiver::from_owned_fd(OwnedFd::from(read_end))
            .map_err(|e| self.spawn_error(&e))?;
        Ok((child, receiver))
    }

    /// Read what background children still write after the shell exited.
    /// Stops after a quiet period; the deadline and cancellation still apply.
    async fn drain(
        &self,
        reader: &mut BufReader<pipe::Receiver>,
        buf: &mut Vec<u8>,
        lines: &mut Vec<String>,
        pgid: Option<i32>,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let limit = tokio::time::sleep(DRAIN_LIMIT);
        tokio::pin!(limit);
        loop {
            tokio::select! {
                read = tokio::time::timeout(DRAIN_QUIET_PERIOD, reader.read_until(b'\n', buf)) => {
                    match read {
                        Ok(Ok(n)) if n > 0 => self.push_line(buf, lines),
                        _ => return Ok(()),
                    }
                }
                () = &mut limit => {
                    warn!(command = %self.command, "background processes still writing output, killing them");
                    kill_pgid(pgid);
                    return Ok(());
                }
                () = sleep_until_opt(deadline) => {
                    kill_pgid(pgid);
                    return Err(self.timeout_error());
                }
                () = cancel.cancelled() => {
                    kill_pgid(pgid);
                    return Err(self.interrupted_error());
                }
            }
        }
    }

    fn timeout_error(&self) -> Error {
        let seconds = self.timeout.map_or(0, |t| t.as_secs());
        error!(command = %self.command, seconds, "command timeout reached, process killed");
        CommandError::Timeout {
            command: self.command.clone(),
            seconds,
        }
        .into()
    }

    fn interrupted_error(&self) -> Error {
        warn!(command = %self.command, "command interrupted, process killed");
        CommandError::Failed {
            command: self.command.clone(),
            exit_code: None,
            message: "interrupted".to_string(),
        }
        .into()
    }

    fn push_line(&self, buf: &mut Vec<u8>, lines: &mut Vec<String>) {
        let line = String::from_utf8_lossy(buf).into_owned();
        buf.clear();
        log_line(self.output_level, line.trim_end_matches('\n'));
        lines.push(line);
    }

    fn spawn_error(&self, err: &std::io::Error) -> Error {
        CommandError::Spawn {
            command: self.command.clone(),
            message: err.to_string(),
        }
        .into()
    }
}

/// Run a command with defaults; shorthand for `ShellCommand::new(cmd).execute()`
///
/// # Errors
///
/// See [`ShellCommand::execute`].
pub async fn execute(command: impl Into<String>) -> Result<CommandOutput, Error> {
    ShellCommand::new(command).execute().await
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn kill_pgid(pgid: Option<i32>) {
    if let Some(pgid) = pgid {
        if let Err(e) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
            debug!(pgid, error = %e, "killpg failed");
        }
    }
}

/// SIGKILL the whole process group of a child and reap it
async fn kill_group(child: &mut Child) {
    kill_pgid(child.id().and_then(|id| i32::try_from(id).ok()));
    if let Err(e) = child.kill().await {
        debug!(error = %e, "child already exited");
    }
}

fn log_line(level: Level, line: &str) {
    match level {
        Level::ERROR => error!("{line}"),
        Level::WARN => warn!("{line}"),
        Level::INFO => info!("{line}"),
        Level::DEBUG => debug!("{line}"),
        _ => trace!("{line}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn custom_valid_retcode() {
        let out = ShellCommand::new("exit 123")
            .valid_retcodes([123])
            .execute()
            .await
            .unwrap();
        assert_eq!(out.retcode, 123);
        assert!(out.lines.is_empty());
    }

    #[tokio::test]
    async fn env_override() {
        let out = ShellCommand::new("echo $MYENV")
            .env("MYENV", "MYVALUE")
            .execute()
            .await
            .unwrap();
        assert_eq!(out.lines, vec!["MYVALUE\n"]);
    }

    #[tokio::test]
    async fn stderr_is_merged() {
        let out = execute("echo out; echo err >&2; echo last").await.unwrap();
        assert_eq!(out.lines, vec!["out\n", "err\n", "last\n"]);
        assert_eq!(out.text(), "out\nerr\nlast");
    }

    #[tokio::test]
    async fn output_without_trailing_newline() {
        let out = execute("printf abc").await.unwrap();
        assert_eq!(out.lines, vec!["abc"]);
    }

    #[tokio::test]
    async fn failed_exit_code() {
        let err = execute("exit 3").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Command(CommandError::Failed {
                exit_code: Some(3),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn missing_binary_fails() {
        let err = execute("nonexistent-command-upaas").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Command(CommandError::Failed {
                exit_code: Some(127),
                ..
            })
        ));
    }
}
