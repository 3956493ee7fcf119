//! Shell command execution with a hard wall-clock deadline.
//!
//! Commands are handed to a shell interpreter verbatim. Callers are expected
//! to have authenticated the requester; nothing here inspects the command.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

/// Default deadline for a single command
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Message reported on stderr when a command overruns its deadline
pub const TIMED_OUT_MESSAGE: &str = "Command timed out";

/// Interpreter used when none is configured
#[cfg(unix)]
pub const DEFAULT_SHELL: &str = "/bin/sh";
#[cfg(unix)]
const SHELL_COMMAND_FLAG: &str = "-c";

/// Interpreter used when none is configured
#[cfg(windows)]
pub const DEFAULT_SHELL: &str = "cmd";
#[cfg(windows)]
const SHELL_COMMAND_FLAG: &str = "/C";

/// Outcome of one command execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
}

impl CommandResult {
    fn timed_out() -> Self {
        Self {
            stdout: String::new(),
            stderr: TIMED_OUT_MESSAGE.to_string(),
            exit_code: 1,
            timed_out: true,
        }
    }

    fn failed(error: &io::Error) -> Self {
        Self {
            stdout: String::new(),
            stderr: format!("Error executing command: {}", error),
            exit_code: 1,
            timed_out: false,
        }
    }
}

/// Runs commands through a shell interpreter
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    shell: String,
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_SHELL)
    }
}

impl CommandExecutor {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    /// Run `command` and collect its output.
    ///
    /// If the process is still running after `deadline` it is killed, along
    /// with everything else in its process group, and a timed-out result is
    /// returned; anything it had already written is discarded. Spawn and I/O
    /// failures are folded into the result with exit code 1, so this never
    /// fails.
    pub async fn execute(&self, command: &str, deadline: Duration) -> CommandResult {
        let mut shell = std::process::Command::new(&self.shell);
        shell
            .arg(SHELL_COMMAND_FLAG)
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Own process group, so a deadline kill reaches everything the shell started
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            shell.process_group(0);
        }

        let mut child = match Command::from(shell).kill_on_drop(true).spawn() {
            Ok(child) => child,
            Err(e) => {
                log::warn!("Failed to spawn '{}': {}", self.shell, e);
                return CommandResult::failed(&e);
            }
        };
        let pid = child.id();

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let run = async {
            let (status, stdout, stderr) =
                tokio::join!(child.wait(), read_pipe(stdout), read_pipe(stderr));
            Ok::<_, io::Error>((status?, stdout?, stderr?))
        };
        let outcome = tokio::time::timeout(deadline, run).await;

        match outcome {
            Ok(Ok((status, stdout, stderr))) => CommandResult {
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
                exit_code: exit_code(status),
                timed_out: false,
            },
            Ok(Err(e)) => {
                log::warn!("Error collecting command output: {}", e);
                terminate(&mut child, pid).await;
                CommandResult::failed(&e)
            }
            Err(_) => {
                log::warn!("Command exceeded {:?} deadline; killing it", deadline);
                terminate(&mut child, pid).await;
                CommandResult::timed_out()
            }
        }
    }
}

/// Kill the shell and every process left in its group, then reap the shell
async fn terminate(child: &mut Child, pid: Option<u32>) {
    if let Some(pid) = pid {
        kill_process_group(pid);
    }
    if let Err(e) = child.kill().await {
        log::debug!("Kill after timeout failed: {}", e);
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(pgid) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        log::debug!("Failed to kill process group {}: {}", pgid, e);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|signal| -signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_echo_roundtrip() {
        let result = CommandExecutor::default()
            .execute("echo \"hello\"", DEFAULT_COMMAND_TIMEOUT)
            .await;

        assert_eq!(result.stdout, "hello\n");
        assert_eq!(result.stderr, "");
        assert_eq!(result.exit_code, 0);
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn test_captures_stderr_and_exit_code() {
        let result = CommandExecutor::default()
            .execute("echo out; echo err >&2; exit 3", DEFAULT_COMMAND_TIMEOUT)
            .await;

        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err\n");
        assert_eq!(result.exit_code, 3);
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn test_unknown_command_is_a_normal_result() {
        let result = CommandExecutor::default()
            .execute("definitely-not-a-real-command-xyz", DEFAULT_COMMAND_TIMEOUT)
            .await;

        assert_eq!(result.exit_code, 127);
        assert!(!result.stderr.is_empty());
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn test_timeout_kills_and_discards_output() {
        let started = Instant::now();
        let result = CommandExecutor::default()
            .execute("echo partial; sleep 30", Duration::from_millis(300))
            .await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(result.timed_out);
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.stdout, "");
        assert_eq!(result.stderr, TIMED_OUT_MESSAGE);
    }

    /// Alive and not yet a zombie
    #[cfg(target_os = "linux")]
    fn process_is_running(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.trim_start().chars().next())
                .is_some_and(|state| state != 'Z'),
            Err(_) => false,
        }
    }

    /// Run `shape` (with `{sleeper}` standing for a long-running process)
    /// past a short deadline and wait for the sleeper to disappear
    #[cfg(target_os = "linux")]
    async fn assert_sleeper_killed(shape: &str) {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("sleeper.pid");
        // The inner shell records its pid and then becomes the sleeper
        let sleeper = format!("sh -c 'echo $$ > {}; exec sleep 30'", pid_file.display());
        let command = shape.replace("{sleeper}", &sleeper);

        let result = CommandExecutor::default()
            .execute(&command, Duration::from_millis(500))
            .await;
        assert!(result.timed_out);

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let pid = pid.trim();
        let deadline = Instant::now() + Duration::from_secs(5);
        while process_is_running(pid) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!process_is_running(pid), "{} left {} running", shape, pid);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_timeout_kills_whole_pipeline() {
        assert_sleeper_killed("{sleeper} | cat").await;
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_timeout_kills_background_jobs() {
        assert_sleeper_killed("{sleeper} & echo started; wait").await;
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let result = CommandExecutor::new("/nonexistent/shell")
            .execute("echo hi", DEFAULT_COMMAND_TIMEOUT)
            .await;

        assert_eq!(result.exit_code, 1);
        assert_eq!(result.stdout, "");
        assert!(result.stderr.starts_with("Error executing command:"));
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn test_signal_exit_is_negative() {
        let result = CommandExecutor::default()
            .execute("kill -9 $$", DEFAULT_COMMAND_TIMEOUT)
            .await;

        assert_eq!(result.exit_code, -9);
    }

    #[tokio::test]
    async fn test_concurrent_commands_do_not_block_each_other() {
        let executor = CommandExecutor::default();
        let started = Instant::now();

        let (slow, fast) = tokio::join!(
            executor.execute("sleep 1; echo slow", DEFAULT_COMMAND_TIMEOUT),
            executor.execute("echo fast", DEFAULT_COMMAND_TIMEOUT),
        );

        assert_eq!(slow.stdout, "slow\n");
        assert_eq!(fast.stdout, "fast\n");
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
