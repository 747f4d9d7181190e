//! Owned child process

use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use crate::error::{SessionError, SessionResult};

/// A child process that is killed and reaped when its owner goes away.
///
/// Spawned with `kill_on_drop`, so dropping the handle on any path,
/// including early error returns, terminates the process and hands it to
/// the runtime's reaper.
#[derive(Debug)]
pub struct ScopedChild {
    child: Child,
    command: String,
    exit: Option<ExitStatus>,
}

impl ScopedChild {
    /// Spawn `program args...`; `stdin`/`stdout` pipes are requested by the caller
    pub fn spawn(mut command: Command, description: &str) -> SessionResult<Self> {
        command.kill_on_drop(true);
        let child = command.spawn().map_err(|e| SessionError::SpawnFailed {
            command: description.to_string(),
            reason: e.to_string(),
        })?;
        debug!("Spawned '{}' (pid {:?})", description, child.id());
        Ok(Self {
            child,
            command: description.to_string(),
            exit: None,
        })
    }

    /// Build a command from an argv vector
    pub fn command(argv: &[String]) -> SessionResult<Command> {
        let (program, args) = argv.split_first().ok_or_else(|| SessionError::SpawnFailed {
            command: String::new(),
            reason: "empty command".to_string(),
        })?;
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        Ok(command)
    }

    pub fn description(&self) -> &str {
        &self.command
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Exit status if the process has been reaped
    pub fn try_exit(&mut self) -> Option<ExitStatus> {
        if self.exit.is_none() {
            match self.child.try_wait() {
                Ok(status) => self.exit = status,
                Err(e) => warn!("Failed to poll '{}': {}", self.command, e),
            }
        }
        self.exit
    }

    /// Terminate the process if it is still running
    pub fn cancel(&mut self) {
        if self.try_exit().is_some() {
            return;
        }
        match self.child.start_kill() {
            Ok(()) => debug!("Killed '{}'", self.command),
            Err(e) => debug!("Kill of '{}' failed: {}", self.command, e),
        }
    }
}

/// Short description of an exit status for status messages
pub fn describe_exit(status: ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;
    match (status.code(), status.signal()) {
        (Some(code), _) => format!("exit status {}", code),
        (None, Some(signal)) => format!("killed by signal {}", signal),
        (None, None) => "unknown exit status".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let command = ScopedChild::command(&["/nonexistent/helper".to_string()]).unwrap();
        let err = ScopedChild::spawn(command, "/nonexistent/helper").unwrap_err();
        assert!(matches!(err, SessionError::SpawnFailed { .. }));
    }

    #[test]
    fn test_empty_argv_is_rejected() {
        assert!(ScopedChild::command(&[]).is_err());
    }

    #[tokio::test]
    async fn test_cancel_terminates_process() {
        let command =
            ScopedChild::command(&["sleep".to_string(), "30".to_string()]).unwrap();
        let mut child = ScopedChild::spawn(command, "sleep 30").unwrap();
        child.cancel();

        let status = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(status) = child.try_exit() {
                    return status;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(!status.success());
        assert!(describe_exit(status).contains("signal"));
    }
}
