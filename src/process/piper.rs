//! External commands read as log sources
//!
//! Standard input is handled the same way when it is not a terminal, except
//! that there is no child to reap.

use std::io::Read;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::ChildStdout;
use tracing::{debug, info};

use super::scoped::{describe_exit, ScopedChild};
use crate::error::{SessionError, SessionResult};
use crate::logsource::SourceId;
use crate::multiplexer::{EventSender, IoMultiplexer, Owner, Payload, Token};

const READ_CHUNK: usize = 8192;

/// Command name shown for the standard input source
pub const STDIN_NAME: &str = "stdin";

/// A spawned command whose output is not yet being read
#[derive(Debug)]
pub struct PendingPipe {
    command: String,
    child: ScopedChild,
    stdout: ChildStdout,
}

#[derive(Debug)]
pub struct PipedProcess {
    command: String,
    token: Token,
    /// `None` for standard input
    child: Option<ScopedChild>,
    eof: bool,
}

impl PipedProcess {
    /// Spawn `shell -c command` with its stdout captured
    pub fn launch(shell: &str, command: &str) -> SessionResult<PendingPipe> {
        let argv = vec![shell.to_string(), "-c".to_string(), command.to_string()];
        let mut cmd = ScopedChild::command(&argv)?;
        cmd.stdout(Stdio::piped());
        let mut child = ScopedChild::spawn(cmd, command)?;
        let stdout = child.take_stdout().ok_or_else(|| SessionError::SpawnFailed {
            command: command.to_string(),
            reason: "stdout unavailable".to_string(),
        })?;
        Ok(PendingPipe {
            command: command.to_string(),
            child,
            stdout,
        })
    }

    /// Read this process's standard input into `source`. The blocking
    /// reads run on their own thread, which exits at EOF or once the token
    /// is deregistered.
    pub fn stdin(source: SourceId, mux: &mut IoMultiplexer) -> SessionResult<Self> {
        let sender = mux.register(Owner::Piper(source));
        let token = sender.token();
        let spawned = std::thread::Builder::new()
            .name("stdin-reader".to_string())
            .spawn(move || read_blocking(std::io::stdin().lock(), sender));
        if let Err(e) = spawned {
            mux.deregister(token);
            return Err(SessionError::SpawnFailed {
                command: STDIN_NAME.to_string(),
                reason: e.to_string(),
            });
        }
        info!("Reading standard input into {} (token {})", source, token);
        Ok(Self {
            command: STDIN_NAME.to_string(),
            token,
            child: None,
            eof: false,
        })
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn is_stdin(&self) -> bool {
        self.child.is_none()
    }

    pub fn mark_eof(&mut self) {
        self.eof = true;
    }

    /// Once drained and reaped, the exit code (`None` if killed by a signal
    /// or for standard input)
    pub fn poll_finished(&mut self) -> Option<Option<i32>> {
        if !self.eof {
            return None;
        }
        let Some(child) = self.child.as_mut() else {
            return Some(None);
        };
        let status = child.try_exit()?;
        if status.success() {
            debug!("'{}' exited cleanly", self.command);
        } else {
            info!("'{}' finished with {}", self.command, describe_exit(status));
        }
        Some(status.code())
    }

    /// Stop reading and terminate the process
    pub fn cancel(mut self, mux: &mut IoMultiplexer) {
        mux.deregister(self.token);
        if let Some(child) = self.child.as_mut() {
            child.cancel();
        }
        debug!("Cancelled pipe '{}'", self.command);
    }

    /// Release the token of a finished process
    pub fn release(self, mux: &mut IoMultiplexer) {
        mux.deregister(self.token);
    }
}

impl PendingPipe {
    /// Register the output pipe and start reading it into `source`
    pub fn start(self, source: SourceId, mux: &mut IoMultiplexer) -> SessionResult<PipedProcess> {
        let sender = mux.register(Owner::Piper(source));
        let token = sender.token();
        mux.attach(token, tokio::spawn(read_output(self.stdout, sender)))?;
        info!("Piping '{}' into {} (token {})", self.command, source, token);
        Ok(PipedProcess {
            command: self.command,
            token,
            child: Some(self.child),
            eof: false,
        })
    }
}

async fn read_output(mut stdout: ChildStdout, sender: EventSender) {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if !sender.send(Payload::Bytes(buf[..n].to_vec())) {
                    return;
                }
            }
            Err(e) => {
                sender.send(Payload::ReadError(e.to_string()));
                break;
            }
        }
    }
    sender.send(Payload::Eof);
}

fn read_blocking<R: Read>(mut reader: R, sender: EventSender) {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if !sender.send(Payload::Bytes(buf[..n].to_vec())) {
                    return;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                sender.send(Payload::ReadError(e.to_string()));
                break;
            }
        }
    }
    sender.send(Payload::Eof);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_output_then_eof_then_exit_code() {
        let mut mux = IoMultiplexer::new();
        let mut pipe = PipedProcess::launch("sh", "printf 'a\\nb\\n'; exit 4")
            .unwrap()
            .start(SourceId(7), &mut mux)
            .unwrap();

        let mut output = Vec::new();
        let exit = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if let Some(code) = pipe.poll_finished() {
                    return code;
                }
                let ready = tokio::select! {
                    ready = mux.wait() => ready.unwrap(),
                    _ = tokio::time::sleep(Duration::from_millis(20)) => Vec::new(),
                };
                for event in ready {
                    assert_eq!(event.owner, Owner::Piper(SourceId(7)));
                    match event.payload {
                        Payload::Bytes(bytes) => output.extend(bytes),
                        Payload::Eof => pipe.mark_eof(),
                        _ => {}
                    }
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(output, b"a\nb\n");
        assert_eq!(exit, Some(4));
        pipe.release(&mut mux);
        assert!(mux.is_empty());
    }

    #[tokio::test]
    async fn test_blocking_reader_sends_bytes_then_eof() {
        let mut mux = IoMultiplexer::new();
        let sender = mux.register(Owner::Piper(SourceId(2)));
        read_blocking(std::io::Cursor::new(b"one\ntwo".to_vec()), sender);

        let mut output = Vec::new();
        let mut eof = false;
        while !eof {
            let ready = tokio::time::timeout(Duration::from_secs(5), mux.wait())
                .await
                .unwrap()
                .unwrap();
            for event in ready {
                match event.payload {
                    Payload::Bytes(bytes) => output.extend(bytes),
                    Payload::Eof => eof = true,
                    other => panic!("unexpected payload: {:?}", other),
                }
            }
        }
        assert_eq!(output, b"one\ntwo");
    }

    #[tokio::test]
    async fn test_stdin_source_has_no_child_to_reap() {
        let mut mux = IoMultiplexer::new();
        let mut pipe = PipedProcess::stdin(SourceId(4), &mut mux).unwrap();
        assert!(pipe.is_stdin());
        assert_eq!(pipe.command(), STDIN_NAME);
        assert_eq!(pipe.poll_finished(), None);
        pipe.mark_eof();
        assert_eq!(pipe.poll_finished(), Some(None));
        pipe.cancel(&mut mux);
        assert!(mux.is_empty());
    }

    #[tokio::test]
    async fn test_missing_shell_is_spawn_failure() {
        let err = PipedProcess::launch("/nonexistent/sh", "true").unwrap_err();
        assert!(matches!(err, SessionError::SpawnFailed { .. }));
    }
}
