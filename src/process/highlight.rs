//! Asynchronous search/highlight jobs
//!
//! A job hands the view's text to a helper process on stdin together with
//! the pattern on its command line. The helper prints `N:line` for each
//! 1-based matching line as it finds it; matches are applied progressively.
//! Exit status 0 (matches) and 1 (no matches) are normal completion.

use std::collections::BTreeSet;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};
use tracing::{debug, info, warn};

use super::scoped::{describe_exit, ScopedChild};
use super::JobSlot;
use crate::error::{SessionError, SessionResult};
use crate::multiplexer::{EventSender, IoMultiplexer, Owner, Payload, Token};

/// How a finished job ended
#[derive(Debug)]
pub enum JobOutcome {
    Completed,
    Crashed(SessionError),
}

/// A spawned helper that is not yet listened to.
///
/// Splitting launch from start lets the caller cancel the superseded job
/// only once the new process exists, and register the new token only after
/// the old one is gone.
#[derive(Debug)]
pub struct PendingJob {
    slot: JobSlot,
    pattern: String,
    snapshot: Arc<Vec<String>>,
    child: ScopedChild,
    stdin: ChildStdin,
    stdout: ChildStdout,
}

#[derive(Debug)]
pub struct HighlightJob {
    slot: JobSlot,
    pattern: String,
    token: Token,
    snapshot: Arc<Vec<String>>,
    child: ScopedChild,
    matches: BTreeSet<usize>,
    eof: bool,
}

impl HighlightJob {
    /// Validate `pattern` and spawn the helper over `lines`
    pub fn launch(
        helper: &[String],
        slot: JobSlot,
        pattern: &str,
        lines: Vec<String>,
    ) -> SessionResult<PendingJob> {
        regex::Regex::new(pattern).map_err(|e| SessionError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        let mut argv = helper.to_vec();
        argv.push(pattern.to_string());
        let description = argv.join(" ");

        let mut command = ScopedChild::command(&argv)?;
        command.stdin(Stdio::piped()).stdout(Stdio::piped());
        let mut child = ScopedChild::spawn(command, &description)?;

        let missing = |what: &str| SessionError::SpawnFailed {
            command: description.clone(),
            reason: format!("{} unavailable", what),
        };
        let stdin = child.take_stdin().ok_or_else(|| missing("stdin"))?;
        let stdout = child.take_stdout().ok_or_else(|| missing("stdout"))?;

        Ok(PendingJob {
            slot,
            pattern: pattern.to_string(),
            snapshot: Arc::new(lines),
            child,
            stdin,
            stdout,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn matches(&self) -> &BTreeSet<usize> {
        &self.matches
    }

    /// Matched lines with their 0-based line numbers
    pub fn matched_lines(&self) -> Vec<(usize, String)> {
        self.matches
            .iter()
            .filter_map(|&n| self.snapshot.get(n).map(|text| (n, text.clone())))
            .collect()
    }

    /// Apply a batch of helper output. Returns the newly found line numbers.
    pub fn apply_lines(&mut self, lines: &[String]) -> Vec<usize> {
        let mut found = Vec::new();
        for line in lines {
            let Some(number) = parse_match_line(line) else {
                debug!("Ignoring helper output: {:?}", line);
                continue;
            };
            if number < self.snapshot.len() && self.matches.insert(number) {
                found.push(number);
            }
        }
        found
    }

    pub fn mark_eof(&mut self) {
        self.eof = true;
    }

    /// Finished once output is drained and the helper has been reaped
    pub fn poll_finished(&mut self) -> Option<JobOutcome> {
        if !self.eof {
            return None;
        }
        let status = self.child.try_exit()?;
        Some(self.outcome(status))
    }

    fn outcome(&self, status: ExitStatus) -> JobOutcome {
        match status.code() {
            Some(0) | Some(1) => {
                info!(
                    "Search '{}' on {} finished with {} matches",
                    self.pattern,
                    self.slot,
                    self.matches.len()
                );
                JobOutcome::Completed
            }
            _ => {
                warn!(
                    "Helper for '{}' on {} terminated abnormally: {}",
                    self.pattern,
                    self.slot,
                    describe_exit(status)
                );
                JobOutcome::Crashed(SessionError::ProcessCrashed {
                    command: self.child.description().to_string(),
                    reason: describe_exit(status),
                })
            }
        }
    }

    /// Stop listening and terminate the helper
    pub fn cancel(mut self, mux: &mut IoMultiplexer) {
        mux.deregister(self.token);
        self.child.cancel();
        debug!("Cancelled search '{}' on {}", self.pattern, self.slot);
    }

    /// Release the token of a job that already finished
    pub fn release(self, mux: &mut IoMultiplexer) {
        mux.deregister(self.token);
    }
}

impl PendingJob {
    /// Register with the multiplexer and start pumping text in and matches out
    pub fn start(self, mux: &mut IoMultiplexer) -> SessionResult<HighlightJob> {
        let sender = mux.register(Owner::Job(self.slot));
        let token = sender.token();

        let writer = tokio::spawn(write_snapshot(self.stdin, Arc::clone(&self.snapshot)));
        let reader = tokio::spawn(read_matches(self.stdout, sender));
        mux.attach(token, writer)?;
        mux.attach(token, reader)?;

        info!(
            "Started search '{}' on {} over {} lines (token {})",
            self.pattern,
            self.slot,
            self.snapshot.len(),
            token
        );

        Ok(HighlightJob {
            slot: self.slot,
            pattern: self.pattern,
            token,
            snapshot: self.snapshot,
            child: self.child,
            matches: BTreeSet::new(),
            eof: false,
        })
    }
}

async fn write_snapshot(mut stdin: ChildStdin, snapshot: Arc<Vec<String>>) {
    for line in snapshot.iter() {
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await
        }
        .await;
        // The helper may exit before reading everything
        if let Err(e) = written {
            debug!("Helper stdin closed early: {}", e);
            return;
        }
    }
    let _ = stdin.shutdown().await;
}

/// Forward helper output in batches, flushing whenever the read buffer
/// runs dry so matches show up before the helper exits.
async fn read_matches(stdout: ChildStdout, sender: EventSender) {
    let mut lines = BufReader::new(stdout).lines();
    let mut batch = Vec::new();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                batch.push(line);
                if lines.get_mut().buffer().is_empty()
                    && !sender.send(Payload::Lines(std::mem::take(&mut batch)))
                {
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                sender.send(Payload::ReadError(e.to_string()));
                break;
            }
        }
    }
    if !batch.is_empty() {
        sender.send(Payload::Lines(batch));
    }
    sender.send(Payload::Eof);
}

/// `N:...` with a 1-based line number, returned 0-based
fn parse_match_line(line: &str) -> Option<usize> {
    let (number, _) = line.split_once(':')?;
    number.trim().parse::<usize>().ok()?.checked_sub(1)
}
