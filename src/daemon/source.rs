//! Where bus events come from.

use super::events::BusEvent;
use super::DaemonError;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, warn};

/// An unbounded stream of bus events.
///
/// `next_event` must be cancel safe: the daemon drops a pending call when a
/// shutdown signal arrives.
#[async_trait]
pub trait EventSource: Send {
    /// The next event, or `None` once the stream has ended.
    async fn next_event(&mut self) -> Result<Option<BusEvent>, DaemonError>;
}

/// Events encoded as one JSON object per line.
///
/// Blank lines, lines that are not UTF-8 and lines that are not an event are
/// skipped; only end of input or a read error ends the stream.
pub struct LineEventSource<R> {
    reader: R,
    // Survives a cancelled read so a partial line is completed next call.
    line: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin + Send> LineEventSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::new(),
        }
    }
}

fn parse_line(line: &[u8]) -> Option<BusEvent> {
    let text = match std::str::from_utf8(line) {
        Ok(text) => text.trim(),
        Err(e) => {
            warn!("Skipping bus event that is not valid UTF-8: {e}");
            return None;
        }
    };
    if text.is_empty() {
        return None;
    }
    match serde_json::from_str(text) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!("Skipping malformed bus event: {e}");
            None
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> EventSource for LineEventSource<R> {
    async fn next_event(&mut self) -> Result<Option<BusEvent>, DaemonError> {
        loop {
            let read = self.reader.read_until(b'\n', &mut self.line).await?;
            if read == 0 && self.line.is_empty() {
                return Ok(None);
            }
            let event = parse_line(&self.line);
            self.line.clear();
            if event.is_some() {
                return Ok(event);
            }
        }
    }
}

/// Events printed by a long-running tail command.
pub struct CommandEventSource {
    // Held so the command is killed when the source is dropped.
    _child: Child,
    inner: LineEventSource<BufReader<ChildStdout>>,
}

impl CommandEventSource {
    pub fn spawn(command: &[String]) -> Result<Self, DaemonError> {
        let (program, args) = command.split_first().ok_or(DaemonError::NoCommand)?;
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DaemonError::Spawn {
                program: program.clone(),
                source,
            })?;
        let stdout = child.stdout.take().ok_or(DaemonError::NoCommand)?;
        debug!("Listening to events from {program}");
        Ok(Self {
            _child: child,
            inner: LineEventSource::new(BufReader::new(stdout)),
        })
    }
}

#[async_trait]
impl EventSource for CommandEventSource {
    async fn next_event(&mut self) -> Result<Option<BusEvent>, DaemonError> {
        self.inner.next_event().await
    }
}
