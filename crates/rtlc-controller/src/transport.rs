//! Request line sources.
//!
//! The controller checks for a request with a bounded wait: [`LineSource::poll_line`]
//! returns a line only once it is complete. Bytes are buffered in a [`LineFramer`]
//! until the terminator arrives.

use std::collections::VecDeque;
use std::io::Read;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use rtlc_core::LineFramer;
use tracing::debug;

use crate::error::ControllerError;

/// Source of request lines.
pub trait LineSource {
    /// A complete line if one arrives within `wait`, `Ok(None)` if not.
    ///
    /// Returns [`ControllerError::SourceClosed`] once the source is exhausted and no
    /// complete line remains.
    fn poll_line(&mut self, wait: Duration) -> Result<Option<String>, ControllerError>;
}

/// Line source fed by a background thread reading a blocking byte stream.
///
/// The reader thread forwards raw chunks over a channel; framing happens on the
/// control loop's side so partial lines are never handed out.
pub struct ReaderLineSource {
    chunks: Receiver<Vec<u8>>,
    framer: LineFramer,
    closed: bool,
}

impl ReaderLineSource {
    /// Start reading `reader` on a background thread.
    pub fn spawn<R: Read + Send + 'static>(mut reader: R) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("rtlc-request-reader".into())
            .spawn(move || {
                let mut buf = [0u8; 256];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            if tx.send(buf[..n].to_vec()).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            debug!(error = %e, "Request reader stopped");
                            break;
                        }
                    }
                }
            })?;

        Ok(Self {
            chunks: rx,
            framer: LineFramer::new(),
            closed: false,
        })
    }
}

impl LineSource for ReaderLineSource {
    fn poll_line(&mut self, wait: Duration) -> Result<Option<String>, ControllerError> {
        loop {
            if let Some(line) = self.framer.next_line() {
                return Ok(Some(line));
            }
            if self.closed {
                return Err(ControllerError::SourceClosed);
            }
            match self.chunks.recv_timeout(wait) {
                Ok(chunk) => self.framer.push(&chunk),
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => self.closed = true,
            }
        }
    }
}

/// Pre-recorded lines, for tests and scripted runs.
///
/// `None` entries stand for polls on which nothing has arrived yet.
#[derive(Debug, Default)]
pub struct ScriptedLines {
    lines: VecDeque<Option<String>>,
}

impl ScriptedLines {
    /// Lines delivered one per poll, in order.
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(|l| Some(l.into())).collect(),
        }
    }

    /// Insert `polls` empty polls before the next line.
    pub fn idle(mut self, polls: usize) -> Self {
        for _ in 0..polls {
            self.lines.push_back(None);
        }
        self
    }

    /// Append a line.
    pub fn then(mut self, line: impl Into<String>) -> Self {
        self.lines.push_back(Some(line.into()));
        self
    }
}

impl LineSource for ScriptedLines {
    fn poll_line(&mut self, _wait: Duration) -> Result<Option<String>, ControllerError> {
        match self.lines.pop_front() {
            Some(entry) => Ok(entry),
            None => Err(ControllerError::SourceClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Instant;

    const WAIT: Duration = Duration::from_millis(10);

    fn poll_until_line(source: &mut ReaderLineSource) -> Option<String> {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            match source.poll_line(WAIT) {
                Ok(Some(line)) => return Some(line),
                Ok(None) => {}
                Err(_) => return None,
            }
        }
        None
    }

    #[test]
    fn reader_source_yields_complete_lines_then_closes() {
        let mut source =
            ReaderLineSource::spawn(Cursor::new(b"240125RF,ann,20,2\nB2,bob,10,1\npartial".to_vec()))
                .unwrap();
        assert_eq!(poll_until_line(&mut source).as_deref(), Some("240125RF,ann,20,2"));
        assert_eq!(poll_until_line(&mut source).as_deref(), Some("B2,bob,10,1"));
        assert_eq!(poll_until_line(&mut source), None);
        assert!(matches!(source.poll_line(WAIT), Err(ControllerError::SourceClosed)));
    }

    #[test]
    fn scripted_lines_report_idle_polls() {
        let mut source = ScriptedLines::default().idle(2).then("B1,ann,10,1");
        assert_eq!(source.poll_line(WAIT).unwrap(), None);
        assert_eq!(source.poll_line(WAIT).unwrap(), None);
        assert_eq!(source.poll_line(WAIT).unwrap().as_deref(), Some("B1,ann,10,1"));
        assert!(matches!(source.poll_line(WAIT), Err(ControllerError::SourceClosed)));
    }
}
