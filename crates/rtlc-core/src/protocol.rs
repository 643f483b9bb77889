//! Line-oriented wire protocol between the session and the scan controller.
//!
//! Every message is one ASCII line terminated by `\n`:
//!
//! | Direction | Line | Meaning |
//! |---|---|---|
//! | host → device | `batchId,operator,rangeMm,durationMin` | scan request ([`ScanRequest`](crate::ScanRequest)) |
//! | device → host | `positionTenthMm;count` | one [`Sample`] |
//! | device → host | `end` | end of the measurement stream |
//! | device → host | `end;ok` / `end;fault` | tagged end of stream (optional) |
//!
//! [`LineFramer`] turns an arbitrary byte stream into complete lines; both ends
//! buffer until a full line is available before decoding anything.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Literal end-of-stream line.
pub const SENTINEL: &str = "end";

/// Grid spacing between consecutive samples, in tenths of a millimetre (0.5 mm).
pub const POSITION_STEP_TENTH_MM: u32 = 5;

/// Longest line the framer accepts before discarding buffered bytes.
pub const MAX_LINE_LEN: usize = 1024;

/// One measurement: pulses counted during the dwell window at one carriage position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sample {
    /// Carriage position in tenths of a millimetre.
    pub position_tenth_mm: u32,
    /// Pulses observed during the dwell window.
    pub count: u32,
}

impl Sample {
    /// Create a sample.
    pub fn new(position_tenth_mm: u32, count: u32) -> Self {
        Self {
            position_tenth_mm,
            count,
        }
    }

    /// Position in millimetres.
    pub fn position_mm(&self) -> f64 {
        f64::from(self.position_tenth_mm) / 10.0
    }

    /// Wire form, without the terminator.
    pub fn to_wire(&self) -> String {
        format!("{};{}", self.position_tenth_mm, self.count)
    }
}

/// Completion status carried by the end-of-stream line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SentinelStatus {
    /// Bare `end`: the device does not say whether the scan finished or faulted.
    Untagged,
    /// `end;ok`: every planned position was measured.
    Ok,
    /// `end;fault`: the far limit switch tripped and the scan was abandoned.
    Fault,
}

impl SentinelStatus {
    /// Wire form of the end-of-stream line carrying this status.
    pub fn to_wire(self) -> &'static str {
        match self {
            SentinelStatus::Untagged => SENTINEL,
            SentinelStatus::Ok => "end;ok",
            SentinelStatus::Fault => "end;fault",
        }
    }
}

/// A decoded controller → host line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceLine {
    /// A measurement.
    Sample(Sample),
    /// The end-of-stream sentinel.
    End(SentinelStatus),
}

impl DeviceLine {
    /// Decode one received line.
    ///
    /// Whitespace around the line and around each measurement field is ignored, so
    /// `"50; 10"` decodes the same as `"50;10"`.
    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        match line {
            "" => return Err(ProtocolError::Empty),
            SENTINEL => return Ok(DeviceLine::End(SentinelStatus::Untagged)),
            "end;ok" => return Ok(DeviceLine::End(SentinelStatus::Ok)),
            "end;fault" => return Ok(DeviceLine::End(SentinelStatus::Fault)),
            _ => {}
        }

        let (position, count) = line
            .split_once(';')
            .ok_or_else(|| ProtocolError::Unrecognised(line.to_string()))?;
        let position_tenth_mm = position
            .trim()
            .parse()
            .map_err(|_| ProtocolError::InvalidInteger(line.to_string()))?;
        let count = count
            .trim()
            .parse()
            .map_err(|_| ProtocolError::InvalidInteger(line.to_string()))?;

        Ok(DeviceLine::Sample(Sample::new(position_tenth_mm, count)))
    }

    /// Wire form, without the terminator.
    pub fn encode(&self) -> String {
        match self {
            DeviceLine::Sample(sample) => sample.to_wire(),
            DeviceLine::End(status) => status.to_wire().to_string(),
        }
    }
}

impl fmt::Display for DeviceLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Accumulates received bytes and hands out complete lines.
///
/// Lines are split on `\n`; a trailing `\r` is dropped and invalid UTF-8 is replaced
/// rather than rejected. A partial line longer than [`MAX_LINE_LEN`] is discarded so
/// a noisy link cannot grow the buffer without bound.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
    overflows: u64,
}

impl LineFramer {
    /// Create an empty framer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        if self.buf.len() > MAX_LINE_LEN && !self.buf.contains(&b'\n') {
            tracing::warn!(bytes = self.buf.len(), "Discarding oversized partial line");
            self.buf.clear();
            self.overflows += 1;
        }
    }

    /// Pop the next complete line, if one is buffered.
    pub fn next_line(&mut self) -> Option<String> {
        let end = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=end).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Bytes buffered that do not yet form a complete line.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Number of oversized partial lines discarded so far.
    pub fn overflows(&self) -> u64 {
        self.overflows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_sample_and_converts_to_mm() {
        let line = DeviceLine::decode("120;47").unwrap();
        let DeviceLine::Sample(sample) = line else {
            panic!("expected a sample, got {line:?}");
        };
        assert_eq!(sample.position_mm(), 12.0);
        assert_eq!(sample.count, 47);
        assert_eq!(line.encode(), "120;47");
    }

    #[test]
    fn tolerates_space_after_separator() {
        assert_eq!(
            DeviceLine::decode("50; 10\r\n"),
            Ok(DeviceLine::Sample(Sample::new(50, 10)))
        );
    }

    #[test]
    fn decodes_sentinels() {
        assert_eq!(
            DeviceLine::decode("end"),
            Ok(DeviceLine::End(SentinelStatus::Untagged))
        );
        assert_eq!(DeviceLine::decode("end;ok"), Ok(DeviceLine::End(SentinelStatus::Ok)));
        assert_eq!(
            DeviceLine::decode(" end;fault "),
            Ok(DeviceLine::End(SentinelStatus::Fault))
        );
    }

    #[test]
    fn rejects_noise() {
        assert_eq!(
            DeviceLine::decode("garbage"),
            Err(ProtocolError::Unrecognised("garbage".into()))
        );
        assert_eq!(DeviceLine::decode("   "), Err(ProtocolError::Empty));
        assert!(matches!(
            DeviceLine::decode("5;x"),
            Err(ProtocolError::InvalidInteger(_))
        ));
        assert!(matches!(
            DeviceLine::decode("-5;3"),
            Err(ProtocolError::InvalidInteger(_))
        ));
        assert!(matches!(
            DeviceLine::decode("Error: pin fault"),
            Err(ProtocolError::Unrecognised(_))
        ));
    }

    #[test]
    fn framer_waits_for_complete_lines() {
        let mut framer = LineFramer::new();
        framer.push(b"12");
        assert_eq!(framer.next_line(), None);
        framer.push(b"0;47\r\n5");
        assert_eq!(framer.next_line().as_deref(), Some("120;47"));
        assert_eq!(framer.next_line(), None);
        assert_eq!(framer.pending(), 1);
        framer.push(b"0;1\nend\n");
        assert_eq!(framer.next_line().as_deref(), Some("50;1"));
        assert_eq!(framer.next_line().as_deref(), Some("end"));
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn framer_drops_oversized_partial_line() {
        let mut framer = LineFramer::new();
        framer.push(&vec![b'x'; MAX_LINE_LEN + 1]);
        assert_eq!(framer.pending(), 0);
        assert_eq!(framer.overflows(), 1);
        framer.push(b"end\n");
        assert_eq!(framer.next_line().as_deref(), Some("end"));
    }

    #[test]
    fn framer_replaces_invalid_utf8() {
        let mut framer = LineFramer::new();
        framer.push(&[0xff, b'5', b';', b'1', b'\n']);
        let line = framer.next_line().unwrap();
        assert!(line.ends_with("5;1"));
    }
}
