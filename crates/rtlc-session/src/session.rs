//! Acquisition session: one request out, samples in until the sentinel.
//!
//! The session owns the transport for the whole scan. After writing the request it
//! checks for received bytes on a fixed cadence, never waiting on the link itself,
//! so the task yields between checks. Decoded samples and the final record are
//! forwarded over a channel in emission order.

use std::time::Duration;

use rtlc_core::config::LinkConfig;
use rtlc_core::serial::{drain_serial_buffer, open_serial_async, SerialPortIO, SerialStream};
use rtlc_core::{DeviceLine, Sample, ScanError, ScanRequest, ScanResult};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::decoder::StreamDecoder;
use crate::record::{Completion, ScanRecord};
use crate::render::SampleRenderer;

/// Capacity of the event channel between the polling task and its consumer.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Stale bytes are drained for this long after opening a port.
const DRAIN_ON_CONNECT_MS: u64 = 50;

/// What the session reports while acquiring.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionEvent {
    /// A decoded sample.
    Sample(Sample),
    /// The sentinel arrived; the scan is over.
    Finished(ScanRecord),
}

/// Host side of one scan.
pub struct AcquisitionSession<T> {
    transport: T,
    poll_interval: Duration,
    decoder: StreamDecoder,
}

impl AcquisitionSession<SerialStream> {
    /// Open `port` with the link's fixed parameters.
    ///
    /// A port that cannot be opened is a [`ScanError::Connection`]; the session does
    /// not retry.
    pub async fn connect(port: &str, link: &LinkConfig) -> ScanResult<Self> {
        let mut stream = open_serial_async(port, link).await?;
        let stale = drain_serial_buffer(&mut stream, DRAIN_ON_CONNECT_MS).await;
        if stale > 0 {
            debug!(port, bytes = stale, "Drained stale bytes");
        }
        info!(port, baud_rate = link.baud_rate, "Serial link open");
        Ok(Self::from_transport(stream, link))
    }
}

impl<T: SerialPortIO> AcquisitionSession<T> {
    /// Use an already-open transport.
    pub fn from_transport(transport: T, link: &LinkConfig) -> Self {
        Self {
            transport,
            poll_interval: link.poll_interval(),
            decoder: StreamDecoder::new(),
        }
    }

    /// Override the polling cadence.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Write the request line and flush it.
    pub async fn send_request(&mut self, request: &ScanRequest) -> ScanResult<()> {
        let line = format!("{}\n", request.to_wire());
        self.transport.write_all(line.as_bytes()).await?;
        self.transport.flush().await?;
        info!(request = %request, "Scan request sent");
        Ok(())
    }

    /// Send `request` and collect the stream until the sentinel.
    ///
    /// Events go to `events` as they are decoded; a dropped receiver does not stop
    /// the acquisition. Returns [`ScanError::TransportClosed`] if the link reaches
    /// end-of-file before the sentinel.
    pub async fn run(
        mut self,
        request: ScanRequest,
        events: mpsc::Sender<AcquisitionEvent>,
    ) -> ScanResult<ScanRecord> {
        self.send_request(&request).await?;

        let mut samples = Vec::with_capacity(request.expected_samples());
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let eof = self.read_available().await?;

            while let Some(line) = self.decoder.next_line() {
                match line {
                    DeviceLine::Sample(sample) => {
                        samples.push(sample);
                        if events.send(AcquisitionEvent::Sample(sample)).await.is_err() {
                            debug!("Event receiver dropped");
                        }
                    }
                    DeviceLine::End(sentinel) => {
                        let record = ScanRecord {
                            request,
                            samples,
                            sentinel,
                            discarded_lines: self.decoder.discarded(),
                        };
                        log_completion(&record);
                        let _ = events.send(AcquisitionEvent::Finished(record.clone())).await;
                        return Ok(record);
                    }
                }
            }

            if eof {
                warn!(received = samples.len(), "Link closed before end of scan");
                return Err(ScanError::TransportClosed);
            }
        }
    }

    /// Run the session on its own task.
    pub fn spawn(
        self,
        request: ScanRequest,
    ) -> (
        JoinHandle<ScanResult<ScanRecord>>,
        mpsc::Receiver<AcquisitionEvent>,
    )
    where
        T: 'static,
    {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        (tokio::spawn(self.run(request, tx)), rx)
    }

    /// Run the session and feed `renderer` from the caller's task.
    pub async fn acquire<R>(self, request: ScanRequest, renderer: &mut R) -> ScanResult<ScanRecord>
    where
        T: 'static,
        R: SampleRenderer + ?Sized,
    {
        renderer.begin(&request);
        let (handle, mut events) = self.spawn(request);
        while let Some(event) = events.recv().await {
            match event {
                AcquisitionEvent::Sample(sample) => renderer.render(&sample),
                AcquisitionEvent::Finished(record) => renderer.finish(&record),
            }
        }
        handle
            .await
            .map_err(|e| ScanError::Io(std::io::Error::other(e)))?
    }

    /// Pull in whatever has already arrived. Returns `true` at end-of-file.
    async fn read_available(&mut self) -> ScanResult<bool> {
        let mut buf = [0u8; 512];
        loop {
            match timeout(Duration::ZERO, self.transport.read(&mut buf)).await {
                Ok(Ok(0)) => return Ok(true),
                Ok(Ok(n)) => self.decoder.push(&buf[..n]),
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => return Ok(false),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Ok(false),
            }
        }
    }
}

fn log_completion(record: &ScanRecord) {
    match record.completion() {
        Completion::Clean => info!(
            samples = record.samples.len(),
            discarded = record.discarded_lines,
            "Scan complete"
        ),
        Completion::Fault => warn!(
            samples = record.samples.len(),
            expected = record.request.expected_samples(),
            "Controller reported a far-limit fault"
        ),
        Completion::Truncated => warn!(
            samples = record.samples.len(),
            expected = record.request.expected_samples(),
            "Scan ended early; the far limit may have tripped"
        ),
    }
}
