//! Telemetry sinks.
//!
//! Connections hand every accepted data packet to a [`Sink`]. The sink is the
//! only resource shared between connections, so `push` must be safe to call
//! concurrently and must never block the caller.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use wialon_protocol::{CustomParameter, ExtendedData, ShortData};

/// Sink errors. None of these reach the device: the ack has already been sent.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink buffer full")]
    Full,

    #[error("sink closed")]
    Closed,

    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Payload of a telemetry event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Telemetry {
    Short(ShortData),
    Extended(ExtendedData),
}

impl Telemetry {
    /// Returns the position fix carried by either variant.
    pub fn position(&self) -> &ShortData {
        match self {
            Telemetry::Short(data) => data,
            Telemetry::Extended(data) => &data.position,
        }
    }

    /// Returns the custom parameters, empty for short data.
    pub fn custom_params(&self) -> &[CustomParameter] {
        match self {
            Telemetry::Short(_) => &[],
            Telemetry::Extended(data) => &data.custom_params,
        }
    }
}

/// An accepted data packet, attributed to its device and session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub session_id: String,
    pub device_id: String,
    /// Session sequence number acknowledged for this packet.
    pub sequence: u64,
    pub received_at: DateTime<Utc>,
    pub data: Telemetry,
}

/// Destination for accepted telemetry.
pub trait Sink: Send + Sync {
    /// Hands over one event without blocking.
    fn push(&self, event: TelemetryEvent) -> Result<(), SinkError>;
}

/// Bounded queue in front of an asynchronous consumer.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<TelemetryEvent>,
}

impl ChannelSink {
    /// Creates a sink and the receiver its consumer drains.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TelemetryEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl Sink for ChannelSink {
    fn push(&self, event: TelemetryEvent) -> Result<(), SinkError> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

/// Keeps events in memory, for embedding and tests.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the stored events.
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().clone()
    }

    /// Removes and returns the stored events.
    pub fn take(&self) -> Vec<TelemetryEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl Sink for MemorySink {
    fn push(&self, event: TelemetryEvent) -> Result<(), SinkError> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Writes every received event to `writer` as one JSON line.
///
/// Returns the number of lines written once all senders are dropped.
/// Events that fail to serialize are logged and skipped.
pub async fn write_json_lines<W>(
    mut rx: mpsc::Receiver<TelemetryEvent>,
    mut writer: W,
) -> Result<u64, SinkError>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    while let Some(event) = rx.recv().await {
        let mut line = match serde_json::to_vec(&event) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(
                    "Failed to serialize telemetry from {}: {}",
                    event.device_id,
                    e
                );
                continue;
            }
        };
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
        written += 1;
    }
    Ok(written)
}

/// Spawns the JSON-lines writer for `output`, or stdout when `None`.
pub async fn spawn_json_writer(
    rx: mpsc::Receiver<TelemetryEvent>,
    output: Option<&Path>,
) -> Result<JoinHandle<Result<u64, SinkError>>, SinkError> {
    let handle = match output {
        Some(path) => {
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?;
            tracing::info!("Writing telemetry to {}", path.display());
            tokio::spawn(write_json_lines(rx, file))
        }
        None => {
            tracing::info!("Writing telemetry to stdout");
            tokio::spawn(write_json_lines(rx, tokio::io::stdout()))
        }
    };
    Ok(handle)
}
