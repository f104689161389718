//! # wialon-server
//!
//! TCP ingestion server for Wialon IPS devices.
//!
//! This crate provides:
//! - TCP connection handling with async I/O
//! - Per-connection session state and acknowledgment sequencing
//! - Telemetry sinks (bounded channel, JSON lines, in-memory)
//! - Layered configuration (defaults, YAML, environment)
//! - Prometheus metrics with an optional HTTP endpoint

pub mod config;
pub mod error;
pub mod metrics;
pub mod server;
pub mod session;
pub mod sink;

pub use config::{Config, MetricsConfig, NetworkConfig, SinkConfig};
pub use error::ServerError;
pub use metrics::{run_metrics_server, Metrics};
pub use server::{ConnectionInfo, Server, ServerConfig, ServerStats};
pub use session::{Applied, Session, SessionError, SessionState};
pub use sink::{
    spawn_json_writer, write_json_lines, ChannelSink, MemorySink, Sink, SinkError, Telemetry,
    TelemetryEvent,
};
