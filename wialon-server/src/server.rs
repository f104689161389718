//! TCP server implementation.

use crate::config::NetworkConfig;
use crate::error::ServerError;
use crate::metrics::Metrics;
use crate::session::Session;
use crate::sink::Sink;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use wialon_protocol::{
    Encoder, Packet, PacketType, ProtocolError, RawFrame, DEFAULT_MAX_FRAME_SIZE, DEFAULT_PORT,
};

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Idle connection timeout.
    pub idle_timeout: Duration,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Maximum bytes of an unterminated frame held per connection.
    pub max_frame_size: usize,
    /// Metrics instance (if metrics are enabled).
    pub metrics: Option<Arc<Metrics>>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("idle_timeout", &self.idle_timeout)
            .field("max_connections", &self.max_connections)
            .field("max_frame_size", &self.max_frame_size)
            .field("metrics_enabled", &self.metrics.is_some())
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            idle_timeout: Duration::from_secs(300),
            max_connections: 1000,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            metrics: None,
        }
    }
}

impl From<&NetworkConfig> for ServerConfig {
    fn from(network: &NetworkConfig) -> Self {
        Self {
            bind_addr: network.bind_addr,
            idle_timeout: network.idle_timeout(),
            max_connections: network.max_connections,
            max_frame_size: network.max_frame_size,
            metrics: None,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Sets the idle timeout.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Sets the connection limit.
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Sets the frame size limit.
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Sets the metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns whether metrics are enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics.is_some()
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub connections_rejected: AtomicU64,
    pub packets_total: AtomicU64,
    pub telemetry_events: AtomicU64,
    pub sink_failures: AtomicU64,
    pub errors_total: AtomicU64,
}

/// Entry in the live-connection registry.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub remote_addr: SocketAddr,
    pub connected_at: DateTime<Utc>,
}

/// Everything a connection task needs from the server.
#[derive(Clone)]
struct ConnectionContext {
    config: ServerConfig,
    sink: Arc<dyn Sink>,
    stats: Arc<ServerStats>,
}

/// TCP ingestion server.
pub struct Server {
    config: ServerConfig,
    sink: Arc<dyn Sink>,
    connections: Arc<DashMap<String, ConnectionInfo>>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

impl Server {
    /// Creates a new server forwarding telemetry to `sink`.
    pub fn new(config: ServerConfig, sink: Arc<dyn Sink>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            sink,
            connections: Arc::new(DashMap::new()),
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Binds the configured address and runs the server.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Accepts connections from an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("Server listening on {}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.stats.connections_active.load(Ordering::Relaxed)
                                >= self.config.max_connections as u64
                            {
                                tracing::warn!("Connection limit reached, rejecting {}", addr);
                                self.stats.connections_rejected.fetch_add(1, Ordering::Relaxed);
                                if let Some(ref metrics) = self.config.metrics {
                                    metrics.connections_rejected_total.inc();
                                }
                                continue;
                            }

                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            if let Some(ref metrics) = self.config.metrics {
                                metrics.connections_total.inc();
                                metrics.connections_active.inc();
                            }

                            let ctx = ConnectionContext {
                                config: self.config.clone(),
                                sink: self.sink.clone(),
                                stats: self.stats.clone(),
                            };
                            let connections = self.connections.clone();
                            let mut conn_shutdown = self.shutdown.subscribe();

                            tokio::spawn(async move {
                                let mut session = Session::new(addr);
                                connections.insert(
                                    session.id.clone(),
                                    ConnectionInfo {
                                        remote_addr: addr,
                                        connected_at: Utc::now(),
                                    },
                                );
                                tracing::info!("Client connected: {} (session={})", addr, session.id);

                                let result = Self::handle_connection(
                                    stream,
                                    &mut session,
                                    &ctx,
                                    &mut conn_shutdown,
                                )
                                .await;

                                if let Err(e) = result {
                                    Self::record_error(&ctx, addr, &e);
                                }

                                session.close();
                                connections.remove(&session.id);
                                ctx.stats.connections_active.fetch_sub(1, Ordering::Relaxed);

                                if let Some(ref metrics) = ctx.config.metrics {
                                    metrics.connections_active.dec();
                                }

                                tracing::info!(
                                    "Client disconnected: {} (device={}, packets={})",
                                    addr,
                                    session.device_id(),
                                    session.packets_accepted()
                                );
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Drives one connection until EOF, idle timeout, shutdown, or a fatal error.
    async fn handle_connection<S>(
        mut stream: S,
        session: &mut Session,
        ctx: &ConnectionContext,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), ServerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let addr = session.remote_addr;
        let mut decoder = wialon_protocol::Decoder::new();
        let mut buf = [0u8; 4096];

        loop {
            tokio::select! {
                result = stream.read(&mut buf) => {
                    match result {
                        Ok(0) => {
                            tracing::debug!("[{}] Connection closed by client", addr);
                            return Ok(());
                        }
                        Ok(n) => {
                            tracing::debug!("[{}] Received {} bytes", addr, n);
                            decoder.extend(&buf[..n]);
                        }
                        Err(e) => {
                            tracing::debug!("[{}] Read error: {}", addr, e);
                            return Err(ServerError::Io(e));
                        }
                    }
                }

                _ = tokio::time::sleep(ctx.config.idle_timeout) => {
                    tracing::debug!("[{}] Idle timeout", addr);
                    return Ok(());
                }

                _ = shutdown.recv() => {
                    tracing::debug!("[{}] Shutdown signal received", addr);
                    return Err(ServerError::ShuttingDown);
                }
            }

            while let Some(frame) = decoder.next_frame() {
                Self::handle_frame(&mut stream, session, &frame, ctx).await?;
            }

            let buffered = decoder.buffered();
            if buffered > ctx.config.max_frame_size {
                return Err(ProtocolError::FrameTooLarge {
                    size: buffered,
                    max: ctx.config.max_frame_size,
                }
                .into());
            }
        }
    }

    /// Parses and applies one frame, writes its ack, then forwards telemetry.
    async fn handle_frame<S>(
        stream: &mut S,
        session: &mut Session,
        frame: &RawFrame,
        ctx: &ConnectionContext,
    ) -> Result<(), ServerError>
    where
        S: AsyncWrite + Unpin,
    {
        let started = Instant::now();
        let addr = session.remote_addr;

        let packet = Packet::parse(frame)?;
        let packet_type = packet.packet_type();
        tracing::debug!("[{}] Packet: {:?}", addr, packet);

        let applied = session.apply(packet)?;
        if packet_type == PacketType::Login {
            tracing::info!("[{}] Device logged in: {}", addr, session.device_id());
        }

        let ack_bytes = Encoder::encode_ack(&applied.ack);
        stream.write_all(&ack_bytes).await?;
        stream.flush().await?;
        tracing::debug!("[{}] Ack: {}", addr, applied.ack.to_string().trim_end());

        ctx.stats.packets_total.fetch_add(1, Ordering::Relaxed);
        if let Some(ref metrics) = ctx.config.metrics {
            metrics
                .packets_total
                .with_label_values(&[packet_type.as_str()])
                .inc();
            metrics
                .acks_total
                .with_label_values(&[applied.ack.kind()])
                .inc();
        }

        if let Some(event) = applied.telemetry {
            let sequence = event.sequence;
            match ctx.sink.push(event) {
                Ok(()) => {
                    ctx.stats.telemetry_events.fetch_add(1, Ordering::Relaxed);
                    if let Some(ref metrics) = ctx.config.metrics {
                        metrics.telemetry_events_total.inc();
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "[{}] Dropped telemetry {} from {}: {}",
                        addr,
                        sequence,
                        session.device_id(),
                        e
                    );
                    ctx.stats.sink_failures.fetch_add(1, Ordering::Relaxed);
                    if let Some(ref metrics) = ctx.config.metrics {
                        metrics.sink_failures_total.inc();
                    }
                }
            }
        }

        if let Some(ref metrics) = ctx.config.metrics {
            metrics
                .packet_duration
                .with_label_values(&[packet_type.as_str()])
                .observe(started.elapsed().as_secs_f64());
        }

        Ok(())
    }

    fn record_error(ctx: &ConnectionContext, addr: SocketAddr, error: &ServerError) {
        if matches!(error, ServerError::ShuttingDown) {
            return;
        }

        if error.is_client_fault() {
            tracing::warn!("[{}] Closing connection: {}", addr, error);
        } else {
            tracing::debug!("Connection {} error: {}", addr, error);
        }

        ctx.stats.errors_total.fetch_add(1, Ordering::Relaxed);
        if let Some(ref metrics) = ctx.config.metrics {
            metrics
                .errors_total
                .with_label_values(&[error.kind().as_str()])
                .inc();
        }
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    /// Returns the number of live connections.
    pub fn active_connections(&self) -> usize {
        self.connections.len()
    }

    /// Returns a snapshot of the live-connection registry.
    pub fn connections(&self) -> Vec<(String, ConnectionInfo)> {
        self.connections
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}
