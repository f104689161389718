//! Session management.
//!
//! A session lives exactly as long as its connection and is owned by the
//! connection handler; nothing else reads or mutates it.

use crate::sink::{Telemetry, TelemetryEvent};
use chrono::Utc;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;
use wialon_protocol::{Ack, ErrorKind, Packet};

/// Sequence number acknowledged for a login. Data acks continue from here.
pub const LOGIN_SEQUENCE: u64 = 1;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Initial state, waiting for a login packet.
    Unauthenticated,
    /// Login accepted, data packets are acknowledged.
    Authenticated,
    /// Connection torn down; no further packets are processed.
    Closed,
}

/// Session errors. Both are fatal to the connection.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not authenticated")]
    NotAuthenticated,

    #[error("session closed")]
    Closed,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::NotAuthenticated => ErrorKind::NotAuthenticated,
            SessionError::Closed => ErrorKind::SessionClosed,
        }
    }
}

/// Result of applying an accepted packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    /// Reply to send for this packet.
    pub ack: Ack,
    /// Telemetry to forward to the sink, for data packets.
    pub telemetry: Option<TelemetryEvent>,
}

/// A device session.
pub struct Session {
    /// Unique session ID.
    pub id: String,

    /// Remote address.
    pub remote_addr: SocketAddr,

    state: SessionState,

    /// Identifier from the last login, empty before the first one.
    device_id: String,

    /// Last acknowledged sequence number.
    packet_sequence: u64,

    /// Packets accepted over the session's lifetime, logins included.
    packets_accepted: u64,

    created_at: Instant,

    last_activity: Instant,
}

impl Session {
    /// Creates a new session.
    pub fn new(remote_addr: SocketAddr) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4().to_string(),
            remote_addr,
            state: SessionState::Unauthenticated,
            device_id: String::new(),
            packet_sequence: 0,
            packets_accepted: 0,
            created_at: now,
            last_activity: now,
        }
    }

    /// Applies a packet, returning the ack to send and any telemetry to forward.
    pub fn apply(&mut self, packet: Packet) -> Result<Applied, SessionError> {
        match self.state {
            SessionState::Closed => return Err(SessionError::Closed),
            SessionState::Unauthenticated if !matches!(packet, Packet::Login { .. }) => {
                return Err(SessionError::NotAuthenticated);
            }
            _ => {}
        }

        self.last_activity = Instant::now();
        self.packets_accepted += 1;

        let applied = match packet {
            Packet::Login { identifier, .. } => {
                if self.state == SessionState::Authenticated {
                    tracing::info!(
                        "[{}] Re-login: {} -> {}",
                        self.remote_addr,
                        self.device_id,
                        identifier
                    );
                }
                self.state = SessionState::Authenticated;
                self.device_id = identifier;
                self.packet_sequence = LOGIN_SEQUENCE;
                Applied {
                    ack: Ack::Login(LOGIN_SEQUENCE),
                    telemetry: None,
                }
            }
            Packet::ShortData(data) => self.accept_data(Telemetry::Short(data)),
            Packet::ExtendedData(data) => self.accept_data(Telemetry::Extended(data)),
            Packet::ArchiveAck { record_id } => Applied {
                ack: Ack::ArchiveReply(record_id),
                telemetry: None,
            },
        };

        Ok(applied)
    }

    fn accept_data(&mut self, data: Telemetry) -> Applied {
        self.packet_sequence += 1;
        let event = TelemetryEvent {
            session_id: self.id.clone(),
            device_id: self.device_id.clone(),
            sequence: self.packet_sequence,
            received_at: Utc::now(),
            data,
        };
        Applied {
            ack: Ack::Data(self.packet_sequence),
            telemetry: Some(event),
        }
    }

    /// Closes the session. Later packets fail with [`SessionError::Closed`].
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    /// Returns the session state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns whether the session is authenticated.
    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }

    /// Returns the device identifier from the last login.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Returns the last acknowledged sequence number.
    pub fn packet_sequence(&self) -> u64 {
        self.packet_sequence
    }

    /// Returns the number of accepted packets.
    pub fn packets_accepted(&self) -> u64 {
        self.packets_accepted
    }

    /// Returns the time since the last accepted packet.
    pub fn idle_duration(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Returns the session age.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    const SD: &str = "#SD#280421;055220;5355.09260;N;02732.40990;E;0;0;300;7";
    const D: &str = "#D#280421;055429;5355.09260;N;02732.40990;E;0;0;300;7;22;5;0;;NA;test1:1:1,var:2:4.5,texttest:3:1";

    fn test_addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 12345)
    }

    fn packet(text: &str) -> Packet {
        text.parse().unwrap()
    }

    fn logged_in(identifier: &str) -> Session {
        let mut session = Session::new(test_addr());
        session.apply(packet(&format!("#L#{}", identifier))).unwrap();
        session
    }

    #[test]
    fn test_session_creation() {
        let session = Session::new(test_addr());
        assert_eq!(session.state(), SessionState::Unauthenticated);
        assert!(!session.is_authenticated());
        assert_eq!(session.device_id(), "");
        assert_eq!(session.packet_sequence(), 0);
        assert_eq!(session.packets_accepted(), 0);
    }

    #[test]
    fn test_fresh_session_rejects_non_login() {
        for text in [SD, D, "#ASD#1"] {
            let mut session = Session::new(test_addr());
            let err = session.apply(packet(text)).unwrap_err();
            assert!(matches!(err, SessionError::NotAuthenticated));
            assert_eq!(session.state(), SessionState::Unauthenticated);
            assert_eq!(session.packets_accepted(), 0);
        }
    }

    #[test]
    fn test_login() {
        let mut session = Session::new(test_addr());
        let applied = session.apply(packet("#L#1")).unwrap();

        assert_eq!(applied.ack, Ack::Login(1));
        assert!(applied.telemetry.is_none());
        assert_eq!(session.state(), SessionState::Authenticated);
        assert_eq!(session.device_id(), "1");
    }

    #[test]
    fn test_short_data_after_login() {
        let mut session = logged_in("1");
        let applied = session.apply(packet(SD)).unwrap();

        assert_eq!(applied.ack, Ack::Data(2));
        let event = applied.telemetry.unwrap();
        assert_eq!(event.device_id, "1");
        assert_eq!(event.session_id, session.id);
        assert_eq!(event.sequence, 2);

        let position = event.data.position();
        assert!((position.latitude.value - 53.550926).abs() < 1e-9);
        assert_eq!(
            position.latitude.hemisphere,
            wialon_protocol::Hemisphere::North
        );
        assert_eq!(position.speed, 0);
    }

    #[test]
    fn test_extended_data_forwards_custom_params() {
        let mut session = logged_in("1");
        let applied = session.apply(packet(D)).unwrap();

        assert!(matches!(applied.ack, Ack::Data(_)));
        let event = applied.telemetry.unwrap();
        let params = event.data.custom_params();
        assert_eq!(params.len(), 3);
        assert_eq!(params[0].name, "test1");
        assert_eq!(params[1].type_code, 2);
        assert_eq!(params[1].value, "4.5");
        assert_eq!(params[2].name, "texttest");
    }

    #[test]
    fn test_data_sequence_strictly_increasing() {
        let mut session = logged_in("1");
        let mut expected = LOGIN_SEQUENCE;
        for text in [SD, D, SD, SD, D] {
            expected += 1;
            let applied = session.apply(packet(text)).unwrap();
            assert_eq!(applied.ack, Ack::Data(expected));
            assert_eq!(applied.telemetry.unwrap().sequence, expected);
        }
        assert_eq!(session.packet_sequence(), 6);
        assert_eq!(session.packets_accepted(), 6);
    }

    #[test]
    fn test_archive_ack_keeps_sequence() {
        let mut session = logged_in("1");
        session.apply(packet(SD)).unwrap();

        let applied = session.apply(packet("#ASD#17")).unwrap();
        assert_eq!(applied.ack, Ack::ArchiveReply(17));
        assert!(applied.telemetry.is_none());
        assert_eq!(session.packet_sequence(), 2);

        let applied = session.apply(packet(SD)).unwrap();
        assert_eq!(applied.ack, Ack::Data(3));
    }

    #[test]
    fn test_relogin_resets_sequence() {
        let mut session = logged_in("1");
        session.apply(packet(SD)).unwrap();
        session.apply(packet(SD)).unwrap();

        let applied = session.apply(packet("#L#2;pass")).unwrap();
        assert_eq!(applied.ack, Ack::Login(1));
        assert_eq!(session.device_id(), "2");
        assert_eq!(session.packet_sequence(), LOGIN_SEQUENCE);

        let applied = session.apply(packet(SD)).unwrap();
        assert_eq!(applied.ack, Ack::Data(2));
        assert_eq!(applied.telemetry.unwrap().device_id, "2");
    }

    #[test]
    fn test_closed_session_rejects_everything() {
        let mut session = logged_in("1");
        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.is_authenticated());

        assert!(matches!(
            session.apply(packet(SD)),
            Err(SessionError::Closed)
        ));
        assert!(matches!(
            session.apply(packet("#L#1")),
            Err(SessionError::Closed)
        ));
    }

    #[test]
    fn test_session_error_kinds() {
        assert_eq!(
            SessionError::NotAuthenticated.kind(),
            ErrorKind::NotAuthenticated
        );
        assert_eq!(SessionError::Closed.kind(), ErrorKind::SessionClosed);
    }
}
