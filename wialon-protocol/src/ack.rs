//! Server-to-device acknowledgment frames.

use crate::frame::{TERMINATOR, TYPE_DELIMITER};
use std::fmt;

/// An acknowledgment for one accepted packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ack {
    /// `#AL#<sequence>`: login accepted.
    Login(u64),
    /// `#AA#<sequence>`: short or extended data accepted.
    Data(u64),
    /// `#AAS#<record_id>`: archive resend confirmation.
    ArchiveReply(u64),
}

impl Ack {
    /// Returns the reply tag for this acknowledgment.
    pub fn tag(&self) -> &'static str {
        match self {
            Ack::Login(_) => "AL",
            Ack::Data(_) => "AA",
            Ack::ArchiveReply(_) => "AAS",
        }
    }

    /// Returns the number carried by this acknowledgment.
    pub fn value(&self) -> u64 {
        match self {
            Ack::Login(n) | Ack::Data(n) | Ack::ArchiveReply(n) => *n,
        }
    }

    /// Returns a short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Ack::Login(_) => "login",
            Ack::Data(_) => "data",
            Ack::ArchiveReply(_) => "archive",
        }
    }
}

/// Renders the full wire form, terminator included.
impl fmt::Display for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{d}{}{d}{}{}",
            self.tag(),
            self.value(),
            TERMINATOR,
            d = TYPE_DELIMITER
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_wire_forms() {
        assert_eq!(Ack::Login(1).to_string(), "#AL#1\r\n");
        assert_eq!(Ack::Data(2).to_string(), "#AA#2\r\n");
        assert_eq!(Ack::ArchiveReply(1).to_string(), "#AAS#1\r\n");
    }

    #[test]
    fn test_ack_plain_decimal() {
        assert_eq!(Ack::Data(0).to_string(), "#AA#0\r\n");
        assert_eq!(Ack::Data(10).to_string(), "#AA#10\r\n");
        assert_eq!(
            Ack::ArchiveReply(u64::MAX).to_string(),
            format!("#AAS#{}\r\n", u64::MAX)
        );
    }

    #[test]
    fn test_ack_accessors() {
        let ack = Ack::ArchiveReply(42);
        assert_eq!(ack.tag(), "AAS");
        assert_eq!(ack.value(), 42);
        assert_eq!(ack.kind(), "archive");
        assert_eq!(Ack::Login(1).kind(), "login");
        assert_eq!(Ack::Data(7).kind(), "data");
    }
}
