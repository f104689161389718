//! Raw frames of the Wialon IPS text protocol.
//!
//! Frame layout on the wire:
//!
//! ```text
//! +---+------+---+------------------------------+------------+
//! | # | TYPE | # | field;field;...;field        | \r\n or \r |
//! +---+------+---+------------------------------+------------+
//! ```
//!
//! A [`RawFrame`] holds everything before the terminator.

use bytes::Bytes;
use std::fmt;

/// Packet start and type delimiter.
pub const TYPE_DELIMITER: char = '#';

/// Field separator within a packet body.
pub const FIELD_SEPARATOR: char = ';';

/// Canonical frame terminator written by this implementation.
pub const TERMINATOR: &str = "\r\n";

/// Returns true for bytes that end a frame.
pub fn is_terminator(byte: u8) -> bool {
    byte == b'\r' || byte == b'\n'
}

/// A single frame with its terminator stripped.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RawFrame {
    bytes: Bytes,
}

impl RawFrame {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Consumes the frame, returning the underlying bytes.
    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

impl fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawFrame({:?})", String::from_utf8_lossy(&self.bytes))
    }
}

impl From<&'static [u8]> for RawFrame {
    fn from(bytes: &'static [u8]) -> Self {
        Self::new(Bytes::from_static(bytes))
    }
}

impl From<&'static str> for RawFrame {
    fn from(s: &'static str) -> Self {
        Self::new(Bytes::from_static(s.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminators() {
        assert!(is_terminator(b'\r'));
        assert!(is_terminator(b'\n'));
        assert!(!is_terminator(b'#'));
        assert!(!is_terminator(b';'));
    }

    #[test]
    fn test_raw_frame_accessors() {
        let frame = RawFrame::from("#ASD#1");
        assert_eq!(frame.as_bytes(), b"#ASD#1");
        assert_eq!(frame.len(), 6);
        assert!(!frame.is_empty());
        assert_eq!(frame.into_bytes(), Bytes::from_static(b"#ASD#1"));
    }

    #[test]
    fn test_raw_frame_debug_is_readable() {
        let frame = RawFrame::from("#L#1");
        assert_eq!(format!("{:?}", frame), "RawFrame(\"#L#1\")");
    }
}
