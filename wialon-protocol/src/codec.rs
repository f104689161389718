//! Encoder and decoder for Wialon IPS frames.

use crate::ack::Ack;
use crate::error::ProtocolError;
use crate::frame::{is_terminator, RawFrame};
use crate::packet::Packet;
use bytes::{Buf, BufMut, BytesMut};

/// Encodes acknowledgments into wire bytes.
pub struct Encoder;

impl Encoder {
    /// Encodes an acknowledgment, terminator included.
    pub fn encode_ack(ack: &Ack) -> BytesMut {
        let rendered = ack.to_string();
        let mut buf = BytesMut::with_capacity(rendered.len());
        buf.put_slice(rendered.as_bytes());
        buf
    }
}

/// Splits a byte stream into frames.
///
/// Bytes are accumulated across calls; a frame ends at the first `\r` or `\n`.
/// The `\n` of a CRLF pair therefore ends an empty frame, and empty frames are
/// never surfaced, so CRLF, bare CR and bare LF senders all decode the same
/// way regardless of where the reads split the stream.
pub struct Decoder {
    buffer: BytesMut,
    /// Bytes at the front of `buffer` already known to hold no terminator.
    scanned: usize,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            scanned: 0,
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Returns the next complete, non-empty frame, if one is buffered.
    pub fn next_frame(&mut self) -> Option<RawFrame> {
        loop {
            let offset = self.buffer[self.scanned..]
                .iter()
                .position(|&b| is_terminator(b));

            let pos = match offset {
                Some(offset) => self.scanned + offset,
                None => {
                    self.scanned = self.buffer.len();
                    return None;
                }
            };

            let frame = self.buffer.split_to(pos).freeze();
            self.buffer.advance(1);
            self.scanned = 0;

            if !frame.is_empty() {
                return Some(RawFrame::new(frame));
            }
        }
    }

    /// Appends data and drains every frame it completes.
    pub fn feed(&mut self, data: &[u8]) -> Vec<RawFrame> {
        self.extend(data);
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame() {
            frames.push(frame);
        }
        frames
    }

    /// Attempts to decode the next packet from the buffer.
    pub fn decode_packet(&mut self) -> Result<Option<Packet>, ProtocolError> {
        match self.next_frame() {
            Some(frame) => Packet::parse(&frame).map(Some),
            None => Ok(None),
        }
    }

    /// Returns the number of bytes currently buffered (the unterminated tail).
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn frames_of(decoder: &mut Decoder, data: &[u8]) -> Vec<Vec<u8>> {
        decoder
            .feed(data)
            .into_iter()
            .map(|f| f.as_bytes().to_vec())
            .collect()
    }

    #[test]
    fn test_crlf_frames() {
        let mut decoder = Decoder::new();
        let frames = frames_of(&mut decoder, b"#L#1\r\n#ASD#1\r\n");
        assert_eq!(frames, vec![b"#L#1".to_vec(), b"#ASD#1".to_vec()]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_bare_cr_terminator() {
        let mut decoder = Decoder::new();
        let frames = frames_of(&mut decoder, b"#ASD#1\r");
        assert_eq!(frames, vec![b"#ASD#1".to_vec()]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_lf_after_cr_in_next_chunk() {
        let mut decoder = Decoder::new();
        assert_eq!(frames_of(&mut decoder, b"#L#1\r"), vec![b"#L#1".to_vec()]);
        // The trailing LF arrives with the next packet and must not leak into it.
        let frames = frames_of(&mut decoder, b"\n#ASD#7\r\n");
        assert_eq!(frames, vec![b"#ASD#7".to_vec()]);
    }

    #[test]
    fn test_bare_lf_terminator() {
        let mut decoder = Decoder::new();
        let frames = frames_of(&mut decoder, b"#ASD#1\n");
        assert_eq!(frames, vec![b"#ASD#1".to_vec()]);
    }

    #[test]
    fn test_empty_frames_discarded() {
        let mut decoder = Decoder::new();
        let frames = frames_of(&mut decoder, b"\r\n\r\n\r#L#1\r\n\n\n");
        assert_eq!(frames, vec![b"#L#1".to_vec()]);
    }

    #[test]
    fn test_partial_frame_decoding() {
        let mut decoder = Decoder::new();
        let data = b"#SD#280421;055220;5355.09260;N;02732.40990;E;0;0;300;7\r\n";

        assert!(decoder.feed(&data[..10]).is_empty());
        assert_eq!(decoder.buffered(), 10);
        assert!(decoder.feed(&data[10..30]).is_empty());

        let frames = decoder.feed(&data[30..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_bytes(), &data[..data.len() - 2]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decode_packet() {
        let mut decoder = Decoder::new();
        decoder.extend(b"#L#1\r\n#ASD#3\r");

        assert!(matches!(
            decoder.decode_packet().unwrap(),
            Some(Packet::Login { .. })
        ));
        assert_eq!(
            decoder.decode_packet().unwrap(),
            Some(Packet::ArchiveAck { record_id: 3 })
        );
        assert!(decoder.decode_packet().unwrap().is_none());
    }

    #[test]
    fn test_decode_packet_error() {
        let mut decoder = Decoder::new();
        decoder.extend(b"#XYZ#1\r\n");
        assert!(matches!(
            decoder.decode_packet(),
            Err(ProtocolError::UnknownPacketType(_))
        ));
    }

    #[test]
    fn test_decoder_clear() {
        let mut decoder = Decoder::new();
        decoder.extend(b"#L#partial");
        assert_eq!(decoder.buffered(), 10);
        assert!(decoder.next_frame().is_none());

        decoder.clear();
        assert_eq!(decoder.buffered(), 0);
        assert_eq!(frames_of(&mut decoder, b"#L#2\r\n"), vec![b"#L#2".to_vec()]);
    }

    #[test]
    fn test_decoder_default() {
        let decoder = Decoder::default();
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_encode_ack() {
        assert_eq!(&Encoder::encode_ack(&Ack::Login(1))[..], b"#AL#1\r\n");
        assert_eq!(&Encoder::encode_ack(&Ack::Data(2))[..], b"#AA#2\r\n");
        assert_eq!(
            &Encoder::encode_ack(&Ack::ArchiveReply(1))[..],
            b"#AAS#1\r\n"
        );
    }

    fn stream_strategy() -> impl Strategy<Value = Vec<u8>> {
        let frame = "[#A-Z0-9;:,.]{0,40}";
        let terminator = prop_oneof![Just("\r\n"), Just("\r"), Just("\n")];
        prop::collection::vec((frame, terminator), 0..12).prop_map(|parts| {
            parts
                .into_iter()
                .flat_map(|(frame, term)| {
                    let mut bytes = frame.into_bytes();
                    bytes.extend_from_slice(term.as_bytes());
                    bytes
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn prop_chunk_boundaries_do_not_change_frames(
            stream in stream_strategy(),
            cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..8),
        ) {
            let whole = frames_of(&mut Decoder::new(), &stream);

            let mut points: Vec<usize> = cuts.iter().map(|i| i.index(stream.len() + 1)).collect();
            points.sort_unstable();

            let mut decoder = Decoder::new();
            let mut chunked = Vec::new();
            let mut start = 0;
            for point in points.into_iter().chain(std::iter::once(stream.len())) {
                chunked.extend(frames_of(&mut decoder, &stream[start..point]));
                start = point;
            }

            prop_assert_eq!(chunked, whole);
        }

        #[test]
        fn prop_byte_at_a_time_matches_whole(stream in stream_strategy()) {
            let whole = frames_of(&mut Decoder::new(), &stream);

            let mut decoder = Decoder::new();
            let mut single = Vec::new();
            for byte in &stream {
                single.extend(frames_of(&mut decoder, std::slice::from_ref(byte)));
            }

            prop_assert_eq!(single, whole);
        }
    }
}
