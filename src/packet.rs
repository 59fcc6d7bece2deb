//! Single-packet wire codec.
//!
//! A packet is the smallest protocol unit: one ASCII type byte in
//! `'0'..='6'` followed immediately by the packet data, with no
//! separator. The codec never interprets the data; string or JSON
//! meaning is left to callers.

use core::fmt;

use crate::error::CodecError;

/// The literal probe payload exchanged during a transport upgrade.
pub const PROBE: &[u8] = b"probe";

/// The type of a [`Packet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// Handshake packet; data is the JSON session description.
    Open,
    /// Client- or server-initiated session close.
    Close,
    /// Liveness or upgrade probe; answered with a [`PacketType::Pong`].
    Ping,
    /// Answer to a [`PacketType::Ping`], echoing its data.
    Pong,
    /// Opaque application payload.
    Message,
    /// Client commits to the upgraded transport.
    Upgrade,
    /// Filler used to complete an outstanding long-poll cycle.
    Noop,
}

impl PacketType {
    /// The wire byte for this type.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Open => b'0',
            Self::Close => b'1',
            Self::Ping => b'2',
            Self::Pong => b'3',
            Self::Message => b'4',
            Self::Upgrade => b'5',
            Self::Noop => b'6',
        }
    }

    /// Parse a wire byte, `None` outside the type alphabet.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'0' => Some(Self::Open),
            b'1' => Some(Self::Close),
            b'2' => Some(Self::Ping),
            b'3' => Some(Self::Pong),
            b'4' => Some(Self::Message),
            b'5' => Some(Self::Upgrade),
            b'6' => Some(Self::Noop),
            _ => None,
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Message => "message",
            Self::Upgrade => "upgrade",
            Self::Noop => "noop",
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single framed unit: type plus data. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    packet_type: PacketType,
    data: Vec<u8>,
}

impl Packet {
    /// Create a packet of the given type and data.
    #[must_use]
    pub fn new(packet_type: PacketType, data: Vec<u8>) -> Self {
        Self { packet_type, data }
    }

    /// An OPEN packet carrying the handshake JSON.
    #[must_use]
    pub fn open(data: Vec<u8>) -> Self {
        Self::new(PacketType::Open, data)
    }

    /// A MESSAGE packet carrying opaque application data.
    #[must_use]
    pub fn message(data: Vec<u8>) -> Self {
        Self::new(PacketType::Message, data)
    }

    /// A PONG packet echoing the data of the PING it answers.
    #[must_use]
    pub fn pong(data: Vec<u8>) -> Self {
        Self::new(PacketType::Pong, data)
    }

    /// An empty NOOP packet.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(PacketType::Noop, Vec::new())
    }

    /// The packet type.
    #[must_use]
    pub const fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    /// The packet data.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consume the packet, yielding its data.
    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Length of the encoded form: the type byte plus the data.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        1 + self.data.len()
    }

    /// Encode into a fresh buffer.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf
    }

    /// Append the encoded form to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(self.packet_type.as_byte());
        buf.extend_from_slice(&self.data);
    }

    /// Encode as the text of a single WebSocket frame.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::NotText`] if the packet data is not valid
    /// UTF-8; a text frame cannot carry it losslessly.
    pub fn to_text(&self) -> Result<String, CodecError> {
        String::from_utf8(self.encode()).map_err(|_| CodecError::NotText)
    }

    /// Decode one packet from `bytes`, consuming the whole slice.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::BadPacket`] if the input is empty or the
    /// first byte is outside the type alphabet.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let (&first, data) = bytes.split_first().ok_or(CodecError::BadPacket)?;
        let packet_type = PacketType::from_byte(first).ok_or(CodecError::BadPacket)?;
        Ok(Self::new(packet_type, data.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_every_type() {
        for byte in b'0'..=b'6' {
            let packet_type = PacketType::from_byte(byte).expect("valid type byte");
            let packet = Packet::new(packet_type, b"data".to_vec());
            let decoded = Packet::decode(&packet.encode()).expect("decode");
            assert_eq!(decoded, packet);
        }
    }

    #[test]
    fn roundtrips_empty_data() {
        let packet = Packet::noop();
        assert_eq!(packet.encode(), b"6");
        let decoded = Packet::decode(b"6").expect("decode");
        assert_eq!(decoded.packet_type(), PacketType::Noop);
        assert!(decoded.data().is_empty());
    }

    #[test]
    fn rejects_unknown_type_byte() {
        assert_eq!(Packet::decode(b"7abc"), Err(CodecError::BadPacket));
        assert_eq!(Packet::decode(b"x"), Err(CodecError::BadPacket));
    }

    #[test]
    fn rejects_empty_input() {
        assert_eq!(Packet::decode(b""), Err(CodecError::BadPacket));
    }

    #[test]
    fn message_encodes_type_then_data() {
        assert_eq!(Packet::message(b"hello".to_vec()).encode(), b"4hello");
    }

    #[test]
    fn to_text_matches_encode_for_utf8() {
        let packet = Packet::pong(PROBE.to_vec());
        assert_eq!(packet.to_text().expect("text"), "3probe");
    }

    #[test]
    fn to_text_rejects_non_utf8_data() {
        let packet = Packet::message(vec![0xff, 0xfe]);
        assert_eq!(packet.to_text(), Err(CodecError::NotText));
    }
}
