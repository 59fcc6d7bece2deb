//! Payload wire codec for the polling transport.
//!
//! A payload is an ordered sequence of packets carried in one polling
//! request or response body. Each packet is framed as
//!
//! ```text
//! <decimal length of encoded packet> ':' <encoded packet bytes>
//! ```
//!
//! Lengths are measured in *bytes* of the encoded packet. The reference
//! JavaScript client counts UTF-16 code units instead, so the two
//! disagree on payloads whose data contains multi-byte characters; this
//! implementation deliberately stays byte-oriented.

use crate::{error::CodecError, packet::Packet};

/// An ordered sequence of [`Packet`]s, preserved by the codec.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Payload(Vec<Packet>);

impl Payload {
    /// An empty payload.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// The packets in order.
    #[must_use]
    pub fn packets(&self) -> &[Packet] {
        &self.0
    }

    /// Number of packets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the payload holds no packets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a packet.
    pub fn push(&mut self, packet: Packet) {
        self.0.push(packet);
    }

    /// Encode all packets as a length-prefixed concatenation.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for packet in &self.0 {
            buf.extend_from_slice(packet.encoded_len().to_string().as_bytes());
            buf.push(b':');
            packet.encode_into(&mut buf);
        }
        buf
    }

    /// Decode a payload, scanning length prefixes until the input is
    /// exhausted. Empty input yields an empty payload.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::BadLength`] if a length prefix is missing
    /// or not a decimal integer, [`CodecError::Truncated`] if fewer
    /// bytes follow a prefix than it declares, and
    /// [`CodecError::BadPacket`] if a framed packet fails to decode.
    pub fn decode(mut bytes: &[u8]) -> Result<Self, CodecError> {
        let mut packets = Vec::new();
        while !bytes.is_empty() {
            let colon = bytes
                .iter()
                .position(|&b| b == b':')
                .ok_or(CodecError::BadLength)?;
            let prefix =
                core::str::from_utf8(&bytes[..colon]).map_err(|_| CodecError::BadLength)?;
            if prefix.is_empty() {
                return Err(CodecError::BadLength);
            }
            let length: usize = prefix.parse().map_err(|_| CodecError::BadLength)?;

            let body_start = colon + 1;
            let body_end = body_start
                .checked_add(length)
                .ok_or(CodecError::Truncated)?;
            let body = bytes
                .get(body_start..body_end)
                .ok_or(CodecError::Truncated)?;
            packets.push(Packet::decode(body)?);
            bytes = &bytes[body_end..];
        }
        Ok(Self(packets))
    }
}

impl From<Packet> for Payload {
    fn from(packet: Packet) -> Self {
        Self(vec![packet])
    }
}

impl FromIterator<Packet> for Payload {
    fn from_iter<I: IntoIterator<Item = Packet>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Payload {
    type Item = Packet;
    type IntoIter = std::vec::IntoIter<Packet>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
