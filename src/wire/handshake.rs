use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::ProtocolError;

/// The 32-byte handshake frame: an 18-byte ASCII literal, 10 reserved bytes, and a 32-bit
/// big-endian peer id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub peer_id: u32,
}

impl Handshake {
    const PROTOCOL_LITERAL: &'static [u8; 18] = b"P2PFILESHARINGPROJ";
    const RESERVED_LEN: usize = 10;
    pub const WIRE_LEN: usize = Self::PROTOCOL_LITERAL.len() + Self::RESERVED_LEN + 4;

    pub fn new(peer_id: u32) -> Self {
        Self { peer_id }
    }

    /// Writes the handshake frame. The reserved bytes are always sent as zero.
    pub fn write_to<W: Write>(&self, mut w: W) -> std::io::Result<()> {
        w.write_all(Self::PROTOCOL_LITERAL)?;
        w.write_all(&[0u8; Self::RESERVED_LEN])?;
        w.write_u32::<BigEndian>(self.peer_id)?;
        Ok(())
    }

    /// Reads and validates a handshake frame. Reserved bytes are read but never checked.
    pub fn read_from<R: Read>(mut r: R) -> Result<Self, ProtocolError> {
        let mut literal = [0u8; 18];
        r.read_exact(&mut literal).map_err(|_| ProtocolError::BadHandshake)?;
        if &literal != Self::PROTOCOL_LITERAL {
            return Err(ProtocolError::BadHandshake);
        }

        let mut reserved = [0u8; Self::RESERVED_LEN];
        r.read_exact(&mut reserved).map_err(|_| ProtocolError::BadHandshake)?;

        let peer_id = r.read_u32::<BigEndian>().map_err(|_| ProtocolError::BadHandshake)?;
        Ok(Self { peer_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(1001)]
    #[case(u32::MAX)]
    fn round_trips_any_peer_id(#[case] peer_id: u32) {
        let hs = Handshake::new(peer_id);
        let mut buf = Vec::new();
        hs.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), Handshake::WIRE_LEN);

        let decoded = Handshake::read_from(&buf[..]).unwrap();
        assert_eq!(decoded.peer_id, peer_id);
    }

    #[test]
    fn rejects_mutated_protocol_literal() {
        let hs = Handshake::new(42);
        let mut buf = Vec::new();
        hs.write_to(&mut buf).unwrap();
        buf[0] = b'Q';

        let err = Handshake::read_from(&buf[..]).unwrap_err();
        assert!(matches!(err, ProtocolError::BadHandshake));
    }

    #[test]
    fn accepts_mutated_reserved_bytes() {
        let hs = Handshake::new(42);
        let mut buf = Vec::new();
        hs.write_to(&mut buf).unwrap();
        for b in &mut buf[18..28] {
            *b = 0xAA;
        }

        let decoded = Handshake::read_from(&buf[..]).unwrap();
        assert_eq!(decoded.peer_id, 42);
    }

    #[test]
    fn rejects_truncated_stream() {
        let hs = Handshake::new(7);
        let mut buf = Vec::new();
        hs.write_to(&mut buf).unwrap();
        buf.truncate(10);

        let err = Handshake::read_from(&buf[..]).unwrap_err();
        assert!(matches!(err, ProtocolError::BadHandshake));
    }
}
