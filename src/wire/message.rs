use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::ProtocolError;

const TAG_CHOKE: u8 = 0;
const TAG_UNCHOKE: u8 = 1;
const TAG_INTERESTED: u8 = 2;
const TAG_NOT_INTERESTED: u8 = 3;
const TAG_HAVE: u8 = 4;
const TAG_BITFIELD: u8 = 5;
const TAG_REQUEST: u8 = 6;
const TAG_PIECE: u8 = 7;

/// One of the eight message-frame kinds exchanged after the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(u32),
    Bitfield(Vec<u8>),
    Request(u32),
    Piece { index: u32, data: Vec<u8> },
}

impl Message {
    fn tag(&self) -> u8 {
        match self {
            Message::Choke => TAG_CHOKE,
            Message::Unchoke => TAG_UNCHOKE,
            Message::Interested => TAG_INTERESTED,
            Message::NotInterested => TAG_NOT_INTERESTED,
            Message::Have(_) => TAG_HAVE,
            Message::Bitfield(_) => TAG_BITFIELD,
            Message::Request(_) => TAG_REQUEST,
            Message::Piece { .. } => TAG_PIECE,
        }
    }

    /// Encodes the length-prefixed frame: 4-byte BE `length` (= 1 + payload length), 1-byte
    /// `type`, then payload. Total on all valid inputs.
    pub fn write_to<W: Write>(&self, mut w: W) -> std::io::Result<()> {
        let tag = self.tag();
        match self {
            Message::Choke | Message::Unchoke | Message::Interested | Message::NotInterested => {
                w.write_u32::<BigEndian>(1)?;
                w.write_u8(tag)?;
            }
            Message::Have(index) | Message::Request(index) => {
                w.write_u32::<BigEndian>(1 + 4)?;
                w.write_u8(tag)?;
                w.write_u32::<BigEndian>(*index)?;
            }
            Message::Bitfield(bytes) => {
                w.write_u32::<BigEndian>(1 + bytes.len() as u32)?;
                w.write_u8(tag)?;
                w.write_all(bytes)?;
            }
            Message::Piece { index, data } => {
                w.write_u32::<BigEndian>(1 + 4 + data.len() as u32)?;
                w.write_u8(tag)?;
                w.write_u32::<BigEndian>(*index)?;
                w.write_all(data)?;
            }
        }
        Ok(())
    }

    /// Decodes one frame. `max_frame_len` bounds `length` (default `piece_size + 16`); a peer
    /// exceeding it is an `OversizeFrame` protocol error. EOF encountered while the length prefix
    /// or body is being read surfaces as `TruncatedFrame`.
    pub fn read_from<R: Read>(mut r: R, max_frame_len: u32) -> Result<Self, ProtocolError> {
        let length = r.read_u32::<BigEndian>().map_err(|_| ProtocolError::TruncatedFrame)?;

        if length == 0 {
            // A zero-length frame has no type byte; treated as a malformed frame rather than a
            // BitTorrent-style keep-alive, since this protocol defines no keep-alive message.
            return Err(ProtocolError::TruncatedFrame);
        }

        if length > max_frame_len {
            return Err(ProtocolError::OversizeFrame {
                len: length,
                cap: max_frame_len,
            });
        }

        let mut body = vec![0u8; length as usize];
        r.read_exact(&mut body).map_err(|_| ProtocolError::TruncatedFrame)?;

        let tag = body[0];
        let payload = &body[1..];

        Ok(match tag {
            TAG_CHOKE => Message::Choke,
            TAG_UNCHOKE => Message::Unchoke,
            TAG_INTERESTED => Message::Interested,
            TAG_NOT_INTERESTED => Message::NotInterested,
            TAG_HAVE => Message::Have(read_be_u32(payload)?),
            TAG_BITFIELD => Message::Bitfield(payload.to_vec()),
            TAG_REQUEST => Message::Request(read_be_u32(payload)?),
            TAG_PIECE => {
                if payload.len() < 4 {
                    return Err(ProtocolError::TruncatedFrame);
                }
                let index = read_be_u32(&payload[..4])?;
                Message::Piece {
                    index,
                    data: payload[4..].to_vec(),
                }
            }
            other => return Err(ProtocolError::UnknownType(other)),
        })
    }
}

fn read_be_u32(bytes: &[u8]) -> Result<u32, ProtocolError> {
    let arr: [u8; 4] = bytes.try_into().map_err(|_| ProtocolError::TruncatedFrame)?;
    Ok(u32::from_be_bytes(arr))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAP: u32 = 1 << 20;

    fn round_trip(msg: Message) {
        let mut buf = Vec::new();
        msg.write_to(&mut buf).unwrap();
        let decoded = Message::read_from(&buf[..], CAP).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn round_trips_every_message_kind() {
        round_trip(Message::Choke);
        round_trip(Message::Unchoke);
        round_trip(Message::Interested);
        round_trip(Message::NotInterested);
        round_trip(Message::Have(7));
        round_trip(Message::Bitfield(vec![0b1010_0000, 0xFF]));
        round_trip(Message::Request(3));
        round_trip(Message::Piece {
            index: 2,
            data: vec![1, 2, 3, 4, 5],
        });
    }

    #[test]
    fn unknown_type_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u32.to_be_bytes());
        buf.push(200);

        let err = Message::read_from(&buf[..], CAP).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownType(200)));
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&5u32.to_be_bytes());
        buf.push(TAG_HAVE);
        // missing the 4-byte piece index entirely

        let err = Message::read_from(&buf[..], CAP).unwrap_err();
        assert!(matches!(err, ProtocolError::TruncatedFrame));
    }

    #[test]
    fn oversize_frame_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&100u32.to_be_bytes());
        buf.push(TAG_BITFIELD);
        buf.extend(std::iter::repeat(0u8).take(99));

        let err = Message::read_from(&buf[..], 50).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::OversizeFrame { len: 100, cap: 50 }
        ));
    }
}
