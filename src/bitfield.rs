use bitvec::{order::Msb0, prelude as bv};

/// Packed MSB-first bit array over a fixed piece count.
///
/// Bit `i` lives in byte `i >> 3` at position `7 - (i & 7)`. Bits beyond `num_pieces` are always
/// zero; `Bitfield` never hands out a view that lets a caller set one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    bits: bv::BitVec<u8, Msb0>,
    num_pieces: usize,
}

impl Bitfield {
    pub fn new(num_pieces: usize) -> Self {
        Self {
            bits: bv::BitVec::repeat(false, num_pieces),
            num_pieces,
        }
    }

    pub fn all_ones(num_pieces: usize) -> Self {
        Self {
            bits: bv::BitVec::repeat(true, num_pieces),
            num_pieces,
        }
    }

    /// Builds a bitfield from raw wire bytes, ignoring any trailing bits beyond `num_pieces`.
    pub fn from_bytes(bytes: &[u8], num_pieces: usize) -> Self {
        let mut raw = bv::BitVec::<u8, Msb0>::from_vec(bytes.to_vec());
        raw.truncate(num_pieces.min(raw.len()));
        raw.resize(num_pieces, false);
        Self {
            bits: raw,
            num_pieces,
        }
    }

    pub fn num_pieces(&self) -> usize {
        self.num_pieces
    }

    pub fn get(&self, index: usize) -> bool {
        self.bits.get(index).map(|b| *b).unwrap_or(false)
    }

    pub fn set(&mut self, index: usize, value: bool) {
        if index < self.num_pieces {
            self.bits.set(index, value);
        }
    }

    pub fn is_complete(&self) -> bool {
        self.bits.count_ones() == self.num_pieces
    }

    /// Lowest-indexed bit set in `other` that is clear in `self`. `None` if there is no such bit.
    pub fn next_needed_from(&self, other: &Bitfield) -> Option<usize> {
        (0..self.num_pieces).find(|&i| other.get(i) && !self.get(i))
    }

    /// Packed byte representation, suitable for a `bitfield` wire frame. Trailing bits beyond
    /// `num_pieces` within the last byte are always clear.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.bits.clone().into_vec()
    }
}
