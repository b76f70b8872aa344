use bitvec::prelude::*;
use crate::Bitfield;
use super::{PeerError, Result};

// The pieces the remote peer has told us it holds.
#[derive(Debug, Clone)]
pub struct Availability {
    bitfield: Bitfield,
}

impl Availability {

    pub fn new(num_pieces: u32) -> Self {
        Self { bitfield: Bitfield::repeat(false, num_pieces as usize) }
    }

    pub fn reset(&mut self) {
        self.bitfield.fill(false);
    }

    // Marks every piece set in a raw bitfield message, most significant bit first.
    // Set bits past the last piece are padding and are dropped.
    pub fn apply_bitfield(&mut self, raw: &[u8]) {
        let bits = raw.view_bits::<Msb0>();
        let num_pieces = self.bitfield.len();
        let mut dropped = 0;
        for idx in bits.iter_ones() {
            if idx < num_pieces {
                self.bitfield.set(idx, true);
            } else {
                dropped += 1;
            }
        }
        if dropped > 0 {
            tracing::debug!("ignored {} set bits beyond piece {}", dropped, num_pieces);
        }
    }

    // Returns true if the piece was not already marked.
    pub fn mark_have(&mut self, idx: u32) -> Result<bool> {
        if idx as usize >= self.bitfield.len() {
            return Err(PeerError::InvalidPieceIndex(idx));
        }
        Ok(!self.bitfield.replace(idx as usize, true))
    }

    pub fn has(&self, idx: u32) -> bool {
        self.bitfield.get(idx as usize).map_or(false, |bit| *bit)
    }

    // Number of pieces the peer has.
    pub fn count(&self) -> usize {
        self.bitfield.count_ones()
    }

    pub fn num_pieces(&self) -> u32 {
        self.bitfield.len() as u32
    }

    pub fn pieces(&self) -> impl Iterator<Item = u32> + '_ {
        self.bitfield.iter_ones().map(|idx| idx as u32)
    }
}
