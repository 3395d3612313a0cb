//! The byte array shared by every identifier that needs a memory-backed
//! bitmap.
//!
//! Each identifier owns one bit lane over a run of bytes. Where the bytes go
//! is up to a [`PackingStrategy`]; the [`ByteArrayBuilder`] applies the
//! placement and rejects any that would alter a bitmap placed before it.

use std::collections::BTreeSet;

use ustr::Ustr;

use crate::error::InvariantError;

/// Where an identifier's bitmap lives: position `k` is bit `bit` of byte
/// `byte_offset + k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub byte_offset: u64,
    pub bit: u8,
}

impl Placement {
    pub fn mask(&self) -> u8 {
        1 << self.bit
    }
}

pub trait PackingStrategy {
    /// Picks a placement for a bitmap of `bit_size` positions with `bits`
    /// set, given the array built so far. The array grows as needed.
    fn place(&mut self, bits: &BTreeSet<u64>, bit_size: u64, bytes: &[u8]) -> Placement;
}

/// Eight lanes, each with its own fill pointer. A bitmap goes at the end of
/// the least filled lane, so lanes never share bytes with each other.
#[derive(Debug, Default)]
pub struct LanePacking {
    fill: [u64; 8],
}

impl PackingStrategy for LanePacking {
    fn place(&mut self, _bits: &BTreeSet<u64>, bit_size: u64, _bytes: &[u8]) -> Placement {
        let mut bit = 0;
        for (lane, &fill) in self.fill.iter().enumerate() {
            if fill < self.fill[bit] {
                bit = lane;
            }
        }

        let byte_offset = self.fill[bit];
        self.fill[bit] += bit_size;
        Placement {
            byte_offset,
            bit: bit as u8,
        }
    }
}

/// Scans from the start of the array for the first byte run and lane where
/// the bitmap agrees with every bit already claimed by someone else.
#[derive(Debug, Default)]
pub struct FirstFitPacking {
    /// Lanes claimed by earlier bitmaps, one mask per byte.
    claimed: Vec<u8>,
}

impl FirstFitPacking {
    /// `members[k]` is bit `k` of the bitmap, for the positions that can
    /// overlap a claimed byte.
    fn fits(&self, lane: u8, start: usize, members: &[bool], first: Option<usize>, bytes: &[u8]) -> bool {
        let mask: u8 = 1 << lane;
        let agrees = |k: usize, member: bool| {
            let Some(byte) = start.checked_add(k) else {
                return true;
            };
            !lane_bit(&self.claimed, byte, mask) || lane_bit(bytes, byte, mask) == member
        };
        if first.is_some_and(|k| !agrees(k, true)) {
            return false;
        }
        let overlap = self.claimed.len().saturating_sub(start).min(members.len());
        members[..overlap]
            .iter()
            .enumerate()
            .all(|(k, &member)| agrees(k, member))
    }
}

impl PackingStrategy for FirstFitPacking {
    fn place(&mut self, bits: &BTreeSet<u64>, bit_size: u64, bytes: &[u8]) -> Placement {
        let window = bit_size.min(self.claimed.len() as u64) as usize;
        let mut members = vec![false; window];
        for &k in bits.range(..window as u64) {
            members[k as usize] = true;
        }
        let first = bits.first().and_then(|&k| usize::try_from(k).ok());

        // Past the last claimed byte every lane is free.
        let placement = (0..self.claimed.len())
            .flat_map(|start| (0..8).map(move |lane| (start, lane)))
            .find(|&(start, lane)| self.fits(lane, start, &members, first, bytes))
            .map_or(
                Placement {
                    byte_offset: self.claimed.len() as u64,
                    bit: 0,
                },
                |(start, bit)| Placement {
                    byte_offset: start as u64,
                    bit,
                },
            );

        let start = placement.byte_offset as usize;
        if let Some(end) = usize::try_from(bit_size)
            .ok()
            .and_then(|size| start.checked_add(size))
        {
            if self.claimed.len() < end {
                self.claimed.resize(end, 0);
            }
            for lanes in &mut self.claimed[start..end] {
                *lanes |= placement.mask();
            }
        }
        placement
    }
}

fn lane_bit(bytes: &[u8], byte: usize, mask: u8) -> bool {
    bytes.get(byte).is_some_and(|&value| value & mask != 0)
}

pub struct ByteArrayBuilder {
    bytes: Vec<u8>,
    /// Lanes claimed by some bitmap, one mask per byte of `bytes`.
    claimed: Vec<u8>,
    placements: Vec<(Ustr, Placement)>,
    strategy: Box<dyn PackingStrategy>,
}

impl ByteArrayBuilder {
    pub fn new(strategy: Box<dyn PackingStrategy>) -> Self {
        Self {
            bytes: Vec::new(),
            claimed: Vec::new(),
            placements: Vec::new(),
            strategy,
        }
    }

    pub fn allocate(
        &mut self,
        type_id: Ustr,
        bits: &BTreeSet<u64>,
        bit_size: u64,
    ) -> Result<Placement, InvariantError> {
        let placement = self.strategy.place(bits, bit_size, &self.bytes);
        let overlap = || InvariantError::OverlappingByteArray {
            type_id,
            byte_offset: placement.byte_offset,
            bit: placement.bit,
        };
        if placement.bit >= 8 {
            return Err(overlap());
        }
        let start = usize::try_from(placement.byte_offset).map_err(|_| overlap())?;
        let end = usize::try_from(bit_size)
            .ok()
            .and_then(|size| start.checked_add(size))
            .ok_or_else(overlap)?;

        let mask = placement.mask();
        let mut members = bits.iter().peekable();
        for (k, byte) in (start..end).enumerate() {
            let member = members.next_if(|&&bit| bit == k as u64).is_some();
            let current = lane_bit(&self.bytes, byte, mask);
            let claimed = lane_bit(&self.claimed, byte, mask);
            if current != member && (current || claimed) {
                return Err(overlap());
            }
        }

        if self.bytes.len() < end {
            self.bytes.resize(end, 0);
            self.claimed.resize(end, 0);
        }
        for lanes in &mut self.claimed[start..end] {
            *lanes |= mask;
        }
        for &k in bits {
            self.bytes[start + k as usize] |= mask;
        }
        tracing::trace!(%type_id, byte_offset = placement.byte_offset, bit = placement.bit, "placed byte array");

        self.placements.push((type_id, placement));
        Ok(placement)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Identifiers placed so far, with their placements.
    pub fn placements(&self) -> impl Iterator<Item = (Ustr, Placement)> + '_ {
        self.placements.iter().copied()
    }
}
