//! Choosing the representation of one type identifier's member set.

use std::collections::BTreeSet;
use std::fmt;

use context::TargetSpec;
use serde::{Deserialize, Serialize};

use crate::byte_array::Placement;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolutionKind {
    /// No member: every test fails.
    #[default]
    #[serde(alias = "Unsat")]
    AllZeros,
    /// Every position in range is a member: the range check is the test.
    AllOnes,
    /// One member: the test is an address comparison.
    Single,
    Inline,
    ByteArray,
}

impl fmt::Display for ResolutionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResolutionKind::AllZeros => "AllZeros",
            ResolutionKind::AllOnes => "AllOnes",
            ResolutionKind::Single => "Single",
            ResolutionKind::Inline => "Inline",
            ResolutionKind::ByteArray => "ByteArray",
        })
    }
}

/// Member offsets of one type identifier, normalized by their common
/// power-of-two stride.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitSetInfo {
    /// Smallest member offset inside the merged allocation.
    pub byte_offset: u64,
    pub align_log2: u32,
    pub size_m1: u64,
    /// Member positions, `(offset - byte_offset) >> align_log2`.
    pub bits: BTreeSet<u64>,
}

impl BitSetInfo {
    pub fn new(offsets: impl IntoIterator<Item = u64>) -> Self {
        let offsets: BTreeSet<u64> = offsets.into_iter().collect();
        let (Some(&min), Some(&max)) = (offsets.first(), offsets.last()) else {
            return Self::default();
        };

        let stride = offsets
            .iter()
            .fold(0, |acc, &offset| context::gcd(acc, offset - min));
        let align_log2 = if stride == 0 {
            0
        } else {
            stride.trailing_zeros()
        };

        Self {
            byte_offset: min,
            align_log2,
            size_m1: (max - min) >> align_log2,
            bits: offsets
                .iter()
                .map(|&offset| (offset - min) >> align_log2)
                .collect(),
        }
    }

    pub fn bit_size(&self) -> u64 {
        if self.bits.is_empty() {
            0
        } else {
            self.size_m1 + 1
        }
    }

    pub fn is_all_ones(&self) -> bool {
        !self.bits.is_empty() && self.bits.len() as u64 == self.bit_size()
    }
}

type Rule = fn(&BitSetInfo, &TargetSpec) -> bool;

fn no_members(info: &BitSetInfo, _: &TargetSpec) -> bool {
    info.bits.is_empty()
}

fn one_member(info: &BitSetInfo, _: &TargetSpec) -> bool {
    info.bits.len() == 1
}

fn every_position(info: &BitSetInfo, _: &TargetSpec) -> bool {
    info.is_all_ones()
}

fn fits_register(info: &BitSetInfo, target: &TargetSpec) -> bool {
    info.bit_size() <= target.register_bits() as u64
}

fn always(_: &BitSetInfo, _: &TargetSpec) -> bool {
    true
}

/// Cheapest runtime test first; the first rule that holds wins.
const RANKING: [(ResolutionKind, Rule); 5] = [
    (ResolutionKind::AllZeros, no_members),
    (ResolutionKind::Single, one_member),
    (ResolutionKind::AllOnes, every_position),
    (ResolutionKind::Inline, fits_register),
    (ResolutionKind::ByteArray, always),
];

pub fn choose_kind(info: &BitSetInfo, target: &TargetSpec) -> ResolutionKind {
    RANKING
        .iter()
        .find(|(_, applies)| applies(info, target))
        .map_or(ResolutionKind::ByteArray, |&(kind, _)| kind)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Representation {
    AllZeros,
    AllOnes,
    Single,
    Inline { bits: u64 },
    ByteArray { byte_offset: u64, mask: u8 },
}

/// The finalized encoding of one type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitSetResolution {
    pub align_log2: u32,
    pub size_m1: u64,
    pub repr: Representation,
}

/// Result of encoding before shared byte arrays are laid out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoded {
    Resolved(BitSetResolution),
    NeedsByteArray,
}

pub fn encode(info: &BitSetInfo, target: &TargetSpec) -> Encoded {
    let repr = match choose_kind(info, target) {
        ResolutionKind::AllZeros => Representation::AllZeros,
        ResolutionKind::Single => Representation::Single,
        ResolutionKind::AllOnes => Representation::AllOnes,
        ResolutionKind::Inline => Representation::Inline {
            bits: info.bits.iter().fold(0, |acc, &bit| acc | 1 << bit),
        },
        ResolutionKind::ByteArray => return Encoded::NeedsByteArray,
    };
    Encoded::Resolved(BitSetResolution::new(info, repr))
}

impl BitSetResolution {
    fn new(info: &BitSetInfo, repr: Representation) -> Self {
        let (align_log2, size_m1) = match repr {
            Representation::AllZeros | Representation::Single => (0, 0),
            _ => (info.align_log2, info.size_m1),
        };
        Self {
            align_log2,
            size_m1,
            repr,
        }
    }

    pub fn byte_array(info: &BitSetInfo, placement: Placement) -> Self {
        Self::new(
            info,
            Representation::ByteArray {
                byte_offset: placement.byte_offset,
                mask: placement.mask(),
            },
        )
    }

    pub fn kind(&self) -> ResolutionKind {
        match self.repr {
            Representation::AllZeros => ResolutionKind::AllZeros,
            Representation::AllOnes => ResolutionKind::AllOnes,
            Representation::Single => ResolutionKind::Single,
            Representation::Inline { .. } => ResolutionKind::Inline,
            Representation::ByteArray { .. } => ResolutionKind::ByteArray,
        }
    }

    pub fn bit_size(&self) -> u64 {
        self.size_m1 + 1
    }

    /// log2 of the width of the integer the call site compares the rotated
    /// offset against: 5 or 6 for inline bitmaps, 7 or 32 when indexing
    /// memory.
    pub fn size_m1_bit_width(&self) -> u32 {
        size_m1_bit_width(self.kind(), self.bit_size())
    }

    /// Width of the inline bits constant.
    pub fn inline_bits_width(&self) -> u32 {
        if self.bit_size() <= 32 {
            32
        } else {
            64
        }
    }

    /// Evaluates the membership test the emitted symbols describe, for a
    /// pointer `offset` bytes past `global_addr` on a target with
    /// `pointer_bits`-bit addresses.
    pub fn test(&self, offset: u64, pointer_bits: u32, byte_array: &[u8]) -> bool {
        let index = match self.repr {
            Representation::AllZeros => return false,
            Representation::Single => return offset == 0,
            _ => rotate_offset(offset, self.align_log2, pointer_bits),
        };
        if index > self.size_m1 {
            return false;
        }
        match self.repr {
            Representation::AllOnes => true,
            Representation::Inline { bits } => bits >> index & 1 == 1,
            Representation::ByteArray { byte_offset, mask } => byte_array
                .get((byte_offset + index) as usize)
                .is_some_and(|byte| byte & mask != 0),
            Representation::AllZeros | Representation::Single => false,
        }
    }
}

pub(crate) fn size_m1_bit_width(kind: ResolutionKind, bit_size: u64) -> u32 {
    match kind {
        ResolutionKind::Inline if bit_size <= 32 => 5,
        ResolutionKind::Inline => 6,
        ResolutionKind::ByteArray | ResolutionKind::AllOnes if bit_size <= 128 => 7,
        ResolutionKind::ByteArray | ResolutionKind::AllOnes => 32,
        ResolutionKind::Single | ResolutionKind::AllZeros => 0,
    }
}

/// Rotates the pointer difference right by the alignment, so misaligned
/// offsets land far outside any valid index.
fn rotate_offset(offset: u64, align_log2: u32, pointer_bits: u32) -> u64 {
    let mask = if pointer_bits >= 64 {
        u64::MAX
    } else {
        (1 << pointer_bits) - 1
    };
    let offset = offset & mask;
    if align_log2 == 0 {
        return offset;
    }
    ((offset >> align_log2) | (offset << (pointer_bits - align_log2))) & mask
}
