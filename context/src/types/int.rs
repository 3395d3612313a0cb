use std::fmt;
use std::num::NonZeroU16;

use super::raw::{BasicType, ConcreteLayout, TypeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntTy {
    pub bits: NonZeroU16,
}

impl IntTy {
    pub const I8: IntTy = IntTy::fixed(8);
    pub const I32: IntTy = IntTy::fixed(32);
    pub const I64: IntTy = IntTy::fixed(64);

    const fn fixed(bits: u16) -> Self {
        match NonZeroU16::new(bits) {
            Some(bits) => Self { bits },
            None => panic!("integer types have at least one bit"),
        }
    }

    pub const fn new(bits: u16) -> Option<Self> {
        match NonZeroU16::new(bits) {
            Some(bits) => Some(Self { bits }),
            None => None,
        }
    }

    pub const fn bits(self) -> NonZeroU16 {
        self.bits
    }
}

impl BasicType for IntTy {
    const KIND: TypeKind = TypeKind::Int;

    fn layout(&self, _target: &crate::TargetSpec) -> Option<ConcreteLayout> {
        let size = self.bits.get().div_ceil(8) as u64;
        let align = if self.bits.get() % 8 == 0 {
            size
        } else {
            1
        };
        let align = (align / 2 + 1).next_power_of_two();
        let align = crate::utils::gcd(size, align);

        Some(ConcreteLayout { size, align })
    }
}

impl fmt::Display for IntTy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "i{}", self.bits)
    }
}

#[test]
fn test() {
    let layout = |bits| IntTy::new(bits).unwrap().layout(&crate::TEST_TARGET_SPEC).unwrap();
    assert_eq!(layout(1), ConcreteLayout { size: 1, align: 1 });
    assert_eq!(layout(8), ConcreteLayout { size: 1, align: 1 });
    assert_eq!(layout(32), ConcreteLayout { size: 4, align: 4 });
    assert_eq!(layout(48), ConcreteLayout { size: 6, align: 2 });
    assert_eq!(layout(64), ConcreteLayout { size: 8, align: 8 });
    assert_eq!(layout(128), ConcreteLayout { size: 16, align: 16 });
    assert!(IntTy::new(0).is_none());
}
