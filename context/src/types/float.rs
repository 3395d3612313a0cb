use std::fmt;

use super::raw::{BasicType, ConcreteLayout, TypeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FloatTy {
    pub kind: FloatKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatKind {
    Ieee16Bit,
    Ieee32Bit,
    Ieee64Bit,
    Ieee128Bit,
}

impl FloatTy {
    pub const fn new(kind: FloatKind) -> Self {
        Self { kind }
    }

    pub const fn float_kind(self) -> FloatKind {
        self.kind
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        let kind = match keyword {
            "half" => FloatKind::Ieee16Bit,
            "float" => FloatKind::Ieee32Bit,
            "double" => FloatKind::Ieee64Bit,
            "fp128" => FloatKind::Ieee128Bit,
            _ => return None,
        };
        Some(Self { kind })
    }
}

impl BasicType for FloatTy {
    const KIND: TypeKind = TypeKind::Float;

    fn layout(&self, _target: &crate::TargetSpec) -> Option<ConcreteLayout> {
        let layout = match self.kind {
            FloatKind::Ieee16Bit => ConcreteLayout { size: 2, align: 2 },
            FloatKind::Ieee32Bit => ConcreteLayout { size: 4, align: 4 },
            FloatKind::Ieee64Bit => ConcreteLayout { size: 8, align: 8 },
            FloatKind::Ieee128Bit => ConcreteLayout {
                size: 16,
                align: 16,
            },
        };
        Some(layout)
    }
}

impl fmt::Display for FloatTy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self.kind {
            FloatKind::Ieee16Bit => "half",
            FloatKind::Ieee32Bit => "float",
            FloatKind::Ieee64Bit => "double",
            FloatKind::Ieee128Bit => "fp128",
        })
    }
}
