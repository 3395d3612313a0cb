use std::fmt;

use super::raw::{BasicType, ConcreteLayout, TypeKind};

/// Opaque pointer in the default address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PointerTy;

impl BasicType for PointerTy {
    const KIND: TypeKind = TypeKind::Pointer;

    fn layout(&self, target: &crate::TargetSpec) -> Option<ConcreteLayout> {
        Some(ConcreteLayout {
            size: target.pointer_size_bytes as u64,
            align: 1 << target.pointer_align_log2,
        })
    }
}

impl fmt::Display for PointerTy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ptr")
    }
}
