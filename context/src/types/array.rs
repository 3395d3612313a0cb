use std::fmt;

use super::raw::{BasicType, ConcreteLayout, Type, TypeKind};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArrayTy {
    pub len: u64,
    pub element: Box<Type>,
}

impl ArrayTy {
    pub fn new(len: u64, element: Type) -> Self {
        Self {
            len,
            element: Box::new(element),
        }
    }
}

impl BasicType for ArrayTy {
    const KIND: TypeKind = TypeKind::Array;

    /// Arrays inherit the element alignment.
    fn layout(&self, target: &crate::TargetSpec) -> Option<ConcreteLayout> {
        let element = self.element.layout(target)?;
        Some(ConcreteLayout {
            size: element.size.checked_mul(self.len)?,
            align: element.align,
        })
    }
}

impl fmt::Display for ArrayTy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} x {}]", self.len, self.element)
    }
}
