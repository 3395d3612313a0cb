use std::fmt;

use super::raw::{BasicType, ConcreteLayout, Type, TypeKind};

/// Literal struct type with C layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AggregateTy {
    pub fields: Vec<Type>,
}

impl AggregateTy {
    pub fn new(fields: Vec<Type>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[Type] {
        &self.fields
    }

    /// Byte offset of every field.
    pub fn field_offsets(&self, target: &crate::TargetSpec) -> Option<Vec<u64>> {
        let mut offsets = Vec::with_capacity(self.fields.len());
        let mut size = 0u64;
        for field in &self.fields {
            let layout = field.layout(target)?;
            size = crate::utils::align_to(size, layout.align)?;
            offsets.push(size);
            size = size.checked_add(layout.size)?;
        }
        Some(offsets)
    }
}

impl BasicType for AggregateTy {
    const KIND: TypeKind = TypeKind::Aggregate;

    fn layout(&self, target: &crate::TargetSpec) -> Option<ConcreteLayout> {
        let mut size = 0u64;
        let mut align = 1;
        for field in &self.fields {
            let layout = field.layout(target)?;
            align = align.max(layout.align);
            size = crate::utils::align_to(size, layout.align)?.checked_add(layout.size)?;
        }
        Some(ConcreteLayout {
            size: crate::utils::align_to(size, align)?,
            align,
        })
    }
}

impl fmt::Display for AggregateTy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fields.is_empty() {
            return f.write_str("{}");
        }
        f.write_str("{ ")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i != 0 {
                f.write_str(", ")?;
            }
            field.fmt(f)?;
        }
        f.write_str(" }")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IntTy, PointerTy};

    #[test]
    fn c_layout_pads_fields_and_tail() {
        let target = crate::TEST_TARGET_SPEC;
        let ty = AggregateTy::new(vec![
            Type::Int(IntTy::I8),
            Type::Pointer(PointerTy),
            Type::int(16).unwrap(),
        ]);
        assert_eq!(ty.field_offsets(&target), Some(vec![0, 8, 16]));
        assert_eq!(ty.layout(&target), Some(ConcreteLayout { size: 24, align: 8 }));
        assert_eq!(ty.to_string(), "{ i8, ptr, i16 }");
    }

    #[test]
    fn pointer_fields_follow_the_target() {
        let target = crate::TargetSpec::from_triple("i686-unknown-linux-gnu").unwrap();
        let ty = AggregateTy::new(vec![Type::Pointer(PointerTy), Type::Pointer(PointerTy)]);
        assert_eq!(ty.layout(&target), Some(ConcreteLayout { size: 8, align: 4 }));
    }

    #[test]
    fn empty_aggregate() {
        let ty = AggregateTy::new(Vec::new());
        assert_eq!(ty.layout(&crate::TEST_TARGET_SPEC), Some(ConcreteLayout { size: 0, align: 1 }));
        assert_eq!(ty.to_string(), "{}");
    }
}
