use std::fmt;

use crate::TargetSpec;

use super::{AggregateTy, ArrayTy, FloatTy, IntTy, PointerTy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Int,
    Float,
    Pointer,
    Array,
    Aggregate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcreteLayout {
    pub size: u64,
    pub align: u64,
}

pub trait BasicType: fmt::Display {
    const KIND: TypeKind;

    /// `None` when the size does not fit in 64 bits.
    fn layout(&self, target: &TargetSpec) -> Option<ConcreteLayout>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Int(IntTy),
    Float(FloatTy),
    Pointer(PointerTy),
    Array(ArrayTy),
    Aggregate(AggregateTy),
}

impl Type {
    pub const I8: Type = Type::Int(IntTy::I8);
    pub const I32: Type = Type::Int(IntTy::I32);
    pub const I64: Type = Type::Int(IntTy::I64);

    pub fn int(bits: u16) -> Option<Self> {
        IntTy::new(bits).map(Type::Int)
    }

    pub fn byte_array(len: u64) -> Self {
        Type::Array(ArrayTy::new(len, Type::I8))
    }

    pub const fn kind(&self) -> TypeKind {
        match self {
            Type::Int(_) => IntTy::KIND,
            Type::Float(_) => FloatTy::KIND,
            Type::Pointer(_) => PointerTy::KIND,
            Type::Array(_) => ArrayTy::KIND,
            Type::Aggregate(_) => AggregateTy::KIND,
        }
    }

    pub fn layout(&self, target: &TargetSpec) -> Option<ConcreteLayout> {
        match self {
            Type::Int(ty) => ty.layout(target),
            Type::Float(ty) => ty.layout(target),
            Type::Pointer(ty) => ty.layout(target),
            Type::Array(ty) => ty.layout(target),
            Type::Aggregate(ty) => ty.layout(target),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int(ty) => ty.fmt(f),
            Type::Float(ty) => ty.fmt(f),
            Type::Pointer(ty) => ty.fmt(f),
            Type::Array(ty) => ty.fmt(f),
            Type::Aggregate(ty) => ty.fmt(f),
        }
    }
}
