mod raw;

mod aggregate;
mod array;
mod float;
mod int;
mod pointer;

pub use raw::{BasicType, ConcreteLayout, Type, TypeKind};

pub use aggregate::AggregateTy;
pub use array::ArrayTy;
pub use float::{FloatKind, FloatTy};
pub use int::IntTy;
pub use pointer::PointerTy;
