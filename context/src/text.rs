//! Textual form of a [`Module`](crate::Module).
//!
//! The accepted language is the subset of the usual IR assembly syntax that
//! type-test lowering cares about:
//!
//! ```text
//! target triple = "x86_64-unknown-linux-gnu"
//! @vt = private constant [16 x i8] zeroinitializer, align 8, !type !{i64 8, !"A"}
//! @ext = external hidden global i8, !absolute_symbol !{i64 0, i64 256}
//! @obj = alias [8 x i8], getelementptr (i8, ptr @vt, i64 8)
//! @mask = internal alias i8, inttoptr (i8 4 to ptr)
//! !typetests = !{!"A", !"B"}
//! ```
//!
//! Printing goes through the `Display` impls of the module types.

mod lexer;
mod reader;

pub use reader::read_module;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReadError {
    #[error("line {line}: unexpected character `{found}`")]
    UnexpectedChar { line: u32, found: char },
    #[error("line {line}: unterminated string")]
    UnterminatedString { line: u32 },
    #[error("line {line}: invalid escape in string")]
    InvalidEscape { line: u32 },
    #[error("line {line}: integer literal out of range")]
    IntegerOverflow { line: u32 },
    #[error("line {line}: expected {expected}, found {found}")]
    Expected {
        line: u32,
        expected: &'static str,
        found: String,
    },
    #[error("line {line}: unknown type `{name}`")]
    UnknownType { line: u32, name: String },
    #[error("line {line}: alignment {align} is not a power of two")]
    InvalidAlignment { line: u32, align: u64 },
    #[error("line {line}: initializer does not match type `{ty}`")]
    InitializerMismatch { line: u32, ty: String },
    #[error("line {line}: redefinition of `@{name}`")]
    Redefinition { line: u32, name: String },
}
