use std::fmt;

use ustr::Ustr;

use crate::types::{ConcreteLayout, Type};
use crate::TargetSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Linkage {
    #[default]
    External,
    Internal,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Default,
    Hidden,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Initializer {
    Zero,
    Int(u64),
    Bytes(Vec<u8>),
}

impl Initializer {
    pub fn is_zero(&self) -> bool {
        match self {
            Initializer::Zero => true,
            Initializer::Int(value) => *value == 0,
            Initializer::Bytes(bytes) => bytes.iter().all(|&byte| byte == 0),
        }
    }

    /// Writes the little-endian in-memory image into `out`, truncated to its
    /// length. Bytes past the image are left alone.
    pub fn write_to(&self, out: &mut [u8]) {
        let int;
        let image: &[u8] = match self {
            Initializer::Zero => return,
            Initializer::Int(value) => {
                int = value.to_le_bytes();
                &int
            }
            Initializer::Bytes(bytes) => bytes,
        };
        let len = image.len().min(out.len());
        out[..len].copy_from_slice(&image[..len]);
    }

    /// Prefers `zeroinitializer` for all-zero images.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        if bytes.iter().all(|&byte| byte == 0) {
            Initializer::Zero
        } else {
            Initializer::Bytes(bytes)
        }
    }
}

/// `!type !{i64 offset, !"type_id"}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeMetadata {
    pub offset: u64,
    pub type_id: Ustr,
}

/// `!absolute_symbol` range of a declaration that the linker resolves to a
/// constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsoluteSymbol {
    /// Half-open range `[lo, hi)`.
    Range { lo: u64, hi: u64 },
    FullSet,
}

impl AbsoluteSymbol {
    /// Range of a `width`-bit unsigned constant on a target with
    /// `pointer_bits`-bit addresses.
    pub fn for_width(width: u32, pointer_bits: u32) -> Self {
        if width >= pointer_bits || width >= 64 {
            AbsoluteSymbol::FullSet
        } else {
            AbsoluteSymbol::Range {
                lo: 0,
                hi: 1 << width,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalVariable {
    pub name: Ustr,
    pub linkage: Linkage,
    pub visibility: Visibility,
    pub is_constant: bool,
    pub value_type: Type,
    /// `None` for external declarations.
    pub initializer: Option<Initializer>,
    pub align: Option<u64>,
    pub type_metadata: Vec<TypeMetadata>,
    pub absolute_symbol: Option<AbsoluteSymbol>,
}

impl GlobalVariable {
    pub fn new(name: &str, value_type: Type, initializer: Initializer) -> Self {
        Self {
            name: ustr::ustr(name),
            linkage: Linkage::External,
            visibility: Visibility::Default,
            is_constant: false,
            value_type,
            initializer: Some(initializer),
            align: None,
            type_metadata: Vec::new(),
            absolute_symbol: None,
        }
    }

    pub fn declaration(name: &str, value_type: Type) -> Self {
        Self {
            initializer: None,
            ..Self::new(name, value_type, Initializer::Zero)
        }
    }

    pub fn is_declaration(&self) -> bool {
        self.initializer.is_none()
    }

    pub fn add_type_metadata(&mut self, offset: u64, type_id: Ustr) {
        self.type_metadata.push(TypeMetadata { offset, type_id });
    }

    /// Size of the value type, and the explicit alignment if there is one,
    /// otherwise the ABI alignment. `None` when the size overflows.
    pub fn layout(&self, target: &TargetSpec) -> Option<ConcreteLayout> {
        let layout = self.value_type.layout(target)?;
        Some(ConcreteLayout {
            size: layout.size,
            align: self.align.unwrap_or(layout.align),
        })
    }
}

/// What a [`GlobalAlias`] points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasTarget {
    /// `getelementptr (i8, ptr @base, iN offset)`, `index_bits` being the
    /// pointer width of the target.
    Offset {
        base: Ustr,
        offset: u64,
        index_bits: u32,
    },
    /// `inttoptr (iN value to ptr)`
    Absolute { value: u64, bits: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalAlias {
    pub name: Ustr,
    pub linkage: Linkage,
    pub visibility: Visibility,
    pub value_type: Type,
    pub target: AliasTarget,
}

fn write_linkage(f: &mut fmt::Formatter<'_>, linkage: Linkage, visibility: Visibility) -> fmt::Result {
    match linkage {
        Linkage::External => {}
        Linkage::Internal => f.write_str("internal ")?,
        Linkage::Private => f.write_str("private ")?,
    }
    match visibility {
        Visibility::Default => Ok(()),
        Visibility::Hidden => f.write_str("hidden "),
    }
}

struct CString<'a>(&'a [u8]);

impl fmt::Display for CString<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("c\"")?;
        for byte in self.0 {
            write!(f, "\\{byte:02X}")?;
        }
        f.write_str("\"")
    }
}

impl fmt::Display for Initializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Initializer::Zero => f.write_str("zeroinitializer"),
            Initializer::Int(value) => write!(f, "{value}"),
            Initializer::Bytes(bytes) => CString(bytes).fmt(f),
        }
    }
}

impl fmt::Display for AbsoluteSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbsoluteSymbol::Range { lo, hi } => write!(f, "!{{i64 {lo}, i64 {hi}}}"),
            AbsoluteSymbol::FullSet => f.write_str("!{i64 -1, i64 -1}"),
        }
    }
}

impl fmt::Display for GlobalVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{} = ", self.name)?;
        let kind = if self.is_constant { "constant" } else { "global" };
        match &self.initializer {
            Some(init) => {
                write_linkage(f, self.linkage, self.visibility)?;
                write!(f, "{kind} {} {init}", self.value_type)?;
            }
            None => {
                f.write_str("external ")?;
                write_linkage(f, Linkage::External, self.visibility)?;
                write!(f, "{kind} {}", self.value_type)?;
            }
        }
        if let Some(align) = self.align {
            write!(f, ", align {align}")?;
        }
        for md in &self.type_metadata {
            write!(f, ", !type !{{i64 {}, !\"{}\"}}", md.offset, md.type_id)?;
        }
        if let Some(range) = &self.absolute_symbol {
            write!(f, ", !absolute_symbol {range}")?;
        }
        Ok(())
    }
}

impl fmt::Display for GlobalAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{} = ", self.name)?;
        write_linkage(f, self.linkage, self.visibility)?;
        write!(f, "alias {}, ", self.value_type)?;
        match &self.target {
            AliasTarget::Offset {
                base,
                offset,
                index_bits,
            } => write!(f, "getelementptr (i8, ptr @{base}, i{index_bits} {offset})"),
            AliasTarget::Absolute { value, bits } => write!(f, "inttoptr (i{bits} {value} to ptr)"),
        }
    }
}
