//! Turning resolutions into the `__typeid_*` symbols call sites read.
//!
//! Everything emitted here is an alias or an external declaration, so the
//! symbols cost no storage of their own.

use context::types::Type;
use context::{
    AbsoluteSymbol, AliasTarget, GlobalAlias, GlobalVariable, Linkage, TargetSpec, Visibility,
};
use ustr::{ustr, Ustr};

use crate::bitset::{BitSetResolution, Representation, ResolutionKind};
use crate::layout::MergedAllocation;
use crate::summary::TypeTestResolution;

pub fn symbol_name(type_id: Ustr, suffix: &str) -> Ustr {
    ustr(&format!("__typeid_{type_id}_{suffix}"))
}

/// New module contents, kept apart until every check has passed.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Emission {
    pub globals: Vec<GlobalVariable>,
    pub aliases: Vec<GlobalAlias>,
}

pub struct Emitter<'a> {
    target: &'a TargetSpec,
    exporting: bool,
    type_id_aliases: Vec<GlobalAlias>,
    replacements: Vec<GlobalAlias>,
    declarations: Vec<GlobalVariable>,
}

fn int_type(bits: u32) -> Type {
    match bits {
        8 => Type::I8,
        32 => Type::I32,
        _ => Type::I64,
    }
}

impl<'a> Emitter<'a> {
    pub fn new(target: &'a TargetSpec, exporting: bool) -> Self {
        Self {
            target,
            exporting,
            type_id_aliases: Vec::new(),
            replacements: Vec::new(),
            declarations: Vec::new(),
        }
    }

    /// Linkage of symbols naming addresses: other units reach them only
    /// when exporting.
    fn address_linkage(&self) -> (Linkage, Visibility) {
        if self.exporting {
            (Linkage::External, Visibility::Hidden)
        } else {
            (Linkage::Internal, Visibility::Default)
        }
    }

    fn constant_linkage(&self) -> (Linkage, Visibility) {
        if self.exporting && self.target.exports_absolute_symbols() {
            (Linkage::External, Visibility::Hidden)
        } else {
            (Linkage::Internal, Visibility::Default)
        }
    }

    fn address(&mut self, type_id: Ustr, suffix: &str, base: Ustr, offset: u64) {
        let (linkage, visibility) = self.address_linkage();
        self.type_id_aliases.push(GlobalAlias {
            name: symbol_name(type_id, suffix),
            linkage,
            visibility,
            value_type: Type::I8,
            target: AliasTarget::Offset {
                base,
                offset,
                index_bits: self.target.pointer_bits(),
            },
        });
    }

    fn constant(&mut self, type_id: Ustr, suffix: &str, value: u64, bits: u32) {
        let (linkage, visibility) = self.constant_linkage();
        self.type_id_aliases.push(GlobalAlias {
            name: symbol_name(type_id, suffix),
            linkage,
            visibility,
            value_type: int_type(bits),
            target: AliasTarget::Absolute { value, bits },
        });
    }

    fn declare(&mut self, type_id: Ustr, suffix: &str, absolute: Option<AbsoluteSymbol>) {
        let mut decl = GlobalVariable::declaration(&symbol_name(type_id, suffix), Type::I8);
        decl.visibility = Visibility::Hidden;
        decl.absolute_symbol = absolute;
        self.declarations.push(decl);
    }

    /// Symbols of an identifier resolved in this unit. `global_addr` is
    /// `base + offset`; byte arrays live in `bits`.
    pub fn local(
        &mut self,
        type_id: Ustr,
        res: &BitSetResolution,
        base: Ustr,
        offset: u64,
        bits: Ustr,
    ) {
        if res.kind() == ResolutionKind::AllZeros {
            return;
        }
        self.address(type_id, "global_addr", base, offset);
        if res.kind() == ResolutionKind::Single {
            return;
        }

        self.constant(type_id, "align", res.align_log2 as u64, 8);
        self.constant(type_id, "size_m1", res.size_m1, self.target.pointer_bits());
        match res.repr {
            Representation::Inline { bits: inline } => {
                self.constant(type_id, "inline_bits", inline, res.inline_bits_width());
            }
            Representation::ByteArray { byte_offset, mask } => {
                self.address(type_id, "byte_array", bits, byte_offset);
                self.constant(type_id, "bit_mask", mask as u64, 8);
            }
            _ => {}
        }
    }

    /// Symbols of an identifier resolved by another unit. Addresses are
    /// always defined there; constants come from the record, or from
    /// absolute symbols on targets that export them that way.
    pub fn imported(&mut self, type_id: Ustr, record: &TypeTestResolution) {
        let kind = record.kind;
        if kind == ResolutionKind::AllZeros {
            return;
        }
        self.declare(type_id, "global_addr", None);
        if kind == ResolutionKind::Single {
            return;
        }

        let pointer_bits = self.target.pointer_bits();
        self.imported_constant(type_id, "align", record.align_log2, 8, 8);
        self.imported_constant(
            type_id,
            "size_m1",
            record.size_m1,
            pointer_bits,
            record.size_m1_bit_width,
        );
        match kind {
            ResolutionKind::Inline => {
                let width = record.inline_bits_width();
                self.imported_constant(type_id, "inline_bits", record.inline_bits, width, width);
            }
            ResolutionKind::ByteArray => {
                self.declare(type_id, "byte_array", None);
                self.imported_constant(type_id, "bit_mask", record.bit_mask as u64, 8, 8);
            }
            _ => {}
        }
    }

    /// `range_bits` bounds the absolute symbol the linker will resolve.
    fn imported_constant(&mut self, type_id: Ustr, suffix: &str, value: u64, bits: u32, range_bits: u32) {
        if TypeTestResolution::carries_values(self.target) {
            self.constant(type_id, suffix, value, bits);
        } else {
            let range = AbsoluteSymbol::for_width(range_bits, self.target.pointer_bits());
            self.declare(type_id, suffix, Some(range));
        }
    }

    /// Aliases standing in for the globals merged into `alloc`.
    pub fn replace(&mut self, alloc: &MergedAllocation) {
        for member in &alloc.members {
            self.replacements.push(GlobalAlias {
                name: member.name,
                linkage: member.linkage,
                visibility: member.visibility,
                value_type: member.value_type.clone(),
                target: AliasTarget::Offset {
                    base: alloc.name,
                    offset: member.offset,
                    index_bits: self.target.pointer_bits(),
                },
            });
        }
    }

    /// Type identifier symbols come before the replacement aliases.
    pub fn finish(self) -> Emission {
        let mut aliases = self.type_id_aliases;
        aliases.extend(self.replacements);
        Emission {
            globals: self.declarations,
            aliases,
        }
    }
}
