mod module;

pub mod text;
pub mod types;

mod utils;

pub use module::{
    AbsoluteSymbol, AliasTarget, GlobalAlias, GlobalId, GlobalVariable, Initializer, Linkage,
    Module, TypeAttachment, TypeMetadata, Visibility,
};
pub use text::{read_module, ReadError};
pub use utils::{align_to, gcd, FxHashMap, FxHashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X86,
    X86_64,
    Arm,
    AArch64,
    Riscv32,
    Riscv64,
    Wasm32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectFormat {
    Elf,
    MachO,
    Coff,
    Wasm,
}

/// Everything the type-test lowering needs to know about the target machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSpec {
    pub arch: Arch,
    pub object_format: ObjectFormat,
    pub pointer_size_bytes: u8,
    pub pointer_align_log2: u8,
    /// Width of the widest integer register a membership test can use.
    pub register_width_bits: u8,
}

impl TargetSpec {
    /// Resolves a target triple such as `x86_64-unknown-linux-gnu`.
    ///
    /// Only the architecture and the object format matter, so vendor and
    /// environment components are accepted as-is.
    pub fn from_triple(triple: &str) -> Option<Self> {
        let triple = triple.to_ascii_lowercase();
        let mut parts = triple.split('-');
        let arch = match parts.next()? {
            "x86_64" | "amd64" => Arch::X86_64,
            "i386" | "i486" | "i586" | "i686" | "x86" => Arch::X86,
            "aarch64" | "arm64" => Arch::AArch64,
            "riscv32" => Arch::Riscv32,
            "riscv64" => Arch::Riscv64,
            "wasm32" => Arch::Wasm32,
            arch if arch.starts_with("arm") || arch.starts_with("thumb") => Arch::Arm,
            _ => return None,
        };

        let rest: Vec<&str> = parts.collect();
        let has = |needle: &str| rest.iter().any(|part| part.starts_with(needle));
        let object_format = if arch == Arch::Wasm32 {
            ObjectFormat::Wasm
        } else if has("apple") || has("darwin") || has("macos") || has("ios") {
            ObjectFormat::MachO
        } else if has("windows") || has("win32") {
            ObjectFormat::Coff
        } else {
            ObjectFormat::Elf
        };

        let (pointer_size_bytes, register_width_bits) = match arch {
            Arch::X86_64 | Arch::AArch64 | Arch::Riscv64 => (8, 64),
            Arch::X86 | Arch::Arm | Arch::Riscv32 => (4, 32),
            // wasm32 has 32-bit addresses but native 64-bit integer operations
            Arch::Wasm32 => (4, 64),
        };

        Some(Self {
            arch,
            object_format,
            pointer_size_bytes,
            pointer_align_log2: pointer_size_bytes.trailing_zeros() as u8,
            register_width_bits,
        })
    }

    #[inline]
    pub const fn pointer_bits(&self) -> u32 {
        self.pointer_size_bytes as u32 * 8
    }

    #[inline]
    pub const fn register_bits(&self) -> u32 {
        self.register_width_bits as u32
    }

    /// Largest byte offset that can be formed relative to a global.
    pub const fn max_offset(&self) -> u64 {
        if self.pointer_bits() >= 64 {
            u64::MAX
        } else {
            (1 << self.pointer_bits()) - 1
        }
    }

    /// Whether constants crossing unit boundaries are carried by absolute
    /// symbols instead of the summary. The linker resolves them into
    /// immediates, which only x86 ELF toolchains support.
    pub fn exports_absolute_symbols(&self) -> bool {
        matches!(self.arch, Arch::X86 | Arch::X86_64) && self.object_format == ObjectFormat::Elf
    }
}

#[cfg(test)]
const TEST_TARGET_SPEC: TargetSpec = TargetSpec {
    arch: Arch::X86_64,
    object_format: ObjectFormat::Elf,
    pointer_size_bytes: 8,
    pointer_align_log2: 3,
    register_width_bits: 64,
};
