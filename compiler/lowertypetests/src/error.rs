use std::path::PathBuf;

use ustr::Ustr;

use crate::bitset::ResolutionKind;

/// The unit's globals cannot be merged under the target's constraints.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("global `{global}` carries type metadata but has no definition to merge")]
    Declaration { global: Ustr },
    #[error("type metadata offset {offset} is outside of global `{global}` (size {size})")]
    OffsetOutOfBounds { global: Ustr, offset: u64, size: u64 },
    #[error("alignment {align} of global `{global}` exceeds the maximum of {max}")]
    AlignmentTooLarge { global: Ustr, align: u64, max: u64 },
    #[error("placing global `{global}` exceeds the {bits}-bit address space")]
    AddressSpaceExhausted { global: Ustr, bits: u32 },
    #[error("cannot materialize the {size}-byte initializer of merged allocation `{allocation}`")]
    ImageTooLarge { allocation: Ustr, size: u64 },
}

/// Two compilation units disagree about a type identifier.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConsistencyError {
    #[error(
        "conflicting type test resolutions for `{type_id}`: \
         summary has {existing}, this unit computed {computed}"
    )]
    ConflictingResolution {
        type_id: String,
        existing: ResolutionKind,
        computed: ResolutionKind,
    },
    #[error("conflicting devirtualization resolutions for `{type_id}` at offset {offset}")]
    ConflictingDevirtualization { type_id: String, offset: u64 },
    #[error("summary was produced for `{summary}` but the module targets `{module}`")]
    TargetMismatch { summary: String, module: String },
}

/// A defect in the pass itself, or in a summary it was handed.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InvariantError {
    #[error("member offset {offset} of `{type_id}` lies outside its merged allocation of {size} bytes")]
    OffsetOutsideAllocation { type_id: Ustr, offset: u64, size: u64 },
    #[error(
        "byte array placement for `{type_id}` at byte {byte_offset}, bit {bit} \
         conflicts with the bitmap of another type identifier"
    )]
    OverlappingByteArray {
        type_id: Ustr,
        byte_offset: u64,
        bit: u8,
    },
    #[error("malformed {kind} resolution for `{type_id}`: {reason}")]
    MalformedResolution {
        type_id: Ustr,
        kind: ResolutionKind,
        reason: &'static str,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum SummaryError {
    #[error("cannot access summary `{}`", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed summary: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown summary action `{0}` (expected none, import or export)")]
    UnknownSummaryAction(String),
    #[error("unknown packing strategy `{0}` (expected lane or first-fit)")]
    UnknownPacking(String),
    #[error("summary action `import` needs a summary to read")]
    MissingImportSummary,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown target triple `{0}`")]
    UnknownTarget(String),
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error(transparent)]
    Consistency(#[from] ConsistencyError),
    #[error("internal error: {0}")]
    Invariant(#[from] InvariantError),
    #[error(transparent)]
    Summary(#[from] SummaryError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
