//! The per-identifier record that lets separately compiled units agree on
//! one encoding.
//!
//! A summary is YAML keyed by identifier name:
//!
//! ```yaml
//! TypeIdMap:
//!   typeid1:
//!     TTRes:
//!       Kind: Inline
//!       SizeM1BitWidth: 5
//!       AlignLog2: 1
//!       SizeM1: 3
//!       BitMask: 0
//!       InlineBits: 9
//! Target: aarch64-unknown-linux-gnu
//! ```
//!
//! Numeric fields are zero when the exporting target carries them as
//! absolute symbols instead.

use std::collections::BTreeMap;
use std::path::Path;

use context::TargetSpec;
use serde::{Deserialize, Serialize};
use ustr::Ustr;

use crate::bitset::{BitSetResolution, Representation, ResolutionKind};
use crate::error::{ConsistencyError, InvariantError, SummaryError};

mod devirt;

pub use devirt::{ArgList, ByArgKind, ByArgResolution, WpdKind, WpdResolution};

/// Finalized fields of a [`BitSetResolution`], free of anything local to the
/// exporting unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TypeTestResolution {
    pub kind: ResolutionKind,
    pub size_m1_bit_width: u32,
    pub align_log2: u64,
    pub size_m1: u64,
    pub bit_mask: u8,
    pub inline_bits: u64,
}

impl TypeTestResolution {
    pub fn from_local(res: &BitSetResolution, target: &TargetSpec) -> Self {
        let kind = res.kind();
        let size_m1_bit_width = res.size_m1_bit_width();
        if target.exports_absolute_symbols() {
            return Self {
                kind,
                size_m1_bit_width,
                ..Self::default()
            };
        }

        let (bit_mask, inline_bits) = match res.repr {
            Representation::Inline { bits } => (0, bits),
            Representation::ByteArray { mask, .. } => (mask, 0),
            _ => (0, 0),
        };
        Self {
            kind,
            size_m1_bit_width,
            align_log2: res.align_log2 as u64,
            size_m1: res.size_m1,
            bit_mask,
            inline_bits,
        }
    }

    /// Whether the numeric fields travel through the summary on `target`.
    pub fn carries_values(target: &TargetSpec) -> bool {
        !target.exports_absolute_symbols()
    }

    /// Width in bits of the inline bitmap constant.
    pub fn inline_bits_width(&self) -> u32 {
        1 << self.size_m1_bit_width.min(6)
    }

    /// Checks that an imported record can drive emission on `target`.
    pub fn validate(&self, type_id: Ustr, target: &TargetSpec) -> Result<(), InvariantError> {
        let malformed = |reason| InvariantError::MalformedResolution {
            type_id,
            kind: self.kind,
            reason,
        };
        let values = Self::carries_values(target);

        match self.kind {
            ResolutionKind::Inline => {
                if !matches!(self.size_m1_bit_width, 5 | 6) {
                    return Err(malformed("SizeM1BitWidth must be 5 or 6"));
                }
                if self.inline_bits_width() > target.register_bits() {
                    return Err(malformed("inline bitmap is wider than the target register"));
                }
                if values && self.inline_bits == 0 {
                    return Err(malformed("inline bitmap is empty"));
                }
                if values && self.size_m1 >= self.inline_bits_width() as u64 {
                    return Err(malformed("SizeM1 does not fit the inline bitmap"));
                }
            }
            ResolutionKind::ByteArray | ResolutionKind::AllOnes => {
                if !matches!(self.size_m1_bit_width, 7 | 32) {
                    return Err(malformed("SizeM1BitWidth must be 7 or 32"));
                }
                if values && self.kind == ResolutionKind::ByteArray && self.bit_mask.count_ones() != 1 {
                    return Err(malformed("BitMask must select exactly one bit"));
                }
            }
            ResolutionKind::Single | ResolutionKind::AllZeros => {}
        }

        if values && self.align_log2 >= target.pointer_bits() as u64 {
            return Err(malformed("AlignLog2 exceeds the pointer width"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeIdSummary {
    #[serde(rename = "TTRes", default, skip_serializing_if = "Option::is_none")]
    pub tt_res: Option<TypeTestResolution>,
    /// Keyed by byte offset into the vtable.
    #[serde(rename = "WPDRes", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub wpd_res: BTreeMap<u64, WpdResolution>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    #[serde(rename = "TypeIdMap", default)]
    pub type_ids: BTreeMap<String, TypeIdSummary>,
    /// Triple of the units that produced the summary.
    #[serde(rename = "Target", default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl Summary {
    pub fn from_yaml(src: &str) -> Result<Self, SummaryError> {
        Ok(serde_yaml::from_str(src)?)
    }

    pub fn to_yaml(&self) -> Result<String, SummaryError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn read(path: &Path) -> Result<Self, SummaryError> {
        let src = std::fs::read_to_string(path).map_err(|source| SummaryError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_yaml(&src)
    }

    pub fn write(&self, path: &Path) -> Result<(), SummaryError> {
        let yaml = self.to_yaml()?;
        std::fs::write(path, yaml).map_err(|source| SummaryError::Io {
            path: path.to_owned(),
            source,
        })
    }

    pub fn type_test(&self, type_id: &str) -> Option<&TypeTestResolution> {
        self.type_ids.get(type_id)?.tt_res.as_ref()
    }

    pub fn check_target(&self, triple: &str) -> Result<(), ConsistencyError> {
        match &self.target {
            Some(target) if target != triple => Err(ConsistencyError::TargetMismatch {
                summary: target.clone(),
                module: triple.to_owned(),
            }),
            _ => Ok(()),
        }
    }

    /// Fails if `type_id` already carries a different resolution.
    ///
    /// On targets that export absolute symbols a record only holds `Kind`
    /// and `SizeM1BitWidth`, so two units that agree on those but built
    /// different bitmaps are not caught here.
    pub fn check_record(
        &self,
        type_id: &str,
        record: &TypeTestResolution,
    ) -> Result<(), ConsistencyError> {
        match self.type_test(type_id) {
            Some(existing) if existing != record => Err(ConsistencyError::ConflictingResolution {
                type_id: type_id.to_owned(),
                existing: existing.kind,
                computed: record.kind,
            }),
            _ => Ok(()),
        }
    }

    /// Stores `record`; callers run [`Summary::check_record`] first.
    pub fn record(&mut self, type_id: &str, record: TypeTestResolution) {
        self.type_ids.entry(type_id.to_owned()).or_default().tt_res = Some(record);
    }

    /// Folds `other` into `self`. Nothing changes unless every entry agrees.
    pub fn merge(&mut self, other: &Summary) -> Result<(), ConsistencyError> {
        if let Some(target) = &other.target {
            self.check_target(target)?;
        }
        for (type_id, entry) in &other.type_ids {
            if let Some(record) = &entry.tt_res {
                self.check_record(type_id, record)?;
            }
            let Some(existing) = self.type_ids.get(type_id) else {
                continue;
            };
            for (offset, wpd) in &entry.wpd_res {
                if existing.wpd_res.get(offset).is_some_and(|res| res != wpd) {
                    return Err(ConsistencyError::ConflictingDevirtualization {
                        type_id: type_id.clone(),
                        offset: *offset,
                    });
                }
            }
        }

        if self.target.is_none() {
            self.target = other.target.clone();
        }
        for (type_id, entry) in &other.type_ids {
            let mine = self.type_ids.entry(type_id.clone()).or_default();
            if mine.tt_res.is_none() {
                mine.tt_res = entry.tt_res;
            }
            for (offset, wpd) in &entry.wpd_res {
                mine.wpd_res.entry(*offset).or_insert_with(|| wpd.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitset::{encode, BitSetInfo, Encoded};

    const SUMMARY: &str = r#"
TypeIdMap:
  typeid1:
    TTRes:
      Kind: Inline
      SizeM1BitWidth: 5
      AlignLog2: 1
      SizeM1: 3
      BitMask: 0
      InlineBits: 9
  typeid2:
    TTRes:
      Kind: Unsat
    WPDRes:
      8:
        Kind: SingleImpl
        SingleImplName: vf
      16:
        Kind: Indir
        ResByArg:
          1,2:
            Kind: VirtualConstProp
            Byte: 4
            Bit: 1
"#;

    fn target(triple: &str) -> TargetSpec {
        TargetSpec::from_triple(triple).unwrap()
    }

    fn local(offsets: &[u64], triple: &str) -> BitSetResolution {
        match encode(&BitSetInfo::new(offsets.iter().copied()), &target(triple)) {
            Encoded::Resolved(res) => res,
            Encoded::NeedsByteArray => panic!("expected a resolution without a byte array"),
        }
    }

    #[test]
    fn reads_records() {
        let summary = Summary::from_yaml(SUMMARY).unwrap();
        let typeid1 = summary.type_test("typeid1").unwrap();
        assert_eq!(typeid1.kind, ResolutionKind::Inline);
        assert_eq!(typeid1.inline_bits, 9);
        assert_eq!(typeid1.inline_bits_width(), 32);

        let typeid2 = &summary.type_ids["typeid2"];
        assert_eq!(typeid2.tt_res.unwrap().kind, ResolutionKind::AllZeros);
        assert_eq!(typeid2.wpd_res[&8].kind, WpdKind::SingleImpl);
        assert_eq!(typeid2.wpd_res[&8].single_impl_name, "vf");
        let by_arg = &typeid2.wpd_res[&16].res_by_arg[&ArgList(vec![1, 2])];
        assert_eq!(by_arg.kind, ByArgKind::VirtualConstProp);
        assert_eq!((by_arg.byte, by_arg.bit), (4, 1));

        assert_eq!(summary.target, None);
        let written = summary.to_yaml().unwrap();
        assert_eq!(Summary::from_yaml(&written).unwrap(), summary);
    }

    #[test]
    fn absolute_targets_export_zeros() {
        let res = local(&[0, 6], "x86_64-unknown-linux-gnu");
        let record = TypeTestResolution::from_local(&res, &target("x86_64-unknown-linux-gnu"));
        assert_eq!(
            record,
            TypeTestResolution {
                kind: ResolutionKind::Inline,
                size_m1_bit_width: 5,
                ..TypeTestResolution::default()
            }
        );

        let res = local(&[0, 6], "aarch64-unknown-linux-gnu");
        let record = TypeTestResolution::from_local(&res, &target("aarch64-unknown-linux-gnu"));
        assert_eq!((record.align_log2, record.size_m1, record.inline_bits), (1, 3, 9));
        assert!(record.validate(ustr::ustr("typeid1"), &target("aarch64-unknown-linux-gnu")).is_ok());
    }

    #[test]
    fn validation() {
        let arm = target("armv7-unknown-linux-gnueabihf");
        let aarch64 = target("aarch64-unknown-linux-gnu");
        let id = ustr::ustr("T");

        let wide = TypeTestResolution {
            kind: ResolutionKind::Inline,
            size_m1_bit_width: 6,
            align_log2: 2,
            size_m1: 33,
            inline_bits: 8589934593,
            ..Default::default()
        };
        assert!(wide.validate(id, &aarch64).is_ok());
        assert_eq!(
            wide.validate(id, &arm).unwrap_err().to_string(),
            "malformed Inline resolution for `T`: inline bitmap is wider than the target register"
        );

        let empty = TypeTestResolution {
            inline_bits: 0,
            ..wide
        };
        assert!(empty.validate(id, &aarch64).is_err());
        // the value lives in an absolute symbol there
        assert!(empty.validate(id, &target("x86_64-unknown-linux-gnu")).is_ok());

        let bad_mask = TypeTestResolution {
            kind: ResolutionKind::ByteArray,
            size_m1_bit_width: 7,
            bit_mask: 3,
            ..Default::default()
        };
        assert!(bad_mask.validate(id, &aarch64).is_err());
        assert!(TypeTestResolution { bit_mask: 4, ..bad_mask }.validate(id, &aarch64).is_ok());

        let bad_width = TypeTestResolution {
            kind: ResolutionKind::AllOnes,
            size_m1_bit_width: 5,
            ..Default::default()
        };
        assert!(bad_width.validate(id, &aarch64).is_err());
    }

    #[test]
    fn first_export_wins_and_conflicts_fail() {
        let mut summary = Summary::default();
        let inline = TypeTestResolution {
            kind: ResolutionKind::Inline,
            size_m1_bit_width: 5,
            ..Default::default()
        };
        summary.check_record("A", &inline).unwrap();
        summary.record("A", inline);
        // same resolution again is already resolved
        summary.check_record("A", &inline).unwrap();

        let single = TypeTestResolution {
            kind: ResolutionKind::Single,
            ..Default::default()
        };
        assert_eq!(
            summary.check_record("A", &single),
            Err(ConsistencyError::ConflictingResolution {
                type_id: "A".into(),
                existing: ResolutionKind::Inline,
                computed: ResolutionKind::Single,
            })
        );
    }

    #[test]
    fn absolute_records_only_compare_kind_and_width() {
        for (triple, conflicts) in [
            ("x86_64-unknown-linux-gnu", false),
            ("aarch64-unknown-linux-gnu", true),
        ] {
            let spec = target(triple);
            let mut summary = Summary::default();
            let first = TypeTestResolution::from_local(&local(&[0, 6], triple), &spec);
            summary.record("A", first);

            // same kind and width, different stride
            let second = TypeTestResolution::from_local(&local(&[0, 12], triple), &spec);
            assert_eq!(summary.check_record("A", &second).is_err(), conflicts, "{triple}");
        }
    }

    #[test]
    fn merge_is_all_or_nothing() {
        let mut base = Summary::from_yaml(SUMMARY).unwrap();
        let before = base.clone();

        let mut other = Summary::default();
        other.record("fresh", TypeTestResolution::default());
        other.record(
            "typeid1",
            TypeTestResolution {
                kind: ResolutionKind::ByteArray,
                size_m1_bit_width: 7,
                bit_mask: 1,
                ..Default::default()
            },
        );
        assert!(matches!(
            base.merge(&other),
            Err(ConsistencyError::ConflictingResolution { .. })
        ));
        assert_eq!(base, before);

        let mut other = Summary::default();
        other.type_ids.entry("typeid2".into()).or_default().wpd_res.insert(
            8,
            WpdResolution {
                kind: WpdKind::BranchFunnel,
                ..Default::default()
            },
        );
        assert_eq!(
            base.merge(&other),
            Err(ConsistencyError::ConflictingDevirtualization {
                type_id: "typeid2".into(),
                offset: 8
            })
        );

        let mut other = Summary::default();
        other.record("fresh", TypeTestResolution::default());
        other.target = Some("aarch64-unknown-linux-gnu".into());
        base.merge(&other).unwrap();
        assert!(base.type_test("fresh").is_some());
        assert_eq!(base.target.as_deref(), Some("aarch64-unknown-linux-gnu"));
        assert_eq!(
            base.check_target("i686-unknown-linux-gnu"),
            Err(ConsistencyError::TargetMismatch {
                summary: "aarch64-unknown-linux-gnu".into(),
                module: "i686-unknown-linux-gnu".into()
            })
        );
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.yaml");
        let summary = Summary::from_yaml(SUMMARY).unwrap();
        summary.write(&path).unwrap();
        assert_eq!(Summary::read(&path).unwrap(), summary);

        let missing = Summary::read(&dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(missing, SummaryError::Io { .. }));
        assert!(missing.to_string().starts_with("cannot access summary"));
    }
}
