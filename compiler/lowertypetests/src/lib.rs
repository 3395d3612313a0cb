//! Lowering of type membership tests into bit tests over merged globals.
//!
//! A run takes the `!type` attachments of every identifier the module tests,
//! merges the globals that carry them into combined allocations, picks the
//! cheapest encoding of each identifier's member set and emits the
//! `__typeid_<id>_*` symbols that describe it. Identifiers nobody tests are
//! left alone. A [`Summary`] lets separately compiled units share decisions.

mod bitset;
mod byte_array;
mod config;
mod emit;
mod error;
mod layout;
mod summary;

use context::types::Type;
use context::{FxHashMap, FxHashSet, GlobalVariable, Initializer, Linkage, Module, TargetSpec};
use ustr::{ustr, Ustr};

pub use bitset::{choose_kind, BitSetInfo, BitSetResolution, Representation, ResolutionKind};
pub use byte_array::{ByteArrayBuilder, FirstFitPacking, LanePacking, PackingStrategy, Placement};
pub use config::{PackingKind, PassConfig, SummaryAction};
pub use emit::{symbol_name, Emission};
pub use error::{ConfigError, ConsistencyError, Error, InvariantError, LayoutError, SummaryError};
pub use layout::{Layout, MergedAllocation, PlacedGlobal, MAX_ALIGNMENT};
pub use summary::{
    ArgList, ByArgKind, ByArgResolution, Summary, TypeIdSummary, TypeTestResolution, WpdKind,
    WpdResolution,
};

use bitset::Encoded;
use emit::Emitter;

/// Name of the global holding every byte array bitmap.
pub const BYTE_ARRAY_NAME: &str = "__typetests.bits";

/// How a run interacts with the cross-unit summary.
pub enum SummaryMode<'a> {
    Standalone,
    /// Identifiers present in the summary take its resolution verbatim.
    Import(&'a Summary),
    /// Every resolution of the run is recorded.
    Export(&'a mut Summary),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeIdResolution {
    Local {
        resolution: BitSetResolution,
        /// `None` for identifiers without members.
        allocation: Option<Ustr>,
        /// Offset of `global_addr` inside the allocation.
        global_addr_offset: u64,
    },
    Imported(TypeTestResolution),
}

impl TypeIdResolution {
    pub fn kind(&self) -> ResolutionKind {
        match self {
            TypeIdResolution::Local { resolution, .. } => resolution.kind(),
            TypeIdResolution::Imported(record) => record.kind,
        }
    }
}

/// Where a merged global now lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalPlacement {
    pub allocation: Ustr,
    pub offset: u64,
}

/// What a run decided.
#[derive(Debug)]
pub struct Lowering {
    target: TargetSpec,
    type_ids: Vec<Ustr>,
    resolutions: FxHashMap<Ustr, TypeIdResolution>,
    placements: FxHashMap<Ustr, GlobalPlacement>,
    byte_array: Vec<u8>,
}

impl Lowering {
    /// Identifiers in the order their symbols were emitted.
    pub fn type_ids(&self) -> &[Ustr] {
        &self.type_ids
    }

    pub fn get(&self, type_id: &str) -> Option<&TypeIdResolution> {
        self.resolutions.get(&ustr(type_id))
    }

    /// Resolution computed by this run; `None` for imported identifiers.
    pub fn resolution(&self, type_id: &str) -> Option<&BitSetResolution> {
        match self.get(type_id)? {
            TypeIdResolution::Local { resolution, .. } => Some(resolution),
            TypeIdResolution::Imported(_) => None,
        }
    }

    pub fn kind(&self, type_id: &str) -> Option<ResolutionKind> {
        self.get(type_id).map(TypeIdResolution::kind)
    }

    pub fn placement(&self, global: &str) -> Option<GlobalPlacement> {
        self.placements.get(&ustr(global)).copied()
    }

    pub fn byte_array(&self) -> &[u8] {
        &self.byte_array
    }

    /// Runs the check the emitted symbols describe for a pointer `offset`
    /// bytes into the identifier's merged allocation. `None` when the
    /// identifier is unknown or was resolved by another unit.
    pub fn is_member(&self, type_id: &str, offset: u64) -> Option<bool> {
        match self.get(type_id)? {
            TypeIdResolution::Local {
                resolution,
                global_addr_offset,
                ..
            } => Some(resolution.test(
                offset.wrapping_sub(*global_addr_offset),
                self.target.pointer_bits(),
                &self.byte_array,
            )),
            TypeIdResolution::Imported(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LowerTypeTests {
    packing: PackingKind,
}

impl LowerTypeTests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_packing(packing: PackingKind) -> Self {
        Self { packing }
    }

    pub fn run(&self, module: &mut Module, mode: SummaryMode<'_>) -> Result<Lowering, Error> {
        self.run_with_strategy(module, mode, self.packing.strategy())
    }

    /// Like [`LowerTypeTests::run`] with a custom byte array packing.
    ///
    /// Every check happens before the module is touched, so on error the
    /// module and the summary are left as they were.
    pub fn run_with_strategy(
        &self,
        module: &mut Module,
        mode: SummaryMode<'_>,
        strategy: Box<dyn PackingStrategy>,
    ) -> Result<Lowering, Error> {
        let target = module
            .target()
            .ok_or_else(|| Error::UnknownTarget(module.triple().to_owned()))?;
        let span = tracing::info_span!("lower_type_tests", triple = module.triple());
        let _enter = span.enter();

        let (imports, exports) = match &mode {
            SummaryMode::Standalone => (None, None),
            SummaryMode::Import(summary) => {
                summary.check_target(module.triple())?;
                (Some(&**summary), None)
            }
            SummaryMode::Export(summary) => {
                summary.check_target(module.triple())?;
                (None, Some(&**summary))
            }
        };
        let exporting = exports.is_some();

        let type_ids = collect_type_ids(module, exports);
        let used: FxHashSet<Ustr> = type_ids.iter().copied().collect();
        let mut imported = FxHashMap::<Ustr, TypeTestResolution>::default();
        if let Some(summary) = imports {
            for &type_id in &type_ids {
                if let Some(record) = summary.type_test(&type_id) {
                    record.validate(type_id, &target)?;
                    imported.insert(type_id, *record);
                }
            }
        }

        let layout = Layout::build(module, &target, |type_id| {
            used.contains(&type_id) && !imported.contains_key(&type_id)
        })?;
        let (resolutions, byte_array) = resolve(&type_ids, &imported, &layout, &target, strategy)?;

        let mut records = Vec::new();
        if let SummaryMode::Export(summary) = &mode {
            for &type_id in &type_ids {
                if let Some(TypeIdResolution::Local { resolution, .. }) = resolutions.get(&type_id) {
                    let record = TypeTestResolution::from_local(resolution, &target);
                    summary.check_record(&type_id, &record)?;
                    records.push((type_id, record));
                }
            }
        }

        let bits_name = unique_name(module, BYTE_ARRAY_NAME);
        let mut emitter = Emitter::new(&target, exporting);
        for &type_id in &type_ids {
            match &resolutions[&type_id] {
                TypeIdResolution::Local {
                    resolution,
                    allocation: Some(base),
                    global_addr_offset,
                } => emitter.local(type_id, resolution, *base, *global_addr_offset, bits_name),
                TypeIdResolution::Local { .. } => {}
                TypeIdResolution::Imported(record) => emitter.imported(type_id, record),
            }
        }
        let mut placements = FxHashMap::default();
        for alloc in layout.allocations() {
            emitter.replace(alloc);
            for member in &alloc.members {
                placements.insert(
                    member.name,
                    GlobalPlacement {
                        allocation: alloc.name,
                        offset: member.offset,
                    },
                );
            }
        }
        let emission = emitter.finish();

        // nothing below can fail
        module.remove_globals(&layout.merged_globals());
        for alloc in layout.allocations() {
            module.add_global(alloc.to_global());
        }
        if !byte_array.is_empty() {
            let mut bits = GlobalVariable::new(
                &bits_name,
                Type::byte_array(byte_array.len() as u64),
                Initializer::from_bytes(byte_array.clone()),
            );
            bits.linkage = Linkage::Private;
            bits.is_constant = true;
            module.add_global(bits);
        }
        for decl in emission.globals {
            module.add_global(decl);
        }
        for alias in emission.aliases {
            module.add_alias(alias);
        }

        if let SummaryMode::Export(summary) = mode {
            for (type_id, record) in records {
                summary.record(&type_id, record);
            }
            summary.target.get_or_insert_with(|| module.triple().to_owned());
        }

        tracing::info!(
            type_ids = type_ids.len(),
            imported = imported.len(),
            allocations = layout.allocations().len(),
            byte_array = byte_array.len(),
            "lowered type tests"
        );

        Ok(Lowering {
            target,
            type_ids,
            resolutions,
            placements,
            byte_array,
        })
    }
}

/// Identifiers the run lowers: the ones this unit tests, and the ones an
/// export summary already knows about. Identifiers with members come first
/// in declaration order, then identifiers that are only tested.
fn collect_type_ids(module: &Module, exports: Option<&Summary>) -> Vec<Ustr> {
    let tested: FxHashSet<Ustr> = module.type_tests().iter().copied().collect();
    let is_used = |type_id: &Ustr| {
        tested.contains(type_id)
            || exports.is_some_and(|summary| summary.type_ids.contains_key(type_id.as_str()))
    };

    let mut seen = FxHashSet::default();
    module
        .type_attachments()
        .map(|att| att.type_id)
        .filter(|type_id| is_used(type_id))
        .chain(module.type_tests().iter().copied())
        .filter(|&type_id| seen.insert(type_id))
        .collect()
}

fn unique_name(module: &Module, base: &str) -> Ustr {
    if !module.is_name_taken(base) {
        return ustr(base);
    }
    (1..)
        .map(|n| format!("{base}.{n}"))
        .find(|name| !module.is_name_taken(name))
        .map_or_else(|| ustr(base), |name| ustr(&name))
}

type Resolutions = FxHashMap<Ustr, TypeIdResolution>;

/// Encodes every identifier not taken from the summary, then lays out the
/// byte arrays, largest first.
fn resolve(
    type_ids: &[Ustr],
    imported: &FxHashMap<Ustr, TypeTestResolution>,
    layout: &Layout,
    target: &TargetSpec,
    strategy: Box<dyn PackingStrategy>,
) -> Result<(Resolutions, Vec<u8>), InvariantError> {
    let mut resolutions = Resolutions::default();
    let mut pending = Vec::new();

    for &type_id in type_ids {
        if let Some(record) = imported.get(&type_id) {
            tracing::debug!(%type_id, kind = %record.kind, "imported type identifier");
            resolutions.insert(type_id, TypeIdResolution::Imported(*record));
            continue;
        }

        let (info, allocation) = match layout.type_id(type_id) {
            Some(members) => {
                let alloc = &layout.allocations()[members.allocation];
                if let Some(&offset) = members.offsets.iter().find(|&&off| off >= alloc.size()) {
                    return Err(InvariantError::OffsetOutsideAllocation {
                        type_id,
                        offset,
                        size: alloc.size(),
                    });
                }
                (BitSetInfo::new(members.offsets.iter().copied()), Some(alloc.name))
            }
            None => (BitSetInfo::default(), None),
        };

        match bitset::encode(&info, target) {
            Encoded::Resolved(resolution) => {
                log_resolution(type_id, &resolution);
                resolutions.insert(
                    type_id,
                    TypeIdResolution::Local {
                        resolution,
                        allocation,
                        global_addr_offset: info.byte_offset,
                    },
                );
            }
            Encoded::NeedsByteArray => pending.push((type_id, info, allocation)),
        }
    }

    // stable, so equal sizes keep identifier order
    pending.sort_by(|a, b| b.1.bit_size().cmp(&a.1.bit_size()));
    let mut builder = ByteArrayBuilder::new(strategy);
    for (type_id, info, allocation) in pending {
        let placement = builder.allocate(type_id, &info.bits, info.bit_size())?;
        let resolution = BitSetResolution::byte_array(&info, placement);
        log_resolution(type_id, &resolution);
        resolutions.insert(
            type_id,
            TypeIdResolution::Local {
                resolution,
                allocation,
                global_addr_offset: info.byte_offset,
            },
        );
    }

    Ok((resolutions, builder.into_bytes()))
}

fn log_resolution(type_id: Ustr, res: &BitSetResolution) {
    tracing::debug!(
        %type_id,
        kind = %res.kind(),
        align_log2 = res.align_log2,
        size_m1 = res.size_m1,
        "resolved type identifier"
    );
}

/// Runs the pass as configured, reading the summary before and writing it
/// after the run.
pub fn run_with_config(module: &mut Module, config: &PassConfig) -> Result<Lowering, Error> {
    config.validate()?;
    let mut summary = match &config.read_summary {
        Some(path) => Summary::read(path)?,
        None => Summary::default(),
    };

    let pass = LowerTypeTests::with_packing(config.packing);
    match config.summary_action {
        SummaryAction::None => pass.run(module, SummaryMode::Standalone),
        SummaryAction::Import => pass.run(module, SummaryMode::Import(&summary)),
        SummaryAction::Export => {
            let lowering = pass.run(module, SummaryMode::Export(&mut summary))?;
            if let Some(path) = &config.write_summary {
                summary.write(path)?;
            }
            Ok(lowering)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use context::read_module;

    fn reference(triple: &str) -> Module {
        read_module(&format!(
            "target triple = \"{triple}\"\n\
             @vt = constant [2048 x i8] zeroinitializer, \
             !type !{{i64 0, !\"typeid1\"}}, !type !{{i64 6, !\"typeid1\"}}, \
             !type !{{i64 4, !\"typeid2\"}}, !type !{{i64 136, !\"typeid2\"}}\n\
             !typetests = !{{!\"typeid1\", !\"typeid2\", !\"typeid3\"}}\n"
        ))
        .unwrap()
    }

    fn alias_text(module: &Module, name: &str) -> String {
        module.alias(name).unwrap().to_string()
    }

    #[test]
    fn reference_scenario_on_64_bit_registers() {
        for triple in ["x86_64-unknown-linux-gnu", "aarch64-unknown-linux-gnu"] {
            let mut module = reference(triple);
            let lowering = LowerTypeTests::new()
                .run(&mut module, SummaryMode::Standalone)
                .unwrap();

            let typeid1 = lowering.resolution("typeid1").unwrap();
            assert_eq!(typeid1.repr, Representation::Inline { bits: 9 });
            assert_eq!((typeid1.align_log2, typeid1.size_m1), (1, 3));

            let typeid2 = lowering.resolution("typeid2").unwrap();
            assert_eq!(typeid2.repr, Representation::Inline { bits: 8589934593 });
            assert_eq!((typeid2.align_log2, typeid2.size_m1), (2, 33));
            assert_eq!(lowering.kind("typeid3"), Some(ResolutionKind::AllZeros));
            assert!(lowering.byte_array().is_empty());

            assert_eq!(
                alias_text(&module, "__typeid_typeid2_global_addr"),
                "@__typeid_typeid2_global_addr = internal alias i8, \
                 getelementptr (i8, ptr @__typetests.merged.0, i64 4)"
            );
            assert_eq!(
                alias_text(&module, "__typeid_typeid2_inline_bits"),
                "@__typeid_typeid2_inline_bits = internal alias i64, inttoptr (i64 8589934593 to ptr)"
            );
            assert!(module.alias("__typeid_typeid3_global_addr").is_none());
        }
    }

    #[test]
    fn reference_scenario_on_32_bit_registers() {
        let mut module = reference("i686-unknown-linux-gnu");
        let lowering = LowerTypeTests::new()
            .run(&mut module, SummaryMode::Standalone)
            .unwrap();

        assert_eq!(lowering.kind("typeid1"), Some(ResolutionKind::Inline));
        let typeid2 = lowering.resolution("typeid2").unwrap();
        assert_eq!(typeid2.kind(), ResolutionKind::ByteArray);
        // architecture-independent facts agree with the 64-bit targets
        assert_eq!((typeid2.align_log2, typeid2.size_m1), (2, 33));
        assert_eq!(typeid2.size_m1_bit_width(), 7);

        let mut expected = vec![0; 34];
        expected[0] = 1;
        expected[33] = 1;
        assert_eq!(lowering.byte_array(), expected.as_slice());
        assert_eq!(
            alias_text(&module, "__typeid_typeid2_byte_array"),
            "@__typeid_typeid2_byte_array = internal alias i8, getelementptr (i8, ptr @__typetests.bits, i32 0)"
        );
        assert_eq!(
            alias_text(&module, "__typeid_typeid2_size_m1"),
            "@__typeid_typeid2_size_m1 = internal alias i32, inttoptr (i32 33 to ptr)"
        );
        assert_eq!(module.global("__typetests.bits").unwrap().value_type, Type::byte_array(34));
    }

    #[test]
    fn simulated_tests_match_members() {
        for triple in ["i686-unknown-linux-gnu", "x86_64-unknown-linux-gnu", "wasm32-unknown-unknown"] {
            let mut module = reference(triple);
            let lowering = LowerTypeTests::new()
                .run(&mut module, SummaryMode::Standalone)
                .unwrap();
            for offset in 0..2048 {
                assert_eq!(lowering.is_member("typeid1", offset), Some(offset == 0 || offset == 6));
                assert_eq!(lowering.is_member("typeid2", offset), Some(offset == 4 || offset == 136));
                assert_eq!(lowering.is_member("typeid3", offset), Some(false));
            }
            assert_eq!(lowering.is_member("unknown", 0), None);
        }
    }

    const PARTLY_TESTED: &str = "target triple = \"x86_64-unknown-linux-gnu\"\n\
         @a = constant [16 x i8] zeroinitializer, !type !{i64 0, !\"A\"}, !type !{i64 8, !\"A\"}\n\
         @b = constant [16 x i8] zeroinitializer, !type !{i64 0, !\"B\"}, !type !{i64 12, !\"B\"}\n\
         !typetests = !{!\"A\"}\n";

    #[test]
    fn untested_identifiers_are_left_alone() {
        let mut module = read_module(PARTLY_TESTED).unwrap();
        let lowering = LowerTypeTests::new()
            .run(&mut module, SummaryMode::Standalone)
            .unwrap();

        assert_eq!(lowering.type_ids(), &[ustr("A")]);
        assert_eq!(lowering.kind("B"), None);
        assert!(module
            .aliases()
            .iter()
            .all(|alias| !alias.name.starts_with("__typeid_B_")));
        // @b only carries `B`, so it is not merged
        assert_eq!(module.global("b").unwrap().type_metadata.len(), 2);
        assert!(module.alias("b").is_none());
        assert!(module.alias("a").is_some());
    }

    #[test]
    fn export_summaries_pull_in_known_identifiers() {
        let mut summary = Summary::default();
        summary.type_ids.insert("B".into(), TypeIdSummary::default());
        let mut module = read_module(PARTLY_TESTED).unwrap();
        let lowering = LowerTypeTests::new()
            .run(&mut module, SummaryMode::Export(&mut summary))
            .unwrap();

        assert_eq!(lowering.kind("B"), Some(ResolutionKind::Inline));
        assert_eq!(summary.type_test("B").unwrap().kind, ResolutionKind::Inline);
        assert!(module.alias("b").is_some());
    }

    #[test]
    fn merged_globals_keep_their_size() {
        let mut module = read_module(
            "target triple = \"x86_64-unknown-linux-gnu\"\n\
             @pad = global i8 1, !type !{i64 0, !\"P\"}\n\
             @obj = hidden global [24 x i8] zeroinitializer, align 8, \
             !type !{i64 0, !\"A\"}, !type !{i64 8, !\"A\"}, !type !{i64 16, !\"B\"}, !type !{i64 0, !\"P\"}\n\
             !typetests = !{!\"A\", !\"B\", !\"P\"}\n",
        )
        .unwrap();
        let target = module.target().unwrap();
        let original = module.global("obj").unwrap().layout(&target).unwrap().size;

        let lowering = LowerTypeTests::new()
            .run(&mut module, SummaryMode::Standalone)
            .unwrap();
        assert!(module.global("obj").is_none());
        let alias = module.alias("obj").unwrap();
        assert_eq!(alias.value_type.layout(&target).unwrap().size, original);
        assert_eq!(alias.visibility, context::Visibility::Hidden);
        assert_eq!(
            alias.to_string(),
            "@obj = hidden alias [24 x i8], getelementptr (i8, ptr @__typetests.merged.0, i64 8)"
        );
        assert_eq!(
            lowering.placement("obj"),
            Some(GlobalPlacement {
                allocation: ustr("__typetests.merged.0"),
                offset: 8
            })
        );
        assert_eq!(module.global("__typetests.merged.0").unwrap().align, Some(8));
    }

    #[test]
    fn export_then_import_reproduces_constants() {
        let triple = "aarch64-unknown-linux-gnu";
        let mut direct = reference(triple);
        LowerTypeTests::new()
            .run(&mut direct, SummaryMode::Standalone)
            .unwrap();

        let mut summary = Summary::default();
        let mut exporter = reference(triple);
        LowerTypeTests::new()
            .run(&mut exporter, SummaryMode::Export(&mut summary))
            .unwrap();
        assert_eq!(summary.target.as_deref(), Some(triple));
        let summary = Summary::from_yaml(&summary.to_yaml().unwrap()).unwrap();

        let mut importer = read_module(&format!(
            "target triple = \"{triple}\"\n!typetests = !{{!\"typeid1\", !\"typeid2\"}}\n"
        ))
        .unwrap();
        let lowering = LowerTypeTests::new()
            .run(&mut importer, SummaryMode::Import(&summary))
            .unwrap();
        assert!(matches!(lowering.get("typeid1"), Some(TypeIdResolution::Imported(_))));
        assert_eq!(lowering.is_member("typeid1", 0), None);

        for type_id in ["typeid1", "typeid2"] {
            for suffix in ["align", "size_m1", "inline_bits"] {
                let name = symbol_name(ustr(type_id), suffix);
                assert_eq!(importer.alias(&name), direct.alias(&name), "{name}");
            }
        }
        assert!(importer
            .global("__typeid_typeid1_global_addr")
            .unwrap()
            .is_declaration());
    }

    #[test]
    fn byte_arrays_survive_a_summary_on_32_bit_registers() {
        let triple = "armv7-unknown-linux-gnueabihf";
        let mut direct = reference(triple);
        let lowering = LowerTypeTests::new()
            .run(&mut direct, SummaryMode::Standalone)
            .unwrap();
        assert_eq!(lowering.kind("typeid2"), Some(ResolutionKind::ByteArray));

        let mut summary = Summary::default();
        let mut exporter = reference(triple);
        LowerTypeTests::new()
            .run(&mut exporter, SummaryMode::Export(&mut summary))
            .unwrap();
        let summary = Summary::from_yaml(&summary.to_yaml().unwrap()).unwrap();
        let record = summary.type_test("typeid2").unwrap();
        assert_eq!(record.kind, ResolutionKind::ByteArray);
        assert_eq!((record.align_log2, record.size_m1), (2, 33));
        assert!(record.bit_mask.is_power_of_two());

        let mut importer = read_module(&format!(
            "target triple = \"{triple}\"\n!typetests = !{{!\"typeid1\", !\"typeid2\"}}\n"
        ))
        .unwrap();
        let lowering = LowerTypeTests::new()
            .run(&mut importer, SummaryMode::Import(&summary))
            .unwrap();
        assert_eq!(lowering.kind("typeid2"), Some(ResolutionKind::ByteArray));

        for suffix in ["align", "size_m1", "bit_mask"] {
            let name = symbol_name(ustr("typeid2"), suffix);
            assert!(importer.alias(&name).is_some(), "{name}");
            assert_eq!(importer.alias(&name), direct.alias(&name), "{name}");
        }
        assert!(importer
            .global("__typeid_typeid2_byte_array")
            .unwrap()
            .is_declaration());
        assert!(direct.alias("__typeid_typeid2_byte_array").is_some());
    }

    #[test]
    fn lowered_modules_read_back() {
        let mut standalone = reference("i686-unknown-linux-gnu");
        LowerTypeTests::new()
            .run(&mut standalone, SummaryMode::Standalone)
            .unwrap();

        let mut summary = Summary::default();
        let mut exporter = reference("x86_64-unknown-linux-gnu");
        LowerTypeTests::new()
            .run(&mut exporter, SummaryMode::Export(&mut summary))
            .unwrap();
        let mut importer = read_module(
            "target triple = \"x86_64-unknown-linux-gnu\"\n\
             !typetests = !{!\"typeid1\", !\"typeid2\"}\n",
        )
        .unwrap();
        LowerTypeTests::new()
            .run(&mut importer, SummaryMode::Import(&summary))
            .unwrap();
        assert!(importer
            .globals()
            .iter()
            .any(|global| global.absolute_symbol.is_some()));

        for module in [standalone, exporter, importer] {
            let printed = module.to_string();
            let reread = read_module(&printed).unwrap();
            assert_eq!(reread.to_string(), printed);
            assert_eq!(reread, module);
        }
    }

    #[test]
    fn oversized_globals_are_layout_errors() {
        let mut module = read_module(
            "target triple = \"x86_64-unknown-linux-gnu\"\n\
             @x = global [4294967296 x [4294967296 x i8]] zeroinitializer, !type !{i64 0, !\"X\"}\n\
             !typetests = !{!\"X\"}\n",
        )
        .unwrap();
        let before = module.clone();
        let err = LowerTypeTests::new()
            .run(&mut module, SummaryMode::Standalone)
            .unwrap_err();
        assert!(
            matches!(err, Error::Layout(LayoutError::AddressSpaceExhausted { bits: 64, .. })),
            "{err}"
        );
        assert_eq!(err.to_string(), "placing global `x` exceeds the 64-bit address space");
        assert_eq!(module, before);
    }

    #[test]
    fn absolute_symbol_targets_export_zeros() {
        let mut summary = Summary::default();
        let mut module = reference("x86_64-unknown-linux-gnu");
        LowerTypeTests::new()
            .run(&mut module, SummaryMode::Export(&mut summary))
            .unwrap();

        let typeid2 = summary.type_test("typeid2").unwrap();
        assert_eq!(typeid2.kind, ResolutionKind::Inline);
        assert_eq!(typeid2.size_m1_bit_width, 6);
        assert_eq!((typeid2.align_log2, typeid2.size_m1, typeid2.inline_bits), (0, 0, 0));
        assert_eq!(
            alias_text(&module, "__typeid_typeid2_align"),
            "@__typeid_typeid2_align = hidden alias i8, inttoptr (i8 2 to ptr)"
        );
        assert_eq!(summary.type_test("typeid3").unwrap().kind, ResolutionKind::AllZeros);
    }

    #[test]
    fn conflicts_leave_everything_untouched() {
        let mut summary = Summary::default();
        summary.record(
            "typeid1",
            TypeTestResolution {
                kind: ResolutionKind::Single,
                ..TypeTestResolution::default()
            },
        );
        let before = summary.clone();
        let mut module = reference("aarch64-unknown-linux-gnu");
        let original = module.clone();

        let err = LowerTypeTests::new()
            .run(&mut module, SummaryMode::Export(&mut summary))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "conflicting type test resolutions for `typeid1`: summary has Single, this unit computed Inline"
        );
        assert_eq!(module, original);
        assert_eq!(summary, before);
    }

    #[test]
    fn import_rejects_foreign_and_malformed_summaries() {
        let mut summary = Summary::default();
        summary.target = Some("aarch64-unknown-linux-gnu".into());
        let mut module = reference("i686-unknown-linux-gnu");
        let err = LowerTypeTests::new()
            .run(&mut module, SummaryMode::Import(&summary))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Consistency(ConsistencyError::TargetMismatch { .. })
        ));

        let mut summary = Summary::default();
        summary.record(
            "typeid2",
            TypeTestResolution {
                kind: ResolutionKind::Inline,
                size_m1_bit_width: 6,
                ..TypeTestResolution::default()
            },
        );
        let err = LowerTypeTests::new()
            .run(&mut module, SummaryMode::Import(&summary))
            .unwrap_err();
        assert!(err.to_string().starts_with("internal error: malformed Inline resolution"));
        assert!(module.alias("__typeid_typeid1_global_addr").is_none());
    }

    #[test]
    fn unknown_targets_are_rejected() {
        let mut module = Module::new("sparc-sun-solaris");
        let err = LowerTypeTests::new()
            .run(&mut module, SummaryMode::Standalone)
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown target triple `sparc-sun-solaris`");
    }

    #[test]
    fn packing_strategies_agree_on_membership() {
        let src = "target triple = \"i686-unknown-linux-gnu\"\n\
                   @a = constant [400 x i8] zeroinitializer, \
                   !type !{i64 0, !\"X\"}, !type !{i64 396, !\"X\"}, \
                   !type !{i64 4, !\"Y\"}, !type !{i64 200, !\"Y\"}, \
                   !type !{i64 8, !\"Z\"}, !type !{i64 12, !\"Z\"}, !type !{i64 300, !\"Z\"}\n\
                   !typetests = !{!\"X\", !\"Y\", !\"Z\"}\n";
        for packing in [PackingKind::Lane, PackingKind::FirstFit] {
            let mut module = read_module(src).unwrap();
            let lowering = LowerTypeTests::with_packing(packing)
                .run(&mut module, SummaryMode::Standalone)
                .unwrap();
            for offset in 0..400 {
                assert_eq!(lowering.is_member("X", offset), Some(offset == 0 || offset == 396));
                assert_eq!(lowering.is_member("Y", offset), Some(offset == 4 || offset == 200));
                assert_eq!(
                    lowering.is_member("Z", offset),
                    Some(matches!(offset, 8 | 12 | 300)),
                    "{packing}"
                );
            }
        }
    }

    #[test]
    fn config_drives_summary_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.yaml");

        let mut module = reference("aarch64-unknown-linux-gnu");
        let export = PassConfig {
            summary_action: SummaryAction::Export,
            write_summary: Some(path.clone()),
            ..PassConfig::default()
        };
        run_with_config(&mut module, &export).unwrap();
        let written = Summary::read(&path).unwrap();
        assert_eq!(written.type_test("typeid1").unwrap().inline_bits, 9);

        let mut module = reference("aarch64-unknown-linux-gnu");
        let import = PassConfig {
            summary_action: SummaryAction::Import,
            read_summary: Some(path),
            ..PassConfig::default()
        };
        let lowering = run_with_config(&mut module, &import).unwrap();
        assert_eq!(lowering.kind("typeid2"), Some(ResolutionKind::Inline));
        assert!(lowering.resolution("typeid2").is_none());

        let missing = PassConfig {
            summary_action: SummaryAction::Import,
            ..PassConfig::default()
        };
        assert!(matches!(
            run_with_config(&mut module, &missing),
            Err(Error::Config(ConfigError::MissingImportSummary))
        ));
    }
}
