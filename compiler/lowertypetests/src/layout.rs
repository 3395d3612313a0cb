//! Merging the globals that carry type metadata into combined allocations.

use std::collections::BTreeSet;

use context::types::{ConcreteLayout, Type};
use context::{
    FxHashMap, GlobalId, GlobalVariable, Initializer, Linkage, Module, TargetSpec, Visibility,
};
use ustr::{ustr, Ustr};

use crate::error::LayoutError;

/// Largest alignment a merged global may ask for.
pub const MAX_ALIGNMENT: u64 = 1 << 32;

/// An original global and where it landed inside its merged allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedGlobal {
    pub id: GlobalId,
    pub name: Ustr,
    pub linkage: Linkage,
    pub visibility: Visibility,
    pub value_type: Type,
    pub offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergedAllocation {
    pub name: Ustr,
    pub align: u64,
    pub size: u64,
    pub is_constant: bool,
    /// `Initializer::Zero` unless some member has non-zero contents, in which
    /// case this is the full `size`-byte image.
    pub initializer: Initializer,
    pub members: Vec<PlacedGlobal>,
}

impl MergedAllocation {
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn to_global(&self) -> GlobalVariable {
        let mut global = GlobalVariable::new(
            &self.name,
            Type::byte_array(self.size),
            self.initializer.clone(),
        );
        global.linkage = Linkage::Private;
        global.is_constant = self.is_constant;
        global.align = Some(self.align);
        global
    }
}

/// Member offsets of one type identifier, relative to its allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeIdLayout {
    pub allocation: usize,
    pub offsets: BTreeSet<u64>,
}

#[derive(Debug, Default)]
pub struct Layout {
    allocations: Vec<MergedAllocation>,
    type_ids: FxHashMap<Ustr, TypeIdLayout>,
}

/// Union-find over type identifiers that share a global.
struct DisjointSets {
    parent: Vec<usize>,
}

impl DisjointSets {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        // keep the earliest identifier as the root
        if a < b {
            self.parent[b] = a;
        } else {
            self.parent[a] = b;
        }
    }
}

impl Layout {
    /// Lays out every global carrying metadata for an identifier accepted by
    /// `is_local`. Globals keep their declaration order inside an allocation,
    /// and allocations are ordered by their first global.
    pub fn build(
        module: &Module,
        target: &TargetSpec,
        is_local: impl Fn(Ustr) -> bool,
    ) -> Result<Self, LayoutError> {
        let attachments: Vec<_> = module
            .type_attachments()
            .filter(|att| is_local(att.type_id))
            .collect();

        let mut indices = FxHashMap::<Ustr, usize>::default();
        for att in &attachments {
            let next = indices.len();
            indices.entry(att.type_id).or_insert(next);
        }

        let mut sets = DisjointSets::new(indices.len());
        let mut first_type_id = FxHashMap::<GlobalId, usize>::default();
        for att in &attachments {
            let index = indices[&att.type_id];
            match first_type_id.get(&att.global) {
                Some(&first) => sets.union(first, index),
                None => {
                    first_type_id.insert(att.global, index);
                }
            }
        }

        for att in &attachments {
            let global = &module[att.global];
            if global.is_declaration() {
                return Err(LayoutError::Declaration { global: global.name });
            }
            let size = checked_layout(global, target)?.size;
            if att.offset >= size {
                return Err(LayoutError::OffsetOutOfBounds {
                    global: global.name,
                    offset: att.offset,
                    size,
                });
            }
        }

        // group globals by the root of their identifiers, in declaration order
        let mut groups: Vec<Vec<GlobalId>> = Vec::new();
        let mut group_of_root = FxHashMap::<usize, usize>::default();
        let mut globals: Vec<GlobalId> = first_type_id.keys().copied().collect();
        globals.sort();
        for &id in &globals {
            let root = sets.find(first_type_id[&id]);
            let next = groups.len();
            let group = *group_of_root.entry(root).or_insert(next);
            if group == groups.len() {
                groups.push(Vec::new());
            }
            groups[group].push(id);
        }

        // place everything before touching any bytes
        let mut placed = Vec::with_capacity(groups.len());
        for group in &groups {
            placed.push(place_group(module, target, group)?);
        }

        let mut allocations = Vec::with_capacity(groups.len());
        let mut counter = 0;
        for (members, align) in placed {
            let name = loop {
                let name = format!("__typetests.merged.{counter}");
                counter += 1;
                if !module.is_name_taken(&name) {
                    break ustr(&name);
                }
            };
            let size = members.last().map_or(0, |m: &PlacedGlobal| m.offset + m.size);
            let initializer = merged_image(module, name, size, &members)?;
            let is_constant = members.iter().all(|member| module[member.id].is_constant);
            tracing::trace!(%name, size, align, members = members.len(), "merged allocation");
            allocations.push(MergedAllocation {
                name,
                align,
                size,
                is_constant,
                initializer,
                members,
            });
        }

        let mut type_ids = FxHashMap::<Ustr, TypeIdLayout>::default();
        for att in &attachments {
            let root = sets.find(indices[&att.type_id]);
            let allocation = group_of_root[&root];
            let Some(member) = allocations[allocation]
                .members
                .iter()
                .find(|member| member.id == att.global)
            else {
                continue;
            };
            type_ids
                .entry(att.type_id)
                .or_insert_with(|| TypeIdLayout {
                    allocation,
                    offsets: BTreeSet::new(),
                })
                .offsets
                .insert(member.offset + att.offset);
        }

        Ok(Self {
            allocations,
            type_ids,
        })
    }

    pub fn allocations(&self) -> &[MergedAllocation] {
        &self.allocations
    }

    pub fn type_id(&self, type_id: Ustr) -> Option<&TypeIdLayout> {
        self.type_ids.get(&type_id)
    }

    /// Every original global that was merged away.
    pub fn merged_globals(&self) -> Vec<GlobalId> {
        self.allocations
            .iter()
            .flat_map(|alloc| alloc.members.iter().map(|member| member.id))
            .collect()
    }
}

fn checked_layout(global: &GlobalVariable, target: &TargetSpec) -> Result<ConcreteLayout, LayoutError> {
    global
        .layout(target)
        .ok_or(LayoutError::AddressSpaceExhausted {
            global: global.name,
            bits: target.pointer_bits(),
        })
}

/// Concatenates member contents. All-zero allocations stay
/// `zeroinitializer` and never get a buffer.
fn merged_image(
    module: &Module,
    name: Ustr,
    size: u64,
    members: &[PlacedGlobal],
) -> Result<Initializer, LayoutError> {
    let has_contents = members.iter().any(|member| {
        module[member.id]
            .initializer
            .as_ref()
            .is_some_and(|init| !init.is_zero())
    });
    if !has_contents {
        return Ok(Initializer::Zero);
    }

    let too_large = LayoutError::ImageTooLarge {
        allocation: name,
        size,
    };
    let len = usize::try_from(size).map_err(|_| too_large.clone())?;
    let mut bytes = Vec::new();
    bytes.try_reserve_exact(len).map_err(|_| too_large)?;
    bytes.resize(len, 0);
    for member in members {
        if let Some(init) = &module[member.id].initializer {
            // offsets fit: the whole allocation does
            let start = member.offset as usize;
            init.write_to(&mut bytes[start..start + member.size as usize]);
        }
    }
    Ok(Initializer::Bytes(bytes))
}

fn place_group(
    module: &Module,
    target: &TargetSpec,
    group: &[GlobalId],
) -> Result<(Vec<PlacedGlobal>, u64), LayoutError> {
    let mut members = Vec::with_capacity(group.len());
    let mut end = 0u64;
    let mut max_align = 1;

    for &id in group {
        let global = &module[id];
        let layout = checked_layout(global, target)?;
        if layout.align > MAX_ALIGNMENT {
            return Err(LayoutError::AlignmentTooLarge {
                global: global.name,
                align: layout.align,
                max: MAX_ALIGNMENT,
            });
        }
        let exhausted = LayoutError::AddressSpaceExhausted {
            global: global.name,
            bits: target.pointer_bits(),
        };
        let offset = context::align_to(end, layout.align).ok_or(exhausted.clone())?;
        end = offset.checked_add(layout.size).ok_or(exhausted.clone())?;
        if end > target.max_offset() {
            return Err(exhausted);
        }
        max_align = max_align.max(layout.align);

        members.push(PlacedGlobal {
            id,
            name: global.name,
            linkage: global.linkage,
            visibility: global.visibility,
            value_type: global.value_type.clone(),
            offset,
            size: layout.size,
        });
    }

    Ok((members, max_align))
}

#[cfg(test)]
mod tests {
    use super::*;
    use context::read_module;

    const SOURCE: &str = r#"
target triple = "x86_64-unknown-linux-gnu"

@a = constant [10 x i8] c"\01\02\03\04\05\06\07\08\09\0A", !type !{i64 0, !"A"}, !type !{i64 6, !"A"}
@plain = global i32 7
@b = constant { i64, i64 } zeroinitializer, align 16, !type !{i64 8, !"B"}, !type !{i64 0, !"A"}
@c = global i16 513, !type !{i64 0, !"C"}
"#;

    fn build(src: &str) -> (Module, Result<Layout, LayoutError>) {
        let module = read_module(src).unwrap();
        let target = module.target().unwrap();
        let layout = Layout::build(&module, &target, |_| true);
        (module, layout)
    }

    #[test]
    fn groups_follow_shared_globals() {
        let (_, layout) = build(SOURCE);
        let layout = layout.unwrap();
        assert_eq!(layout.allocations().len(), 2);

        let merged = &layout.allocations()[0];
        assert_eq!(merged.name.as_str(), "__typetests.merged.0");
        assert_eq!(merged.align, 16);
        assert_eq!(merged.size(), 32);
        assert!(merged.is_constant);
        let offsets: Vec<_> = merged.members.iter().map(|m| (m.name.as_str(), m.offset)).collect();
        assert_eq!(offsets, vec![("a", 0), ("b", 16)]);
        let Initializer::Bytes(bytes) = &merged.initializer else {
            panic!("expected a byte image, got {:?}", merged.initializer);
        };
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[..10], &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        assert!(bytes[10..].iter().all(|&b| b == 0));

        assert_eq!(layout.type_id(ustr("A")).unwrap().offsets, BTreeSet::from([0, 6, 16]));
        assert_eq!(layout.type_id(ustr("B")).unwrap().offsets, BTreeSet::from([24]));
        assert_eq!(layout.type_id(ustr("B")).unwrap().allocation, 0);

        let c = &layout.allocations()[1];
        assert_eq!(c.initializer, Initializer::Bytes(vec![1, 2]));
        assert!(!c.is_constant);
        assert_eq!(layout.type_id(ustr("C")).unwrap().allocation, 1);

        assert_eq!(layout.merged_globals(), vec![GlobalId(0), GlobalId(2), GlobalId(3)]);
    }

    #[test]
    fn placement_is_deterministic() {
        let (_, first) = build(SOURCE);
        let (_, second) = build(SOURCE);
        assert_eq!(first.unwrap().allocations(), second.unwrap().allocations());
    }

    #[test]
    fn skips_non_local_identifiers() {
        let module = read_module(SOURCE).unwrap();
        let target = module.target().unwrap();
        let layout = Layout::build(&module, &target, |id| id.as_str() != "A").unwrap();
        // without `A`, @a is untouched and @b stands alone
        assert_eq!(layout.allocations().len(), 2);
        assert_eq!(layout.allocations()[0].members[0].name.as_str(), "b");
        assert_eq!(layout.allocations()[0].size(), 16);
        assert!(layout.type_id(ustr("A")).is_none());
    }

    #[test]
    fn avoids_taken_names() {
        let (_, layout) = build(
            "target triple = \"x86_64-unknown-linux-gnu\"\n\
             @__typetests.merged.0 = global i8 0\n\
             @x = global i8 0, !type !{i64 0, !\"X\"}\n",
        );
        assert_eq!(layout.unwrap().allocations()[0].name.as_str(), "__typetests.merged.1");
    }

    #[test]
    fn layout_errors() {
        let (_, layout) = build(
            "target triple = \"x86_64-unknown-linux-gnu\"\n@x = global i32 0, !type !{i64 4, !\"X\"}\n",
        );
        assert_eq!(
            layout.unwrap_err(),
            LayoutError::OffsetOutOfBounds {
                global: ustr("x"),
                offset: 4,
                size: 4
            }
        );

        let (_, layout) = build(
            "target triple = \"i686-unknown-linux-gnu\"\n\
             @x = global [3000000000 x i8] zeroinitializer, !type !{i64 0, !\"X\"}\n\
             @y = global [3000000000 x i8] zeroinitializer, !type !{i64 0, !\"X\"}\n",
        );
        assert_eq!(
            layout.unwrap_err(),
            LayoutError::AddressSpaceExhausted {
                global: ustr("y"),
                bits: 32
            }
        );

        let (_, layout) = build(
            "target triple = \"x86_64-unknown-linux-gnu\"\n@x = global i8 0, align 8589934592, !type !{i64 0, !\"X\"}\n",
        );
        assert!(matches!(layout.unwrap_err(), LayoutError::AlignmentTooLarge { .. }));

        // the element count overflows 64 bits
        let (_, layout) = build(
            "target triple = \"x86_64-unknown-linux-gnu\"\n\
             @x = global [4294967296 x [4294967296 x i8]] zeroinitializer, !type !{i64 0, !\"X\"}\n",
        );
        assert_eq!(
            layout.unwrap_err(),
            LayoutError::AddressSpaceExhausted {
                global: ustr("x"),
                bits: 64
            }
        );
    }

    #[test]
    fn zero_filled_allocations_have_no_image() {
        let (_, layout) = build(
            "target triple = \"x86_64-unknown-linux-gnu\"\n\
             @big = global [1099511627776 x i8] zeroinitializer, !type !{i64 0, !\"X\"}\n\
             @small = global i64 0, !type !{i64 0, !\"X\"}\n",
        );
        let layout = layout.unwrap();
        let merged = &layout.allocations()[0];
        assert_eq!(merged.size(), (1 << 40) + 8);
        assert_eq!(merged.initializer, Initializer::Zero);
        assert_eq!(
            merged.to_global().to_string(),
            "@__typetests.merged.0 = private global [1099511627784 x i8] zeroinitializer, align 8"
        );
    }
}
