use std::fmt;

use ustr::Ustr;

use crate::TargetSpec;

mod global;

pub use global::{
    AbsoluteSymbol, AliasTarget, GlobalAlias, GlobalVariable, Initializer, Linkage, TypeMetadata,
    Visibility,
};

/// Index of a global variable inside [`Module::globals`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalId(pub usize);

/// A `!type` fact: the global `global` carries `type_id` at byte `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeAttachment {
    pub global: GlobalId,
    pub offset: u64,
    pub type_id: Ustr,
}

/// One compilation unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Module {
    triple: String,
    globals: Vec<GlobalVariable>,
    aliases: Vec<GlobalAlias>,
    type_tests: Vec<Ustr>,
}

impl Module {
    pub fn new(triple: impl Into<String>) -> Self {
        Self {
            triple: triple.into(),
            ..Self::default()
        }
    }

    pub fn triple(&self) -> &str {
        &self.triple
    }

    pub fn set_triple(&mut self, triple: impl Into<String>) {
        self.triple = triple.into();
    }

    pub fn target(&self) -> Option<TargetSpec> {
        TargetSpec::from_triple(&self.triple)
    }

    pub fn globals(&self) -> &[GlobalVariable] {
        &self.globals
    }

    pub fn global(&self, name: &str) -> Option<&GlobalVariable> {
        self.globals.iter().find(|global| global.name.as_str() == name)
    }

    pub fn add_global(&mut self, global: GlobalVariable) -> GlobalId {
        self.globals.push(global);
        GlobalId(self.globals.len() - 1)
    }

    /// Removes the given globals, keeping the relative order of the rest.
    /// Every [`GlobalId`] handed out earlier is invalidated.
    pub fn remove_globals(&mut self, ids: &[GlobalId]) -> Vec<GlobalVariable> {
        let mut removed = Vec::with_capacity(ids.len());
        let mut kept = Vec::with_capacity(self.globals.len());
        for (index, global) in self.globals.drain(..).enumerate() {
            if ids.contains(&GlobalId(index)) {
                removed.push(global);
            } else {
                kept.push(global);
            }
        }
        self.globals = kept;
        removed
    }

    pub fn aliases(&self) -> &[GlobalAlias] {
        &self.aliases
    }

    pub fn alias(&self, name: &str) -> Option<&GlobalAlias> {
        self.aliases.iter().find(|alias| alias.name.as_str() == name)
    }

    pub fn add_alias(&mut self, alias: GlobalAlias) {
        self.aliases.push(alias);
    }

    /// Type identifiers that code in this unit tests membership of.
    pub fn type_tests(&self) -> &[Ustr] {
        &self.type_tests
    }

    pub fn add_type_test(&mut self, type_id: Ustr) {
        if !self.type_tests.contains(&type_id) {
            self.type_tests.push(type_id);
        }
    }

    /// Every `!type` attachment, in declaration order.
    pub fn type_attachments(&self) -> impl Iterator<Item = TypeAttachment> + '_ {
        self.globals
            .iter()
            .enumerate()
            .flat_map(|(index, global)| {
                global.type_metadata.iter().map(move |md| TypeAttachment {
                    global: GlobalId(index),
                    offset: md.offset,
                    type_id: md.type_id,
                })
            })
    }

    pub fn is_name_taken(&self, name: &str) -> bool {
        self.global(name).is_some() || self.alias(name).is_some()
    }
}

impl std::ops::Index<GlobalId> for Module {
    type Output = GlobalVariable;

    fn index(&self, id: GlobalId) -> &GlobalVariable {
        &self.globals[id.0]
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "target triple = \"{}\"", self.triple)?;

        if !self.globals.is_empty() {
            writeln!(f)?;
            for global in &self.globals {
                writeln!(f, "{global}")?;
            }
        }

        if !self.aliases.is_empty() {
            writeln!(f)?;
            for alias in &self.aliases {
                writeln!(f, "{alias}")?;
            }
        }

        if !self.type_tests.is_empty() {
            writeln!(f)?;
            f.write_str("!typetests = !{")?;
            for (i, type_id) in self.type_tests.iter().enumerate() {
                if i != 0 {
                    f.write_str(", ")?;
                }
                write!(f, "!\"{type_id}\"")?;
            }
            writeln!(f, "}}")?;
        }

        Ok(())
    }
}
