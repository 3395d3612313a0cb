use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WpdKind {
    #[default]
    Indir,
    SingleImpl,
    BranchFunnel,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ByArgKind {
    #[default]
    Indir,
    UniformRetVal,
    UniqueRetVal,
    VirtualConstProp,
}

/// Devirtualization decision for the calls through one vtable slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct WpdResolution {
    pub kind: WpdKind,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub single_impl_name: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub res_by_arg: BTreeMap<ArgList, ByArgResolution>,
}

/// Decision for calls whose constant arguments are known.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ByArgResolution {
    pub kind: ByArgKind,
    pub info: u64,
    pub byte: u32,
    pub bit: u32,
}

/// Constant call arguments, written as `1,2,3` when used as a map key.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArgList(pub Vec<u64>);

impl fmt::Display for ArgList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arg) in self.0.iter().enumerate() {
            if i != 0 {
                f.write_str(",")?;
            }
            write!(f, "{arg}")?;
        }
        Ok(())
    }
}

impl Serialize for ArgList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct ArgListVisitor;

impl<'de> Visitor<'de> for ArgListVisitor {
    type Value = ArgList;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a comma-separated list of integers")
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<ArgList, E> {
        Ok(ArgList(vec![value]))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<ArgList, E> {
        u64::try_from(value)
            .map(|value| ArgList(vec![value]))
            .map_err(|_| E::invalid_value(de::Unexpected::Signed(value), &self))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<ArgList, E> {
        if value.is_empty() {
            return Ok(ArgList::default());
        }
        value
            .split(',')
            .map(|arg| arg.trim().parse())
            .collect::<Result<_, _>>()
            .map(ArgList)
            .map_err(|_| E::invalid_value(de::Unexpected::Str(value), &self))
    }
}

impl<'de> Deserialize<'de> for ArgList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ArgListVisitor)
    }
}
