use std::env;
use std::fmt;
use std::path::PathBuf;

use crate::byte_array::{FirstFitPacking, LanePacking, PackingStrategy};
use crate::error::ConfigError;

/// What a run does with the cross-unit summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SummaryAction {
    #[default]
    None,
    Import,
    Export,
}

impl SummaryAction {
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        match spec.to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "import" => Ok(Self::Import),
            "export" => Ok(Self::Export),
            _ => Err(ConfigError::UnknownSummaryAction(spec.to_owned())),
        }
    }
}

impl fmt::Display for SummaryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SummaryAction::None => "none",
            SummaryAction::Import => "import",
            SummaryAction::Export => "export",
        };
        f.write_str(text)
    }
}

/// Byte array packing heuristic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PackingKind {
    #[default]
    Lane,
    FirstFit,
}

impl PackingKind {
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        match spec.to_ascii_lowercase().as_str() {
            "lane" | "lanes" => Ok(Self::Lane),
            "first-fit" | "firstfit" => Ok(Self::FirstFit),
            _ => Err(ConfigError::UnknownPacking(spec.to_owned())),
        }
    }

    pub fn strategy(self) -> Box<dyn PackingStrategy> {
        match self {
            PackingKind::Lane => Box::<LanePacking>::default(),
            PackingKind::FirstFit => Box::<FirstFitPacking>::default(),
        }
    }
}

impl fmt::Display for PackingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PackingKind::Lane => "lane",
            PackingKind::FirstFit => "first-fit",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassConfig {
    pub summary_action: SummaryAction,
    /// Summary read before the run. Required for imports; for exports it
    /// seeds the summary the run adds to.
    pub read_summary: Option<PathBuf>,
    /// Where the summary goes after an export.
    pub write_summary: Option<PathBuf>,
    pub packing: PackingKind,
}

impl PassConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let var = |name: &str| env::var_os(name).map(|value| value.to_string_lossy().to_string());
        let summary_action = var("LOWERTYPETESTS_SUMMARY_ACTION");
        let read_summary = var("LOWERTYPETESTS_READ_SUMMARY");
        let write_summary = var("LOWERTYPETESTS_WRITE_SUMMARY");
        let packing = var("LOWERTYPETESTS_PACKING");
        apply_env_overrides(
            Self::default(),
            EnvOverrides {
                summary_action: summary_action.as_deref(),
                read_summary: read_summary.as_deref(),
                write_summary: write_summary.as_deref(),
                packing: packing.as_deref(),
            },
        )
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.summary_action == SummaryAction::Import && self.read_summary.is_none() {
            return Err(ConfigError::MissingImportSummary);
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct EnvOverrides<'a> {
    summary_action: Option<&'a str>,
    read_summary: Option<&'a str>,
    write_summary: Option<&'a str>,
    packing: Option<&'a str>,
}

fn apply_env_overrides(
    mut config: PassConfig,
    overrides: EnvOverrides<'_>,
) -> Result<PassConfig, ConfigError> {
    if let Some(spec) = overrides.summary_action {
        config.summary_action = SummaryAction::parse(spec)?;
    }
    if let Some(path) = overrides.read_summary.filter(|path| !path.is_empty()) {
        config.read_summary = Some(PathBuf::from(path));
    }
    if let Some(path) = overrides.write_summary.filter(|path| !path.is_empty()) {
        config.write_summary = Some(PathBuf::from(path));
    }
    if let Some(spec) = overrides.packing {
        config.packing = PackingKind::parse(spec)?;
    }
    Ok(config)
}
