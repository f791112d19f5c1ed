//! Subcommand implementations

use crate::records::RecordsFile;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;
use tally_core::{ConfigFormat, Stat, StatOptions, StatsDocument, UpdateMode, Value};

/// Output format of `run`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => anyhow::bail!("unknown output format '{other}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldReport {
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatReport {
    pub name: String,
    pub update_mode: UpdateMode,
    pub state: String,
    pub fields: Vec<FieldReport>,
}

impl StatReport {
    fn of(stat: &Stat) -> Self {
        Self {
            name: stat.name().to_string(),
            update_mode: stat.update_mode(),
            state: stat.state().to_string(),
            fields: stat
                .values()
                .into_iter()
                .map(|(name, value)| FieldReport { name, value })
                .collect(),
        }
    }
}

/// Settings of one `run` invocation
#[derive(Debug, Clone, Default)]
pub struct RunSettings {
    /// Overrides the update mode of every stat
    pub mode: Option<UpdateMode>,
    pub options: StatOptions,
}

pub fn load_document(path: &Path) -> Result<StatsDocument> {
    let format = ConfigFormat::from_path(path)?;
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration from {}", path.display()))?;
    StatsDocument::decode(&text, format)
        .with_context(|| format!("invalid configuration in {}", path.display()))
}

pub fn save_document(doc: &StatsDocument, path: &Path) -> Result<()> {
    let format = ConfigFormat::from_path(path)?;
    let text = doc.encode(format)?;
    std::fs::write(path, text)
        .with_context(|| format!("failed to write configuration to {}", path.display()))
}

/// Attach the configured stats to a fresh store, feed the records and bring
/// every stat up to date
pub fn run(config: &Path, records: &Path, settings: &RunSettings) -> Result<Vec<StatReport>> {
    let doc = load_document(config)?;
    let records = RecordsFile::load(records)?;
    let store = records.build_store()?;

    let mut stats = Vec::with_capacity(doc.stats.len());
    for mut stat_config in doc.stats {
        if let Some(mode) = settings.mode {
            stat_config.update_mode = mode;
        }
        let stat = Stat::from_config(&stat_config)?;
        stat.apply_options(&settings.options)?;
        stats.push(store.add_stat(stat)?);
    }

    let fed = records.feed(&store)?;
    tracing::info!("Fed {} records into {} stats", fed, stats.len());

    let mut reports = Vec::with_capacity(stats.len());
    for stat in &stats {
        let state = stat
            .update(true, true)
            .with_context(|| format!("update of stat '{}' failed", stat.name()))?;
        tracing::debug!("Stat '{}' settled as {}", stat.name(), state);
        reports.push(StatReport::of(stat));
    }
    Ok(reports)
}

pub fn render(reports: &[StatReport], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(reports)?),
        OutputFormat::Text => {
            let mut out = String::new();
            for report in reports {
                writeln!(
                    out,
                    "{} ({}, {})",
                    report.name, report.update_mode, report.state
                )?;
                for field in &report.fields {
                    writeln!(out, "  {} = {}", field.name, field.value)?;
                }
            }
            Ok(out)
        }
    }
}

/// Re-encode a configuration file; the format follows each file's extension
pub fn convert(from: &Path, to: &Path) -> Result<usize> {
    let doc = load_document(from)?;
    save_document(&doc, to)?;
    Ok(doc.stats.len())
}

/// Validate a configuration file, including that every operation exists
pub fn check(config: &Path) -> Result<usize> {
    let doc = load_document(config)?;
    for stat_config in &doc.stats {
        Stat::from_config(stat_config)?;
    }
    Ok(doc.stats.len())
}
