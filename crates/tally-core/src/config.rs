//! Persisted configuration and runtime options
//!
//! Only the shape of a stat is persisted: its name, update mode and ordered
//! field list. Accumulator values never are, so a stat loaded from
//! configuration starts out needing a rescan.

use crate::error::{Result, StatError};
use crate::state::UpdateMode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Persisted shape of one stat field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatFieldConfig {
    /// Stat field name
    pub stat_field_name: String,
    /// Schema name
    pub schema_name: String,
    /// Record type name
    pub record_type_name: String,
    /// Record field name
    pub field_name: String,
    /// Operation registry key
    pub operation_name: String,
}

impl StatFieldConfig {
    fn attributes(&self) -> [(&'static str, &str); 5] {
        [
            ("stat field name", self.stat_field_name.as_str()),
            ("schema name", self.schema_name.as_str()),
            ("record type name", self.record_type_name.as_str()),
            ("field name", self.field_name.as_str()),
            ("operation name", self.operation_name.as_str()),
        ]
    }
}

/// Persisted shape of one stat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatConfig {
    /// Stat name
    pub name: String,
    /// Update mode
    #[serde(default)]
    pub update_mode: UpdateMode,
    /// Ordered fields
    #[serde(default)]
    pub fields: Vec<StatFieldConfig>,
}

impl StatConfig {
    /// Check names before saving or building a stat
    ///
    /// # Errors
    /// [`StatError::InvalidArgument`] naming the stat and field for an empty
    /// attribute or a repeated field name
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(StatError::InvalidArgument(
                "stat name must not be empty".to_string(),
            ));
        }
        for (i, field) in self.fields.iter().enumerate() {
            for (attribute, value) in field.attributes() {
                if value.is_empty() {
                    return Err(StatError::InvalidArgument(format!(
                        "stat '{}', field '{}': {attribute} must not be empty",
                        self.name, field.stat_field_name
                    )));
                }
            }
            if self.fields[..i]
                .iter()
                .any(|f| f.stat_field_name == field.stat_field_name)
            {
                return Err(StatError::InvalidArgument(format!(
                    "stat '{}', field '{}': duplicate field name",
                    self.name, field.stat_field_name
                )));
            }
        }
        Ok(())
    }
}

/// A list of stats, the unit written to and read from files
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsDocument {
    /// Stats in file order
    #[serde(default)]
    pub stats: Vec<StatConfig>,
}

/// Text encoding of a [`StatsDocument`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigFormat {
    /// JSON via `serde_json`
    Json,
    /// YAML via `serde_yaml`
    Yaml,
}

impl ConfigFormat {
    /// Detect format from a file extension
    ///
    /// # Errors
    /// [`StatError::InvalidArgument`] for anything but `.json`, `.yaml` or
    /// `.yml`
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Ok(Self::Json),
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
                Ok(Self::Yaml)
            }
            _ => Err(StatError::InvalidArgument(format!(
                "cannot infer configuration format of '{}'",
                path.display()
            ))),
        }
    }
}

impl StatsDocument {
    /// Validate every stat
    ///
    /// # Errors
    /// First validation failure, or a repeated stat name
    pub fn validate(&self) -> Result<()> {
        for (i, stat) in self.stats.iter().enumerate() {
            stat.validate()?;
            if self.stats[..i].iter().any(|s| s.name == stat.name) {
                return Err(StatError::InvalidArgument(format!(
                    "stat '{}' defined twice",
                    stat.name
                )));
            }
        }
        Ok(())
    }

    /// Encode as text; validates first
    ///
    /// # Errors
    /// Validation or serializer failure
    pub fn encode(&self, format: ConfigFormat) -> Result<String> {
        self.validate()?;
        let text = match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self)?,
            ConfigFormat::Yaml => serde_yaml::to_string(self)?,
        };
        Ok(text)
    }

    /// Decode from text; validates afterwards
    ///
    /// # Errors
    /// Parser or validation failure
    pub fn decode(text: &str, format: ConfigFormat) -> Result<Self> {
        let doc: Self = match format {
            ConfigFormat::Json => serde_json::from_str(text)?,
            ConfigFormat::Yaml => serde_yaml::from_str(text)?,
        };
        doc.validate()?;
        Ok(doc)
    }
}

/// Runtime knobs of a stat that are not part of its persisted shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatOptions {
    /// Upper bound for `update(.., wait = true)`; 0 waits until settled
    pub update_timeout_ms: u64,
    /// Flush period of `OnTimer` mode
    pub timer_period_ms: u64,
}

impl StatOptions {
    /// Create default options
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With update timeout
    #[inline]
    #[must_use]
    pub fn with_update_timeout_ms(mut self, ms: u64) -> Self {
        self.update_timeout_ms = ms;
        self
    }

    /// With timer period
    #[inline]
    #[must_use]
    pub fn with_timer_period_ms(mut self, ms: u64) -> Self {
        self.timer_period_ms = ms;
        self
    }

    /// Update timeout as a duration
    #[inline]
    #[must_use]
    pub fn update_timeout(&self) -> Duration {
        Duration::from_millis(self.update_timeout_ms)
    }

    /// Timer period as a duration
    #[inline]
    #[must_use]
    pub fn timer_period(&self) -> Duration {
        Duration::from_millis(self.timer_period_ms)
    }
}

impl Default for StatOptions {
    fn default() -> Self {
        Self {
            update_timeout_ms: 0,
            timer_period_ms: 1000,
        }
    }
}
