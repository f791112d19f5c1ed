//! Staleness states and update modes
//!
//! [`StatState`] is ordered so that the more demanding state dominates:
//! `UpToDate < NeedsUpdate < NeedsRescan`.

use crate::error::{Result, StatError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How far a stat's cached values have drifted from the true aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum StatState {
    /// Values are current
    #[default]
    UpToDate,
    /// Per-record updates are queued
    NeedsUpdate,
    /// Only a full rescan restores the values
    NeedsRescan,
}

impl StatState {
    /// Combine two states; the more demanding one wins
    #[inline]
    #[must_use]
    pub fn escalate(self, other: StatState) -> StatState {
        self.max(other)
    }
}

impl fmt::Display for StatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UpToDate => "UpToDate",
            Self::NeedsUpdate => "NeedsUpdate",
            Self::NeedsRescan => "NeedsRescan",
        };
        f.write_str(s)
    }
}

/// Policy governing how a stat reacts to record changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum UpdateMode {
    /// Values are frozen; notifications are ignored
    #[serde(alias = "StatUpdateMode::Disabled")]
    Disabled,
    /// Changes are queued until `update` is called on the caller's thread
    #[default]
    #[serde(alias = "StatUpdateMode::Manual")]
    Manual,
    /// Every change is applied promptly by a background worker
    #[serde(alias = "StatUpdateMode::OnAdd")]
    OnAdd,
    /// Queued changes are flushed by a background worker on a timer
    #[serde(alias = "StatUpdateMode::OnTimer")]
    OnTimer,
}

impl UpdateMode {
    /// All modes
    pub const ALL: [UpdateMode; 4] = [Self::Disabled, Self::Manual, Self::OnAdd, Self::OnTimer];

    /// Check if the mode runs work on a background worker
    #[inline]
    #[must_use]
    pub fn is_async(self) -> bool {
        matches!(self, Self::OnAdd | Self::OnTimer)
    }

    /// Persisted spelling
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "Disabled",
            Self::Manual => "Manual",
            Self::OnAdd => "OnAdd",
            Self::OnTimer => "OnTimer",
        }
    }
}

impl fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateMode {
    type Err = StatError;

    fn from_str(s: &str) -> Result<Self> {
        let bare = s.strip_prefix("StatUpdateMode::").unwrap_or(s);
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == bare)
            .ok_or_else(|| StatError::InvalidArgument(format!("unknown update mode '{s}'")))
    }
}
