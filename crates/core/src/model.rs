use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    #[default]
    Low,
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryTier {
    Hints,
    Conventions,
    Assisted,
    #[default]
    Unknown,
}

impl DiscoveryTier {
    /// Lower-trust tiers must pass the deny-by-default config filter.
    pub fn requires_config_filter(self) -> bool {
        matches!(self, Self::Conventions | Self::Assisted)
    }

    pub fn folder_name(self) -> &'static str {
        match self {
            Self::Hints => "Tier 1 - App Hints Database",
            Self::Conventions => "Tier 2 - App Conventions",
            Self::Assisted => "Tier 3 - Assisted Research",
            Self::Unknown => "Unclassified",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum InstallMethod {
    Cask,
    Formula,
    Mas,
    Dmg,
    System,
    Npm,
    Pip,
    Cargo,
    #[default]
    #[serde(other)]
    Unknown,
}

/// One entry of the externally supplied application list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppCandidate {
    pub name: String,
    #[serde(default)]
    pub bundle_id: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveryResult {
    pub app_name: String,
    #[serde(default)]
    pub bundle_id: Option<String>,
    #[serde(default)]
    pub canonical_key: Option<String>,
    #[serde(default)]
    pub configuration_files: Vec<String>,
    #[serde(default)]
    pub xdg_configuration_files: Vec<String>,
    #[serde(default)]
    pub hints_paths: Vec<PathBuf>,
    #[serde(default)]
    pub conventions_paths: Vec<PathBuf>,
    #[serde(default)]
    pub assisted_paths: Vec<PathBuf>,
    #[serde(default)]
    pub source: DiscoveryTier,
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(default)]
    pub found_in_hints: bool,
    #[serde(default)]
    pub needs_followup: bool,
    #[serde(default)]
    pub install_method: Option<InstallMethod>,
    #[serde(default)]
    pub extensions_cmd: Option<String>,
    #[serde(default)]
    pub exclude_files: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl DiscoveryResult {
    pub fn new(app_name: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
            bundle_id: None,
            canonical_key: None,
            configuration_files: Vec::new(),
            xdg_configuration_files: Vec::new(),
            hints_paths: Vec::new(),
            conventions_paths: Vec::new(),
            assisted_paths: Vec::new(),
            source: DiscoveryTier::Unknown,
            confidence: Confidence::Low,
            found_in_hints: false,
            needs_followup: true,
            install_method: None,
            extensions_cmd: None,
            exclude_files: Vec::new(),
            notes: None,
        }
    }

    /// True when any tier produced a resolved, usable path.
    pub fn has_settings(&self) -> bool {
        !self.hints_paths.is_empty()
            || !self.conventions_paths.is_empty()
            || !self.assisted_paths.is_empty()
    }

    pub fn tier_paths(&self) -> impl Iterator<Item = (DiscoveryTier, &PathBuf)> {
        self.hints_paths
            .iter()
            .map(|path| (DiscoveryTier::Hints, path))
            .chain(
                self.conventions_paths
                    .iter()
                    .map(|path| (DiscoveryTier::Conventions, path)),
            )
            .chain(
                self.assisted_paths
                    .iter()
                    .map(|path| (DiscoveryTier::Assisted, path)),
            )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExclusionDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl ExclusionDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilterVerdict {
    pub accepted: bool,
    pub reason: String,
}

impl FilterVerdict {
    pub fn accept(reason: impl Into<String>) -> Self {
        Self {
            accepted: true,
            reason: reason.into(),
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: reason.into(),
        }
    }
}

/// One redacted span. `original` is always truncated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Change {
    pub pattern: String,
    pub original: String,
    pub line: usize,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    Success,
    Skipped,
    Partial,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DirectoryTally {
    pub files_processed: u64,
    pub files_filtered: u64,
    pub files_skipped: u64,
    pub tier_filtered: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupItemResult {
    pub source: PathBuf,
    pub destination: Option<PathBuf>,
    pub relative_destination: String,
    pub status: BackupStatus,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub filtered: bool,
    #[serde(default)]
    pub tier_filtered: bool,
    #[serde(default)]
    pub changes: Vec<Change>,
    #[serde(default)]
    pub errors: Vec<String>,
    pub discovery_tier: DiscoveryTier,
    #[serde(default)]
    pub plist_converted: bool,
    #[serde(default)]
    pub digest: Option<String>,
    #[serde(default)]
    pub directory: Option<DirectoryTally>,
}

impl BackupItemResult {
    pub fn pending(source: PathBuf, relative_destination: &str, tier: DiscoveryTier) -> Self {
        Self {
            source,
            destination: None,
            relative_destination: relative_destination.to_string(),
            status: BackupStatus::Success,
            reason: None,
            filtered: false,
            tier_filtered: false,
            changes: Vec::new(),
            errors: Vec::new(),
            discovery_tier: tier,
            plist_converted: false,
            digest: None,
            directory: None,
        }
    }

    pub fn skip(mut self, reason: impl Into<String>) -> Self {
        self.status = BackupStatus::Skipped;
        self.reason = Some(reason.into());
        self
    }

    pub fn fail(mut self, error: impl Into<String>) -> Self {
        let error = error.into();
        self.status = BackupStatus::Error;
        self.reason = Some(error.clone());
        self.errors.push(error);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupRunSummary {
    pub run_id: String,
    pub started_at: String,
    #[serde(default)]
    pub finished_at: Option<String>,
    pub output_root: PathBuf,
    pub include_secrets: bool,
    pub total_operations: u64,
    pub success: u64,
    pub partial: u64,
    pub skipped: u64,
    pub errors: u64,
    pub total_changes: u64,
    #[serde(default)]
    pub changes_by_pattern: BTreeMap<String, u64>,
}

impl BackupRunSummary {
    pub fn new(run_id: String, started_at: String, output_root: PathBuf, include_secrets: bool) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: None,
            output_root,
            include_secrets,
            total_operations: 0,
            success: 0,
            partial: 0,
            skipped: 0,
            errors: 0,
            total_changes: 0,
            changes_by_pattern: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, item: &BackupItemResult) {
        self.total_operations = self.total_operations.saturating_add(1);
        let counter = match item.status {
            BackupStatus::Success => &mut self.success,
            BackupStatus::Partial => &mut self.partial,
            BackupStatus::Skipped => &mut self.skipped,
            BackupStatus::Error => &mut self.errors,
        };
        *counter = counter.saturating_add(1);
        for change in &item.changes {
            self.total_changes = self.total_changes.saturating_add(1);
            let entry = self
                .changes_by_pattern
                .entry(change.pattern.clone())
                .or_insert(0);
            *entry = entry.saturating_add(1);
        }
    }

    /// Order-independent accumulation of another summary's counts.
    pub fn merge(&mut self, other: &BackupRunSummary) {
        self.total_operations = self.total_operations.saturating_add(other.total_operations);
        self.success = self.success.saturating_add(other.success);
        self.partial = self.partial.saturating_add(other.partial);
        self.skipped = self.skipped.saturating_add(other.skipped);
        self.errors = self.errors.saturating_add(other.errors);
        self.total_changes = self.total_changes.saturating_add(other.total_changes);
        for (pattern, count) in &other.changes_by_pattern {
            let entry = self.changes_by_pattern.entry(pattern.clone()).or_insert(0);
            *entry = entry.saturating_add(*count);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FollowupCandidate {
    pub app_name: String,
    #[serde(default)]
    pub bundle_id: Option<String>,
    pub score: i64,
    #[serde(default)]
    pub checked_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DiscoveryStats {
    pub total_apps: u64,
    pub with_settings: u64,
    pub found_in_hints: u64,
    pub needs_followup: u64,
    pub by_source: BTreeMap<DiscoveryTier, u64>,
    pub by_confidence: BTreeMap<Confidence, u64>,
}
