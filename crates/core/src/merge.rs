use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config_filter::ConfigTypeFilter;
use crate::conventions::ConventionFinding;
use crate::hints::HintsFinding;
use crate::locations::Locations;
use crate::model::{AppCandidate, Confidence, DiscoveryResult, DiscoveryTier, InstallMethod};
use crate::paths::{check_relative, location_key};

/// Externally researched locations for one app. Carries no trust.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct AssistedFinding {
    pub configuration_files: Vec<String>,
    pub xdg_configuration_files: Vec<String>,
    pub confidence: Option<Confidence>,
    pub install_method: Option<InstallMethod>,
    pub notes: Option<String>,
}

impl AssistedFinding {
    pub fn is_empty(&self) -> bool {
        self.configuration_files.is_empty() && self.xdg_configuration_files.is_empty()
    }
}

/// Everything each tier reported for one app, kept so a result can be re-derived.
#[derive(Debug, Clone, Default)]
pub struct TierInputs {
    pub hints: Option<HintsFinding>,
    pub conventions: Option<ConventionFinding>,
    pub assisted: Option<AssistedFinding>,
}

/// Combines tier findings into one canonical record, highest trust first.
#[derive(Debug, Clone, Copy)]
pub struct DiscoveryMerger<'a> {
    locations: &'a Locations,
    filter: &'a ConfigTypeFilter,
}

impl<'a> DiscoveryMerger<'a> {
    pub fn new(locations: &'a Locations, filter: &'a ConfigTypeFilter) -> Self {
        Self { locations, filter }
    }

    pub fn merge(&self, app: &AppCandidate, inputs: &TierInputs) -> DiscoveryResult {
        let mut result = DiscoveryResult::new(&app.name);
        result.bundle_id = app.bundle_id.clone().filter(|bid| !bid.is_empty());

        let mut home_list = DeclaredList::default();
        let mut xdg_list = DeclaredList::default();
        let mut hints = ResolvedSet::default();
        let mut conventions = ResolvedSet::default();
        let mut assisted = ResolvedSet::default();

        if let Some(finding) = &inputs.hints {
            let entry = &finding.entry;
            result.found_in_hints = true;
            result.canonical_key = Some(finding.key.clone());
            if entry.bundle_id.is_some() {
                result.bundle_id = entry.bundle_id.clone();
            }
            result.install_method = entry.install_method;
            result.extensions_cmd = entry.extensions_cmd.clone();
            result.exclude_files = entry.exclude_files.clone();
            result.notes = entry.notes.clone();

            for rel in &entry.configuration_files {
                home_list.add(rel);
                hints.add_existing(self.locations.home_path(rel));
            }
            for rel in &entry.xdg_configuration_files {
                xdg_list.add(rel);
                hints.add_existing(self.locations.xdg_path(rel));
            }
        }

        if let Some(finding) = &inputs.conventions {
            if result.bundle_id.is_none() {
                result.bundle_id = finding.bundle_id.clone();
            }
            let declared = self.untrusted_paths(
                &app.name,
                DiscoveryTier::Conventions,
                &finding.configuration_files,
                &finding.xdg_configuration_files,
            );
            for (rel, is_xdg, path) in declared {
                if is_xdg {
                    xdg_list.add(&rel);
                } else {
                    home_list.add(&rel);
                }
                self.add_filtered(&mut conventions, path, &[&hints]);
            }
        }

        let assisted_input = inputs.assisted.as_ref().filter(|_| !result.found_in_hints);
        if let Some(finding) = assisted_input {
            if result.install_method.is_none() {
                result.install_method = finding.install_method;
            }
            if result.notes.is_none() {
                result.notes = finding.notes.clone();
            }
            let declared = self.untrusted_paths(
                &app.name,
                DiscoveryTier::Assisted,
                &finding.configuration_files,
                &finding.xdg_configuration_files,
            );
            for (rel, is_xdg, path) in declared {
                if is_xdg {
                    xdg_list.add(&rel);
                } else {
                    home_list.add(&rel);
                }
                self.add_filtered(&mut assisted, path, &[&hints, &conventions]);
            }
        }

        let (source, confidence) = if result.found_in_hints {
            (DiscoveryTier::Hints, Confidence::High)
        } else if let Some(finding) = inputs.conventions.as_ref().filter(|f| !f.is_empty()) {
            (DiscoveryTier::Conventions, finding.confidence)
        } else if let Some(finding) = assisted_input.filter(|f| !f.is_empty()) {
            (
                DiscoveryTier::Assisted,
                finding.confidence.unwrap_or(Confidence::Low),
            )
        } else {
            (DiscoveryTier::Unknown, Confidence::Low)
        };
        result.source = source;
        result.confidence = confidence;

        result.configuration_files = home_list.into_sorted();
        result.xdg_configuration_files = xdg_list.into_sorted();
        result.hints_paths = hints.into_sorted();
        result.conventions_paths = conventions.into_sorted();
        result.assisted_paths = assisted.into_sorted();
        result.needs_followup = !result.found_in_hints && !result.has_settings();
        result
    }

    /// Drops declared paths that are absolute or climb out of their root.
    fn untrusted_paths(
        &self,
        app_name: &str,
        tier: DiscoveryTier,
        home: &[String],
        xdg: &[String],
    ) -> Vec<(String, bool, PathBuf)> {
        let declared = home
            .iter()
            .map(|rel| (rel, false))
            .chain(xdg.iter().map(|rel| (rel, true)));

        let mut accepted = Vec::new();
        for (rel, is_xdg) in declared {
            if let Err(err) = check_relative(rel) {
                warn!(app = app_name, tier = ?tier, "ignoring declared path: {err}");
                continue;
            }
            let path = if is_xdg {
                self.locations.xdg_path(rel)
            } else {
                self.locations.home_path(rel)
            };
            accepted.push((rel.clone(), is_xdg, path));
        }
        accepted
    }

    fn add_filtered(&self, target: &mut ResolvedSet, path: PathBuf, higher: &[&ResolvedSet]) {
        if !path.exists() {
            return;
        }
        let key = location_key(&path);
        if higher.iter().any(|set| set.contains(&key)) {
            return;
        }
        let verdict = if path.is_dir() {
            self.filter.is_config_directory(&path)
        } else {
            self.filter.is_config_file(&path)
        };
        if verdict.accepted {
            target.insert(key, path);
        }
    }
}

/// Declared relative paths, deduplicated case-insensitively without a trailing `/`.
#[derive(Debug, Default)]
struct DeclaredList {
    seen: HashSet<String>,
    values: Vec<String>,
}

impl DeclaredList {
    fn add(&mut self, rel: &str) {
        let trimmed = rel.trim_end_matches('/');
        if trimmed.is_empty() {
            return;
        }
        if self.seen.insert(trimmed.to_lowercase()) {
            self.values.push(trimmed.to_string());
        }
    }

    fn into_sorted(mut self) -> Vec<String> {
        self.values.sort();
        self.values
    }
}

/// Existing locations keyed by their resolved, case-folded identity.
#[derive(Debug, Default)]
struct ResolvedSet {
    keys: HashSet<String>,
    paths: Vec<PathBuf>,
}

impl ResolvedSet {
    fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    fn add_existing(&mut self, path: PathBuf) {
        if path.exists() {
            let key = location_key(&path);
            self.insert(key, path);
        }
    }

    fn insert(&mut self, key: String, path: PathBuf) {
        if self.keys.insert(key) {
            self.paths.push(fs::canonicalize(&path).unwrap_or(path));
        }
    }

    fn into_sorted(mut self) -> Vec<PathBuf> {
        self.paths.sort();
        self.paths
    }
}
