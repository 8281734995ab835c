use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use tracing::warn;

use crate::error::{HintsError, PathSecurityError};
use crate::locations::Locations;
use crate::model::InstallMethod;
use crate::paths::check_relative;

const BUILTIN_HINTS: &str = include_str!("../data/app-hints.yaml");
const APP_SUFFIXES: &[&str] = &[".app", "-app", " app"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct HintEntry {
    pub bundle_id: Option<String>,
    pub configuration_files: Vec<String>,
    pub xdg_configuration_files: Vec<String>,
    pub install_method: Option<InstallMethod>,
    pub extensions_cmd: Option<String>,
    pub exclude_files: Vec<String>,
    pub notes: Option<String>,
}

/// Matched hints entry together with the key it was found under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HintsFinding {
    pub key: String,
    pub entry: HintEntry,
}

/// Curated, trusted app configuration locations. Entries keep their declaration order.
#[derive(Debug, Clone, Default)]
pub struct HintsDatabase {
    entries: Vec<(String, HintEntry)>,
}

impl HintsDatabase {
    pub fn builtin() -> Result<Self, HintsError> {
        Self::from_yaml_str(BUILTIN_HINTS)
    }

    pub fn load(path: &Path) -> Result<Self, HintsError> {
        let text = fs::read_to_string(path).map_err(|source| HintsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Parses and validates every declared path. One unsafe path rejects the whole
    /// database.
    pub fn from_yaml_str(text: &str) -> Result<Self, HintsError> {
        let mapping: Option<Mapping> = serde_yaml::from_str(text)?;
        let mut entries = Vec::new();

        for (key, value) in mapping.unwrap_or_default() {
            let Some(key) = key.as_str().map(str::to_string) else {
                warn!("hints key {key:?} is not a string; entry ignored");
                continue;
            };
            let entry = match value {
                Value::Null => HintEntry::default(),
                other => serde_yaml::from_value::<HintEntry>(other)?,
            };
            validate_entry(&key, &entry)?;
            entries.push((key, entry));
        }

        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&HintEntry> {
        self.entries
            .iter()
            .find(|(candidate, _)| candidate == key)
            .map(|(_, entry)| entry)
    }

    /// Exact normalized name, then suffix-stripped name, then bundle id, then the
    /// bundle id's last segment.
    pub fn lookup(&self, app_name: &str, bundle_id: Option<&str>) -> Option<HintsFinding> {
        let normalized = normalize_app_name(app_name);
        if let Some(found) = self.finding(&normalized) {
            return Some(found);
        }

        for suffix in APP_SUFFIXES {
            if let Some(stripped) = normalized.strip_suffix(suffix) {
                if let Some(found) = self.finding(stripped) {
                    return Some(found);
                }
            }
        }

        let bundle_id = bundle_id.filter(|bid| !bid.is_empty())?;
        if let Some((key, entry)) = self
            .entries
            .iter()
            .find(|(_, entry)| entry.bundle_id.as_deref() == Some(bundle_id))
        {
            return Some(HintsFinding {
                key: key.clone(),
                entry: entry.clone(),
            });
        }

        let last_segment = bundle_id.rsplit('.').next()?.to_lowercase();
        self.finding(&last_segment)
    }

    pub fn list_apps(&self) -> Vec<&str> {
        self.entries.iter().map(|(key, _)| key.as_str()).collect()
    }

    pub fn apps_by_install_method(&self, method: InstallMethod) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.install_method == Some(method))
            .map(|(key, _)| key.as_str())
            .collect()
    }

    fn finding(&self, key: &str) -> Option<HintsFinding> {
        self.get(key).map(|entry| HintsFinding {
            key: key.to_string(),
            entry: entry.clone(),
        })
    }
}

pub fn normalize_app_name(name: &str) -> String {
    name.trim().to_lowercase().replace([' ', '_'], "-")
}

/// Absolute home and XDG paths declared by an entry.
pub fn resolve_hint_paths(
    entry: &HintEntry,
    locations: &Locations,
    check_exists: bool,
) -> Vec<PathBuf> {
    entry
        .configuration_files
        .iter()
        .map(|rel| locations.home_path(rel))
        .chain(
            entry
                .xdg_configuration_files
                .iter()
                .map(|rel| locations.xdg_path(rel)),
        )
        .filter(|path| !check_exists || path.exists())
        .collect()
}

fn validate_entry(key: &str, entry: &HintEntry) -> Result<(), HintsError> {
    let declared = entry
        .configuration_files
        .iter()
        .map(|value| ("configuration_files", value))
        .chain(
            entry
                .xdg_configuration_files
                .iter()
                .map(|value| ("xdg_configuration_files", value)),
        );
    for (field, value) in declared {
        let checked = if value.contains("..") {
            Err(PathSecurityError::Traversal(value.clone()))
        } else {
            check_relative(value)
        };
        checked.map_err(|source| HintsError::UnsafePath {
            app: key.to_string(),
            field,
            value: value.clone(),
            source,
        })?;
    }

    for value in &entry.exclude_files {
        if value.starts_with('/') {
            return Err(HintsError::UnsafePath {
                app: key.to_string(),
                field: "exclude_files",
                value: value.clone(),
                source: PathSecurityError::Absolute(value.clone()),
            });
        }
    }
    Ok(())
}
