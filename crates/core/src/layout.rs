use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::BackupError;
use crate::model::{DiscoveryResult, DiscoveryTier};
use crate::paths::sanitize_component;

const RUN_STAMP_FORMAT: &str = "%Y-%m-%d-%H%M%S";

const KNOWN_EDITORS: &[&str] = &[
    "vscode",
    "vscode-insiders",
    "code",
    "code-insiders",
    "visual-studio-code",
    "cursor",
    "zed",
    "sublime",
    "sublime-text",
    "sublime-text-3",
    "sublime-text-4",
    "intellij",
    "intellij-idea",
    "intellij-ce",
    "intellij-idea-ce",
    "pycharm",
    "pycharm-ce",
    "webstorm",
    "goland",
    "clion",
    "rider",
    "rubymine",
    "datagrip",
    "phpstorm",
    "appcode",
    "android-studio",
    "vim",
    "neovim",
    "nvim",
    "emacs",
    "textmate",
    "bbedit",
    "nova",
    "coteditor",
    "atom",
    "brackets",
    "helix",
    "ultraedit",
];

/// One source to copy, with its place inside the run directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlannedItem {
    pub source: PathBuf,
    pub relative_destination: String,
    pub tier: DiscoveryTier,
    /// App-specific exclude globs, only carried for hints-tier items.
    #[serde(default)]
    pub exclude_files: Vec<String>,
    /// Overrides the run-wide secret filtering for this item and its children.
    #[serde(default)]
    pub filter_secrets: Option<bool>,
}

pub fn folder_key(result: &DiscoveryResult) -> String {
    let raw = result
        .canonical_key
        .clone()
        .filter(|key| !key.is_empty())
        .unwrap_or_else(|| result.app_name.to_lowercase().replace(' ', "-"));
    sanitize_component(&raw)
}

pub fn category_for(folder_key: &str) -> &'static str {
    if KNOWN_EDITORS.contains(&folder_key) {
        "editors"
    } else {
        "apps"
    }
}

/// `{category}/{folder_key}/{tier folder}/{file name}` for every existing resolved path.
pub fn plan_app_backups(result: &DiscoveryResult) -> Vec<PlannedItem> {
    let key = folder_key(result);
    let category = category_for(&key);
    let mut used = HashSet::new();
    let mut planned = Vec::new();

    for (tier, path) in result.tier_paths() {
        if !path.exists() {
            continue;
        }
        let Some(name) = path.file_name().map(|name| name.to_string_lossy().to_string()) else {
            continue;
        };
        let prefix = format!("{category}/{key}/{}", tier.folder_name());
        let mut relative = format!("{prefix}/{name}");
        let mut counter = 2_u32;
        while !used.insert(relative.to_lowercase()) {
            relative = format!("{prefix}/{name}-{counter}");
            counter = counter.saturating_add(1);
        }

        planned.push(PlannedItem {
            source: path.clone(),
            relative_destination: relative,
            tier,
            exclude_files: if tier == DiscoveryTier::Hints {
                result.exclude_files.clone()
            } else {
                Vec::new()
            },
            filter_secrets: None,
        });
    }
    planned
}

/// Creates `base/<YYYY-MM-DD-HHMMSS>/configs` and returns it.
pub fn create_run_directory(
    base: &Path,
    timestamp: Option<DateTime<Local>>,
) -> Result<PathBuf, BackupError> {
    let stamp = timestamp.unwrap_or_else(Local::now).format(RUN_STAMP_FORMAT);
    let run_dir = base.join(stamp.to_string()).join("configs");
    fs::create_dir_all(&run_dir).map_err(|source| BackupError::OutputRoot {
        path: run_dir.clone(),
        source,
    })?;
    Ok(run_dir)
}
