use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::model::ExclusionDecision;
use crate::patterns::{ExclusionRules, PatternStore};

/// Allow-by-default eligibility gate applied to every backup candidate.
#[derive(Debug, Clone)]
pub struct ExclusionPolicy {
    rules: Arc<ExclusionRules>,
}

impl ExclusionPolicy {
    pub fn new(store: &PatternStore) -> Self {
        Self {
            rules: store.exclusion_rules(),
        }
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.rules.max_file_size_bytes
    }

    /// Checks run in a fixed order and stop at the first denial. A failed stat only
    /// disables the checks that need it.
    pub fn can_backup(&self, path: &Path) -> ExclusionDecision {
        let path_text = path.to_string_lossy();
        let lowered = path_text.to_lowercase();

        if let Some(marker) = self
            .rules
            .path_markers
            .iter()
            .find(|marker| lowered.contains(marker.as_str()))
        {
            return ExclusionDecision::deny(format!("Matches excluded pattern: {marker}"));
        }

        let metadata = fs::metadata(path).ok();
        let is_dir = metadata.as_ref().is_some_and(|meta| meta.is_dir());

        if let Some(meta) = metadata.as_ref().filter(|meta| meta.is_file()) {
            if meta.len() > self.rules.max_file_size_bytes {
                return ExclusionDecision::deny(format!(
                    "File too large: {} bytes exceeds limit of {} bytes",
                    meta.len(),
                    self.rules.max_file_size_bytes
                ));
            }
        }

        if let Some(ext) = dotted_extension(path) {
            if self.rules.hard_extensions.contains(&ext) {
                return ExclusionDecision::deny(format!("Excluded file type: {ext}"));
            }
        }

        if !is_dir {
            if let Some(reason) = self.file_exclusion(path) {
                return ExclusionDecision::deny(reason);
            }
        } else if let Some(reason) = self.directory_exclusion(path) {
            return ExclusionDecision::deny(reason);
        }

        let mut current = path.parent();
        while let Some(dir) = current {
            if dir.as_os_str().is_empty() {
                break;
            }
            if let Some(reason) = self.directory_exclusion(dir) {
                return ExclusionDecision::deny(format!("Parent directory excluded: {reason}"));
            }
            current = dir.parent();
        }

        ExclusionDecision::allow()
    }

    /// Directory-name and path-pattern checks for a single directory, without parents.
    pub fn directory_exclusion(&self, dir: &Path) -> Option<String> {
        let name = dir.file_name()?.to_string_lossy();
        for pattern in &self.rules.exclude_directories {
            let literal_hit = pattern
                .literal
                .as_deref()
                .is_some_and(|literal| literal == name.as_ref());
            if pattern.glob.is_match(&name) || literal_hit {
                return Some(format!("Excluded directory: {}", pattern.glob.pattern));
            }
        }

        let dir_text = dir.to_string_lossy();
        let with_slash = format!("{dir_text}/");
        self.rules
            .exclude_paths
            .iter()
            .find(|glob| glob.is_match(&dir_text) || glob.is_match(&with_slash))
            .map(|glob| format!("Matches exclude pattern: {}", glob.pattern))
    }

    pub fn should_exclude_app(&self, app_name: &str) -> bool {
        self.rules
            .exclude_apps
            .iter()
            .any(|excluded| excluded.eq_ignore_ascii_case(app_name))
    }

    fn file_exclusion(&self, path: &Path) -> Option<String> {
        let name = path.file_name()?.to_string_lossy();
        let path_text = path.to_string_lossy();

        for pattern in &self.rules.exclude_files {
            let within = pattern
                .within_path
                .as_ref()
                .is_some_and(|glob| glob.is_match(&path_text));
            if pattern.name.is_match(&name) || within {
                return Some(format!("Matches excluded file: {}", pattern.name.pattern));
            }
        }

        if let Some(glob) = self
            .rules
            .exclude_extensions
            .iter()
            .find(|glob| glob.is_match(&name))
        {
            return Some(format!("Excluded extension: {}", glob.pattern));
        }

        self.rules
            .exclude_paths
            .iter()
            .find(|glob| glob.is_match(&path_text))
            .map(|glob| format!("Matches exclude pattern: {}", glob.pattern))
    }
}

pub(crate) fn dotted_extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
}
