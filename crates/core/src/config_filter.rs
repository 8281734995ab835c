use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::exclusion::dotted_extension;
use crate::model::FilterVerdict;
use crate::patterns::{InclusionRules, PatternStore};

const DOTFILE_INFIXES: &[&str] = &[
    "rc",
    "config",
    "conf",
    "profile",
    "login",
    "logout",
    "history",
    "aliases",
    "exports",
    "functions",
];

/// Deny-by-default classifier for paths found by the lower-trust tiers.
#[derive(Debug, Clone)]
pub struct ConfigTypeFilter {
    rules: Arc<InclusionRules>,
}

impl ConfigTypeFilter {
    pub fn new(store: &PatternStore) -> Self {
        Self {
            rules: store.inclusion_rules(),
        }
    }

    pub fn is_config_file(&self, path: &Path) -> FilterVerdict {
        let verdict = self.classify_file(path);
        debug!(
            path = %path.display(),
            accepted = verdict.accepted,
            reason = %verdict.reason,
            "config filter verdict"
        );
        verdict
    }

    /// Directories are a recursion gate, not a backup target, so anything not
    /// explicitly excluded passes.
    pub fn is_config_directory(&self, path: &Path) -> FilterVerdict {
        if !path.exists() {
            return FilterVerdict::reject("Directory does not exist");
        }
        if !path.is_dir() {
            return FilterVerdict::reject("Not a directory");
        }
        if let Some(pattern) = self.hard_pattern_hit(path, true) {
            return FilterVerdict::reject(format!("Matches hard exclude pattern: {pattern}"));
        }
        if let Some(name) = self.excluded_component(path) {
            return FilterVerdict::reject(format!("In excluded directory: {name}"));
        }
        let name = file_name(path);
        if self.rules.safe_directories.contains(&name.to_lowercase()) {
            return FilterVerdict::accept(format!("Safe directory: {name}"));
        }
        FilterVerdict::accept("Directory allowed by default")
    }

    pub fn should_recurse(&self, dir: &Path) -> bool {
        self.is_config_directory(dir).accepted
    }

    /// Splits candidates into accepted paths and rejected paths with their reasons.
    pub fn filter_paths(&self, paths: &[PathBuf]) -> (Vec<PathBuf>, Vec<(PathBuf, String)>) {
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        for path in paths {
            let verdict = if path.is_dir() {
                self.is_config_directory(path)
            } else {
                self.is_config_file(path)
            };
            if verdict.accepted {
                accepted.push(path.clone());
            } else {
                rejected.push((path.clone(), verdict.reason));
            }
        }
        (accepted, rejected)
    }

    fn classify_file(&self, path: &Path) -> FilterVerdict {
        if !path.exists() {
            return FilterVerdict::reject("File does not exist");
        }
        if !path.is_file() {
            return FilterVerdict::reject("Not a file");
        }
        if let Some(pattern) = self.hard_pattern_hit(path, false) {
            return FilterVerdict::reject(format!("Matches hard exclude pattern: {pattern}"));
        }
        if let Some(name) = self.excluded_component(path) {
            return FilterVerdict::reject(format!("In excluded directory: {name}"));
        }

        let extension = dotted_extension(path);
        if let Some(ext) = &extension {
            if self.rules.hard_exclude_extensions.contains(ext) {
                return FilterVerdict::reject(format!("Hard excluded extension: {ext}"));
            }
        }

        if let Ok(meta) = fs::metadata(path) {
            if meta.len() > self.rules.max_file_size_bytes {
                return FilterVerdict::reject(format!(
                    "File too large: {} bytes exceeds {} bytes",
                    meta.len(),
                    self.rules.max_file_size_bytes
                ));
            }
        }

        let name = file_name(path);
        let lowered = name.to_lowercase();
        if self.rules.safe_filenames.contains(&lowered) {
            return FilterVerdict::accept(format!("Safe filename: {name}"));
        }
        if let Some(ext) = &extension {
            if self.rules.safe_extensions.contains(ext) {
                return FilterVerdict::accept(format!("Safe extension: {ext}"));
            }
        }

        if name.starts_with('.') && !name.starts_with("..") {
            if let Some(infix) = DOTFILE_INFIXES
                .iter()
                .find(|infix| lowered.contains(*infix))
            {
                return FilterVerdict::accept(format!("Dotfile config pattern: {infix}"));
            }
        }

        FilterVerdict::reject("Unknown file type")
    }

    fn hard_pattern_hit(&self, path: &Path, is_dir: bool) -> Option<&str> {
        let text = path.to_string_lossy();
        let with_slash = format!("{text}/");
        self.rules
            .hard_exclude_patterns
            .iter()
            .find(|glob| glob.is_match(&text) || (is_dir && glob.is_match(&with_slash)))
            .map(|glob| glob.pattern.as_str())
    }

    fn excluded_component(&self, path: &Path) -> Option<String> {
        path.components()
            .map(|component| component.as_os_str().to_string_lossy().to_lowercase())
            .find(|name| self.rules.excluded_directory_names.contains(name))
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::fs::{self, File};

    use tempfile::TempDir;

    use super::ConfigTypeFilter;
    use crate::test_support::{fixture_store, write_file};

    fn filter() -> ConfigTypeFilter {
        ConfigTypeFilter::new(&fixture_store())
    }

    #[test]
    fn accepts_safe_extensions_and_filenames() {
        let temp = TempDir::new().expect("tempdir");
        let filter = filter();

        let json = write_file(&temp.path().join("app/settings.json"), "{}");
        let verdict = filter.is_config_file(&json);
        assert!(verdict.accepted);
        assert_eq!(verdict.reason, "Safe filename: settings.json");

        let toml = write_file(&temp.path().join("app/theme.toml"), "a = 1");
        assert_eq!(filter.is_config_file(&toml).reason, "Safe extension: .toml");

        let plist = write_file(&temp.path().join("com.example.app.plist"), "<plist/>");
        assert!(filter.is_config_file(&plist).accepted);
    }

    #[test]
    fn safe_names_match_regardless_of_case() {
        let temp = TempDir::new().expect("tempdir");
        let filter = filter();
        let lower = write_file(&temp.path().join("brew/brewfile"), "brew \"git\"");
        let verdict = filter.is_config_file(&lower);
        assert!(verdict.accepted);
        assert_eq!(verdict.reason, "Safe filename: brewfile");

        let upper = write_file(&temp.path().join("app/Settings.JSON"), "{}");
        assert!(filter.is_config_file(&upper).accepted);

        let user = temp.path().join("Code/user");
        fs::create_dir_all(&user).expect("dir");
        assert_eq!(filter.is_config_directory(&user).reason, "Safe directory: user");
    }

    #[test]
    fn accepts_dotfiles_with_config_infixes() {
        let temp = TempDir::new().expect("tempdir");
        let filter = filter();
        let zshrc = write_file(&temp.path().join(".zshrc"), "alias ll='ls -l'");
        assert!(filter.is_config_file(&zshrc).accepted);

        let ds_store = write_file(&temp.path().join(".DS_Store"), "junk");
        let verdict = filter.is_config_file(&ds_store);
        assert!(!verdict.accepted);
        assert_eq!(verdict.reason, "Unknown file type");
    }

    #[test]
    fn rejects_by_default_and_for_missing_paths() {
        let temp = TempDir::new().expect("tempdir");
        let filter = filter();
        let unknown = write_file(&temp.path().join("data.bin2"), "??");
        assert!(!filter.is_config_file(&unknown).accepted);

        let missing = filter.is_config_file(&temp.path().join("absent.json"));
        assert_eq!(missing.reason, "File does not exist");

        let dir = filter.is_config_file(temp.path());
        assert_eq!(dir.reason, "Not a file");
    }

    #[test]
    fn rejects_files_inside_excluded_directories() {
        let temp = TempDir::new().expect("tempdir");
        let filter = filter();
        let gpu = write_file(&temp.path().join(".app/GPUCache/settings.json"), "{}");
        let verdict = filter.is_config_file(&gpu);
        assert!(!verdict.accepted);
        assert!(verdict.reason.contains("GPUCache"));

        let storage = write_file(
            &temp.path().join("app/Local Storage/prefs.json"),
            "{}",
        );
        assert_eq!(
            filter.is_config_file(&storage).reason,
            "In excluded directory: local storage"
        );
    }

    #[test]
    fn rejects_hard_extensions_and_large_files() {
        let temp = TempDir::new().expect("tempdir");
        let filter = filter();
        let db = write_file(&temp.path().join("app/history.sqlite"), "SQLite");
        assert_eq!(
            filter.is_config_file(&db).reason,
            "Hard excluded extension: .sqlite"
        );

        let big = temp.path().join("app/huge.json");
        File::create(&big)
            .expect("create")
            .set_len(2 * 1024 * 1024)
            .expect("grow");
        assert!(filter.is_config_file(&big).reason.starts_with("File too large"));
    }

    #[test]
    fn directories_are_permissive_unless_excluded() {
        let temp = TempDir::new().expect("tempdir");
        let filter = filter();
        let snippets = temp.path().join("User/snippets");
        let other = temp.path().join("anything");
        let modules = temp.path().join("web/node_modules");
        for dir in [&snippets, &other, &modules] {
            fs::create_dir_all(dir).expect("dir");
        }

        assert_eq!(
            filter.is_config_directory(&snippets).reason,
            "Safe directory: snippets"
        );
        assert!(filter.should_recurse(&other));
        assert!(!filter.should_recurse(&modules));
        assert!(!filter.should_recurse(&temp.path().join("absent")));
    }

    #[test]
    fn partitions_candidate_lists() {
        let temp = TempDir::new().expect("tempdir");
        let filter = filter();
        let good = write_file(&temp.path().join("a.yaml"), "a: 1");
        let bad = write_file(&temp.path().join("a.png"), "png");
        let (accepted, rejected) = filter.filter_paths(&[good.clone(), bad.clone()]);
        assert_eq!(accepted, vec![good]);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].0, bad);
    }
}
