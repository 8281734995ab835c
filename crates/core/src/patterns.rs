use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use globset::{Glob, GlobMatcher};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::PatternError;

const BUILTIN_SECURITY: &str = include_str!("../data/security-patterns.yaml");
const BUILTIN_CONFIG: &str = include_str!("../data/config-patterns.yaml");

const DEFAULT_PATH_MARKERS: &[&str] = &[
    "/cache/",
    "/caches/",
    "/.cache/",
    "/logs/",
    "/log/",
    "/crashpad/",
    "/crashreporter/",
    "/temp/",
    "/tmp/",
];

const HARD_EXCLUDED_EXTENSIONS: &[&str] = &[
    ".sqlite",
    ".sqlite3",
    ".db",
    ".dylib",
    ".so",
    ".dll",
    ".exe",
    ".sqlite-wal",
    ".sqlite-shm",
];

/// Closed set of directory names that never hold configuration worth keeping.
pub const EXCLUDED_DIRECTORY_NAMES: &[&str] = &[
    "cache",
    "caches",
    "cacheddata",
    "log",
    "logs",
    "build",
    "buildx",
    "node_modules",
    ".git",
    "bin",
    "obj",
    "__pycache__",
    "blob_storage",
    "indexeddb",
    "webstorage",
    "workspacestorage",
    "globalstorage",
    "local storage",
    "session storage",
    "gpucache",
    "shadercache",
    "crashpad",
    "crashreporter",
    "models",
    "mutagen",
    "contexts",
    "cloud",
    "desktop-build",
    "refs",
    "activity",
];

const FALLBACK_SAFE_EXTENSIONS: &[&str] = &[".json", ".yaml", ".yml", ".toml", ".plist"];
const FALLBACK_HARD_EXTENSIONS: &[&str] = &[".dylib", ".so", ".sqlite", ".db"];
const FALLBACK_HARD_PATTERNS: &[&str] = &["**/Cache/**", "**/Logs/**"];

const DEFAULT_MAX_BACKUP_MB: u64 = 10;
const DEFAULT_MAX_CONFIG_BYTES: u64 = 1_048_576;

/// Where the two pattern documents come from. `None` selects the embedded default.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatternSources {
    pub security: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct RedactionRule {
    pub name: String,
    pub regex: Regex,
    pub replacement: String,
}

#[derive(Debug, Clone)]
pub struct NamedGlob {
    pub pattern: String,
    matcher: GlobMatcher,
}

impl NamedGlob {
    fn compile(pattern: &str, warnings: &mut Vec<String>) -> Option<Self> {
        match Glob::new(pattern) {
            Ok(glob) => Some(Self {
                pattern: pattern.to_string(),
                matcher: glob.compile_matcher(),
            }),
            Err(err) => {
                warnings.push(format!("invalid glob '{pattern}' skipped: {err}"));
                None
            }
        }
    }

    pub fn is_match(&self, candidate: &str) -> bool {
        self.matcher.is_match(candidate)
    }
}

/// Exclude-files entry: matched on the bare name, and as a substring of the full path
/// when the pattern itself contains a separator.
#[derive(Debug, Clone)]
pub struct FilePattern {
    pub name: NamedGlob,
    pub within_path: Option<NamedGlob>,
}

#[derive(Debug, Clone)]
pub struct DirectoryPattern {
    pub glob: NamedGlob,
    pub literal: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExclusionRules {
    pub path_markers: Vec<String>,
    pub max_file_size_bytes: u64,
    pub hard_extensions: HashSet<String>,
    pub exclude_files: Vec<FilePattern>,
    pub exclude_extensions: Vec<NamedGlob>,
    pub exclude_paths: Vec<NamedGlob>,
    pub exclude_directories: Vec<DirectoryPattern>,
    pub exclude_apps: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct InclusionRules {
    pub safe_extensions: HashSet<String>,
    pub safe_filenames: HashSet<String>,
    pub safe_directories: HashSet<String>,
    pub hard_exclude_extensions: HashSet<String>,
    pub hard_exclude_patterns: Vec<NamedGlob>,
    pub excluded_directory_names: HashSet<String>,
    pub max_file_size_bytes: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum InclusionKind {
    SafeExtension,
    SafeFilename,
    SafeDirectory,
    HardExcludeExtension,
    HardExcludePattern,
    HardExcludeDirectoryName,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InclusionRule {
    pub kind: InclusionKind,
    pub value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SecurityDocument {
    filter_patterns: Vec<RawRedactionRule>,
    runtime_path_markers: Option<Vec<String>>,
    exclude_files: Vec<String>,
    exclude_directories: Vec<String>,
    exclude_by_pattern: Vec<String>,
    exclude_by_extension: Vec<String>,
    exclude_by_size: SizeSection,
    exclude_apps: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawRedactionRule {
    name: String,
    pattern: String,
    #[serde(default = "default_replacement")]
    replacement: String,
}

fn default_replacement() -> String {
    "<REDACTED>".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct SizeSection {
    max_file_size_mb: u64,
}

impl Default for SizeSection {
    fn default() -> Self {
        Self {
            max_file_size_mb: DEFAULT_MAX_BACKUP_MB,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigDocument {
    safe_extensions: Option<ExtensionGroups>,
    safe_filenames: Vec<String>,
    safe_directories: Vec<String>,
    hard_exclude_extensions: Vec<String>,
    hard_exclude_patterns: Vec<String>,
    size_limits: ConfigSizeSection,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExtensionGroups {
    Grouped(BTreeMap<String, Vec<String>>),
    Flat(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ConfigSizeSection {
    max_file_size_bytes: u64,
}

impl Default for ConfigSizeSection {
    fn default() -> Self {
        Self {
            max_file_size_bytes: DEFAULT_MAX_CONFIG_BYTES,
        }
    }
}

/// Compiled redaction, exclusion and inclusion rules. Immutable once built; the
/// compiled sets are shared with consumers by reference count.
#[derive(Debug, Clone)]
pub struct PatternStore {
    sources: PatternSources,
    redaction: Arc<[RedactionRule]>,
    exclusions: Arc<ExclusionRules>,
    inclusion: Arc<InclusionRules>,
    warnings: Vec<String>,
}

impl PatternStore {
    pub fn builtin() -> Result<Self, PatternError> {
        Self::load(&PatternSources::default())
    }

    pub fn load(sources: &PatternSources) -> Result<Self, PatternError> {
        let (security_text, security_origin) = match &sources.security {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|source| PatternError::Read {
                    path: path.clone(),
                    source,
                })?;
                (text, path.display().to_string())
            }
            None => (BUILTIN_SECURITY.to_string(), "<builtin>".to_string()),
        };

        let mut warnings = Vec::new();
        let config_text = match &sources.config {
            Some(path) => match fs::read_to_string(path) {
                Ok(text) => Some(text),
                Err(err) => {
                    warnings.push(format!(
                        "config pattern document {} unavailable ({err}); using fallback rules",
                        path.display()
                    ));
                    None
                }
            },
            None => Some(BUILTIN_CONFIG.to_string()),
        };

        let mut store = Self::from_documents(
            &security_text,
            &security_origin,
            config_text.as_deref(),
        )?;
        store.sources = sources.clone();
        warnings.append(&mut store.warnings);
        store.warnings = warnings;
        for warning in &store.warnings {
            warn!("{warning}");
        }
        Ok(store)
    }

    /// Builds a store from document text. A missing config document selects the fallback
    /// inclusion rules.
    pub fn from_documents(
        security_yaml: &str,
        security_origin: &str,
        config_yaml: Option<&str>,
    ) -> Result<Self, PatternError> {
        let mut warnings = Vec::new();

        let security: SecurityDocument =
            serde_yaml::from_str(security_yaml).map_err(|source| PatternError::Parse {
                origin: security_origin.to_string(),
                source,
            })?;

        let redaction = compile_redaction(&security.filter_patterns, &mut warnings);
        if redaction.is_empty() {
            return Err(PatternError::NoRedactionRules {
                origin: security_origin.to_string(),
            });
        }
        let exclusions = compile_exclusions(&security, &mut warnings);

        let inclusion = match config_yaml {
            Some(text) => match serde_yaml::from_str::<ConfigDocument>(text) {
                Ok(document) => compile_inclusion(&document, &mut warnings),
                Err(err) => {
                    warnings.push(format!(
                        "malformed config pattern document ({err}); using fallback rules"
                    ));
                    fallback_inclusion(&mut warnings)
                }
            },
            None => fallback_inclusion(&mut warnings),
        };

        Ok(Self {
            sources: PatternSources::default(),
            redaction: redaction.into(),
            exclusions: Arc::new(exclusions),
            inclusion: Arc::new(inclusion),
            warnings,
        })
    }

    /// Rebuilds from the same sources. The current store is left untouched.
    pub fn reload(&self) -> Result<Self, PatternError> {
        Self::load(&self.sources)
    }

    pub fn sources(&self) -> &PatternSources {
        &self.sources
    }

    pub fn redaction_rules(&self) -> Arc<[RedactionRule]> {
        Arc::clone(&self.redaction)
    }

    pub fn exclusion_rules(&self) -> Arc<ExclusionRules> {
        Arc::clone(&self.exclusions)
    }

    pub fn inclusion_rules(&self) -> Arc<InclusionRules> {
        Arc::clone(&self.inclusion)
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Flat, sorted listing of every inclusion rule.
    pub fn list_inclusion_rules(&self) -> Vec<InclusionRule> {
        let rules = &self.inclusion;
        let mut listed = Vec::new();
        let mut push_all = |kind: InclusionKind, values: Vec<String>| {
            listed.extend(values.into_iter().map(|value| InclusionRule { kind, value }));
        };
        push_all(
            InclusionKind::SafeExtension,
            rules.safe_extensions.iter().cloned().collect(),
        );
        push_all(
            InclusionKind::SafeFilename,
            rules.safe_filenames.iter().cloned().collect(),
        );
        push_all(
            InclusionKind::SafeDirectory,
            rules.safe_directories.iter().cloned().collect(),
        );
        push_all(
            InclusionKind::HardExcludeExtension,
            rules.hard_exclude_extensions.iter().cloned().collect(),
        );
        push_all(
            InclusionKind::HardExcludePattern,
            rules
                .hard_exclude_patterns
                .iter()
                .map(|glob| glob.pattern.clone())
                .collect(),
        );
        push_all(
            InclusionKind::HardExcludeDirectoryName,
            rules.excluded_directory_names.iter().cloned().collect(),
        );
        listed.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.value.cmp(&b.value)));
        listed
    }
}

pub fn normalize_extension(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    if lowered.starts_with('.') {
        lowered
    } else {
        format!(".{lowered}")
    }
}

fn compile_redaction(raw: &[RawRedactionRule], warnings: &mut Vec<String>) -> Vec<RedactionRule> {
    raw.iter()
        .filter_map(|rule| match Regex::new(&rule.pattern) {
            Ok(regex) => Some(RedactionRule {
                name: rule.name.clone(),
                regex,
                replacement: rule.replacement.clone(),
            }),
            Err(err) => {
                warnings.push(format!(
                    "invalid redaction pattern '{}' skipped: {err}",
                    rule.name
                ));
                None
            }
        })
        .collect()
}

fn compile_exclusions(document: &SecurityDocument, warnings: &mut Vec<String>) -> ExclusionRules {
    let path_markers = match &document.runtime_path_markers {
        Some(markers) => markers.iter().map(|marker| marker.to_lowercase()).collect(),
        None => DEFAULT_PATH_MARKERS
            .iter()
            .map(|marker| marker.to_string())
            .collect(),
    };

    let exclude_files = document
        .exclude_files
        .iter()
        .filter_map(|pattern| {
            let name = NamedGlob::compile(pattern, warnings)?;
            let within_path = if pattern.contains('/') {
                NamedGlob::compile(&format!("*{pattern}*"), warnings)
            } else {
                None
            };
            Some(FilePattern { name, within_path })
        })
        .collect();

    let exclude_directories = document
        .exclude_directories
        .iter()
        .filter_map(|pattern| {
            let clean = pattern.trim_end_matches('/');
            let glob = NamedGlob::compile(clean, warnings)?;
            let literal = clean.contains('*').then(|| clean.replace('*', ""));
            Some(DirectoryPattern { glob, literal })
        })
        .collect();

    ExclusionRules {
        path_markers,
        max_file_size_bytes: document
            .exclude_by_size
            .max_file_size_mb
            .saturating_mul(1024 * 1024),
        hard_extensions: HARD_EXCLUDED_EXTENSIONS
            .iter()
            .map(|ext| ext.to_string())
            .collect(),
        exclude_files,
        exclude_extensions: compile_globs(&document.exclude_by_extension, warnings),
        exclude_paths: compile_globs(&document.exclude_by_pattern, warnings),
        exclude_directories,
        exclude_apps: document.exclude_apps.clone(),
    }
}

fn compile_inclusion(document: &ConfigDocument, warnings: &mut Vec<String>) -> InclusionRules {
    let safe_extensions = match &document.safe_extensions {
        Some(ExtensionGroups::Grouped(groups)) => groups
            .values()
            .flatten()
            .map(|ext| normalize_extension(ext))
            .collect(),
        Some(ExtensionGroups::Flat(list)) => {
            list.iter().map(|ext| normalize_extension(ext)).collect()
        }
        None => FALLBACK_SAFE_EXTENSIONS
            .iter()
            .map(|ext| ext.to_string())
            .collect(),
    };

    InclusionRules {
        safe_extensions,
        safe_filenames: lowercase_set(&document.safe_filenames),
        safe_directories: lowercase_set(&document.safe_directories),
        hard_exclude_extensions: document
            .hard_exclude_extensions
            .iter()
            .map(|ext| normalize_extension(ext))
            .collect(),
        hard_exclude_patterns: compile_globs(&document.hard_exclude_patterns, warnings),
        excluded_directory_names: excluded_directory_names(),
        max_file_size_bytes: document.size_limits.max_file_size_bytes,
    }
}

fn lowercase_set(values: &[String]) -> HashSet<String> {
    values.iter().map(|value| value.trim().to_lowercase()).collect()
}

fn fallback_inclusion(warnings: &mut Vec<String>) -> InclusionRules {
    let patterns = FALLBACK_HARD_PATTERNS
        .iter()
        .map(|pattern| pattern.to_string())
        .collect::<Vec<_>>();
    InclusionRules {
        safe_extensions: FALLBACK_SAFE_EXTENSIONS
            .iter()
            .map(|ext| ext.to_string())
            .collect(),
        safe_filenames: HashSet::new(),
        safe_directories: HashSet::new(),
        hard_exclude_extensions: FALLBACK_HARD_EXTENSIONS
            .iter()
            .map(|ext| ext.to_string())
            .collect(),
        hard_exclude_patterns: compile_globs(&patterns, warnings),
        excluded_directory_names: excluded_directory_names(),
        max_file_size_bytes: DEFAULT_MAX_CONFIG_BYTES,
    }
}

fn excluded_directory_names() -> HashSet<String> {
    EXCLUDED_DIRECTORY_NAMES
        .iter()
        .map(|name| name.to_string())
        .collect()
}

fn compile_globs(patterns: &[String], warnings: &mut Vec<String>) -> Vec<NamedGlob> {
    patterns
        .iter()
        .map(|pattern| pattern.trim())
        .filter(|pattern| !pattern.is_empty())
        .filter_map(|pattern| NamedGlob::compile(pattern, warnings))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::{normalize_extension, InclusionKind, PatternSources, PatternStore};
    use crate::error::PatternError;

    const MINIMAL_SECURITY: &str = r#"
filter_patterns:
  - name: token
    pattern: 'tok_[a-z]+'
"#;

    #[test]
    fn builtin_documents_compile_cleanly() {
        let store = PatternStore::builtin().expect("builtin store");
        assert!(store.warnings().is_empty(), "{:?}", store.warnings());
        assert!(store.redaction_rules().len() >= 10);
        let inclusion = store.inclusion_rules();
        assert!(inclusion.safe_extensions.contains(".json"));
        assert!(inclusion.hard_exclude_extensions.contains(".sqlite"));
        assert_eq!(inclusion.max_file_size_bytes, 1_048_576);
        let exclusions = store.exclusion_rules();
        assert_eq!(exclusions.max_file_size_bytes, 10 * 1024 * 1024);
        assert!(exclusions.path_markers.contains(&"/logs/".to_string()));
    }

    #[test]
    fn invalid_expressions_are_skipped_with_warning() {
        let yaml = r#"
filter_patterns:
  - name: broken
    pattern: '(unclosed'
  - name: token
    pattern: 'tok_[a-z]+'
exclude_by_pattern:
  - "[unterminated"
"#;
        let store = PatternStore::from_documents(yaml, "test", None).expect("store");
        let rules = store.redaction_rules();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name, "token");
        assert_eq!(rules[0].replacement, "<REDACTED>");
        assert_eq!(store.warnings().len(), 2);
    }

    #[test]
    fn malformed_redaction_document_is_fatal() {
        let err = PatternStore::from_documents("filter_patterns: [ {name: x", "test", None)
            .expect_err("malformed");
        assert!(matches!(err, PatternError::Parse { .. }));

        let err = PatternStore::from_documents("exclude_files: []", "test", None)
            .expect_err("no rules");
        assert!(matches!(err, PatternError::NoRedactionRules { .. }));
    }

    #[test]
    fn missing_redaction_document_is_fatal() {
        let temp = TempDir::new().expect("tempdir");
        let sources = PatternSources {
            security: Some(temp.path().join("absent.yaml")),
            config: None,
        };
        let err = PatternStore::load(&sources).expect_err("missing");
        assert!(matches!(err, PatternError::Read { .. }));
    }

    #[test]
    fn missing_or_malformed_config_document_falls_back() {
        let temp = TempDir::new().expect("tempdir");
        let security = temp.path().join("security.yaml");
        fs::write(&security, MINIMAL_SECURITY).expect("write security");

        let sources = PatternSources {
            security: Some(security.clone()),
            config: Some(temp.path().join("absent.yaml")),
        };
        let store = PatternStore::load(&sources).expect("store");
        let inclusion = store.inclusion_rules();
        assert_eq!(inclusion.safe_extensions.len(), 5);
        assert!(inclusion.hard_exclude_extensions.contains(".dylib"));
        assert_eq!(store.warnings().len(), 1);

        let malformed =
            PatternStore::from_documents(MINIMAL_SECURITY, "test", Some("safe_filenames: {"))
                .expect("store");
        assert!(malformed.inclusion_rules().safe_extensions.contains(".plist"));
        assert!(!malformed.warnings().is_empty());
    }

    #[test]
    fn flat_extension_lists_are_normalized() {
        let config = "safe_extensions: [JSON, .Yaml]\nhard_exclude_extensions: [DB]\n";
        let store =
            PatternStore::from_documents(MINIMAL_SECURITY, "test", Some(config)).expect("store");
        let inclusion = store.inclusion_rules();
        assert!(inclusion.safe_extensions.contains(".json"));
        assert!(inclusion.safe_extensions.contains(".yaml"));
        assert!(inclusion.hard_exclude_extensions.contains(".db"));
    }

    #[test]
    fn reload_rereads_sources() {
        let temp = TempDir::new().expect("tempdir");
        let security = temp.path().join("security.yaml");
        fs::write(&security, MINIMAL_SECURITY).expect("write security");
        let sources = PatternSources {
            security: Some(security.clone()),
            config: None,
        };
        let store = PatternStore::load(&sources).expect("store");
        assert_eq!(store.redaction_rules().len(), 1);

        fs::write(
            &security,
            format!("{MINIMAL_SECURITY}  - name: other\n    pattern: 'oth_[0-9]+'\n"),
        )
        .expect("rewrite");
        let reloaded = store.reload().expect("reload");
        assert_eq!(reloaded.redaction_rules().len(), 2);
        assert_eq!(store.redaction_rules().len(), 1);
    }

    #[test]
    fn lists_inclusion_rules_by_kind() {
        let store = PatternStore::builtin().expect("builtin");
        let listed = store.list_inclusion_rules();
        assert!(listed
            .iter()
            .any(|rule| rule.kind == InclusionKind::HardExcludeDirectoryName
                && rule.value == "node_modules"));
        assert!(listed
            .iter()
            .any(|rule| rule.kind == InclusionKind::SafeExtension && rule.value == ".toml"));
    }

    #[test]
    fn normalizes_extensions() {
        assert_eq!(normalize_extension("JSON"), ".json");
        assert_eq!(normalize_extension(" .Plist "), ".plist");
    }
}
