use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::context::Context;
use crate::error::BackupError;
use crate::layout::{plan_app_backups, PlannedItem};
use crate::model::{
    BackupItemResult, BackupRunSummary, BackupStatus, DirectoryTally, DiscoveryResult,
    DiscoveryTier,
};
use crate::paths::safe_join;
use crate::property_list::{binary_to_xml, is_binary_plist};

const FILE_MODE: u32 = 0o600;
const DIR_MODE: u32 = 0o700;

#[derive(Debug, Clone)]
pub struct BackupOptions {
    /// Copy files verbatim instead of redacting secrets.
    pub include_secrets: bool,
    pub normalize_permissions: bool,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            include_secrets: false,
            normalize_permissions: true,
        }
    }
}

/// Copies discovered configuration into one output root, recording an outcome per item.
#[derive(Debug)]
pub struct BackupOrchestrator<'a> {
    context: &'a Context,
    output_root: PathBuf,
    options: BackupOptions,
    summary: BackupRunSummary,
    results: Vec<BackupItemResult>,
}

impl<'a> BackupOrchestrator<'a> {
    /// Fails only when the output root cannot be created.
    pub fn new(
        context: &'a Context,
        output_root: &Path,
        options: BackupOptions,
    ) -> Result<Self, BackupError> {
        let root_error = |source| BackupError::OutputRoot {
            path: output_root.to_path_buf(),
            source,
        };
        fs::create_dir_all(output_root).map_err(root_error)?;
        let output_root = fs::canonicalize(output_root).map_err(root_error)?;

        let summary = BackupRunSummary::new(
            Uuid::new_v4().to_string(),
            Utc::now().to_rfc3339(),
            output_root.clone(),
            options.include_secrets,
        );
        info!(
            run_id = %summary.run_id,
            output_root = %output_root.display(),
            include_secrets = options.include_secrets,
            "backup run started"
        );

        Ok(Self {
            context,
            output_root,
            options,
            summary,
            results: Vec::new(),
        })
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn backup_file(
        &mut self,
        source: &Path,
        relative_destination: &str,
        tier: DiscoveryTier,
        filter_secrets: Option<bool>,
    ) -> BackupItemResult {
        let item = self.copy_file(
            source,
            relative_destination,
            tier,
            filter_secrets,
            &AppExcludes::default(),
        );
        self.record(item)
    }

    pub fn backup_directory(
        &mut self,
        source: &Path,
        relative_destination: &str,
        tier: DiscoveryTier,
        filter_secrets: Option<bool>,
        exclude_files: &[String],
    ) -> BackupItemResult {
        let excludes = AppExcludes::new(exclude_files);
        let item = self.copy_directory(
            source,
            relative_destination,
            tier,
            filter_secrets,
            &excludes,
        );
        self.record(item)
    }

    pub fn backup_path(&mut self, planned: &PlannedItem) -> BackupItemResult {
        let excludes = AppExcludes::new(&planned.exclude_files);
        let item = if planned.source.is_dir() {
            self.copy_directory(
                &planned.source,
                &planned.relative_destination,
                planned.tier,
                planned.filter_secrets,
                &excludes,
            )
        } else {
            self.copy_file(
                &planned.source,
                &planned.relative_destination,
                planned.tier,
                planned.filter_secrets,
                &excludes,
            )
        };
        self.record(item)
    }

    /// Backs up every resolved location of one app into its tier folders.
    pub fn backup_discovery(&mut self, result: &DiscoveryResult) -> Vec<BackupItemResult> {
        if self.context.exclusion.should_exclude_app(&result.app_name) {
            info!(app = %result.app_name, "app excluded from backup");
            return Vec::new();
        }
        plan_app_backups(result)
            .iter()
            .map(|planned| self.backup_path(planned))
            .collect()
    }

    pub fn results(&self) -> &[BackupItemResult] {
        &self.results
    }

    pub fn summary(&self) -> &BackupRunSummary {
        &self.summary
    }

    pub fn finish(mut self) -> (BackupRunSummary, Vec<BackupItemResult>) {
        self.summary.finished_at = Some(Utc::now().to_rfc3339());
        info!(
            run_id = %self.summary.run_id,
            total = self.summary.total_operations,
            success = self.summary.success,
            partial = self.summary.partial,
            skipped = self.summary.skipped,
            errors = self.summary.errors,
            changes = self.summary.total_changes,
            "backup run finished"
        );
        (self.summary, self.results)
    }

    fn record(&mut self, item: BackupItemResult) -> BackupItemResult {
        match item.status {
            BackupStatus::Skipped => info!(
                source = %item.source.display(),
                reason = item.reason.as_deref().unwrap_or_default(),
                "skipped"
            ),
            BackupStatus::Error | BackupStatus::Partial => warn!(
                source = %item.source.display(),
                status = ?item.status,
                errors = ?item.errors,
                "backup item incomplete"
            ),
            BackupStatus::Success => {}
        }
        self.summary.record(&item);
        self.results.push(item.clone());
        item
    }

    /// Skip precedence: destination, existence, app excludes, tier filter, exclusion policy.
    fn copy_file(
        &self,
        source: &Path,
        relative_destination: &str,
        tier: DiscoveryTier,
        filter_secrets: Option<bool>,
        excludes: &AppExcludes,
    ) -> BackupItemResult {
        let mut item = BackupItemResult::pending(source.to_path_buf(), relative_destination, tier);

        let destination = match safe_join(&self.output_root, relative_destination) {
            Ok(destination) => destination,
            Err(err) => return item.skip(format!("Invalid destination: {err}")),
        };
        if !source.exists() {
            return item.skip("Source does not exist");
        }
        if let Some(pattern) = file_name(source).and_then(|name| excludes.matched(&name)) {
            return item.skip(format!("Excluded by app pattern: {pattern}"));
        }
        if tier.requires_config_filter() {
            let verdict = self.context.config_filter.is_config_file(source);
            if !verdict.accepted {
                item.tier_filtered = true;
                return item.skip(format!("Config filter: {}", verdict.reason));
            }
        }
        let decision = self.context.exclusion.can_backup(source);
        if !decision.allowed {
            let reason = decision.reason.unwrap_or_else(|| "Excluded by policy".to_string());
            return item.skip(reason);
        }

        let mut bytes = match fs::read(source) {
            Ok(bytes) => bytes,
            Err(err) => return item.fail(format!("Failed to read {}: {err}", source.display())),
        };

        if is_binary_plist(&bytes) {
            match binary_to_xml(source, &bytes) {
                Ok(xml) => {
                    bytes = xml.into_bytes();
                    item.plist_converted = true;
                }
                Err(err) => return item.fail(err.to_string()),
            }
        }

        if filter_secrets.unwrap_or(!self.options.include_secrets) {
            item.filtered = true;
            let text = String::from_utf8_lossy(&bytes);
            let (redacted, changes) = self.context.redactor.filter(&text, file_name(source).as_deref());
            if !changes.is_empty() {
                bytes = redacted.into_bytes();
                item.changes = changes;
            }
        }

        if let Err(err) = write_output(&destination, &bytes) {
            return item.fail(format!("Failed to write {}: {err}", destination.display()));
        }
        item.digest = Some(blake3::hash(&bytes).to_hex().to_string());
        item.destination = Some(destination.clone());

        if self.options.normalize_permissions {
            if let Err(err) = restrict_permissions(&destination, FILE_MODE) {
                item.status = BackupStatus::Partial;
                item.errors
                    .push(format!("Failed to set permissions on {}: {err}", destination.display()));
            }
        }
        item
    }

    /// Children are pruned before descent; the item is partial when any child errored.
    fn copy_directory(
        &self,
        source: &Path,
        relative_destination: &str,
        tier: DiscoveryTier,
        filter_secrets: Option<bool>,
        excludes: &AppExcludes,
    ) -> BackupItemResult {
        let mut item = BackupItemResult::pending(source.to_path_buf(), relative_destination, tier);

        let destination = match safe_join(&self.output_root, relative_destination) {
            Ok(destination) => destination,
            Err(err) => return item.skip(format!("Invalid destination: {err}")),
        };
        if !source.exists() {
            return item.skip("Source does not exist");
        }
        if !source.is_dir() {
            return item.skip("Not a directory");
        }
        if tier.requires_config_filter() {
            let verdict = self.context.config_filter.is_config_directory(source);
            if !verdict.accepted {
                item.tier_filtered = true;
                return item.skip(format!("Config filter: {}", verdict.reason));
            }
        }
        let decision = self.context.exclusion.can_backup(source);
        if !decision.allowed {
            let reason = decision.reason.unwrap_or_else(|| "Excluded by policy".to_string());
            return item.skip(reason);
        }
        if let Err(err) = fs::create_dir_all(&destination) {
            return item.fail(format!("Failed to create {}: {err}", destination.display()));
        }

        let mut tally = DirectoryTally::default();
        let mut pruned_by_tier = 0_u64;
        let walker = WalkDir::new(source)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 || !entry.file_type().is_dir() {
                    return true;
                }
                let keep = self.should_descend(entry.path(), tier, excludes);
                if keep == Descend::TierFiltered {
                    pruned_by_tier = pruned_by_tier.saturating_add(1);
                }
                keep == Descend::Yes
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    item.errors
                        .push(format!("walk error under {}: {err}", source.display()));
                    continue;
                }
            };
            if entry.depth() == 0 || entry.file_type().is_dir() {
                continue;
            }
            if entry.path_is_symlink() && entry.path().is_dir() {
                tally.files_skipped = tally.files_skipped.saturating_add(1);
                continue;
            }

            let child_rel = match entry.path().strip_prefix(source) {
                Ok(relative) => join_relative(relative_destination, relative),
                Err(_) => continue,
            };
            let child = self.copy_file(entry.path(), &child_rel, tier, filter_secrets, excludes);
            match child.status {
                BackupStatus::Success | BackupStatus::Partial => {
                    tally.files_processed = tally.files_processed.saturating_add(1);
                    if !child.changes.is_empty() {
                        tally.files_filtered = tally.files_filtered.saturating_add(1);
                    }
                }
                BackupStatus::Skipped => {
                    tally.files_skipped = tally.files_skipped.saturating_add(1);
                    if child.tier_filtered {
                        tally.tier_filtered = tally.tier_filtered.saturating_add(1);
                    }
                }
                BackupStatus::Error => {}
            }
            item.filtered |= child.filtered;
            item.plist_converted |= child.plist_converted;
            item.changes.extend(child.changes);
            item.errors.extend(child.errors);
        }
        tally.tier_filtered = tally.tier_filtered.saturating_add(pruned_by_tier);

        if self.options.normalize_permissions {
            item.errors.extend(restrict_tree(&destination));
        }

        item.destination = Some(destination);
        item.directory = Some(tally);
        if !item.errors.is_empty() {
            item.status = BackupStatus::Partial;
            item.reason = Some(format!("{} error(s) during directory backup", item.errors.len()));
        }
        item
    }

    fn should_descend(&self, dir: &Path, tier: DiscoveryTier, excludes: &AppExcludes) -> Descend {
        if file_name(dir).is_some_and(|name| excludes.matched(&name).is_some()) {
            return Descend::No;
        }
        if self.context.exclusion.directory_exclusion(dir).is_some() {
            return Descend::No;
        }
        if tier.requires_config_filter() && !self.context.config_filter.should_recurse(dir) {
            return Descend::TierFiltered;
        }
        Descend::Yes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Descend {
    Yes,
    No,
    TierFiltered,
}

/// Per-app name globs; case-insensitive, trailing `/` ignored.
#[derive(Debug, Default)]
struct AppExcludes {
    patterns: Vec<String>,
    set: Option<GlobSet>,
}

impl AppExcludes {
    fn new(patterns: &[String]) -> Self {
        let mut builder = GlobSetBuilder::new();
        let mut kept = Vec::new();
        for raw in patterns {
            let pattern = raw.trim().trim_end_matches('/');
            if pattern.is_empty() {
                continue;
            }
            match GlobBuilder::new(pattern).case_insensitive(true).build() {
                Ok(glob) => {
                    builder.add(glob);
                    kept.push(pattern.to_string());
                }
                Err(err) => warn!("invalid app exclude glob '{pattern}' skipped: {err}"),
            }
        }
        if kept.is_empty() {
            return Self::default();
        }
        match builder.build() {
            Ok(set) => Self {
                patterns: kept,
                set: Some(set),
            },
            Err(err) => {
                warn!("failed to compile app exclude globs: {err}; app excludes disabled");
                Self::default()
            }
        }
    }

    fn matched(&self, name: &str) -> Option<&str> {
        let set = self.set.as_ref()?;
        let index = set.matches(name).into_iter().next()?;
        self.patterns.get(index).map(String::as_str)
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
}

fn join_relative(base: &str, relative: &Path) -> String {
    let tail = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/");
    format!("{}/{tail}", base.trim_end_matches('/'))
}

fn write_output(destination: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(destination, bytes)
}

/// Owner-only access on every directory below `root`, best effort.
fn restrict_tree(root: &Path) -> Vec<String> {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir())
        .filter_map(|entry| {
            restrict_permissions(entry.path(), DIR_MODE).err().map(|err| {
                format!(
                    "Failed to set permissions on {}: {err}",
                    entry.path().display()
                )
            })
        })
        .collect()
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}
