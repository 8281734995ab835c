use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::conventions::ConventionResolver;
use crate::locations::Locations;
use crate::merge::{AssistedFinding, DiscoveryMerger, TierInputs};
use crate::model::{AppCandidate, DiscoveryResult, DiscoveryStats, FollowupCandidate};

const FOLLOWUP_KEYWORDS: &[&str] = &[
    "code",
    "studio",
    "editor",
    "ide",
    "terminal",
    "iterm",
    "docker",
    "postgres",
    "mysql",
    "redis",
    "mongo",
    "slack",
    "notion",
    "obsidian",
    "craft",
    "bear",
    "alfred",
    "raycast",
    "keyboard",
    "karabiner",
    "git",
    "github",
    "tower",
    "fork",
    "sourcetree",
    "postman",
    "insomnia",
    "charles",
    "proxyman",
    "figma",
    "sketch",
    "affinity",
    "zoom",
    "teams",
    "webex",
    "1password",
    "bitwarden",
    "keychain",
    "homebrew",
    "brew",
];

const FOLLOWUP_SKIP_KEYWORDS: &[&str] = &[
    "helper",
    "agent",
    "daemon",
    "service",
    "updater",
    "crash",
    "diagnostic",
    "feedback",
    "analytics",
    "install",
    "uninstall",
    "setup",
    "wizard",
];

const KEYWORD_SCORE: i64 = 10;
const BUNDLE_ID_BONUS: i64 = 5;

#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub check_exists: bool,
    pub skip_system_apps: bool,
    pub followup_limit: usize,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            check_exists: true,
            skip_system_apps: true,
            followup_limit: 20,
        }
    }
}

/// Serialized output of a discovery run; the backup and follow-up commands read it back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub generated_at: String,
    pub locations: Locations,
    pub statistics: DiscoveryStats,
    pub results: Vec<DiscoveryResult>,
}

#[derive(Debug, Clone)]
struct AppRecord {
    app: AppCandidate,
    inputs: TierInputs,
    result: DiscoveryResult,
}

/// Runs every tier for each app and keeps the inputs so results can be re-derived.
#[derive(Debug)]
pub struct DiscoveryPipeline<'a> {
    context: &'a Context,
    options: DiscoveryOptions,
    records: Vec<AppRecord>,
}

impl<'a> DiscoveryPipeline<'a> {
    pub fn new(context: &'a Context, options: DiscoveryOptions) -> Self {
        Self {
            context,
            options,
            records: Vec::new(),
        }
    }

    pub fn discover_app(&self, app: &AppCandidate) -> (TierInputs, DiscoveryResult) {
        let bundle_id = app.bundle_id.as_deref().filter(|bid| !bid.is_empty());
        let inputs = TierInputs {
            hints: self.context.hints.lookup(&app.name, bundle_id),
            conventions: Some(
                ConventionResolver::new(&self.context.locations).discover(
                    &app.name,
                    bundle_id,
                    self.options.check_exists,
                ),
            ),
            assisted: None,
        };
        let result = self.merger().merge(app, &inputs);
        debug!(
            app = %app.name,
            source = ?result.source,
            needs_followup = result.needs_followup,
            "discovered app"
        );
        (inputs, result)
    }

    /// Returns how many apps were discovered; system and excluded apps are skipped.
    pub fn discover_all(&mut self, apps: &[AppCandidate]) -> usize {
        let mut skipped = 0_usize;
        let mut discovered = 0_usize;
        for app in apps {
            if self.options.skip_system_apps && is_system_app(app) {
                skipped = skipped.saturating_add(1);
                continue;
            }
            if self.context.exclusion.should_exclude_app(&app.name) {
                skipped = skipped.saturating_add(1);
                continue;
            }
            let (inputs, result) = self.discover_app(app);
            let record = AppRecord {
                app: app.clone(),
                inputs,
                result,
            };
            match self.position(&app.name) {
                Some(index) => self.records[index] = record,
                None => self.records.push(record),
            }
            discovered = discovered.saturating_add(1);
        }
        info!(discovered, skipped, "discovery pass complete");
        discovered
    }

    /// Re-merges the app's stored tier inputs with the new assisted finding.
    pub fn add_assisted(
        &mut self,
        app_name: &str,
        finding: AssistedFinding,
    ) -> Option<&DiscoveryResult> {
        let Some(index) = self.position(app_name) else {
            warn!(app = app_name, "assisted finding for an app that was not discovered");
            return None;
        };
        let merger = DiscoveryMerger::new(&self.context.locations, &self.context.config_filter);
        let record = &mut self.records[index];
        record.inputs.assisted = Some(finding);
        record.result = merger.merge(&record.app, &record.inputs);
        Some(&record.result)
    }

    /// Applies a batch of assisted findings; returns the names that matched nothing.
    pub fn add_assisted_batch(&mut self, findings: BTreeMap<String, AssistedFinding>) -> Vec<String> {
        let mut unmatched = Vec::new();
        for (name, finding) in findings {
            if self.add_assisted(&name, finding).is_none() {
                unmatched.push(name);
            }
        }
        unmatched
    }

    pub fn results(&self) -> impl Iterator<Item = &DiscoveryResult> {
        self.records.iter().map(|record| &record.result)
    }

    pub fn into_results(self) -> Vec<DiscoveryResult> {
        self.records.into_iter().map(|record| record.result).collect()
    }

    /// Apps still needing follow-up, in discovery order, with the locations probed.
    pub fn undiscovered(&self) -> Vec<FollowupCandidate> {
        self.records
            .iter()
            .filter(|record| record.result.needs_followup)
            .map(|record| FollowupCandidate {
                app_name: record.app.name.clone(),
                bundle_id: record.result.bundle_id.clone(),
                score: followup_score(&record.app.name, record.result.bundle_id.as_deref())
                    .unwrap_or(0),
                checked_paths: record
                    .inputs
                    .conventions
                    .as_ref()
                    .map(|finding| finding.checked_paths.clone())
                    .unwrap_or_default(),
            })
            .collect()
    }

    pub fn followup_candidates(&self, max: usize) -> Vec<FollowupCandidate> {
        rank_followups(self.undiscovered(), max)
    }

    pub fn default_followups(&self) -> Vec<FollowupCandidate> {
        self.followup_candidates(self.options.followup_limit)
    }

    pub fn statistics(&self) -> DiscoveryStats {
        let results = self.results().cloned().collect::<Vec<_>>();
        statistics(&results)
    }

    pub fn report(&self) -> DiscoveryReport {
        DiscoveryReport {
            generated_at: Utc::now().to_rfc3339(),
            locations: self.context.locations.clone(),
            statistics: self.statistics(),
            results: self.results().cloned().collect(),
        }
    }

    fn merger(&self) -> DiscoveryMerger<'_> {
        DiscoveryMerger::new(&self.context.locations, &self.context.config_filter)
    }

    fn position(&self, app_name: &str) -> Option<usize> {
        self.records
            .iter()
            .position(|record| record.app.name == app_name)
            .or_else(|| {
                self.records
                    .iter()
                    .position(|record| record.app.name.eq_ignore_ascii_case(app_name))
            })
    }
}

pub fn is_system_app(app: &AppCandidate) -> bool {
    let bundle = app.bundle_id.as_deref().unwrap_or_default();
    bundle.starts_with("com.apple.")
        || app.name.starts_with("Apple ")
        || app.name.starts_with("System ")
}

/// `None` means the app is never worth following up.
pub fn followup_score(app_name: &str, bundle_id: Option<&str>) -> Option<i64> {
    let lowered = app_name.to_lowercase();
    if FOLLOWUP_SKIP_KEYWORDS
        .iter()
        .any(|keyword| lowered.contains(keyword))
    {
        return None;
    }
    let hits = FOLLOWUP_KEYWORDS
        .iter()
        .filter(|keyword| lowered.contains(*keyword))
        .count();
    let mut score = KEYWORD_SCORE.saturating_mul(hits as i64);
    if bundle_id.is_some_and(|bid| !bid.is_empty()) {
        score = score.saturating_add(BUNDLE_ID_BONUS);
    }
    Some(score)
}

/// Drops skip-listed apps, rescores the rest, sorts by score then name.
pub fn rank_followups(candidates: Vec<FollowupCandidate>, max: usize) -> Vec<FollowupCandidate> {
    let mut ranked = candidates
        .into_iter()
        .filter_map(|mut candidate| {
            candidate.score = followup_score(&candidate.app_name, candidate.bundle_id.as_deref())?;
            Some(candidate)
        })
        .collect::<Vec<_>>();
    ranked.sort_by(|left, right| {
        right
            .score
            .cmp(&left.score)
            .then_with(|| left.app_name.cmp(&right.app_name))
    });
    ranked.truncate(max);
    ranked
}

/// Follow-up candidates rebuilt from serialized results.
pub fn followups_from_results(
    results: &[DiscoveryResult],
    locations: &Locations,
    max: usize,
) -> Vec<FollowupCandidate> {
    let resolver = ConventionResolver::new(locations);
    let candidates = results
        .iter()
        .filter(|result| result.needs_followup)
        .map(|result| FollowupCandidate {
            app_name: result.app_name.clone(),
            bundle_id: result.bundle_id.clone(),
            score: 0,
            checked_paths: resolver.checked_paths(&result.app_name, result.bundle_id.as_deref()),
        })
        .collect();
    rank_followups(candidates, max)
}

pub fn statistics(results: &[DiscoveryResult]) -> DiscoveryStats {
    let mut stats = DiscoveryStats::default();
    for result in results {
        stats.total_apps = stats.total_apps.saturating_add(1);
        if result.has_settings() {
            stats.with_settings = stats.with_settings.saturating_add(1);
        }
        if result.found_in_hints {
            stats.found_in_hints = stats.found_in_hints.saturating_add(1);
        }
        if result.needs_followup {
            stats.needs_followup = stats.needs_followup.saturating_add(1);
        }
        let source = stats.by_source.entry(result.source).or_insert(0);
        *source = source.saturating_add(1);
        let confidence = stats.by_confidence.entry(result.confidence).or_insert(0);
        *confidence = confidence.saturating_add(1);
    }
    stats
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tempfile::TempDir;

    use super::{
        followup_score, is_system_app, rank_followups, DiscoveryOptions, DiscoveryPipeline,
    };
    use crate::context::Context;
    use crate::hints::HintsDatabase;
    use crate::locations::Locations;
    use crate::merge::AssistedFinding;
    use crate::model::{AppCandidate, Confidence, DiscoveryTier, FollowupCandidate};
    use crate::test_support::{fixture_store, write_file};

    const HINTS: &str = "zed:\n  bundle_id: dev.zed.Zed\n  xdg_configuration_files: [zed/]\n";

    fn context(temp: &TempDir) -> Context {
        let locations =
            Locations::resolve(Some(temp.path().to_path_buf()), None).expect("locations");
        let hints = HintsDatabase::from_yaml_str(HINTS).expect("hints");
        Context::new(locations, fixture_store(), hints)
    }

    fn app(name: &str, bundle_id: Option<&str>) -> AppCandidate {
        AppCandidate {
            name: name.to_string(),
            bundle_id: bundle_id.map(str::to_string),
            location: None,
        }
    }

    #[test]
    fn skips_system_and_excluded_apps() {
        let temp = TempDir::new().expect("tempdir");
        let context = context(&temp);
        let mut pipeline = DiscoveryPipeline::new(&context, DiscoveryOptions::default());
        let apps = vec![
            app("Safari", Some("com.apple.Safari")),
            app("System Settings", None),
            app("Keychain Access", None),
            app("Zed", Some("dev.zed.Zed")),
        ];
        assert_eq!(pipeline.discover_all(&apps), 1);
        assert_eq!(pipeline.results().count(), 1);
        assert_eq!(pipeline.discover_all(&apps[3..]), 1);
        assert_eq!(pipeline.into_results().len(), 1);

        let mut keep_all = DiscoveryPipeline::new(
            &context,
            DiscoveryOptions {
                skip_system_apps: false,
                ..DiscoveryOptions::default()
            },
        );
        assert_eq!(keep_all.discover_all(&apps), 3);
    }

    #[test]
    fn discovers_hints_and_reports_statistics() {
        let temp = TempDir::new().expect("tempdir");
        let context = context(&temp);
        write_file(&context.locations.xdg_config_home.join("zed/settings.json"), "{}");

        let mut pipeline = DiscoveryPipeline::new(&context, DiscoveryOptions::default());
        pipeline.discover_all(&[app("Zed", None), app("Mystery Tool", None)]);

        let stats = pipeline.statistics();
        assert_eq!(stats.total_apps, 2);
        assert_eq!(stats.found_in_hints, 1);
        assert_eq!(stats.with_settings, 1);
        assert_eq!(stats.needs_followup, 1);
        assert_eq!(stats.by_source.get(&DiscoveryTier::Hints), Some(&1));
        assert_eq!(stats.by_source.get(&DiscoveryTier::Unknown), Some(&1));

        let report = pipeline.report();
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[0].bundle_id.as_deref(), Some("dev.zed.Zed"));
    }

    #[test]
    fn assisted_findings_re_derive_results() {
        let temp = TempDir::new().expect("tempdir");
        let context = context(&temp);
        write_file(&context.locations.home.join(".mtool/prefs.json"), "{}");

        let mut pipeline = DiscoveryPipeline::new(&context, DiscoveryOptions::default());
        pipeline.discover_all(&[app("Mystery Tool", None)]);
        let before = pipeline.undiscovered();
        assert_eq!(before.len(), 1);
        assert!(!before[0].checked_paths.is_empty());
        assert_eq!(pipeline.default_followups().len(), 1);

        let updated = pipeline
            .add_assisted(
                "mystery tool",
                AssistedFinding {
                    configuration_files: vec![".mtool/prefs.json".to_string()],
                    confidence: Some(Confidence::Medium),
                    ..AssistedFinding::default()
                },
            )
            .expect("known app")
            .clone();
        assert_eq!(updated.source, DiscoveryTier::Assisted);
        assert!(!updated.needs_followup);
        assert!(pipeline.undiscovered().is_empty());

        let mut batch = BTreeMap::new();
        batch.insert("Unknown".to_string(), AssistedFinding::default());
        assert_eq!(pipeline.add_assisted_batch(batch), vec!["Unknown"]);
    }

    #[test]
    fn ranks_followups_by_keywords_and_bundle_ids() {
        let candidate = |name: &str, bundle: Option<&str>| FollowupCandidate {
            app_name: name.to_string(),
            bundle_id: bundle.map(str::to_string),
            score: 0,
            checked_paths: Vec::new(),
        };
        let ranked = rank_followups(
            vec![
                candidate("Random", None),
                candidate("Code Helper", Some("com.example.helper")),
                candidate("Visual Studio Code", Some("com.microsoft.VSCode")),
                candidate("Docker", None),
            ],
            2,
        );
        let names = ranked.iter().map(|c| c.app_name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["Visual Studio Code", "Docker"]);
        assert_eq!(ranked[0].score, 25);
        assert_eq!(followup_score("Code Helper", None), None);
        assert_eq!(followup_score("Random", Some("x.y")), Some(5));
    }

    #[test]
    fn followup_keywords_cover_services_and_developer_tools() {
        assert_eq!(followup_score("Docker Service", Some("com.docker")), None);
        assert_eq!(followup_score("Feedback Assistant", None), None);
        assert_eq!(followup_score("Setup Wizard", None), None);
        assert_eq!(followup_score("iTerm", None), Some(10));
        assert_eq!(followup_score("Postgres", Some("com.postgresapp")), Some(15));
        assert_eq!(followup_score("1Password", None), Some(10));
        assert_eq!(followup_score("Google Chrome", None), Some(0));
    }

    #[test]
    fn recognizes_system_apps() {
        assert!(is_system_app(&app("Safari", Some("com.apple.Safari"))));
        assert!(is_system_app(&app("Apple Configurator", None)));
        assert!(!is_system_app(&app("Applesauce", None)));
    }
}
