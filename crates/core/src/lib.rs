pub mod backup;
pub mod config_filter;
pub mod context;
pub mod conventions;
pub mod discovery;
pub mod error;
pub mod exclusion;
pub mod hints;
pub mod layout;
pub mod locations;
pub mod merge;
pub mod model;
pub mod paths;
pub mod patterns;
pub mod property_list;
pub mod redact;

#[cfg(test)]
mod test_support;

pub use backup::{BackupOptions, BackupOrchestrator};
pub use config_filter::ConfigTypeFilter;
pub use context::{Context, ContextSettings};
pub use conventions::{ConventionFinding, ConventionResolver};
pub use discovery::{
    followups_from_results, rank_followups, statistics, DiscoveryOptions, DiscoveryPipeline,
    DiscoveryReport,
};
pub use error::{BackupError, HintsError, PathSecurityError, PatternError, PlistError};
pub use exclusion::ExclusionPolicy;
pub use hints::{HintEntry, HintsDatabase, HintsFinding};
pub use layout::{create_run_directory, plan_app_backups, PlannedItem};
pub use locations::Locations;
pub use merge::{AssistedFinding, DiscoveryMerger, TierInputs};
pub use model::{
    AppCandidate, BackupItemResult, BackupRunSummary, BackupStatus, Change, Confidence,
    DirectoryTally, DiscoveryResult, DiscoveryStats, DiscoveryTier, ExclusionDecision,
    FilterVerdict, FollowupCandidate, InstallMethod,
};
pub use paths::{safe_join, sanitize_component, validate_relative};
pub use patterns::{InclusionKind, InclusionRule, PatternSources, PatternStore};
pub use redact::SecretRedactor;
