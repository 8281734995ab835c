use std::path::PathBuf;

use anyhow::{Context as _, Result};

use crate::config_filter::ConfigTypeFilter;
use crate::exclusion::ExclusionPolicy;
use crate::hints::HintsDatabase;
use crate::locations::Locations;
use crate::patterns::{PatternSources, PatternStore};
use crate::redact::SecretRedactor;

/// Where a run's inputs come from. Every `None` selects the built-in or OS default.
#[derive(Debug, Clone, Default)]
pub struct ContextSettings {
    pub patterns: PatternSources,
    pub hints: Option<PathBuf>,
    pub home: Option<PathBuf>,
    pub xdg_config_home: Option<PathBuf>,
}

/// Compiled rules and resolved roots, built once per run and shared by reference.
#[derive(Debug, Clone)]
pub struct Context {
    pub locations: Locations,
    pub patterns: PatternStore,
    pub hints: HintsDatabase,
    pub redactor: SecretRedactor,
    pub exclusion: ExclusionPolicy,
    pub config_filter: ConfigTypeFilter,
}

impl Context {
    pub fn new(locations: Locations, patterns: PatternStore, hints: HintsDatabase) -> Self {
        Self {
            redactor: SecretRedactor::new(&patterns),
            exclusion: ExclusionPolicy::new(&patterns),
            config_filter: ConfigTypeFilter::new(&patterns),
            locations,
            patterns,
            hints,
        }
    }

    pub fn from_settings(settings: &ContextSettings) -> Result<Self> {
        let locations = if settings.home.is_none() && settings.xdg_config_home.is_none() {
            Locations::from_env()
        } else {
            Locations::resolve(settings.home.clone(), settings.xdg_config_home.clone())
        }
        .context("failed to resolve home and XDG config locations")?;

        let patterns =
            PatternStore::load(&settings.patterns).context("failed to load pattern documents")?;

        let hints = match &settings.hints {
            Some(path) => HintsDatabase::load(path)
                .with_context(|| format!("failed to load hints database {}", path.display()))?,
            None => HintsDatabase::builtin().context("failed to load built-in hints database")?,
        };

        Ok(Self::new(locations, patterns, hints))
    }
}
