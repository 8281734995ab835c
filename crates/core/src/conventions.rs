use std::collections::HashSet;
use std::path::PathBuf;

use crate::locations::Locations;
use crate::model::Confidence;
use crate::paths::location_key;

/// Heuristic tier output. Paths are relative to home or XDG config home; directory
/// templates keep their trailing `/`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConventionFinding {
    pub configuration_files: Vec<String>,
    pub xdg_configuration_files: Vec<String>,
    pub confidence: Confidence,
    pub bundle_id: Option<String>,
    pub checked_paths: Vec<PathBuf>,
}

impl ConventionFinding {
    pub fn is_empty(&self) -> bool {
        self.configuration_files.is_empty() && self.xdg_configuration_files.is_empty()
    }
}

/// Probes standard OS locations derived from an app's name and bundle id.
#[derive(Debug, Clone, Copy)]
pub struct ConventionResolver<'a> {
    locations: &'a Locations,
}

impl<'a> ConventionResolver<'a> {
    pub fn new(locations: &'a Locations) -> Self {
        Self { locations }
    }

    /// Home-relative and XDG-relative candidates, in probe order.
    pub fn candidates(&self, app_name: &str, bundle_id: Option<&str>) -> (Vec<String>, Vec<String>) {
        let names = name_variants(app_name);
        let bundles = bundle_id.map(bundle_variants).unwrap_or_default();

        let mut home = Vec::new();
        for name in &names {
            home.push(format!(".{name}/"));
            home.push(format!("Library/Application Support/{name}/"));
        }
        for bid in &bundles {
            home.push(format!("Library/Application Support/{bid}/"));
            home.push(format!("Library/Preferences/{bid}.plist"));
            home.push(format!("Library/Containers/{bid}/"));
            home.push(format!("Library/Containers/{bid}/Data/Library/Preferences/"));
            home.push(format!(
                "Library/Containers/{bid}/Data/Library/Application Support/"
            ));
            home.push(format!("Library/Group Containers/{bid}/"));
            home.push(format!("Library/Group Containers/group.{bid}/"));
        }
        let xdg = names.iter().map(|name| format!("{name}/")).collect();

        (dedup(home), dedup(xdg))
    }

    /// Every absolute location the resolver would probe.
    pub fn checked_paths(&self, app_name: &str, bundle_id: Option<&str>) -> Vec<PathBuf> {
        let (home, xdg) = self.candidates(app_name, bundle_id);
        home.iter()
            .map(|rel| self.locations.home_path(rel))
            .chain(xdg.iter().map(|rel| self.locations.xdg_path(rel)))
            .collect()
    }

    pub fn discover(
        &self,
        app_name: &str,
        bundle_id: Option<&str>,
        check_exists: bool,
    ) -> ConventionFinding {
        let (home, xdg) = self.candidates(app_name, bundle_id);
        let checked_paths = self.checked_paths(app_name, bundle_id);

        if !check_exists {
            return ConventionFinding {
                configuration_files: home,
                xdg_configuration_files: xdg,
                confidence: Confidence::Low,
                bundle_id: bundle_id.map(str::to_string),
                checked_paths,
            };
        }

        let mut seen = HashSet::new();
        let mut keep_existing = |candidates: Vec<String>, resolve: &dyn Fn(&str) -> PathBuf| {
            candidates
                .into_iter()
                .filter(|rel| {
                    let path = resolve(rel);
                    path.exists() && seen.insert(location_key(&path))
                })
                .collect::<Vec<_>>()
        };
        let found_home = keep_existing(home, &|rel| self.locations.home_path(rel));
        let found_xdg = keep_existing(xdg, &|rel| self.locations.xdg_path(rel));

        let confidence = match found_home.len() + found_xdg.len() {
            0 => Confidence::Low,
            1 => Confidence::Medium,
            _ => Confidence::High,
        };

        ConventionFinding {
            configuration_files: found_home,
            xdg_configuration_files: found_xdg,
            confidence,
            bundle_id: bundle_id.map(str::to_string),
            checked_paths,
        }
    }
}

/// Original, hyphenated, unseparated, underscored, first word, last word, lowercase.
pub fn name_variants(app_name: &str) -> Vec<String> {
    let base = app_name
        .trim()
        .strip_suffix(".app")
        .unwrap_or(app_name.trim())
        .trim();
    if base.is_empty() {
        return Vec::new();
    }

    let hyphenated = hyphenate(base);
    let unseparated = base
        .chars()
        .filter(|ch| ch.is_alphanumeric())
        .collect::<String>()
        .to_lowercase();
    let underscored = hyphenated.replace('-', "_");

    let mut variants = vec![base.to_string(), hyphenated, unseparated, underscored];

    let words = base.split_whitespace().collect::<Vec<_>>();
    if let Some(first) = words.first() {
        if first.chars().count() > 2 {
            variants.push(first.to_lowercase());
        }
    }
    if words.len() > 1 {
        if let Some(last) = words.last() {
            if last.chars().count() > 2 {
                variants.push(last.to_string());
            }
        }
    }
    let lowered = base.to_lowercase();
    if lowered != base {
        variants.push(lowered);
    }

    dedup(variants)
}

/// Full id, last segment (as-is and lower-cased), last two segments.
pub fn bundle_variants(bundle_id: &str) -> Vec<String> {
    let bundle_id = bundle_id.trim();
    if bundle_id.is_empty() {
        return Vec::new();
    }
    let segments = bundle_id.split('.').collect::<Vec<_>>();
    let mut variants = vec![bundle_id.to_string()];
    if let Some(last) = segments.last() {
        variants.push(last.to_string());
        variants.push(last.to_lowercase());
    }
    if segments.len() >= 2 {
        variants.push(segments[segments.len() - 2..].join("."));
    }
    dedup(variants)
}

fn hyphenate(value: &str) -> String {
    let mut out = String::new();
    for ch in value.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

fn dedup(values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|value| !value.is_empty() && seen.insert(value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::{bundle_variants, name_variants, ConventionResolver};
    use crate::locations::Locations;
    use crate::model::Confidence;

    fn locations(temp: &TempDir) -> Locations {
        Locations::resolve(Some(temp.path().to_path_buf()), None).expect("locations")
    }

    #[test]
    fn generates_name_variants() {
        assert_eq!(
            name_variants("Visual Studio Code.app"),
            vec![
                "Visual Studio Code",
                "visual-studio-code",
                "visualstudiocode",
                "visual_studio_code",
                "visual",
                "Code",
                "visual studio code",
            ]
        );
        assert_eq!(name_variants("zed"), vec!["zed"]);
        assert!(name_variants("  ").is_empty());
    }

    #[test]
    fn generates_bundle_variants() {
        assert_eq!(
            bundle_variants("com.microsoft.VSCode"),
            vec!["com.microsoft.VSCode", "VSCode", "vscode", "microsoft.VSCode"]
        );
        assert_eq!(bundle_variants("single"), vec!["single"]);
    }

    #[test]
    fn candidate_templates_cover_standard_locations() {
        let temp = TempDir::new().expect("tempdir");
        let locations = locations(&temp);
        let resolver = ConventionResolver::new(&locations);
        let (home, xdg) = resolver.candidates("Zed", Some("dev.zed.Zed"));
        assert!(home.contains(&".zed/".to_string()));
        assert!(home.contains(&"Library/Application Support/Zed/".to_string()));
        assert!(home.contains(&"Library/Preferences/dev.zed.Zed.plist".to_string()));
        assert!(home.contains(&"Library/Containers/dev.zed.Zed/".to_string()));
        assert!(home.contains(&"Library/Group Containers/group.dev.zed.Zed/".to_string()));
        assert_eq!(xdg, vec!["Zed/", "zed/"]);
        assert_eq!(
            resolver.checked_paths("Zed", Some("dev.zed.Zed")).len(),
            home.len() + xdg.len()
        );
    }

    #[test]
    fn keeps_existing_paths_and_scores_confidence() {
        let temp = TempDir::new().expect("tempdir");
        let locations = locations(&temp);
        let resolver = ConventionResolver::new(&locations);

        let none = resolver.discover("Widget", Some("com.example.widget"), true);
        assert!(none.is_empty());
        assert_eq!(none.confidence, Confidence::Low);

        fs::create_dir_all(locations.xdg_config_home.join("widget")).expect("xdg dir");
        let one = resolver.discover("Widget", Some("com.example.widget"), true);
        assert_eq!(one.xdg_configuration_files, vec!["widget/"]);
        assert_eq!(one.confidence, Confidence::Medium);

        let prefs = locations.home.join("Library/Preferences");
        fs::create_dir_all(&prefs).expect("prefs");
        fs::write(prefs.join("com.example.widget.plist"), "<plist/>").expect("plist");
        let two = resolver.discover("Widget", Some("com.example.widget"), true);
        assert_eq!(
            two.configuration_files,
            vec!["Library/Preferences/com.example.widget.plist"]
        );
        assert_eq!(two.confidence, Confidence::High);
    }

    #[test]
    fn unchecked_discovery_returns_every_candidate() {
        let temp = TempDir::new().expect("tempdir");
        let locations = locations(&temp);
        let resolver = ConventionResolver::new(&locations);
        let finding = resolver.discover("Widget", None, false);
        assert_eq!(finding.configuration_files.len(), 4);
        assert_eq!(finding.xdg_configuration_files.len(), 2);
        assert_eq!(finding.confidence, Confidence::Low);
    }
}
