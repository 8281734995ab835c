use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PathSecurityError;
use crate::paths::resolve_lenient;

/// Home and XDG config roots that hints and convention paths resolve against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Locations {
    pub home: PathBuf,
    pub xdg_config_home: PathBuf,
}

impl Locations {
    /// Resolves from the OS home directory and the `XDG_CONFIG_HOME` variable.
    pub fn from_env() -> Result<Self, PathSecurityError> {
        let xdg = std::env::var_os("XDG_CONFIG_HOME")
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);
        Self::resolve(None, xdg)
    }

    /// An XDG override is only trusted when it resolves under home.
    pub fn resolve(
        home_override: Option<PathBuf>,
        xdg_override: Option<PathBuf>,
    ) -> Result<Self, PathSecurityError> {
        let home = match home_override {
            Some(home) => home,
            None => dirs::home_dir().ok_or(PathSecurityError::HomeUnavailable)?,
        };
        let home = resolve_lenient(&home);

        let xdg_config_home = match xdg_override {
            Some(xdg) => {
                let resolved = resolve_lenient(&expand_tilde(&xdg, &home));
                if !resolved.starts_with(&home) {
                    return Err(PathSecurityError::XdgOutsideHome {
                        xdg: resolved,
                        home,
                    });
                }
                resolved
            }
            None => home.join(".config"),
        };

        Ok(Self {
            home,
            xdg_config_home,
        })
    }

    pub fn home_path(&self, rel: &str) -> PathBuf {
        self.home.join(rel.trim_end_matches('/'))
    }

    pub fn xdg_path(&self, rel: &str) -> PathBuf {
        self.xdg_config_home.join(rel.trim_end_matches('/'))
    }
}

fn expand_tilde(path: &Path, home: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home.join(rest),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::Locations;
    use crate::error::PathSecurityError;

    #[test]
    fn defaults_xdg_under_home() {
        let temp = TempDir::new().expect("tempdir");
        let locations =
            Locations::resolve(Some(temp.path().to_path_buf()), None).expect("locations");
        assert_eq!(locations.xdg_config_home, locations.home.join(".config"));
    }

    #[test]
    fn accepts_xdg_override_inside_home() {
        let temp = TempDir::new().expect("tempdir");
        fs::create_dir(temp.path().join("xdg")).expect("xdg");
        let locations = Locations::resolve(
            Some(temp.path().to_path_buf()),
            Some(temp.path().join("xdg")),
        )
        .expect("locations");
        assert!(locations.xdg_config_home.ends_with("xdg"));
        assert!(locations.xdg_config_home.starts_with(&locations.home));
    }

    #[test]
    fn rejects_xdg_override_outside_home() {
        let home = TempDir::new().expect("home");
        let elsewhere = TempDir::new().expect("elsewhere");
        let err = Locations::resolve(
            Some(home.path().to_path_buf()),
            Some(elsewhere.path().to_path_buf()),
        )
        .expect_err("outside home");
        assert!(matches!(err, PathSecurityError::XdgOutsideHome { .. }));
    }

    #[test]
    fn expands_tilde_in_xdg_override() {
        let temp = TempDir::new().expect("tempdir");
        let locations = Locations::resolve(
            Some(temp.path().to_path_buf()),
            Some("~/.config-alt".into()),
        )
        .expect("locations");
        assert!(locations.xdg_config_home.ends_with(".config-alt"));
    }

    #[test]
    fn joins_declared_paths() {
        let temp = TempDir::new().expect("tempdir");
        let locations =
            Locations::resolve(Some(temp.path().to_path_buf()), None).expect("locations");
        assert_eq!(locations.home_path(".zed/"), locations.home.join(".zed"));
        assert_eq!(
            locations.xdg_path("zed/settings.json"),
            locations.home.join(".config/zed/settings.json")
        );
    }
}
