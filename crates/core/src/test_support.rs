use std::fs;
use std::path::{Path, PathBuf};

use crate::patterns::PatternStore;

const FIXTURE_SECURITY: &str = include_str!("../tests/fixtures/security-patterns.yaml");
const BUILTIN_CONFIG: &str = include_str!("../data/config-patterns.yaml");

/// Pattern store whose runtime markers leave the system temp directory eligible.
pub fn fixture_store() -> PatternStore {
    PatternStore::from_documents(FIXTURE_SECURITY, "fixture", Some(BUILTIN_CONFIG))
        .expect("fixture store")
}

pub fn write_file(path: &Path, contents: &str) -> PathBuf {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent");
    }
    fs::write(path, contents).expect("write fixture");
    path.to_path_buf()
}
