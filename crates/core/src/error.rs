use std::path::PathBuf;

use thiserror::Error;

/// Pattern document failures. Fatal at load time.
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("failed to read pattern document {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed pattern document {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("redaction document {origin} yielded no usable rules")]
    NoRedactionRules { origin: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathSecurityError {
    #[error("absolute path not allowed: {0}")]
    Absolute(String),
    #[error("path traversal detected: {0}")]
    Traversal(String),
    #[error("path escapes base directory: {path} is not under {base}")]
    Escapes { path: PathBuf, base: PathBuf },
    #[error("XDG config home {xdg} is outside home directory {home}")]
    XdgOutsideHome { xdg: PathBuf, home: PathBuf },
    #[error("home directory could not be determined")]
    HomeUnavailable,
}

#[derive(Debug, Error)]
pub enum HintsError {
    #[error("failed to read hints database {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed hints database: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("hints entry '{app}' has unsafe {field} path '{value}': {source}")]
    UnsafePath {
        app: String,
        field: &'static str,
        value: String,
        #[source]
        source: PathSecurityError,
    },
}

#[derive(Debug, Error)]
pub enum PlistError {
    #[error("failed to convert property list {path}: {source}")]
    Convert {
        path: PathBuf,
        #[source]
        source: plist::Error,
    },
    #[error("converted property list {path} is not valid UTF-8")]
    Encoding { path: PathBuf },
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("failed to create output root {path}: {source}")]
    OutputRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
