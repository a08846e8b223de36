//! Configuration - the shared packaging root
//!
//! Resolved once by the binary and passed down explicitly.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming the shared packaging root.
pub const ROOT_ENV: &str = "CROWBAR_DIR";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),

    #[error("packaging root {0} is not a directory")]
    MissingRoot(PathBuf),

    #[error("destination directory {0} does not exist")]
    MissingDestination(PathBuf),

    #[error("barclamp source directory {0} does not exist")]
    MissingSource(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    root: PathBuf,
}

impl Config {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the packaging root through `lookup` (normally the process
    /// environment) and check it exists.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let root = lookup(ROOT_ENV)
            .filter(|value| !value.trim().is_empty())
            .ok_or(ConfigError::MissingEnv(ROOT_ENV))?;
        let root = PathBuf::from(root);
        if !root.is_dir() {
            return Err(ConfigError::MissingRoot(root));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Shared RPM spec template, outside any barclamp tree.
    pub fn rpm_template(&self) -> PathBuf {
        self.root.join("packaging").join("barclamp.spec.tmpl")
    }
}
