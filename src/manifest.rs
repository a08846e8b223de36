//! Manifest Loader - crowbar.toml

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::BASE_DEPENDENCY;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("manifest declares barclamp '{found}', expected '{expected}'")]
    NameMismatch { expected: String, found: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PackageType {
    Rpm,
    Deb,
}

impl PackageType {
    pub fn as_str(self) -> &'static str {
        match self {
            PackageType::Rpm => "rpm",
            PackageType::Deb => "deb",
        }
    }
}

impl fmt::Display for PackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- On-disk layout ---

#[derive(Debug, Deserialize)]
struct ManifestFile {
    barclamp: BarclampSection,
    #[serde(default)]
    rpms: Option<PackageSection>,
    #[serde(default)]
    debs: Option<PackageSection>,
}

#[derive(Debug, Deserialize)]
struct BarclampSection {
    name: String,
    display: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    requires: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PackageSection {
    #[serde(default)]
    required_pkgs: Vec<String>,
}

/// A loaded barclamp manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manifest {
    pub name: String,
    pub display: String,
    pub description: Option<String>,
    /// Declared dependencies followed by the base dependency.
    pub requires: Vec<String>,
    pub required_pkgs: BTreeMap<PackageType, Vec<String>>,
    pub version: String,
}

impl Manifest {
    /// Packages the manifest lists for one package type; empty when absent.
    pub fn required_pkgs(&self, package_type: PackageType) -> &[String] {
        self.required_pkgs
            .get(&package_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Leave exactly one base dependency in `requires`: the first one
    /// listed, or a new entry at the end.
    pub fn ensure_base_dependency(&mut self) {
        let mut seen = false;
        self.requires.retain(|dep| {
            if dep != BASE_DEPENDENCY {
                return true;
            }
            !std::mem::replace(&mut seen, true)
        });
        if !seen {
            self.requires.push(BASE_DEPENDENCY.to_string());
        }
    }
}

/// Load the manifest at `path`, stamped with the current time.
pub fn load(path: &Path, expected_name: &str) -> Result<Manifest, ManifestError> {
    load_at(path, expected_name, Utc::now())
}

pub fn load_at(
    path: &Path,
    expected_name: &str,
    now: DateTime<Utc>,
) -> Result<Manifest, ManifestError> {
    if !path.is_file() {
        return Err(ManifestError::NotFound(path.to_path_buf()));
    }
    let content = fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&content, path, expected_name, now)
}

fn parse(
    content: &str,
    path: &Path,
    expected_name: &str,
    now: DateTime<Utc>,
) -> Result<Manifest, ManifestError> {
    let file: ManifestFile = toml::from_str(content).map_err(|source| ManifestError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    if file.barclamp.name != expected_name {
        return Err(ManifestError::NameMismatch {
            expected: expected_name.to_string(),
            found: file.barclamp.name,
        });
    }

    let mut required_pkgs = BTreeMap::new();
    for (package_type, section) in [(PackageType::Rpm, file.rpms), (PackageType::Deb, file.debs)] {
        if let Some(section) = section {
            required_pkgs.insert(package_type, section.required_pkgs);
        }
    }

    let mut manifest = Manifest {
        name: file.barclamp.name,
        display: file.barclamp.display,
        description: file.barclamp.description,
        requires: file.barclamp.requires,
        required_pkgs,
        version: version_string(now),
    };
    manifest.ensure_base_dependency();
    Ok(manifest)
}

/// `YYYYMMDD.HHMMSS` in UTC.
pub fn version_string(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d.%H%M%S").to_string()
}
