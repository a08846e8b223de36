//! Validation System - Schemas Gate Data Bags
//!
//! Schemas are checked against the meta-schema before they may check
//! anything else. Every violation of a pass is collected before failing.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::locate::SourceMap;
use crate::schema::{Issue, Schema};

pub const SCHEMA_EXTENSION: &str = "schema";
pub const DOCUMENT_EXTENSION: &str = "json";

/// Directory holding nested data bag schemas and documents.
pub const DATA_BAG_DIR: &str = "chef/data_bags";

/// Filename prefix of the flat template family at the barclamp root.
pub const TEMPLATE_PREFIX: &str = "bc-template-";

/// One located problem in a schema or document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationViolation {
    pub file: PathBuf,
    pub line: usize,
    pub column: usize,
    pub path: String,
    pub message: String,
}

impl fmt::Display for ValidationViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() { "/" } else { &self.path };
        write!(
            f,
            "{}:{}:{}: [{}] {}",
            self.file.display(),
            self.line,
            self.column,
            path,
            self.message
        )
    }
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{} schema violation(s)", .0.len())]
    InvalidSchemas(Vec<ValidationViolation>),

    #[error("{} data bag violation(s)", .0.len())]
    InvalidBags(Vec<ValidationViolation>),

    #[error("built-in meta-schema is malformed: {0:?}")]
    MetaSchema(Vec<Issue>),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid discovery pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("discovery failed: {0}")]
    Glob(#[from] glob::GlobError),
}

impl ValidationError {
    pub fn violations(&self) -> &[ValidationViolation] {
        match self {
            ValidationError::InvalidSchemas(v) | ValidationError::InvalidBags(v) => v,
            _ => &[],
        }
    }
}

/// Compiled schemas keyed by path without extension.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<PathBuf, Schema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &Path) -> Option<&Schema> {
        self.schemas.get(key)
    }

    pub fn register(&mut self, key: PathBuf, schema: Schema) {
        self.schemas.insert(key, schema);
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

/// Path with its final extension removed.
pub fn base_name(path: &Path) -> PathBuf {
    path.with_extension("")
}

enum Parsed {
    Value(Value, SourceMap),
    Broken(ValidationViolation),
}

fn parse_file(path: &Path) -> Result<Parsed, ValidationError> {
    let text = fs::read_to_string(path).map_err(|source| ValidationError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(match serde_json::from_str::<Value>(&text) {
        Ok(value) => Parsed::Value(value, SourceMap::scan(&text)),
        Err(e) => Parsed::Broken(ValidationViolation {
            file: path.to_path_buf(),
            line: e.line(),
            column: e.column(),
            path: String::new(),
            message: e.to_string(),
        }),
    })
}

fn locate(file: &Path, map: &SourceMap, issues: Vec<Issue>) -> Vec<ValidationViolation> {
    issues
        .into_iter()
        .map(|issue| {
            let (line, column) = map.locate(&issue.path);
            ValidationViolation {
                file: file.to_path_buf(),
                line,
                column,
                path: issue.path,
                message: issue.message,
            }
        })
        .collect()
}

/// Meta-validate and compile every schema file.
pub fn make_schemas(paths: &[PathBuf]) -> Result<SchemaRegistry, ValidationError> {
    let meta = Schema::meta().map_err(ValidationError::MetaSchema)?;
    let mut registry = SchemaRegistry::new();
    let mut violations = Vec::new();

    for path in paths {
        let (value, map) = match parse_file(path)? {
            Parsed::Value(value, map) => (value, map),
            Parsed::Broken(violation) => {
                violations.push(violation);
                continue;
            }
        };

        let issues = meta.validate(&value);
        if !issues.is_empty() {
            violations.extend(locate(path, &map, issues));
            continue;
        }

        match Schema::compile(&value) {
            Ok(schema) => {
                debug!(schema = %path.display(), "compiled schema");
                registry.register(base_name(path), schema);
            }
            Err(issues) => violations.extend(locate(path, &map, issues)),
        }
    }

    if violations.is_empty() {
        Ok(registry)
    } else {
        Err(ValidationError::InvalidSchemas(violations))
    }
}

/// Check every document that has a matching schema. Returns how many were
/// checked; documents without a schema are skipped.
pub fn validate_bags(registry: &SchemaRegistry, paths: &[PathBuf]) -> Result<usize, ValidationError> {
    if registry.is_empty() {
        debug!(documents = paths.len(), "no schemas, nothing to check");
        return Ok(0);
    }
    let mut violations = Vec::new();
    let mut checked = 0;

    for path in paths {
        let Some(schema) = registry.get(&base_name(path)) else {
            debug!(document = %path.display(), "no schema, skipping");
            continue;
        };
        checked += 1;
        match parse_file(path)? {
            Parsed::Value(value, map) => {
                let issues = schema.validate(&value);
                violations.extend(locate(path, &map, issues));
            }
            Parsed::Broken(violation) => violations.push(violation),
        }
    }

    if violations.is_empty() {
        Ok(checked)
    } else {
        Err(ValidationError::InvalidBags(violations))
    }
}

fn discover(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, ValidationError> {
    let full = format!("{}/{}", glob::Pattern::escape(&dir.to_string_lossy()), pattern);
    let mut found = Vec::new();
    for entry in glob::glob(&full)? {
        found.push(entry?);
    }
    found.sort();
    Ok(found)
}

/// Run one schema/document family: schemas first, then their documents.
fn validate_family(dir: &Path, schemas: &str, documents: &str) -> Result<usize, ValidationError> {
    let schema_paths = discover(dir, schemas)?;
    let document_paths = discover(dir, documents)?;
    let registry = make_schemas(&schema_paths)?;
    debug!(dir = %dir.display(), schemas = registry.len(), "schemas compiled");
    validate_bags(&registry, &document_paths)
}

/// Validate both families of a barclamp: nested data bags and root templates.
pub fn validate(barclamp_dir: &Path) -> Result<(), ValidationError> {
    let bag_dir = barclamp_dir.join(DATA_BAG_DIR);
    if bag_dir.is_dir() {
        let checked = validate_family(
            &bag_dir,
            &format!("*/*.{SCHEMA_EXTENSION}"),
            &format!("*/*.{DOCUMENT_EXTENSION}"),
        )?;
        info!(checked, "data bags valid");
    }

    let checked = validate_family(
        barclamp_dir,
        &format!("{TEMPLATE_PREFIX}*.{SCHEMA_EXTENSION}"),
        &format!("{TEMPLATE_PREFIX}*.{DOCUMENT_EXTENSION}"),
    )?;
    info!(checked, "barclamp templates valid");
    Ok(())
}
