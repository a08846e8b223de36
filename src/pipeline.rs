//! Packaging Pipeline - Single Entry Point
//!
//! load → validate → resolve → render → build. Validation always runs
//! before anything is rendered; any failure ends the run.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::builder::{BuildCommand, BuildError, ProcessRunner};
use crate::config::{Config, ConfigError};
use crate::manifest::{self, Manifest, ManifestError, PackageType};
use crate::resolver::resolve;
use crate::templates::{render_all, RenderContext, RenderedArtifact, TemplateError};
use crate::validation::{self, ValidationError, ValidationViolation};
use crate::MANIFEST_FILE;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    #[error("Build failed: {command} exited with status {code}")]
    BuildFailed { command: String, code: i32 },

    #[error("failed to move {path} into the destination: {source}")]
    Collect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    /// Violations behind a validation failure; empty for other errors.
    pub fn violations(&self) -> &[ValidationViolation] {
        match self {
            PipelineError::Validation(e) => e.violations(),
            _ => &[],
        }
    }

    /// Process exit code for this failure. Never 0.
    pub fn exit_code(&self) -> u8 {
        match self {
            PipelineError::Validation(_) => 2,
            PipelineError::BuildFailed { code, .. } => u8::try_from(*code)
                .ok()
                .filter(|c| *c != 0)
                .unwrap_or(1),
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageRequest {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub package_type: PackageType,
}

/// Everything produced before the native build runs.
#[derive(Debug, Clone, Serialize)]
pub struct PreparedPackage {
    pub barclamp_dir: PathBuf,
    pub manifest: Manifest,
    pub context: RenderContext,
    pub artifacts: Vec<RenderedArtifact>,
    pub command: BuildCommand,
    /// Packages moved into the destination after a Debian build. RPM
    /// output lands there directly through `_rpmdir`.
    pub packages: Vec<PathBuf>,
}

pub struct PackagingPipeline<R> {
    config: Config,
    runner: R,
}

impl<R: ProcessRunner> PackagingPipeline<R> {
    pub fn new(config: Config, runner: R) -> Self {
        Self { config, runner }
    }

    /// Validate and render, stopping short of the native build.
    pub fn prepare(&self, request: &PackageRequest) -> Result<PreparedPackage, PipelineError> {
        if !request.destination.is_dir() {
            return Err(ConfigError::MissingDestination(request.destination.clone()).into());
        }
        let barclamp_dir = fs::canonicalize(&request.source)
            .map_err(|_| ConfigError::MissingSource(request.source.clone()))?;
        if !barclamp_dir.is_dir() {
            return Err(ConfigError::MissingSource(request.source.clone()).into());
        }
        let expected = barclamp_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let manifest = manifest::load(&barclamp_dir.join(MANIFEST_FILE), &expected)?;
        info!(barclamp = %manifest.name, version = %manifest.version, "manifest loaded");

        // MANDATORY: nothing is rendered from an invalid barclamp.
        validation::validate(&barclamp_dir)?;

        let requires = resolve(&manifest, request.package_type);
        let context = RenderContext::new(&manifest, request.package_type, requires);
        let artifacts = self.render(&barclamp_dir, &context)?;
        for artifact in &artifacts {
            info!(output = %artifact.output.display(), "rendered");
        }

        let spec_file = PathBuf::from(format!("{}.spec", context.pkg));
        let command = BuildCommand::for_package(
            request.package_type,
            &spec_file,
            &barclamp_dir,
            &request.destination,
        );

        Ok(PreparedPackage {
            barclamp_dir,
            manifest,
            context,
            artifacts,
            command,
            packages: Vec::new(),
        })
    }

    /// Prepare, then run the native build in the barclamp directory.
    pub fn build(&self, request: &PackageRequest) -> Result<PreparedPackage, PipelineError> {
        let mut prepared = self.prepare(request)?;
        let code = self.runner.run(&prepared.command, &prepared.barclamp_dir)?;
        if code != 0 {
            return Err(PipelineError::BuildFailed {
                command: prepared.command.to_string(),
                code,
            });
        }
        if request.package_type == PackageType::Deb {
            prepared.packages =
                collect_debs(&prepared.barclamp_dir, &prepared.context.pkg, &request.destination)?;
        }
        info!(package = %prepared.context.pkg, "package built");
        Ok(prepared)
    }

    fn render(
        &self,
        barclamp_dir: &Path,
        context: &RenderContext,
    ) -> Result<Vec<RenderedArtifact>, PipelineError> {
        let pairs: Vec<(PathBuf, PathBuf)> = match context.package_type {
            PackageType::Rpm => vec![(
                self.config.rpm_template(),
                barclamp_dir.join(format!("{}.spec", context.pkg)),
            )],
            PackageType::Deb => {
                let debian = barclamp_dir.join("debian");
                ["control", "rules"]
                    .into_iter()
                    .map(|name| (debian.join(format!("{name}.tmpl")), debian.join(name)))
                    .collect()
            }
        };

        Ok(render_all(&pairs, context)?)
    }
}

/// dpkg-buildpackage writes `<pkg>_<version>_<arch>.deb` next to the source
/// tree; move those files into `destination`.
fn collect_debs(
    barclamp_dir: &Path,
    pkg: &str,
    destination: &Path,
) -> Result<Vec<PathBuf>, PipelineError> {
    let Some(parent) = barclamp_dir.parent() else {
        return Ok(Vec::new());
    };
    let collect_err = |path: &Path, source| PipelineError::Collect {
        path: path.to_path_buf(),
        source,
    };
    let prefix = format!("{pkg}_");

    let mut moved = Vec::new();
    for entry in fs::read_dir(parent).map_err(|e| collect_err(parent, e))? {
        let from = entry.map_err(|e| collect_err(parent, e))?.path();
        let Some(name) = from.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with(&prefix) || !name.ends_with(".deb") {
            continue;
        }
        let to = destination.join(name);
        // rename fails across filesystems
        fs::rename(&from, &to)
            .or_else(|_| fs::copy(&from, &to).and_then(|_| fs::remove_file(&from)))
            .map_err(|e| collect_err(from.as_path(), e))?;
        info!(package = %to.display(), "moved");
        moved.push(to);
    }
    moved.sort();
    Ok(moved)
}
