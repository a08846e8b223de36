//! Package Builder - hand-off to the native toolchain
//!
//! The build itself is opaque: only the exit code matters.

use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::process::Command;
use thiserror::Error;
use tracing::{info, warn};

use crate::manifest::PackageType;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// An external command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl BuildCommand {
    /// `rpmbuild` on the rendered spec, dropping binaries into `destination`.
    pub fn rpm(spec_file: &Path, barclamp_dir: &Path, destination: &Path) -> Self {
        Self {
            program: "rpmbuild".to_string(),
            args: vec![
                "-bb".to_string(),
                "--define".to_string(),
                format!("_rpmdir {}", destination.display()),
                "--define".to_string(),
                format!("_sourcedir {}", barclamp_dir.display()),
                spec_file.display().to_string(),
            ],
        }
    }

    /// `dpkg-buildpackage` over the rendered `debian/` directory.
    pub fn deb() -> Self {
        Self {
            program: "dpkg-buildpackage".to_string(),
            args: vec!["-b".to_string(), "-uc".to_string(), "-us".to_string()],
        }
    }

    pub fn for_package(
        package_type: PackageType,
        spec_file: &Path,
        barclamp_dir: &Path,
        destination: &Path,
    ) -> Self {
        match package_type {
            PackageType::Rpm => Self::rpm(spec_file, barclamp_dir, destination),
            PackageType::Deb => Self::deb(),
        }
    }
}

impl fmt::Display for BuildCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.contains(' ') {
                write!(f, " \"{arg}\"")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Runs an external command to completion and reports its exit code.
pub trait ProcessRunner {
    fn run(&self, command: &BuildCommand, working_dir: &Path) -> Result<i32, BuildError>;
}

/// Runs commands as real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, command: &BuildCommand, working_dir: &Path) -> Result<i32, BuildError> {
        info!(command = %command, dir = %working_dir.display(), "running package build");
        let status = Command::new(&command.program)
            .args(&command.args)
            .current_dir(working_dir)
            .status()
            .map_err(|source| BuildError::Spawn {
                program: command.program.clone(),
                source,
            })?;
        Ok(status.code().unwrap_or_else(|| {
            warn!(command = %command, "build terminated by signal");
            1
        }))
    }
}
