//! Barclamp Packager - Manifest to Native Package
//!
//! # Stages
//! 1. Load the manifest
//! 2. Validate schemas and data bags (gate)
//! 3. Resolve dependencies
//! 4. Render packaging metadata
//! 5. Hand off to the native builder

pub mod config;
pub mod manifest;
pub mod locate;
pub mod schema;
pub mod validation;
pub mod resolver;
pub mod templates;
pub mod builder;
pub mod pipeline;

pub use config::{Config, ConfigError};
pub use manifest::{Manifest, ManifestError, PackageType};
pub use validation::{SchemaRegistry, ValidationError, ValidationViolation};
pub use resolver::resolve;
pub use templates::{RenderContext, RenderedArtifact, Template, TemplateError};
pub use builder::{BuildCommand, BuildError, ProcessRunner, SystemRunner};
pub use pipeline::{PackageRequest, PackagingPipeline, PipelineError, PreparedPackage};

pub const PACKAGER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prefix shared by every barclamp package name.
pub const PACKAGE_PREFIX: &str = "crowbar-barclamp-";

/// Package every barclamp depends on implicitly.
pub const BASE_DEPENDENCY: &str = "crowbar-barclamp-crowbar";

/// Manifest file expected at the root of a barclamp.
pub const MANIFEST_FILE: &str = "crowbar.toml";
