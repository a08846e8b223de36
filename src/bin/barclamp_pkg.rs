//! Barclamp Packager CLI
//!
//! barclamp-pkg <SOURCE> <DESTINATION> <rpm|deb>
//! Diagnostics go to stderr; exits with the native builder's status when it fails.

use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use thiserror::Error;

use barclamp_pkg::{
    Config, ConfigError, PackageRequest, PackageType, PackagingPipeline, PipelineError,
    SystemRunner,
};

#[derive(Parser)]
#[command(name = "barclamp-pkg")]
#[command(about = "Barclamp Packager - validate a barclamp and build its native package")]
struct Cli {
    /// Barclamp source directory (its name must match the manifest)
    source: PathBuf,

    /// Directory that receives the built package (.rpm, or the .deb files
    /// dpkg-buildpackage leaves beside the source)
    destination: PathBuf,

    /// Package flavour to build
    #[arg(value_enum)]
    package_type: PackageType,

    /// Render packaging metadata and print a JSON summary instead of building
    #[arg(long)]
    no_build: bool,

    /// Log each stage
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("failed to write summary: {0}")]
    Summary(#[from] serde_json::Error),

    #[error("failed to write summary: {0}")]
    Output(#[from] std::io::Error),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            CliError::Pipeline(e) => e.exit_code(),
            _ => 1,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("BARCLAMP_PKG_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let stdout = std::io::stdout();
    match run(cli, |key| std::env::var(key).ok(), &mut stdout.lock()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report(&e),
    }
}

/// Everything after argument parsing. The environment comes in through
/// `lookup` and the `--no-build` summary goes to `out`.
fn run(
    cli: Cli,
    lookup: impl Fn(&str) -> Option<String>,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let config = Config::from_lookup(lookup)?;
    let pipeline = PackagingPipeline::new(config, SystemRunner);
    let request = PackageRequest {
        source: cli.source,
        destination: cli.destination,
        package_type: cli.package_type,
    };

    if cli.no_build {
        let prepared = pipeline.prepare(&request)?;
        serde_json::to_writer_pretty(&mut *out, &prepared)?;
        writeln!(out)?;
        return Ok(());
    }

    pipeline.build(&request)?;
    Ok(())
}

fn report(error: &CliError) -> ExitCode {
    eprintln!("error: {error}");
    if let CliError::Pipeline(e) = error {
        for violation in e.violations() {
            eprintln!("  {violation}");
        }
    }
    ExitCode::from(error.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;
    use std::fs;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("barclamp-pkg").chain(args.iter().copied()))
    }

    #[test]
    fn test_help_exits_zero() {
        let err = parse(&["--help"]).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        assert_eq!(err.exit_code(), 0);
    }

    #[test]
    fn test_usage_errors_exit_two() {
        let err = parse(&["foo", "out", "zip"]).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
        assert_eq!(err.exit_code(), 2);

        let err = parse(&["foo"]).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_flags_parse() {
        let cli = parse(&["foo", "out", "deb", "--no-build", "-v"]).unwrap();
        assert_eq!(cli.package_type, PackageType::Deb);
        assert!(cli.no_build && cli.verbose);
    }

    #[test]
    fn test_missing_root_reported_before_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let barclamp = tmp.path().join("foo");
        fs::create_dir_all(&barclamp).unwrap();
        fs::write(barclamp.join("crowbar.toml"), "[[[ not toml").unwrap();
        let cli = parse(&[
            barclamp.to_str().unwrap(),
            tmp.path().to_str().unwrap(),
            "rpm",
        ])
        .unwrap();

        let mut out = Vec::new();
        let err = run(cli, |_| None, &mut out).unwrap_err();

        assert!(matches!(err, CliError::Config(ConfigError::MissingEnv("CROWBAR_DIR"))));
        assert_eq!(err.exit_code(), 1);
        assert!(out.is_empty());
    }

    #[test]
    fn test_no_build_prints_summary() {
        let tmp = tempfile::tempdir().unwrap();
        let base = fs::canonicalize(tmp.path()).unwrap();
        let root = base.join("crowbar");
        let barclamp = base.join("foo");
        fs::create_dir_all(root.join("packaging")).unwrap();
        fs::create_dir_all(&barclamp).unwrap();
        fs::write(root.join("packaging/barclamp.spec.tmpl"), "Name: {{ pkg }}").unwrap();
        fs::write(
            barclamp.join("crowbar.toml"),
            "[barclamp]\nname = \"foo\"\ndisplay = \"Foo\"\n",
        )
        .unwrap();
        let cli = parse(&[
            barclamp.to_str().unwrap(),
            base.to_str().unwrap(),
            "rpm",
            "--no-build",
        ])
        .unwrap();
        let root_dir = root.to_string_lossy().into_owned();

        let mut out = Vec::new();
        run(cli, |key| (key == "CROWBAR_DIR").then(|| root_dir.clone()), &mut out).unwrap();

        let summary: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(summary["context"]["pkg"], "crowbar-barclamp-foo");
        assert_eq!(summary["command"]["program"], "rpmbuild");
        assert_eq!(
            fs::read_to_string(barclamp.join("crowbar-barclamp-foo.spec")).unwrap(),
            "Name: crowbar-barclamp-foo\n"
        );
    }
}
