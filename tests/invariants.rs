//! Contract Invariant Tests
//!
//! End-to-end runs of the pipeline over throwaway barclamp trees.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use barclamp_pkg::{
    BuildCommand, BuildError, Config, ManifestError, PackageRequest, PackageType,
    PackagingPipeline, PipelineError, ProcessRunner, ValidationError, BASE_DEPENDENCY,
};
use tempfile::TempDir;

/// Records every command instead of running it.
struct FakeRunner {
    code: i32,
    outputs: Vec<&'static str>,
    calls: RefCell<Vec<(BuildCommand, PathBuf)>>,
}

impl FakeRunner {
    fn exiting(code: i32) -> Self {
        Self {
            code,
            outputs: Vec::new(),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Also drop `name` beside the working directory, as dpkg-buildpackage does.
    fn leaving(mut self, name: &'static str) -> Self {
        self.outputs.push(name);
        self
    }
}

impl ProcessRunner for &FakeRunner {
    fn run(&self, command: &BuildCommand, working_dir: &Path) -> Result<i32, BuildError> {
        self.calls
            .borrow_mut()
            .push((command.clone(), working_dir.to_path_buf()));
        for name in &self.outputs {
            fs::write(working_dir.parent().unwrap().join(name), "").unwrap();
        }
        Ok(self.code)
    }
}

const RPM_TEMPLATE: &str = "Name: {{ pkg }}
Version: {{ version }}
Summary: {{ display }}
{{#each requires}}
Requires: {{ this }}
{{/each}}
# barclamp {{ name }} needs {{ requires }}";

const BAG_SCHEMA: &str = r#"{
  "type": "map",
  "mapping": {
    "id": { "type": "str", "required": true },
    "attributes": { "type": "map", "mapping": { "=": { "type": "any" } } }
  }
}"#;

struct Workspace {
    _tmp: TempDir,
    root: PathBuf,
    barclamp: PathBuf,
    dest: PathBuf,
}

impl Workspace {
    fn new(name: &str, manifest: &str) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let base = fs::canonicalize(tmp.path()).unwrap();
        let root = base.join("crowbar");
        let barclamp = base.join(name);
        let dest = base.join("out");
        fs::create_dir_all(root.join("packaging")).unwrap();
        fs::create_dir_all(barclamp.join("debian")).unwrap();
        fs::create_dir_all(&dest).unwrap();
        fs::write(root.join("packaging/barclamp.spec.tmpl"), RPM_TEMPLATE).unwrap();
        fs::write(barclamp.join("crowbar.toml"), manifest).unwrap();
        fs::write(barclamp.join("debian/control.tmpl"), "Source: {{ pkg }}\nDepends: {{ requires }}").unwrap();
        fs::write(barclamp.join("debian/rules.tmpl"), "#!/usr/bin/make -f\n# {{ name }} {{ version }}").unwrap();
        Self {
            _tmp: tmp,
            root,
            barclamp,
            dest,
        }
    }

    fn write(&self, rel: &str, content: &str) {
        let path = self.barclamp.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn request(&self, package_type: PackageType) -> PackageRequest {
        PackageRequest {
            source: self.barclamp.clone(),
            destination: self.dest.clone(),
            package_type,
        }
    }

    fn pipeline<'a>(&self, runner: &'a FakeRunner) -> PackagingPipeline<&'a FakeRunner> {
        PackagingPipeline::new(Config::new(&self.root), runner)
    }
}

const FOO: &str = "[barclamp]\nname = \"foo\"\ndisplay = \"Foo\"\nrequires = [\"bar\"]\n";

#[test]
fn invariant_rpm_spec_rendered_and_built() {
    let ws = Workspace::new("foo", FOO);
    let runner = FakeRunner::exiting(0);

    let prepared = ws.pipeline(&runner).build(&ws.request(PackageType::Rpm)).unwrap();

    assert_eq!(prepared.context.requires, vec!["bar", BASE_DEPENDENCY]);
    let spec = ws.barclamp.join("crowbar-barclamp-foo.spec");
    let text = fs::read_to_string(&spec).unwrap();
    assert!(text.starts_with("Name: crowbar-barclamp-foo\n"));
    assert!(text.contains("Requires: bar\nRequires: crowbar-barclamp-crowbar\n"));
    assert!(text.ends_with("# barclamp foo needs bar, crowbar-barclamp-crowbar\n"));

    let calls = runner.calls.borrow();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0.program, "rpmbuild");
    assert_eq!(calls[0].0.args.last().unwrap(), "crowbar-barclamp-foo.spec");
    assert_eq!(calls[0].1, ws.barclamp);
}

#[test]
fn invariant_deb_dependencies_end_with_placeholders() {
    let ws = Workspace::new(
        "foo",
        "[barclamp]\nname = \"foo\"\ndisplay = \"Foo\"\n\n[debs]\nrequired_pkgs = [\"libssl-dev\"]\n",
    );
    let runner = FakeRunner::exiting(0);

    let prepared = ws.pipeline(&runner).prepare(&ws.request(PackageType::Deb)).unwrap();

    assert_eq!(
        prepared.context.requires,
        vec![BASE_DEPENDENCY, "libssl-dev", "${shlibs:Depends}", "${misc:Depends}"]
    );
    let control = fs::read_to_string(ws.barclamp.join("debian/control")).unwrap();
    assert_eq!(
        control,
        "Source: crowbar-barclamp-foo\nDepends: crowbar-barclamp-crowbar, libssl-dev, ${shlibs:Depends}, ${misc:Depends}\n"
    );
    assert!(ws.barclamp.join("debian/rules").is_file());
    assert_eq!(prepared.artifacts.len(), 2);
    assert!(runner.calls.borrow().is_empty());
}

#[test]
fn invariant_name_mismatch_stops_everything() {
    let ws = Workspace::new("y", "[barclamp]\nname = \"x\"\ndisplay = \"X\"\n");
    ws.write("bc-template-y.schema", "{ broken");
    let runner = FakeRunner::exiting(0);

    let err = ws.pipeline(&runner).build(&ws.request(PackageType::Rpm)).unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Manifest(ManifestError::NameMismatch { .. })
    ));
    assert_ne!(err.exit_code(), 0);
    assert!(!ws.barclamp.join("crowbar-barclamp-x.spec").exists());
    assert!(!ws.barclamp.join("crowbar-barclamp-y.spec").exists());
    assert!(runner.calls.borrow().is_empty());
}

#[test]
fn invariant_invalid_bags_block_rendering() {
    let ws = Workspace::new("foo", FOO);
    ws.write("chef/data_bags/crowbar/bc-template-foo.schema", BAG_SCHEMA);
    ws.write("chef/data_bags/crowbar/bc-template-foo.json", "{\"attributes\": {}}");
    ws.write("chef/data_bags/crowbar/bc-foo-config.schema", BAG_SCHEMA);
    ws.write("chef/data_bags/crowbar/bc-foo-config.json", "{\"id\": 7}");
    ws.write("chef/data_bags/crowbar/unmatched.json", "[]");
    let runner = FakeRunner::exiting(0);

    let err = ws.pipeline(&runner).build(&ws.request(PackageType::Rpm)).unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Validation(ValidationError::InvalidBags(_))
    ));
    assert_eq!(err.exit_code(), 2);
    let files: Vec<_> = err
        .violations()
        .iter()
        .map(|v| v.file.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(files, vec!["bc-foo-config.json", "bc-template-foo.json"]);
    assert!(!ws.barclamp.join("crowbar-barclamp-foo.spec").exists());
    assert!(runner.calls.borrow().is_empty());
}

#[test]
fn invariant_unmatched_documents_never_matter() {
    let ws = Workspace::new("foo", FOO);
    ws.write("bc-template-foo.schema", BAG_SCHEMA);
    ws.write("bc-template-foo.json", "{\"id\": \"bc-template-foo\"}");
    ws.write("bc-template-other.json", "this is not json at all");
    let runner = FakeRunner::exiting(0);

    assert!(ws.pipeline(&runner).prepare(&ws.request(PackageType::Rpm)).is_ok());
}

#[test]
fn invariant_malformed_schema_is_fatal() {
    let ws = Workspace::new("foo", FOO);
    ws.write("bc-template-foo.schema", "{\n  \"type\": \"map\",\n  \"mapping\": { \"id\": { \"type\": \"string\" } }\n}");
    let runner = FakeRunner::exiting(0);

    let err = ws.pipeline(&runner).prepare(&ws.request(PackageType::Rpm)).unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Validation(ValidationError::InvalidSchemas(_))
    ));
    let violation = &err.violations()[0];
    assert_eq!(violation.path, "/mapping/id/type");
    assert_eq!((violation.line, violation.column), (3, 32));
}

#[test]
fn invariant_missing_template_is_error() {
    let ws = Workspace::new("foo", FOO);
    fs::remove_file(ws.barclamp.join("debian/rules.tmpl")).unwrap();
    let runner = FakeRunner::exiting(0);

    let err = ws.pipeline(&runner).prepare(&ws.request(PackageType::Deb)).unwrap_err();

    assert!(err.to_string().contains("template not found"));
    assert!(!ws.barclamp.join("debian/control").exists());
}

#[test]
fn invariant_builder_status_propagates() {
    let ws = Workspace::new("foo", FOO);
    let runner = FakeRunner::exiting(42);

    let err = ws.pipeline(&runner).build(&ws.request(PackageType::Deb)).unwrap_err();

    assert!(matches!(err, PipelineError::BuildFailed { code: 42, .. }));
    assert_eq!(err.exit_code(), 42);
    assert_eq!(runner.calls.borrow()[0].0.program, "dpkg-buildpackage");
}

#[test]
fn invariant_deb_packages_land_in_destination() {
    let ws = Workspace::new("foo", FOO);
    let runner = FakeRunner::exiting(0)
        .leaving("crowbar-barclamp-foo_20240101.000000_all.deb")
        .leaving("crowbar-barclamp-foo_20240101.000000_amd64.changes");

    let built = ws.pipeline(&runner).build(&ws.request(PackageType::Deb)).unwrap();

    let deb = ws.dest.join("crowbar-barclamp-foo_20240101.000000_all.deb");
    assert_eq!(built.packages, vec![deb.clone()]);
    assert!(deb.is_file());
    assert!(!ws.barclamp.parent().unwrap().join("crowbar-barclamp-foo_20240101.000000_all.deb").exists());
}

#[test]
fn invariant_failed_deb_build_moves_nothing() {
    let ws = Workspace::new("foo", FOO);
    let runner = FakeRunner::exiting(1).leaving("crowbar-barclamp-foo_1_all.deb");

    assert!(ws.pipeline(&runner).build(&ws.request(PackageType::Deb)).is_err());
    assert!(!ws.dest.join("crowbar-barclamp-foo_1_all.deb").exists());
}

#[test]
fn invariant_missing_destination_is_config_error() {
    let ws = Workspace::new("foo", FOO);
    fs::remove_dir(&ws.dest).unwrap();
    let runner = FakeRunner::exiting(0);

    let err = ws.pipeline(&runner).prepare(&ws.request(PackageType::Rpm)).unwrap_err();

    assert!(matches!(err, PipelineError::Config(_)));
}
