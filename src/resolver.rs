//! Dependency Resolver

use crate::manifest::{Manifest, PackageType};
use crate::BASE_DEPENDENCY;

/// Filled in by dpkg-shlibdeps at build time.
pub const SHLIBS_DEPENDS: &str = "${shlibs:Depends}";
/// Filled in by debhelper at build time.
pub const MISC_DEPENDS: &str = "${misc:Depends}";

/// Final dependency list for one package type, in append order:
/// manifest requirements (base included), the type's `required_pkgs`,
/// then the Debian substitution variables for `deb`. The base dependency
/// and the substitution variables appear once each whatever the manifest lists.
pub fn resolve(manifest: &Manifest, package_type: PackageType) -> Vec<String> {
    let mut deps = manifest.requires.clone();
    deps.extend(
        manifest
            .required_pkgs(package_type)
            .iter()
            .filter(|dep| !is_reserved(dep))
            .cloned(),
    );
    if package_type == PackageType::Deb {
        deps.push(SHLIBS_DEPENDS.to_string());
        deps.push(MISC_DEPENDS.to_string());
    }
    deps
}

fn is_reserved(dep: &str) -> bool {
    [BASE_DEPENDENCY, SHLIBS_DEPENDS, MISC_DEPENDS].contains(&dep)
}
