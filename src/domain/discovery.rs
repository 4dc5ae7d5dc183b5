// Watch-set discovery: expand root packages into the full set of
// units to instrument, using the registered universe as the view of
// the source tree.
//
// Unit names are derived from locations by taking trailing path
// components: a package nested N segments deep contributes sub-package
// names from N+1 trailing components and sibling file names from N+1
// or N+2, depending on the directory being walked. Every derived name
// must resolve in the registry; a miss means the registration and the
// tree on disk disagree, which is fatal.

use crate::domain::registry::UnitRegistry;
use crate::domain::unit::Unit;
use crate::errors::TraceError;
use std::collections::HashSet;
use std::path::{Component, Path};
use std::sync::Arc;

/// Dotted name from the trailing components of a package directory.
pub fn derive_package_name(dir: &Path, trailing: usize) -> Result<String, TraceError> {
    let comps = normal_components(dir);
    if comps.len() < trailing || trailing == 0 {
        return Err(TraceError::BadLocation(dir.to_path_buf()));
    }
    Ok(comps[comps.len() - trailing..].join("."))
}

/// Dotted name from a unit file: the extension is dropped, then the
/// trailing components are joined.
pub fn derive_unit_name(file: &Path, trailing: usize) -> Result<String, TraceError> {
    let stem = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| TraceError::BadLocation(file.to_path_buf()))?;
    let mut comps = match file.parent() {
        Some(parent) => normal_components(parent),
        None => Vec::new(),
    };
    comps.push(stem);
    if comps.len() < trailing || trailing == 0 {
        return Err(TraceError::BadLocation(file.to_path_buf()));
    }
    Ok(comps[comps.len() - trailing..].join("."))
}

fn normal_components(path: &Path) -> Vec<String> {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

/// Expand the configured roots into the watch set.
///
/// Roots resolve by name; package roots are then walked recursively.
/// Ignored names are left out of the watch set but still resolved and
/// location-indexed at the end, so calls made from them attribute to
/// them instead of aborting the trace. The returned set is deduplicated
/// by name in first-seen order.
pub fn discover(
    registry: &UnitRegistry,
    roots: &[String],
    ignore: &[String],
) -> Result<Vec<Arc<Unit>>, TraceError> {
    let ignored: HashSet<&str> = ignore.iter().map(String::as_str).collect();
    let mut watched: Vec<Arc<Unit>> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for root_name in roots {
        let root = registry.resolve(root_name)?;
        push_unique(&mut watched, &mut seen, Arc::clone(&root));
        if root.is_package() {
            expand_package(registry, &root, &ignored, &mut watched, &mut seen)?;
        }
    }

    for name in ignore {
        let unit = registry.resolve(name)?;
        registry.index_location(&unit);
    }

    Ok(watched)
}

fn expand_package(
    registry: &UnitRegistry,
    package: &Arc<Unit>,
    ignored: &HashSet<&str>,
    watched: &mut Vec<Arc<Unit>>,
    seen: &mut HashSet<String>,
) -> Result<(), TraceError> {
    let nest = package.nesting();
    let dir = package
        .dir()
        .ok_or_else(|| TraceError::BadLocation(package.location.clone()))?;

    for sub_dir in registry.package_dirs_under(dir) {
        let name = derive_package_name(&sub_dir, nest + 1)?;
        if ignored.contains(name.as_str()) {
            // Pruned: nothing under an ignored package is visited.
            continue;
        }
        let sub = registry.resolve(&name)?;
        push_unique(watched, seen, Arc::clone(&sub));
        if sub.is_package() {
            expand_package(registry, &sub, ignored, watched, seen)?;
        }
        collect_siblings(registry, &sub_dir, nest + 2, ignored, watched, seen)?;
    }

    collect_siblings(registry, dir, nest + 1, ignored, watched, seen)
}

fn collect_siblings(
    registry: &UnitRegistry,
    dir: &Path,
    trailing: usize,
    ignored: &HashSet<&str>,
    watched: &mut Vec<Arc<Unit>>,
    seen: &mut HashSet<String>,
) -> Result<(), TraceError> {
    for unit in registry.units_in_dir(dir) {
        let name = derive_unit_name(&unit.location, trailing)?;
        if ignored.contains(name.as_str()) {
            continue;
        }
        // The derived name is the authority; a unit registered under a
        // name its location does not spell is a configuration error.
        let resolved = registry.resolve(&name)?;
        push_unique(watched, seen, resolved);
    }
    Ok(())
}

fn push_unique(watched: &mut Vec<Arc<Unit>>, seen: &mut HashSet<String>, unit: Arc<Unit>) {
    if seen.insert(unit.name.clone()) {
        watched.push(unit);
    }
}
