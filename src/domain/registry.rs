// Unit registry: the universe of registered units plus the location
// index used for caller attribution.

use crate::domain::unit::{Unit, INIT_FILE, UNIT_SUFFIX};
use crate::errors::TraceError;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Thread-safe registry of every unit the consumer has registered.
///
/// The name table is the universe: resolution failures against it are
/// configuration errors. The location table is narrower; only watched
/// and explicitly ignored units are indexed there, so a stack frame
/// from any other unit reads as unknown during caller resolution.
pub struct UnitRegistry {
    by_name: DashMap<String, Arc<Unit>>,
    by_location: DashMap<PathBuf, Arc<Unit>>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        UnitRegistry {
            by_name: DashMap::new(),
            by_location: DashMap::new(),
        }
    }

    /// Add a unit to the universe. Names are unique.
    pub fn register(&self, unit: Arc<Unit>) -> Result<(), TraceError> {
        if self.by_name.contains_key(&unit.name) {
            return Err(TraceError::DuplicateUnit(unit.name.clone()));
        }
        self.by_name.insert(unit.name.clone(), unit);
        Ok(())
    }

    /// Look a unit up by dotted name; a miss is fatal.
    pub fn resolve(&self, name: &str) -> Result<Arc<Unit>, TraceError> {
        self.get(name)
            .ok_or_else(|| TraceError::UnknownUnit(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<Arc<Unit>> {
        self.by_name.get(name).map(|r| Arc::clone(r.value()))
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Make a unit's location answer for caller resolution.
    pub fn index_location(&self, unit: &Arc<Unit>) {
        self.by_location
            .insert(unit.location.clone(), Arc::clone(unit));
    }

    /// Unit indexed at exactly this location, if any.
    pub fn unit_at(&self, location: &Path) -> Option<Arc<Unit>> {
        self.by_location.get(location).map(|r| Arc::clone(r.value()))
    }

    /// Registered leaf units whose file sits directly in `dir`,
    /// sorted by location. Package initializers are not included.
    pub fn units_in_dir(&self, dir: &Path) -> Vec<Arc<Unit>> {
        let mut units: Vec<Arc<Unit>> = self
            .by_name
            .iter()
            .filter(|r| {
                let loc = &r.value().location;
                loc.parent() == Some(dir)
                    && loc.file_name().map(|f| f != INIT_FILE).unwrap_or(false)
                    && loc.extension().map(|e| e == UNIT_SUFFIX).unwrap_or(false)
            })
            .map(|r| Arc::clone(r.value()))
            .collect();
        units.sort_by(|a, b| a.location.cmp(&b.location));
        units
    }

    /// Directories one level under `dir` that hold a registered
    /// package initializer, sorted.
    pub fn package_dirs_under(&self, dir: &Path) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = self
            .by_name
            .iter()
            .filter_map(|r| {
                let loc = &r.value().location;
                if loc.file_name().map(|f| f == INIT_FILE).unwrap_or(false) {
                    let pkg_dir = loc.parent()?;
                    if pkg_dir.parent() == Some(dir) {
                        return Some(pkg_dir.to_path_buf());
                    }
                }
                None
            })
            .collect();
        dirs.sort();
        dirs.dedup();
        dirs
    }
}

impl Default for UnitRegistry {
    fn default() -> Self {
        Self::new()
    }
}
