// Registered code units and their member bindings.
//
// A unit stands in for a module of the traced program: it has a dotted
// name, a source location on disk, and a table of named members. The
// tracer never reflects over anything; whatever a unit exposes is
// whatever was bound into its table.

use dashmap::DashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File name that marks a unit location as a package initializer.
pub const INIT_FILE: &str = "mod.rs";

/// Extension shared by all unit files.
pub const UNIT_SUFFIX: &str = "rs";

/// Payload passed into and out of traced callables.
pub type Value = serde_json::Value;

/// A callable member of a unit.
pub trait UnitCallable: Send + Sync {
    fn call(&self, args: &[Value]) -> anyhow::Result<Value>;
}

impl<F> UnitCallable for F
where
    F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync,
{
    fn call(&self, args: &[Value]) -> anyhow::Result<Value> {
        self(args)
    }
}

/// An instance produced by a class constructor. Member access goes
/// through `get` so proxies can observe it.
pub trait UnitObject: Send + Sync {
    fn get(&self, member: &str) -> anyhow::Result<Value>;
}

pub type Constructor =
    Arc<dyn Fn(&[Value]) -> anyhow::Result<Box<dyn UnitObject>> + Send + Sync>;

/// What kind of class a registered class binding declares itself as.
/// Only `Plain` classes are ever instrumented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    Plain,
    Enumeration,
    Error,
    /// Hashable value marker; plain data, never traced.
    Value,
}

/// A class registered as a unit member.
#[derive(Clone)]
pub struct ClassSpec {
    /// Display name used as the callee participant in the diagram.
    /// `None` for anonymous classes, which are never proxied.
    pub qualified_name: Option<String>,
    /// Name of the unit that declared the class.
    pub declaring_unit: String,
    pub kind: ClassKind,
    pub constructor: Constructor,
}

impl ClassSpec {
    pub fn new(
        qualified_name: Option<String>,
        declaring_unit: impl Into<String>,
        kind: ClassKind,
        constructor: Constructor,
    ) -> Self {
        ClassSpec {
            qualified_name,
            declaring_unit: declaring_unit.into(),
            kind,
            constructor,
        }
    }

    pub fn construct(&self, args: &[Value]) -> anyhow::Result<Box<dyn UnitObject>> {
        (self.constructor)(args)
    }
}

impl fmt::Debug for ClassSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassSpec")
            .field("qualified_name", &self.qualified_name)
            .field("declaring_unit", &self.declaring_unit)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// A named binding inside a unit.
#[derive(Clone)]
pub enum MemberValue {
    /// Plain data: constants, paths, flags.
    Value(Value),
    Callable(Arc<dyn UnitCallable>),
    Class(ClassSpec),
    /// Reference to a nested unit, by dotted name.
    SubUnit(String),
}

impl MemberValue {
    pub fn value(v: impl Into<Value>) -> Self {
        MemberValue::Value(v.into())
    }

    pub fn callable<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        MemberValue::Callable(Arc::new(f))
    }

    pub fn sub_unit(name: impl Into<String>) -> Self {
        MemberValue::SubUnit(name.into())
    }
}

impl fmt::Debug for MemberValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberValue::Value(v) => f.debug_tuple("Value").field(v).finish(),
            MemberValue::Callable(_) => f.write_str("Callable"),
            MemberValue::Class(spec) => f.debug_tuple("Class").field(spec).finish(),
            MemberValue::SubUnit(name) => f.debug_tuple("SubUnit").field(name).finish(),
        }
    }
}

/// A registered unit: dotted name, source location, member table.
#[derive(Debug)]
pub struct Unit {
    pub name: String,
    pub location: PathBuf,
    members: DashMap<String, MemberValue>,
}

impl Unit {
    /// A package unit rooted at `dir`; its location is the package
    /// initializer file inside that directory.
    pub fn package(name: impl Into<String>, dir: impl AsRef<Path>) -> Arc<Unit> {
        Arc::new(Unit {
            name: name.into(),
            location: dir.as_ref().join(INIT_FILE),
            members: DashMap::new(),
        })
    }

    /// A leaf unit backed by a single source file.
    pub fn leaf(name: impl Into<String>, file: impl Into<PathBuf>) -> Arc<Unit> {
        Arc::new(Unit {
            name: name.into(),
            location: file.into(),
            members: DashMap::new(),
        })
    }

    pub fn is_package(&self) -> bool {
        self.location
            .file_name()
            .map(|f| f == INIT_FILE)
            .unwrap_or(false)
    }

    /// Directory holding the unit's source file.
    pub fn dir(&self) -> Option<&Path> {
        self.location.parent()
    }

    /// Number of dotted segments in the unit name.
    pub fn nesting(&self) -> usize {
        self.name.split('.').count()
    }

    /// Bind or rebind a member.
    pub fn bind(&self, name: impl Into<String>, value: MemberValue) {
        self.members.insert(name.into(), value);
    }

    /// Cloned member binding, if present.
    pub fn member(&self, name: &str) -> Option<MemberValue> {
        self.members.get(name).map(|r| r.clone())
    }

    /// Member names in sorted order, for deterministic iteration.
    pub fn member_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.members.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }
}

/// Unique id for a member binding, `unit.member`.
pub fn member_id(unit: &str, member: &str) -> String {
    format!("{}.{}", unit, member)
}
