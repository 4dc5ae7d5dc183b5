// Member classification: decides what the instrumenter does with each
// binding of a watched unit.

use crate::domain::unit::{ClassKind, MemberValue};
use std::collections::HashSet;

/// Outcome of classifying one member binding. Only `Callable` and
/// `Class` lead to instrumentation; everything else is left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    /// All-uppercase name, treated as a constant.
    Constant,
    /// Double-underscore prefix, internal machinery.
    Internal,
    Enumeration,
    ErrorType,
    /// Hashable value marker class.
    ValueType,
    /// Class declared by a unit outside the watch set.
    ForeignClass,
    Callable,
    /// Watched plain class, to be proxied.
    Class,
    /// Plain data binding.
    Primitive,
    SubUnit,
}

impl MemberKind {
    pub fn is_instrumented(&self) -> bool {
        matches!(self, MemberKind::Callable | MemberKind::Class)
    }
}

/// Classify a member binding. Name rules run before value rules, and
/// class kind rules before the watch check, so the first matching rule
/// wins regardless of what the binding holds.
pub fn classify(name: &str, value: &MemberValue, watch: &HashSet<String>) -> MemberKind {
    if name == name.to_uppercase() {
        return MemberKind::Constant;
    }
    if name.starts_with("__") {
        return MemberKind::Internal;
    }
    match value {
        MemberValue::Class(spec) => match spec.kind {
            ClassKind::Enumeration => MemberKind::Enumeration,
            ClassKind::Error => MemberKind::ErrorType,
            ClassKind::Value => MemberKind::ValueType,
            ClassKind::Plain => {
                if watch.contains(&spec.declaring_unit) {
                    MemberKind::Class
                } else {
                    MemberKind::ForeignClass
                }
            }
        },
        MemberValue::Callable(_) => MemberKind::Callable,
        MemberValue::Value(_) => MemberKind::Primitive,
        MemberValue::SubUnit(_) => MemberKind::SubUnit,
    }
}
