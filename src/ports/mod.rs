use crate::domain::diagram::{CallEdge, DiagramLine};
use std::path::Path;

pub mod json;
pub mod plantuml;

/// Renders recorded diagram lines into a file.
pub trait TraceExporter {
    fn export(&self, lines: &[DiagramLine], path: &Path) -> anyhow::Result<()>;
}

/// Receives every recorded edge as it is observed. Implementations
/// must be safe to call from any thread the traced program uses.
pub trait EdgeSink: Send + Sync {
    fn append(&self, edge: &CallEdge) -> anyhow::Result<()>;
}
