//! PlantUML Sequence Exporter
//!
//! Renders recorded diagram lines as a PlantUML sequence diagram.

use crate::domain::diagram::DiagramLine;
use crate::ports::TraceExporter;
use anyhow::Context;
use std::fs;
use std::path::Path;

/// Opening delimiter of a diagram document.
pub const START_TAG: &str = "@startuml";
/// Closing delimiter of a diagram document.
pub const END_TAG: &str = "@enduml";
/// File name a trace session saves its diagram under.
pub const TRACE_FILE_NAME: &str = "sequence.plantuml";

/// Render the complete document: delimiters around the body, lines
/// joined with newlines, no trailing newline.
pub fn render_document(lines: &[DiagramLine]) -> String {
    let mut out = Vec::with_capacity(lines.len() + 2);
    out.push(START_TAG.to_string());
    for line in lines {
        out.push(line.render());
    }
    out.push(END_TAG.to_string());
    out.join("\n")
}

pub struct PlantUmlExporter;

impl TraceExporter for PlantUmlExporter {
    fn export(&self, lines: &[DiagramLine], path: &Path) -> anyhow::Result<()> {
        let content = render_document(lines);
        fs::write(path, content)
            .with_context(|| format!("cannot write diagram to {}", path.display()))?;
        Ok(())
    }
}
