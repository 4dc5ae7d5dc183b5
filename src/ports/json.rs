//! JSON Trace Exporter
//!
//! Structured export of a recorded trace, for tooling that wants the
//! edges instead of the rendered diagram text.

use crate::domain::diagram::{CallEdge, DiagramLine};
use crate::ports::TraceExporter;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceDto {
    pub lines: Vec<LineDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineDto {
    pub from: String,
    pub to: String,
    pub label: String,
    pub count: u64,
}

impl TraceDto {
    /// Build the DTO from grouped diagram lines. Lines that do not
    /// parse as messages are dropped.
    pub fn from_lines(lines: &[DiagramLine]) -> Self {
        let lines = lines
            .iter()
            .filter_map(|line| {
                CallEdge::parse(&line.head).map(|edge| LineDto {
                    from: edge.from,
                    to: edge.to,
                    label: edge.label,
                    count: line.count,
                })
            })
            .collect();
        TraceDto { lines }
    }
}

pub struct JsonExporter;

impl TraceExporter for JsonExporter {
    fn export(&self, lines: &[DiagramLine], path: &Path) -> anyhow::Result<()> {
        let dto = TraceDto::from_lines(lines);
        let content =
            serde_json::to_string_pretty(&dto).context("cannot serialize trace to JSON")?;
        fs::write(path, content)
            .with_context(|| format!("cannot write trace to {}", path.display()))?;
        Ok(())
    }
}
