//! Trace session configuration.
//!
//! A session needs to know which root packages to watch, which unit names
//! to leave untraced, and where the rendered diagram goes. Consumers
//! usually build a `TraceConfig` in code; `load` exists for tools that
//! keep the knobs in a TOML file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Knobs for a trace session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Names of root packages whose trees are instrumented.
    pub roots: Vec<String>,
    /// Unit names excluded from instrumentation. They are still resolved
    /// and indexed so calls made *from* them attribute correctly.
    pub ignore: Vec<String>,
    /// Extra stack frames to skip when resolving the caller of a traced
    /// call. Zero means the nearest registered frame wins.
    pub caller_skip: usize,
    /// Directory the rendered diagram file is written into.
    pub output_dir: PathBuf,
    /// Optional sled journal path. When set, every recorded edge is also
    /// appended durably so an interrupted trace can be recovered.
    pub journal: Option<PathBuf>,
}

impl Default for TraceConfig {
    fn default() -> Self {
        TraceConfig {
            roots: Vec::new(),
            ignore: Vec::new(),
            caller_skip: 0,
            output_dir: PathBuf::from("."),
            journal: None,
        }
    }
}

impl TraceConfig {
    /// Config watching a single root package, output in the current dir.
    pub fn watching(root: impl Into<String>) -> Self {
        TraceConfig {
            roots: vec![root.into()],
            ..TraceConfig::default()
        }
    }

    pub fn with_ignore(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.ignore.extend(names);
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_journal(mut self, path: impl Into<PathBuf>) -> Self {
        self.journal = Some(path.into());
        self
    }

    /// Parse a config from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("invalid trace config")
    }

    /// Load a config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("cannot read trace config {}", path.display()))?;
        Self::from_toml_str(&content)
    }
}
