// Durable edge journal backed by sled.
//
// Every recorded edge can be appended here before it reaches the
// in-memory recorder, so a trace cut short by a crash still leaves an
// ordered record on disk. Grouping is not applied at this layer; the
// journal stores raw edges and recovery folds them afterwards.

use crate::domain::diagram::CallEdge;
use crate::ports::EdgeSink;
use anyhow::{Context, Result};
use sled::Db;
use std::path::Path;

pub struct EdgeJournal {
    db: Db,
    edges: sled::Tree,
}

impl EdgeJournal {
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path)
            .with_context(|| format!("cannot open edge journal at {}", path.display()))?;
        let edges = db.open_tree("edges")?;
        Ok(Self { db, edges })
    }

    /// Append one edge. Keys are monotonic ids stored big-endian so
    /// iteration yields append order. Flushed per append so the edge
    /// survives an interrupted process.
    pub fn push(&self, edge: &CallEdge) -> Result<()> {
        let id = self.db.generate_id()?;
        let bytes = bincode::serialize(edge)?;
        self.edges.insert(id.to_be_bytes(), bytes)?;
        self.edges.flush()?;
        Ok(())
    }

    /// All journaled edges, in the order they were appended.
    pub fn replay(&self) -> Result<Vec<CallEdge>> {
        let mut edges = Vec::new();
        for entry in self.edges.iter() {
            let (_key, bytes) = entry?;
            edges.push(bincode::deserialize(&bytes)?);
        }
        Ok(edges)
    }

    /// Drop all journaled edges, after a successful flush to disk.
    pub fn clear(&self) -> Result<()> {
        self.edges.clear()?;
        self.edges.flush()?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

impl EdgeSink for EdgeJournal {
    fn append(&self, edge: &CallEdge) -> Result<()> {
        self.push(edge)
    }
}
