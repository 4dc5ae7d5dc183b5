// Sequence diagram model for plantrace.
// Calls are recorded as directed edges and folded into diagram lines,
// where consecutive repeats of the same message collapse into a single
// line carrying a " +N" multiplicity suffix.

use crate::errors::TraceError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Label recorded when a traced constructor runs.
pub const INIT_LABEL: &str = "<init>";

/// A single observed call: caller unit, callee, and the member invoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEdge {
    pub from: String,
    pub to: String,
    pub label: String,
}

impl CallEdge {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        CallEdge {
            from: from.into(),
            to: to.into(),
            label: label.into(),
        }
    }

    /// Render as a diagram message line, without any multiplicity.
    pub fn render(&self) -> String {
        format!("{} --> {}: {}", self.from, self.to, self.label)
    }

    /// Parse a rendered message line back into an edge.
    pub fn parse(line: &str) -> Option<CallEdge> {
        let (from, rest) = line.split_once(" --> ")?;
        let (to, label) = rest.split_once(": ")?;
        Some(CallEdge::new(from, to, label))
    }
}

/// One line of the diagram body: a message plus how many consecutive
/// times it was observed. Lines with `count == 1` render without a
/// suffix; a second observation promotes them straight to ` +2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagramLine {
    pub head: String,
    pub count: u64,
}

impl DiagramLine {
    pub fn from_edge(edge: &CallEdge) -> Self {
        DiagramLine {
            head: edge.render(),
            count: 1,
        }
    }

    /// Parse a diagram body line. A trailing ` +N` with N >= 2 and no
    /// leading zero is a multiplicity suffix; anything else is part of
    /// the message itself, so parsing never fails.
    pub fn parse(text: &str) -> Self {
        if let Some((head, digits)) = text.rsplit_once(" +") {
            let well_formed = !digits.is_empty()
                && digits.chars().all(|c| c.is_ascii_digit())
                && !digits.starts_with('0');
            if well_formed {
                if let Ok(count) = digits.parse::<u64>() {
                    if count >= 2 {
                        return DiagramLine {
                            head: head.to_string(),
                            count,
                        };
                    }
                }
            }
        }
        DiagramLine {
            head: text.to_string(),
            count: 1,
        }
    }

    pub fn render(&self) -> String {
        if self.count <= 1 {
            self.head.clone()
        } else {
            format!("{} +{}", self.head, self.count)
        }
    }

    pub fn bump(&mut self) {
        self.count += 1;
    }
}

/// Fold an edge sequence into diagram lines. Grouping is strictly
/// local: an edge only merges with the line immediately before it.
pub fn group_edges(edges: &[CallEdge]) -> Vec<DiagramLine> {
    let mut lines: Vec<DiagramLine> = Vec::new();
    for edge in edges {
        let head = edge.render();
        match lines.last_mut() {
            Some(last) if last.head == head => last.bump(),
            _ => lines.push(DiagramLine { head, count: 1 }),
        }
    }
    lines
}

#[derive(Default)]
struct RecorderState {
    lines: Vec<DiagramLine>,
    aborted: Option<String>,
}

/// Shared, thread-safe accumulator for the diagram body.
///
/// Recording is additive and must never disturb the traced program, so
/// internal failures do not propagate out of `record`. Instead the
/// recorder is aborted with a reason and every later `record` becomes a
/// no-op; `snapshot` then reports the abort as an error.
pub struct DiagramRecorder {
    state: Mutex<RecorderState>,
}

impl DiagramRecorder {
    pub fn new() -> Self {
        DiagramRecorder {
            state: Mutex::new(RecorderState::default()),
        }
    }

    /// Append an edge, merging it into the previous line when the
    /// message repeats.
    pub fn record(&self, edge: &CallEdge) {
        let mut state = self.state.lock();
        if state.aborted.is_some() {
            return;
        }
        let head = edge.render();
        match state.lines.last_mut() {
            Some(last) if last.head == head => last.bump(),
            _ => state.lines.push(DiagramLine { head, count: 1 }),
        }
    }

    /// Poison the recorder. The first reason wins.
    pub fn abort(&self, reason: impl Into<String>) {
        let mut state = self.state.lock();
        if state.aborted.is_none() {
            state.aborted = Some(reason.into());
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.state.lock().aborted.is_some()
    }

    /// Copy of the recorded lines, or the abort reason if tracing was
    /// poisoned at any point.
    pub fn snapshot(&self) -> Result<Vec<DiagramLine>, TraceError> {
        let state = self.state.lock();
        match &state.aborted {
            Some(reason) => Err(TraceError::Aborted(reason.clone())),
            None => Ok(state.lines.clone()),
        }
    }
}

impl Default for DiagramRecorder {
    fn default() -> Self {
        Self::new()
    }
}
