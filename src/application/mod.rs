// Application layer: the trace session ties registration, discovery,
// instrumentation, and diagram output together behind one facade.

use crate::config::TraceConfig;
use crate::domain::caller::UnitScope;
use crate::domain::diagram::{group_edges, DiagramRecorder};
use crate::domain::discovery;
use crate::domain::instrument::Instrumenter;
use crate::domain::registry::UnitRegistry;
use crate::domain::unit::{member_id, MemberValue, Unit, UnitObject, Value};
use crate::errors::TraceError;
use crate::infrastructure::concurrency;
use crate::infrastructure::journal::EdgeJournal;
use crate::ports::plantuml::{render_document, PlantUmlExporter, TRACE_FILE_NAME};
use crate::ports::{EdgeSink, TraceExporter};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A tracing session over a registered universe of units.
///
/// The expected flow mirrors how a trace run is set up: register every
/// unit of the program, `discover` the watch set from the configured
/// roots, `instrument` it, run the program through `scope`, `call`,
/// and `construct`, then `flush` the diagram.
pub struct TraceSession {
    config: TraceConfig,
    registry: Arc<UnitRegistry>,
    recorder: Arc<DiagramRecorder>,
    instrumenter: Instrumenter,
    journal: Option<Arc<EdgeJournal>>,
}

impl TraceSession {
    pub fn new(config: TraceConfig) -> Result<Self> {
        // A global pool built earlier, by the host program or another
        // session, is kept as it is.
        let _ = concurrency::init_thread_pool();
        let registry = Arc::new(UnitRegistry::new());
        let recorder = Arc::new(DiagramRecorder::new());
        let journal = match &config.journal {
            Some(path) => Some(Arc::new(EdgeJournal::open(path)?)),
            None => None,
        };
        let sink = journal.clone().map(|j| j as Arc<dyn EdgeSink>);
        let instrumenter = Instrumenter::new(
            Arc::clone(&registry),
            Arc::clone(&recorder),
            sink,
            config.caller_skip,
        );
        Ok(TraceSession {
            config,
            registry,
            recorder,
            instrumenter,
            journal,
        })
    }

    /// Shared registry handle, for consumer callables that resolve
    /// other units at call time.
    pub fn registry(&self) -> Arc<UnitRegistry> {
        Arc::clone(&self.registry)
    }

    /// Add a unit to the universe.
    pub fn register(&self, unit: Arc<Unit>) -> Result<()> {
        self.registry.register(unit)?;
        Ok(())
    }

    /// Expand the configured roots into the watch set.
    pub fn discover(&self) -> Result<Vec<Arc<Unit>>> {
        let watched =
            discovery::discover(&self.registry, &self.config.roots, &self.config.ignore)?;
        Ok(watched)
    }

    /// Install tracing wrappers across the watch set.
    pub fn instrument(&self, watched: &[Arc<Unit>]) {
        self.instrumenter.instrument(watched);
        println!(
            "[plantrace] Instrumented {} members across {} units",
            self.instrumenter.instrumented_members(),
            watched.len()
        );
    }

    /// Enter a unit's scope on the current thread. Calls made while
    /// the guard lives attribute to that unit.
    pub fn scope(&self, unit_name: &str) -> Result<UnitScope> {
        let unit = self.registry.resolve(unit_name)?;
        Ok(UnitScope::enter(&unit.location))
    }

    /// Invoke a callable member of a registered unit.
    pub fn call(&self, unit_name: &str, member: &str, args: &[Value]) -> Result<Value> {
        let unit = self.registry.resolve(unit_name)?;
        match unit.member(member) {
            Some(MemberValue::Callable(f)) => f.call(args),
            Some(_) => Err(TraceError::NotCallable(member_id(unit_name, member)).into()),
            None => Err(TraceError::UnknownMember(member_id(unit_name, member)).into()),
        }
    }

    /// Construct an instance of a class member.
    pub fn construct(
        &self,
        unit_name: &str,
        member: &str,
        args: &[Value],
    ) -> Result<Box<dyn UnitObject>> {
        let unit = self.registry.resolve(unit_name)?;
        match unit.member(member) {
            Some(MemberValue::Class(spec)) => spec.construct(args),
            Some(_) => Err(TraceError::NotAClass(member_id(unit_name, member)).into()),
            None => Err(TraceError::UnknownMember(member_id(unit_name, member)).into()),
        }
    }

    /// Render the diagram and save it into the output directory. The
    /// journal, if any, is cleared once the file is safely written.
    pub fn flush(&self) -> Result<PathBuf> {
        let lines = self.recorder.snapshot()?;
        fs::create_dir_all(&self.config.output_dir).with_context(|| {
            format!(
                "cannot create output directory {}",
                self.config.output_dir.display()
            )
        })?;
        let path = self.config.output_dir.join(TRACE_FILE_NAME);
        PlantUmlExporter.export(&lines, &path)?;
        if let Some(journal) = &self.journal {
            journal.clear()?;
        }
        println!("[plantrace] Save calls to {}", path.display());
        Ok(path)
    }
}

/// Rebuild the diagram document from a journal left behind by an
/// interrupted trace.
pub fn recover_trace(journal_path: &Path) -> Result<String> {
    let journal = EdgeJournal::open(journal_path)?;
    let edges = journal.replay()?;
    let lines = group_edges(&edges);
    Ok(render_document(&lines))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn session_with_two_units(output_dir: &Path) -> TraceSession {
        let config = TraceConfig {
            roots: vec!["app".to_string(), "lib".to_string()],
            output_dir: output_dir.to_path_buf(),
            ..TraceConfig::default()
        };
        let session = TraceSession::new(config).unwrap();
        session.register(Unit::leaf("app", "/app/main.rs")).unwrap();
        let lib = Unit::leaf("lib", "/src/lib.rs");
        lib.bind("parse", MemberValue::callable(|_args| Ok(json!("parsed"))));
        session.register(lib).unwrap();
        session
    }

    #[test]
    fn test_session_records_and_flushes() {
        let dir = tempdir().unwrap();
        let session = session_with_two_units(dir.path());
        let watched = session.discover().unwrap();
        assert_eq!(watched.len(), 2);
        session.instrument(&watched);

        {
            let _scope = session.scope("app").unwrap();
            let result = session.call("lib", "parse", &[]).unwrap();
            assert_eq!(result, json!("parsed"));
        }

        let path = session.flush().unwrap();
        let content = fs::read_to_string(path).unwrap();
        assert_eq!(content, "@startuml\napp --> lib: parse\n@enduml");
    }

    #[test]
    fn test_call_on_missing_member_is_an_error() {
        let dir = tempdir().unwrap();
        let session = session_with_two_units(dir.path());
        let err = session.call("lib", "missing", &[]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TraceError>(),
            Some(TraceError::UnknownMember(id)) if id == "lib.missing"
        ));
    }

    #[test]
    fn test_call_on_data_member_is_an_error() {
        let dir = tempdir().unwrap();
        let session = session_with_two_units(dir.path());
        let lib = session.registry().resolve("lib").unwrap();
        lib.bind("flag", MemberValue::value(json!(true)));
        let err = session.call("lib", "flag", &[]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TraceError>(),
            Some(TraceError::NotCallable(id)) if id == "lib.flag"
        ));
    }

    #[test]
    fn test_flush_reports_an_aborted_trace() {
        let dir = tempdir().unwrap();
        let session = session_with_two_units(dir.path());
        let watched = session.discover().unwrap();
        session.instrument(&watched);

        // No scope: the wrapper cannot resolve a caller and the
        // trace is poisoned, while the call itself succeeds.
        let result = session.call("lib", "parse", &[]).unwrap();
        assert_eq!(result, json!("parsed"));

        let err = session.flush().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TraceError>(),
            Some(TraceError::Aborted(_))
        ));
    }

    #[test]
    fn test_empty_trace_flushes_delimiters_only() {
        let dir = tempdir().unwrap();
        let session = session_with_two_units(dir.path());
        let path = session.flush().unwrap();
        assert_eq!(
            fs::read_to_string(path).unwrap(),
            "@startuml\n@enduml"
        );
    }
}
