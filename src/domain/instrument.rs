// Instrumentation engine: classifies the members of every watched
// unit and swaps tracing wrappers into the binding tables.
//
// Wrappers are strictly additive. They record an edge, enter the
// declaring unit's scope, and delegate to the displaced original;
// arguments, results, and errors pass through untouched. When the
// bookkeeping itself fails, the recorder is aborted and the call still
// proceeds.

use crate::domain::caller::{self, UnitScope};
use crate::domain::classify::{classify, MemberKind};
use crate::domain::diagram::{CallEdge, DiagramRecorder, INIT_LABEL};
use crate::domain::registry::UnitRegistry;
use crate::domain::unit::{
    member_id, ClassSpec, Constructor, MemberValue, Unit, UnitCallable, UnitObject, Value,
};
use crate::ports::EdgeSink;
use dashmap::DashMap;
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

/// Displaced originals, keyed by member id. Wrappers look their target
/// up here on every call.
pub type OriginalStore = DashMap<String, Arc<dyn UnitCallable>>;

/// Everything a wrapper needs at call time.
///
/// Wrappers live inside binding tables owned by units the registry
/// holds, so they reference the registry weakly to keep the graph
/// acyclic. With the registry gone, tracing degrades to a passthrough.
#[derive(Clone)]
pub struct TraceHandles {
    registry: Weak<UnitRegistry>,
    recorder: Arc<DiagramRecorder>,
    originals: Arc<OriginalStore>,
    sink: Option<Arc<dyn EdgeSink>>,
    caller_skip: usize,
}

impl TraceHandles {
    /// Resolve the caller and record one edge. Resolution or sink
    /// failures abort the recorder instead of surfacing to the traced
    /// call.
    fn trace_edge(&self, to: &str, label: &str) {
        let registry = match self.registry.upgrade() {
            Some(registry) => registry,
            None => return,
        };
        match caller::resolve(&registry, self.caller_skip) {
            Ok(from) => {
                let edge = CallEdge::new(from.name.as_str(), to, label);
                self.recorder.record(&edge);
                if let Some(sink) = &self.sink {
                    if let Err(err) = sink.append(&edge) {
                        self.recorder
                            .abort(format!("edge journal append failed: {}", err));
                    }
                }
            }
            Err(err) => self.recorder.abort(err.to_string()),
        }
    }
}

/// Wrapper installed in place of a callable member.
pub struct TracingCallable {
    id: String,
    target_unit: String,
    member: String,
    location: PathBuf,
    handles: TraceHandles,
}

impl UnitCallable for TracingCallable {
    fn call(&self, args: &[Value]) -> anyhow::Result<Value> {
        self.handles.trace_edge(&self.target_unit, &self.member);
        // Fetch the original by id at call time; cloning the Arc out
        // keeps no map guard alive across the reentrant call below.
        let original = self
            .handles
            .originals
            .get(&self.id)
            .map(|r| Arc::clone(r.value()));
        let _scope = UnitScope::enter(&self.location);
        match original {
            Some(original) => original.call(args),
            None => anyhow::bail!("displaced original missing for {}", self.id),
        }
    }
}

/// Wrapper around an instance of a proxied class. Member access goes
/// through `get`, records an edge, then forwards to the real object.
pub struct ObjectProxy {
    inner: Box<dyn UnitObject>,
    class_name: String,
    location: PathBuf,
    handles: TraceHandles,
}

impl UnitObject for ObjectProxy {
    fn get(&self, member: &str) -> anyhow::Result<Value> {
        self.handles.trace_edge(&self.class_name, member);
        let _scope = UnitScope::enter(&self.location);
        self.inner.get(member)
    }
}

/// Walks watched units and installs wrappers per member classification.
pub struct Instrumenter {
    registry: Arc<UnitRegistry>,
    recorder: Arc<DiagramRecorder>,
    originals: Arc<OriginalStore>,
    sink: Option<Arc<dyn EdgeSink>>,
    caller_skip: usize,
    wrapped: DashMap<String, ()>,
    proxied: DashMap<(String, String), ()>,
}

impl Instrumenter {
    pub fn new(
        registry: Arc<UnitRegistry>,
        recorder: Arc<DiagramRecorder>,
        sink: Option<Arc<dyn EdgeSink>>,
        caller_skip: usize,
    ) -> Self {
        Instrumenter {
            registry,
            recorder,
            originals: Arc::new(DashMap::new()),
            sink,
            caller_skip,
            wrapped: DashMap::new(),
            proxied: DashMap::new(),
        }
    }

    /// Instrument every unit in the watch set. Units are independent,
    /// so the walk fans out across the thread pool. Instrumenting the
    /// same unit again is a no-op per member.
    pub fn instrument(&self, watched: &[Arc<Unit>]) {
        let watch: HashSet<String> = watched.iter().map(|u| u.name.clone()).collect();
        watched.par_iter().for_each(|unit| {
            self.registry.index_location(unit);
            self.instrument_unit(unit, &watch);
        });
    }

    /// Members wrapped or proxied so far.
    pub fn instrumented_members(&self) -> usize {
        self.wrapped.len() + self.proxied.len()
    }

    fn instrument_unit(&self, unit: &Arc<Unit>, watch: &HashSet<String>) {
        for name in unit.member_names() {
            let value = match unit.member(&name) {
                Some(value) => value,
                None => continue,
            };
            match classify(&name, &value, watch) {
                MemberKind::Callable => {
                    if let MemberValue::Callable(original) = value {
                        self.wrap_callable(unit, &name, original);
                    }
                }
                MemberKind::Class => {
                    if let MemberValue::Class(spec) = value {
                        self.install_proxy(unit, &name, spec);
                    }
                }
                _ => {}
            }
        }
    }

    fn handles(&self) -> TraceHandles {
        TraceHandles {
            registry: Arc::downgrade(&self.registry),
            recorder: Arc::clone(&self.recorder),
            originals: Arc::clone(&self.originals),
            sink: self.sink.clone(),
            caller_skip: self.caller_skip,
        }
    }

    fn wrap_callable(&self, unit: &Arc<Unit>, member: &str, original: Arc<dyn UnitCallable>) {
        let id = member_id(&unit.name, member);
        if self.wrapped.insert(id.clone(), ()).is_some() {
            // Already wrapped; never displace a wrapper with itself.
            return;
        }
        self.originals.insert(id.clone(), original);
        let wrapper = TracingCallable {
            id,
            target_unit: unit.name.clone(),
            member: member.to_string(),
            location: unit.location.clone(),
            handles: self.handles(),
        };
        unit.bind(member, MemberValue::Callable(Arc::new(wrapper)));
    }

    fn install_proxy(&self, unit: &Arc<Unit>, member: &str, spec: ClassSpec) {
        let pair = (unit.name.clone(), member.to_string());
        if self.proxied.insert(pair, ()).is_some() {
            return;
        }
        // Anonymous classes are marked as handled but left alone.
        let class_name = match spec.qualified_name.clone() {
            Some(name) => name,
            None => return,
        };
        // Construction executes in the declaring unit, not where the
        // class happens to be bound.
        let location = match self.registry.get(&spec.declaring_unit) {
            Some(declaring) => declaring.location.clone(),
            None => unit.location.clone(),
        };

        let handles = self.handles();
        let target = class_name.clone();
        let inner = spec.clone();
        let ctor_location = location.clone();
        let proxy_ctor: Constructor = Arc::new(move |args: &[Value]| {
            handles.trace_edge(&target, INIT_LABEL);
            let instance = {
                let _scope = UnitScope::enter(&ctor_location);
                inner.construct(args)?
            };
            Ok(Box::new(ObjectProxy {
                inner: instance,
                class_name: target.clone(),
                location: location.clone(),
                handles: handles.clone(),
            }) as Box<dyn UnitObject>)
        });

        unit.bind(
            member,
            MemberValue::Class(ClassSpec::new(
                Some(class_name),
                spec.declaring_unit.clone(),
                spec.kind,
                proxy_ctor,
            )),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::unit::ClassKind;
    use anyhow::anyhow;
    use parking_lot::Mutex;
    use serde_json::json;

    struct PlainObject;

    impl UnitObject for PlainObject {
        fn get(&self, member: &str) -> anyhow::Result<Value> {
            Ok(json!(member))
        }
    }

    struct Fixture {
        registry: Arc<UnitRegistry>,
        recorder: Arc<DiagramRecorder>,
        app: Arc<Unit>,
        lib: Arc<Unit>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(UnitRegistry::new());
        let app = Unit::leaf("app", "/app/main.rs");
        let lib = Unit::leaf("lib", "/src/lib/parse.rs");
        registry.register(Arc::clone(&app)).unwrap();
        registry.register(Arc::clone(&lib)).unwrap();
        Fixture {
            registry,
            recorder: Arc::new(DiagramRecorder::new()),
            app,
            lib,
        }
    }

    fn instrumenter(fx: &Fixture) -> Instrumenter {
        Instrumenter::new(
            Arc::clone(&fx.registry),
            Arc::clone(&fx.recorder),
            None,
            0,
        )
    }

    fn call(unit: &Arc<Unit>, member: &str, args: &[Value]) -> anyhow::Result<Value> {
        match unit.member(member) {
            Some(MemberValue::Callable(f)) => f.call(args),
            other => panic!("{} is not callable: {:?}", member, other),
        }
    }

    fn rendered(recorder: &DiagramRecorder) -> Vec<String> {
        recorder
            .snapshot()
            .unwrap()
            .iter()
            .map(|l| l.render())
            .collect()
    }

    #[test]
    fn test_wrapped_callable_records_and_delegates() {
        let fx = fixture();
        fx.lib
            .bind("parse", MemberValue::callable(|_args| Ok(json!(42))));
        let engine = instrumenter(&fx);
        engine.instrument(&[Arc::clone(&fx.app), Arc::clone(&fx.lib)]);

        let _scope = UnitScope::enter(&fx.app.location);
        let result = call(&fx.lib, "parse", &[]).unwrap();

        assert_eq!(result, json!(42));
        assert_eq!(rendered(&fx.recorder), vec!["app --> lib: parse"]);
        assert_eq!(engine.instrumented_members(), 1);
    }

    #[test]
    fn test_errors_pass_through_unchanged() {
        let fx = fixture();
        fx.lib
            .bind("fail", MemberValue::callable(|_args| Err(anyhow!("boom"))));
        instrumenter(&fx).instrument(&[Arc::clone(&fx.app), Arc::clone(&fx.lib)]);

        let _scope = UnitScope::enter(&fx.app.location);
        let err = call(&fx.lib, "fail", &[]).unwrap_err();

        assert_eq!(err.to_string(), "boom");
        // The edge is recorded before the call runs.
        assert_eq!(rendered(&fx.recorder), vec!["app --> lib: fail"]);
    }

    #[test]
    fn test_instrumenting_twice_is_idempotent() {
        let fx = fixture();
        fx.lib
            .bind("parse", MemberValue::callable(|_args| Ok(json!(1))));
        let engine = instrumenter(&fx);
        let watched = [Arc::clone(&fx.app), Arc::clone(&fx.lib)];
        engine.instrument(&watched);
        engine.instrument(&watched);

        let _scope = UnitScope::enter(&fx.app.location);
        call(&fx.lib, "parse", &[]).unwrap();

        // A double wrap would have recorded the edge twice.
        assert_eq!(rendered(&fx.recorder), vec!["app --> lib: parse"]);
    }

    #[test]
    fn test_nested_calls_attribute_to_the_enclosing_unit() {
        let fx = fixture();
        let util = Unit::leaf("util", "/src/lib/util.rs");
        fx.registry.register(Arc::clone(&util)).unwrap();
        util.bind("helper", MemberValue::callable(|_args| Ok(json!("ok"))));

        let util_for_outer = Arc::clone(&util);
        fx.lib.bind(
            "outer",
            MemberValue::callable(move |_args| call(&util_for_outer, "helper", &[])),
        );

        instrumenter(&fx).instrument(&[
            Arc::clone(&fx.app),
            Arc::clone(&fx.lib),
            Arc::clone(&util),
        ]);

        let _scope = UnitScope::enter(&fx.app.location);
        call(&fx.lib, "outer", &[]).unwrap();

        assert_eq!(
            rendered(&fx.recorder),
            vec!["app --> lib: outer", "lib --> util: helper"]
        );
    }

    #[test]
    fn test_proxy_records_construction_and_access() {
        let fx = fixture();
        fx.lib.bind(
            "rule",
            MemberValue::Class(ClassSpec::new(
                Some("Rule".to_string()),
                "lib",
                ClassKind::Plain,
                Arc::new(|_args| Ok(Box::new(PlainObject) as Box<dyn UnitObject>)),
            )),
        );
        instrumenter(&fx).instrument(&[Arc::clone(&fx.app), Arc::clone(&fx.lib)]);

        let _scope = UnitScope::enter(&fx.app.location);
        let instance = match fx.lib.member("rule") {
            Some(MemberValue::Class(spec)) => spec.construct(&[]).unwrap(),
            other => panic!("rule is not a class: {:?}", other),
        };
        let value = instance.get("name").unwrap();

        assert_eq!(value, json!("name"));
        assert_eq!(
            rendered(&fx.recorder),
            vec!["app --> Rule: <init>", "app --> Rule: name"]
        );
    }

    #[test]
    fn test_anonymous_class_is_skipped() {
        let fx = fixture();
        fx.lib.bind(
            "hidden",
            MemberValue::Class(ClassSpec::new(
                None,
                "lib",
                ClassKind::Plain,
                Arc::new(|_args| Ok(Box::new(PlainObject) as Box<dyn UnitObject>)),
            )),
        );
        instrumenter(&fx).instrument(&[Arc::clone(&fx.app), Arc::clone(&fx.lib)]);

        let _scope = UnitScope::enter(&fx.app.location);
        if let Some(MemberValue::Class(spec)) = fx.lib.member("hidden") {
            spec.construct(&[]).unwrap();
        }

        assert!(rendered(&fx.recorder).is_empty());
    }

    #[test]
    fn test_foreign_class_is_left_alone() {
        let fx = fixture();
        fx.lib.bind(
            "request",
            MemberValue::Class(ClassSpec::new(
                Some("Request".to_string()),
                "third_party",
                ClassKind::Plain,
                Arc::new(|_args| Ok(Box::new(PlainObject) as Box<dyn UnitObject>)),
            )),
        );
        instrumenter(&fx).instrument(&[Arc::clone(&fx.app), Arc::clone(&fx.lib)]);

        let _scope = UnitScope::enter(&fx.app.location);
        if let Some(MemberValue::Class(spec)) = fx.lib.member("request") {
            spec.construct(&[]).unwrap();
        }

        assert!(rendered(&fx.recorder).is_empty());
    }

    #[test]
    fn test_skipped_members_keep_their_bindings() {
        let fx = fixture();
        let original: Arc<dyn UnitCallable> = Arc::new(|_args: &[Value]| Ok(json!(null)));
        fx.lib.bind("VERSION", MemberValue::value(json!("1.0")));
        fx.lib
            .bind("__internal", MemberValue::Callable(Arc::clone(&original)));
        instrumenter(&fx).instrument(&[Arc::clone(&fx.lib)]);

        match fx.lib.member("__internal") {
            Some(MemberValue::Callable(current)) => {
                assert!(Arc::ptr_eq(&original, &current));
            }
            other => panic!("unexpected binding: {:?}", other),
        }
        assert!(matches!(
            fx.lib.member("VERSION"),
            Some(MemberValue::Value(_))
        ));
    }

    #[test]
    fn test_unresolved_caller_aborts_but_the_call_proceeds() {
        let fx = fixture();
        fx.lib
            .bind("parse", MemberValue::callable(|_args| Ok(json!(7))));
        instrumenter(&fx).instrument(&[Arc::clone(&fx.lib)]);

        // No scope entered: caller resolution has nothing to find.
        let result = call(&fx.lib, "parse", &[]).unwrap();

        assert_eq!(result, json!(7));
        assert!(fx.recorder.is_aborted());
        assert!(fx.recorder.snapshot().is_err());
    }

    struct FailingSink;

    impl EdgeSink for FailingSink {
        fn append(&self, _edge: &CallEdge) -> anyhow::Result<()> {
            Err(anyhow!("disk full"))
        }
    }

    #[test]
    fn test_failing_sink_aborts_the_trace() {
        let fx = fixture();
        fx.lib
            .bind("parse", MemberValue::callable(|_args| Ok(json!(0))));
        let engine = Instrumenter::new(
            Arc::clone(&fx.registry),
            Arc::clone(&fx.recorder),
            Some(Arc::new(FailingSink)),
            0,
        );
        engine.instrument(&[Arc::clone(&fx.app), Arc::clone(&fx.lib)]);

        let _scope = UnitScope::enter(&fx.app.location);
        let result = call(&fx.lib, "parse", &[]).unwrap();

        assert_eq!(result, json!(0));
        assert!(fx.recorder.is_aborted());
    }

    struct CollectingSink(Mutex<Vec<CallEdge>>);

    impl EdgeSink for CollectingSink {
        fn append(&self, edge: &CallEdge) -> anyhow::Result<()> {
            self.0.lock().push(edge.clone());
            Ok(())
        }
    }

    #[test]
    fn test_sink_sees_every_edge_ungrouped() {
        let fx = fixture();
        fx.lib
            .bind("parse", MemberValue::callable(|_args| Ok(json!(0))));
        let sink = Arc::new(CollectingSink(Mutex::new(Vec::new())));
        let engine = Instrumenter::new(
            Arc::clone(&fx.registry),
            Arc::clone(&fx.recorder),
            Some(Arc::clone(&sink) as Arc<dyn EdgeSink>),
            0,
        );
        engine.instrument(&[Arc::clone(&fx.app), Arc::clone(&fx.lib)]);

        let _scope = UnitScope::enter(&fx.app.location);
        call(&fx.lib, "parse", &[]).unwrap();
        call(&fx.lib, "parse", &[]).unwrap();

        // The recorder groups; the sink receives raw edges.
        assert_eq!(rendered(&fx.recorder), vec!["app --> lib: parse +2"]);
        assert_eq!(sink.0.lock().len(), 2);
    }
}
