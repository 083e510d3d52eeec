//! Traced calls against the fixture analysis host.

use std::collections::HashSet;
use std::fs;
use std::sync::Arc;

use lineage_config::{Schema, SchemaFormat};
use lineage_core::{ActivitySet, EntityIdentity, MemorySink, Tracer};
use lineage_types::{Identity, InstanceId, Instrumented, ProvenanceRecord, Traceable, Value};
use serde_json::json;
use tempfile::TempDir;

use crate::common::{Analysis, kinds, tracer};

const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

fn datastore() -> (TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("obs-index.fits");
    fs::write(&path, "abc").unwrap();
    let path = path.to_string_lossy().into_owned();
    (dir, path)
}

fn generic_id(value: &str) -> Identity {
    EntityIdentity::new().compute(&Value::from(value), None).unwrap()
}

fn set_result(analysis: &mut Analysis, value: &str) -> Result<(), String> {
    analysis.result = Some(value.to_string());
    Ok(())
}

#[test]
fn declared_activity_emits_records_in_order() {
    let (_dir, store) = datastore();
    let (tracer, sink) = tracer();
    let mut analysis = Analysis::new(&store);

    let count = tracer
        .trace("get_datasets", &mut analysis, |a| {
            a.datasets = vec!["obs-1".to_string(), "obs-2".to_string()];
            Ok::<_, String>(a.datasets.len())
        })
        .unwrap();
    assert_eq!(count, 2);

    let records = sink.records();
    assert_eq!(
        kinds(&records),
        [
            "session",
            "activity_start",
            "parameters",
            "usage",
            "generation",
            "member",
            "member",
            "activity_end",
        ]
    );

    let ProvenanceRecord::Session(session) = &records[0] else {
        panic!("expected session record, got {:?}", records[0]);
    };
    assert!(session.session_name.ends_with("Analysis"));
    assert_eq!(session.config.as_deref(), Some("analysis.toml"));

    let ProvenanceRecord::Parameters(params) = &records[2] else {
        panic!("expected parameters, got {:?}", records[2]);
    };
    assert_eq!(params.parameters["method"], json!("1d"));

    let ProvenanceRecord::Usage(usage) = &records[3] else {
        panic!("expected usage, got {:?}", records[3]);
    };
    assert_eq!(usage.used_id.as_str(), ABC_SHA256);
    assert_eq!(usage.used_role.as_deref(), Some("observations"));
    assert_eq!(usage.entity_type.as_deref(), Some("Observations"));
    assert_eq!(usage.entity_location.as_deref(), Some(store.as_str()));

    let ProvenanceRecord::Generation(generation) = &records[4] else {
        panic!("expected generation, got {:?}", records[4]);
    };
    assert_eq!(generation.generated_role.as_deref(), Some("datasets"));

    let members: Vec<_> = records
        .iter()
        .filter_map(|r| match r {
            ProvenanceRecord::Member(m) => Some(m),
            _ => None,
        })
        .collect();
    assert_eq!(members[0].entity_id, generation.generated_id);
    assert_eq!(members[0].member_id, generic_id("obs-1"));
    assert_eq!(members[1].member_id, generic_id("obs-2"));
    assert_eq!(members[1].member_type.as_deref(), Some("Dataset"));
}

#[test]
fn start_and_end_pair_up() {
    let (_dir, store) = datastore();
    let (tracer, sink) = tracer();
    let mut analysis = Analysis::new(&store);

    for value in ["A", "B", "C"] {
        tracer
            .trace("run", &mut analysis, |a| set_result(a, value))
            .unwrap();
    }

    let records = sink.records();
    let starts: Vec<_> = records
        .iter()
        .filter_map(|r| match r {
            ProvenanceRecord::ActivityStart(s) => Some(s),
            _ => None,
        })
        .collect();
    let ends: Vec<_> = records
        .iter()
        .filter_map(|r| match r {
            ProvenanceRecord::ActivityEnd(e) => Some(e),
            _ => None,
        })
        .collect();

    assert_eq!(starts.len(), 3);
    assert_eq!(ends.len(), 3);
    for (start, end) in starts.iter().zip(&ends) {
        assert_eq!(start.activity_id, end.activity_id);
        assert_eq!(start.activity_name, "run");
        // Same RFC 3339 UTC format, so string order is time order.
        assert!(end.end_time >= start.start_time);
    }
}

#[test]
fn session_logged_once_per_instance() {
    let (_dir, store) = datastore();
    let (tracer, sink) = tracer();
    let mut first = Analysis::new(&store);
    let mut second = Analysis::new(&store);

    tracer.trace("run", &mut first, |a| set_result(a, "A")).unwrap();
    tracer.trace("run", &mut first, |a| set_result(a, "B")).unwrap();
    tracer.trace("run", &mut second, |a| set_result(a, "A")).unwrap();

    let records = sink.records();
    let sessions = kinds(&records).iter().filter(|k| **k == "session").count();
    assert_eq!(sessions, 2);
    assert_eq!(tracer.recorder().session_count(), 2);

    let in_session: Vec<_> = records
        .iter()
        .filter_map(|r| match r {
            ProvenanceRecord::ActivityStart(s) => Some(s.in_session),
            _ => None,
        })
        .collect();
    assert_eq!(in_session[0], in_session[1]);
    assert_ne!(in_session[1], in_session[2]);
}

#[test]
fn undeclared_activity_runs_silently() {
    let (_dir, store) = datastore();
    let (tracer, sink) = tracer();
    let mut analysis = Analysis::new(&store);

    let out = tracer.trace("plot", &mut analysis, |a| set_result(a, "plotted"));
    assert_eq!(out, Ok(()));
    assert_eq!(analysis.result.as_deref(), Some("plotted"));
    assert!(sink.lines().is_empty());
}

#[test]
fn failed_operation_propagates_and_logs_nothing() {
    let (_dir, store) = datastore();
    let (tracer, sink) = tracer();
    let mut analysis = Analysis::new(&store);

    let out: Result<(), String> =
        tracer.trace("get_datasets", &mut analysis, |_| Err("datastore offline".to_string()));
    assert_eq!(out, Err("datastore offline".to_string()));
    assert!(sink.lines().is_empty());
    assert_eq!(tracer.recorder().session_count(), 0);

    tracer.trace("run", &mut analysis, |a| set_result(a, "A")).unwrap();
    assert_eq!(kinds(&sink.records())[0], "session");
}

#[test]
fn changed_result_between_calls_yields_derivation() {
    let (_dir, store) = datastore();
    let (tracer, sink) = tracer();
    let mut analysis = Analysis::new(&store);

    analysis.result = Some("A".to_string());
    tracer.trace("run", &mut analysis, |_| Ok::<_, String>(())).unwrap();
    assert_eq!(
        kinds(&sink.records()),
        ["session", "activity_start", "generation", "activity_end"]
    );
    assert_eq!(tracer.watcher().tracked("self.result"), Some(generic_id("A")));

    sink.clear();
    analysis.result = Some("B".to_string());
    tracer.trace("run", &mut analysis, |_| Ok::<_, String>(())).unwrap();

    let records = sink.records();
    assert_eq!(
        kinds(&records),
        ["derivation", "activity_start", "generation", "activity_end"]
    );
    let ProvenanceRecord::Derivation(derivation) = &records[0] else {
        panic!("expected derivation, got {:?}", records[0]);
    };
    assert_eq!(derivation.entity_id, generic_id("B"));
    assert_eq!(derivation.progenitor_id, generic_id("A"));

    sink.clear();
    tracer.trace("run", &mut analysis, |_| Ok::<_, String>(())).unwrap();
    assert!(!kinds(&sink.records()).contains(&"derivation"));
}

#[test]
fn unset_result_is_not_generated() {
    let (_dir, store) = datastore();
    let (tracer, sink) = tracer();
    let mut analysis = Analysis::new(&store);

    tracer.trace("run", &mut analysis, |_| Ok::<_, String>(())).unwrap();
    assert_eq!(
        kinds(&sink.records()),
        ["session", "activity_start", "activity_end"]
    );
    assert!(tracer.watcher().is_empty());
}

#[test]
fn empty_value_fallback_can_be_disabled() {
    const RUN: &str = r#"
[activities.run]

[[activities.run.generation]]
role = "result"
value = "self.result"
"#;
    let (_dir, store) = datastore();

    let record_empty = |schema_text: &str| {
        let sink = MemorySink::new();
        let schema = Schema::parse(schema_text, SchemaFormat::Toml).unwrap();
        let tracer = Tracer::builder(schema).sink(sink.clone()).build();
        let mut analysis = Analysis::new(&store);
        tracer.trace("run", &mut analysis, |a| set_result(a, "")).unwrap();
        kinds(&sink.records())
    };

    assert!(!record_empty(RUN).contains(&"generation"));

    let strict = format!("[options]\nempty_value_fallback = false\n{RUN}");
    assert!(record_empty(&strict).contains(&"generation"));
}

#[test]
fn progenitors_with_and_without_location() {
    const STACK: &str = r#"
[activities.stack]

[[activities.stack.generation]]
role = "stacked"
value = "self.result"

[activities.stack.generation.has_progenitors]
list = "datasets"
value = "self"
location = "self"

[activities.merge]

[[activities.merge.generation]]
role = "merged"
value = "self.result"

[activities.merge.generation.has_progenitors]
list = "datasets"
value = "self"
"#;
    let (_dir, store) = datastore();
    let sink = MemorySink::new();
    let schema = Schema::parse(STACK, SchemaFormat::Toml).unwrap();
    let tracer = Tracer::builder(schema).sink(sink.clone()).build();
    let mut analysis = Analysis::new(&store);
    analysis.datasets = vec!["obs-1".to_string()];

    tracer.trace("stack", &mut analysis, |a| set_result(a, "stacked")).unwrap();
    let records = sink.records();
    let Some(ProvenanceRecord::Progenitor(progenitor)) =
        records.iter().find(|r| r.kind() == "progenitor")
    else {
        panic!("expected a progenitor record in {records:?}");
    };
    assert_eq!(progenitor.entity_id, generic_id("stacked"));
    assert_eq!(progenitor.progenitor_id, generic_id("obs-1"));
    assert_eq!(progenitor.progenitor_location, "obs-1");

    sink.clear();
    tracer.trace("merge", &mut analysis, |a| set_result(a, "merged")).unwrap();
    let records = sink.records();
    assert!(!kinds(&records).contains(&"progenitor"));
    let Some(ProvenanceRecord::Derivation(derivation)) =
        records.iter().find(|r| r.kind() == "derivation")
    else {
        panic!("expected a derivation record in {records:?}");
    };
    assert_eq!(derivation.entity_id, generic_id("merged"));
    assert_eq!(derivation.progenitor_id, generic_id("obs-1"));
}

#[test]
fn instrument_wraps_a_single_operation() {
    let (_dir, store) = datastore();
    let (tracer, sink) = tracer();
    let mut analysis = Analysis::new(&store);

    let run = tracer.instrument("run", |a: &mut Analysis, value: String| {
        a.result = Some(value);
        Ok::<_, String>(())
    });
    run(&mut analysis, "A".to_string()).unwrap();

    let records = sink.records();
    let Some(ProvenanceRecord::Generation(generation)) =
        records.iter().find(|r| r.kind() == "generation")
    else {
        panic!("expected a generation record in {records:?}");
    };
    assert_eq!(generation.generated_id, generic_id("A"));
}

#[test]
fn instrument_all_wraps_declared_operations_only() {
    let (_dir, store) = datastore();
    let (tracer, sink) = tracer();
    let mut analysis = Analysis::new(&store);

    let ops = ActivitySet::<Analysis, String, usize, String>::new()
        .with("run", |a: &mut Analysis, value: String| {
            a.result = Some(value);
            Ok(1)
        })
        .with("summary", |a: &mut Analysis, _: String| Ok(a.datasets.len()));
    let ops = tracer.instrument_all(ops);

    assert_eq!(ops.invoke("summary", &mut analysis, String::new()), Some(Ok(0)));
    assert!(sink.lines().is_empty());

    assert_eq!(ops.invoke("run", &mut analysis, "A".to_string()), Some(Ok(1)));
    assert!(kinds(&sink.records()).contains(&"activity_start"));

    assert!(ops.invoke("missing", &mut analysis, String::new()).is_none());
}

struct Model {
    scale: f64,
}

impl Traceable for Model {
    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "scale" => Some(Value::from(self.scale)),
            _ => None,
        }
    }
}

struct Fitter {
    id: InstanceId,
    model: Arc<Model>,
}

impl Traceable for Fitter {
    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "model" => Some(Value::shared(&self.model)),
            _ => None,
        }
    }
}

impl Instrumented for Fitter {
    fn instance_id(&self) -> &InstanceId {
        &self.id
    }
}

#[test]
fn unchanged_opaque_generation_yields_no_derivation() {
    const FIT: &str = r#"
[activities.fit]

[[activities.fit.generation]]
role = "model"
value = "self.model"
"#;
    let sink = MemorySink::new();
    let schema = Schema::parse(FIT, SchemaFormat::Toml).unwrap();
    let tracer = Tracer::builder(schema).sink(sink.clone()).build();
    let mut fitter = Fitter {
        id: InstanceId::new(),
        model: Arc::new(Model { scale: 0.5 }),
    };

    for _ in 0..3 {
        tracer.trace("fit", &mut fitter, |_| Ok::<_, String>(())).unwrap();
    }
    let records = sink.records();
    assert!(!kinds(&records).contains(&"derivation"), "{records:?}");
    let generated: HashSet<_> = records
        .iter()
        .filter_map(|r| match r {
            ProvenanceRecord::Generation(g) => Some(g.generated_id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(generated.len(), 1);

    sink.clear();
    fitter.model = Arc::new(Model { scale: 0.25 });
    tracer.trace("fit", &mut fitter, |_| Ok::<_, String>(())).unwrap();
    let derivations = kinds(&sink.records())
        .into_iter()
        .filter(|k| *k == "derivation")
        .count();
    assert_eq!(derivations, 1);
}

struct Reduction {
    id: InstanceId,
    good: String,
    bad: String,
    output: String,
}

impl Traceable for Reduction {
    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "good" => Some(self.good.as_str().into()),
            "bad" => Some(self.bad.as_str().into()),
            "output" => Some(self.output.as_str().into()),
            _ => None,
        }
    }
}

impl Instrumented for Reduction {
    fn instance_id(&self) -> &InstanceId {
        &self.id
    }
}

// Reading this file at offset zero fails with EIO.
#[cfg(target_os = "linux")]
const UNREADABLE: &str = "/proc/self/mem";

#[cfg(target_os = "linux")]
#[test]
fn unreadable_file_is_skipped_without_losing_the_call() {
    const REDUCE: &str = r#"
[activities.reduce]

[[activities.reduce.usage]]
role = "flat"
entityName = "Raw"
location = "self.bad"

[[activities.reduce.usage]]
role = "science"
entityName = "Raw"
location = "self.good"

[[activities.reduce.generation]]
role = "reduced"
entityName = "Raw"
value = "self.output"

[entities.Raw]
type = "File"
"#;
    if fs::read(UNREADABLE).is_ok() {
        return;
    }
    let (_dir, store) = datastore();
    let sink = MemorySink::new();
    let schema = Schema::parse(REDUCE, SchemaFormat::Toml).unwrap();
    let tracer = Tracer::builder(schema).sink(sink.clone()).build();
    let mut reduction = Reduction {
        id: InstanceId::new(),
        good: store.clone(),
        bad: UNREADABLE.to_string(),
        output: store.clone(),
    };

    tracer.trace("reduce", &mut reduction, |_| Ok::<_, String>(())).unwrap();
    let records = sink.records();
    assert_eq!(
        kinds(&records),
        ["session", "activity_start", "usage", "generation", "activity_end"]
    );
    let ProvenanceRecord::Usage(usage) = &records[2] else {
        panic!("expected usage, got {:?}", records[2]);
    };
    assert_eq!(usage.used_role.as_deref(), Some("science"));
    assert_eq!(usage.used_id.as_str(), ABC_SHA256);

    // The tracked output and the new generation both become unreadable.
    sink.clear();
    let out = tracer.trace("reduce", &mut reduction, |r| {
        r.output = UNREADABLE.to_string();
        Ok::<_, String>(7)
    });
    assert_eq!(out, Ok(7));
    assert_eq!(kinds(&sink.records()), ["activity_start", "usage", "activity_end"]);
    let tracked = tracer.watcher().tracked("self.output");
    assert_eq!(tracked.as_ref().map(Identity::as_str), Some(ABC_SHA256));
}
