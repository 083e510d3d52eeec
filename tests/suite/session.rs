//! Session identity across moves, address reuse, and threads.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::Arc;
use std::thread;

use lineage_core::Tracer;
use lineage_types::{ProvenanceRecord, SessionId};
use tempfile::TempDir;

use crate::common::{Analysis, kinds, tracer};

fn datastore() -> (TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("obs-index.fits");
    fs::write(&path, "abc").unwrap();
    let path = path.to_string_lossy().into_owned();
    (dir, path)
}

fn run(tracer: &Tracer, analysis: &mut Analysis, value: &str) {
    tracer
        .trace("run", analysis, |a| {
            a.result = Some(value.to_string());
            Ok::<_, String>(())
        })
        .unwrap();
}

fn session_ids(records: &[ProvenanceRecord]) -> Vec<SessionId> {
    records
        .iter()
        .filter_map(|r| match r {
            ProvenanceRecord::Session(s) => Some(s.session_id),
            _ => None,
        })
        .collect()
}

fn in_sessions(records: &[ProvenanceRecord]) -> Vec<SessionId> {
    records
        .iter()
        .filter_map(|r| match r {
            ProvenanceRecord::ActivityStart(s) => Some(s.in_session),
            _ => None,
        })
        .collect()
}

// Each instance lives and dies in the same stack slot.
fn trace_short_lived(tracer: &Tracer, store: &str, value: &str) {
    let mut analysis = Analysis::new(store);
    run(tracer, &mut analysis, value);
}

#[test]
fn instances_at_a_reused_address_get_separate_sessions() {
    let (_dir, store) = datastore();
    let (tracer, sink) = tracer();

    trace_short_lived(&tracer, &store, "A");
    trace_short_lived(&tracer, &store, "B");

    let records = sink.records();
    let sessions = session_ids(&records);
    assert_eq!(sessions.len(), 2);
    assert_ne!(sessions[0], sessions[1]);
    assert_eq!(tracer.recorder().session_count(), 2);
    assert_eq!(in_sessions(&records), sessions);
}

#[test]
fn moved_instance_keeps_its_session() {
    let (_dir, store) = datastore();
    let (tracer, sink) = tracer();

    let mut analysis = Analysis::new(&store);
    run(&tracer, &mut analysis, "A");
    let mut boxed = Box::new(analysis);
    run(&tracer, &mut boxed, "B");
    let mut held = vec![*boxed];
    run(&tracer, &mut held[0], "C");

    let records = sink.records();
    assert_eq!(kinds(&records).iter().filter(|k| **k == "session").count(), 1);
    assert_eq!(tracer.recorder().session_count(), 1);
    let used = in_sessions(&records);
    assert_eq!(used.len(), 3);
    assert!(used.iter().all(|id| *id == used[0]));
}

#[test]
fn cloned_identity_opens_a_new_session() {
    let (_dir, store) = datastore();
    let (tracer, sink) = tracer();

    let mut original = Analysis::new(&store);
    let mut copy = Analysis {
        id: original.id.clone(),
        config: Arc::clone(&original.config),
        datasets: original.datasets.clone(),
        result: None,
    };
    run(&tracer, &mut original, "A");
    run(&tracer, &mut copy, "A");

    assert_eq!(session_ids(&sink.records()).len(), 2);
}

#[test]
fn shared_tracer_across_threads() {
    const THREADS: usize = 4;
    const CALLS: usize = 8;

    let (_dir, store) = datastore();
    let (tracer, sink) = tracer();

    thread::scope(|scope| {
        for worker in 0..THREADS {
            let tracer = Arc::clone(&tracer);
            let store = store.as_str();
            scope.spawn(move || {
                let mut analysis = Analysis::new(store);
                for call in 0..CALLS {
                    run(&tracer, &mut analysis, &format!("{worker}-{call}"));
                }
            });
        }
    });

    let records = sink.records();
    let sessions = session_ids(&records);
    assert_eq!(sessions.len(), THREADS);
    assert_eq!(sessions.iter().collect::<HashSet<_>>().len(), THREADS);
    assert_eq!(tracer.recorder().session_count(), THREADS);

    let mut per_session: HashMap<SessionId, usize> = HashMap::new();
    for id in in_sessions(&records) {
        *per_session.entry(id).or_default() += 1;
    }
    assert_eq!(per_session.len(), THREADS);
    assert!(per_session.values().all(|calls| *calls == CALLS));

    let mut open = HashMap::new();
    let mut ended = 0;
    for (position, record) in records.iter().enumerate() {
        match record {
            ProvenanceRecord::ActivityStart(start) => {
                assert!(open.insert(start.activity_id.clone(), position).is_none());
            }
            ProvenanceRecord::ActivityEnd(end) => {
                assert!(
                    open.remove(&end.activity_id).is_some(),
                    "end without a preceding start: {end:?}"
                );
                ended += 1;
            }
            _ => {}
        }
    }
    assert!(open.is_empty(), "unmatched starts: {open:?}");
    assert_eq!(ended, THREADS * CALLS);
}
