//! Activity tracing around instrumented operations.
//!
//! # Call lifecycle
//!
//! ```text
//! Created -> Started -> Finished -> Logged | Discarded
//! ```
//!
//! 1. A fresh activity id is drawn.
//! 2. Tracked variables are checked for derivations (before the call).
//! 3. Parameters and usages are read off the instance.
//! 4. The operation runs. An error returns immediately and nothing captured
//!    so far is emitted.
//! 5. For activities the schema does not declare the call ends here.
//! 6. Otherwise records are appended in a fixed order: derivations, session
//!    (first call per instance only), activity start, parameters, usages,
//!    generations with their members and progenitors, activity end.

use std::collections::BTreeMap;
use std::sync::Arc;

use lineage_config::{ActivityDefinition, MemberSpec, Schema};
use lineage_types::{
    ActivityEnd, ActivityId, ActivityStart, DerivationRecord, GenerationRecord, Identity,
    Instrumented, MemberRecord, ParameterRecord, ProgenitorRecord, ProvenanceRecord, Traceable,
    UsageRecord, Value,
};
use uuid::Uuid;

use crate::capture::Capture;
use crate::identity::EntityIdentity;
use crate::recorder::{Recorder, RecordSink, SessionKey, format_time};
use crate::resolver::{Namespace, PathResolver, Root};
use crate::system::{self, SnapshotConfig};
use crate::watcher::DerivationWatcher;

const ACTIVITY_ID_LEN: usize = 6;

/// Process-wide provenance context.
///
/// Owns the schema, the fallback namespace, the derivation watch table, and
/// the session registry. Share it behind an `Arc`; every method takes `&self`.
pub struct Tracer {
    schema: Arc<Schema>,
    namespace: Namespace,
    identities: EntityIdentity,
    watcher: DerivationWatcher,
    recorder: Recorder,
}

pub struct TracerBuilder {
    schema: Arc<Schema>,
    namespace: Namespace,
    sinks: Vec<Box<dyn RecordSink>>,
    snapshot: SnapshotConfig,
}

impl TracerBuilder {
    /// Add a sink. Without any, records go to the `provenance` tracing target.
    pub fn sink(mut self, sink: impl RecordSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    /// Add a constant to the fallback namespace.
    pub fn constant(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.namespace.insert(name, value);
        self
    }

    /// Software version recorded in session snapshots.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.snapshot.version = version.into();
        self
    }

    pub fn dependency(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.snapshot.dependencies.insert(name.into(), version.into());
        self
    }

    /// Application-specific environment variable to record with each session.
    pub fn envvar(mut self, name: impl Into<String>) -> Self {
        self.snapshot.envvars.push(name.into());
        self
    }

    #[must_use]
    pub fn build(self) -> Tracer {
        Tracer {
            schema: self.schema,
            namespace: self.namespace,
            identities: EntityIdentity::new(),
            watcher: DerivationWatcher::new(),
            recorder: Recorder::new(self.sinks, self.snapshot),
        }
    }
}

impl Tracer {
    pub fn builder(schema: impl Into<Arc<Schema>>) -> TracerBuilder {
        TracerBuilder {
            schema: schema.into(),
            namespace: Namespace::with_engine_constants(),
            sinks: Vec::new(),
            snapshot: SnapshotConfig::default(),
        }
    }

    #[must_use]
    pub fn new(schema: impl Into<Arc<Schema>>) -> Self {
        Self::builder(schema).build()
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    #[must_use]
    pub fn watcher(&self) -> &DerivationWatcher {
        &self.watcher
    }

    #[must_use]
    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    #[must_use]
    pub fn identities(&self) -> &EntityIdentity {
        &self.identities
    }

    fn capture(&self) -> Capture<'_> {
        let resolver =
            PathResolver::new(&self.namespace, self.schema.options().empty_value_fallback);
        Capture::new(&self.schema, resolver, &self.identities)
    }

    /// Run `op` on `instance` as one traced call of `activity`.
    ///
    /// The result, including any error, is returned untouched.
    pub fn trace<T, R, E>(
        &self,
        activity: &str,
        instance: &mut T,
        op: impl FnOnce(&mut T) -> Result<R, E>,
    ) -> Result<R, E>
    where
        T: Instrumented,
    {
        let activity_id = new_activity_id();
        let capture = self.capture();

        let derivations = self.watcher.watch(&capture, &*instance, activity);

        let start = self.recorder.timestamp();
        let definition = self.schema.activity(activity);
        let parameters =
            definition.and_then(|d| parameter_record(&capture, &*instance, d, &activity_id));
        let usages = definition
            .map(|d| usage_records(&capture, &*instance, d, &activity_id))
            .unwrap_or_default();

        let result = match op(&mut *instance) {
            Ok(result) => result,
            Err(err) => {
                tracing::debug!(
                    activity,
                    %activity_id,
                    "Traced operation failed; provenance discarded"
                );
                return Err(err);
            }
        };
        let end = self.recorder.timestamp();

        let Some(definition) = definition else {
            tracing::trace!(activity, "Activity not declared in schema; not logged");
            return Ok(result);
        };

        for derivation in derivations {
            self.recorder.append(&ProvenanceRecord::Derivation(derivation));
        }

        let start_time = format_time(start);
        let session_id = self.recorder.session(
            SessionKey::of(&*instance),
            &start_time,
            instance.config_filename(),
        );

        self.recorder.append(&ProvenanceRecord::ActivityStart(ActivityStart {
            activity_id: activity_id.clone(),
            activity_name: activity.to_string(),
            in_session: session_id,
            start_time,
            agent_name: system::agent_name(),
        }));
        if let Some(parameters) = parameters {
            self.recorder.append(&ProvenanceRecord::Parameters(parameters));
        }
        for usage in usages {
            self.recorder.append(&ProvenanceRecord::Usage(usage));
        }
        self.log_generations(&capture, &*instance, definition, &activity_id);
        self.recorder.append(&ProvenanceRecord::ActivityEnd(ActivityEnd {
            activity_id,
            end_time: format_time(end),
        }));

        Ok(result)
    }

    /// Instrument a single operation.
    pub fn instrument<T, A, R, E, F>(
        self: &Arc<Self>,
        activity: &str,
        op: F,
    ) -> impl Fn(&mut T, A) -> Result<R, E> + Send + Sync + use<T, A, R, E, F>
    where
        T: Instrumented,
        F: Fn(&mut T, A) -> Result<R, E> + Send + Sync,
    {
        let tracer = Arc::clone(self);
        let activity = activity.to_string();
        move |instance: &mut T, args: A| tracer.trace(&activity, instance, |inst| op(inst, args))
    }

    /// Instrument every operation of `set` whose name the schema declares as
    /// an activity. Other operations are returned unchanged.
    #[must_use]
    pub fn instrument_all<T, A, R, E>(
        self: &Arc<Self>,
        set: ActivitySet<T, A, R, E>,
    ) -> ActivitySet<T, A, R, E>
    where
        T: Instrumented + 'static,
        A: 'static,
        R: 'static,
        E: 'static,
    {
        let operations = set
            .operations
            .into_iter()
            .map(|(name, op)| {
                if !self.schema.is_declared(&name) {
                    return (name, op);
                }
                tracing::debug!(activity = %name, "Instrumenting operation");
                let tracer = Arc::clone(self);
                let activity = name.clone();
                let traced: Operation<T, A, R, E> =
                    Arc::new(move |instance: &mut T, args: A| {
                        tracer.trace(&activity, instance, |inst| op(inst, args))
                    });
                (name, traced)
            })
            .collect();
        ActivitySet { operations }
    }

    fn log_generations(
        &self,
        capture: &Capture<'_>,
        instance: &dyn Traceable,
        definition: &ActivityDefinition,
        activity_id: &ActivityId,
    ) {
        for spec in &definition.generation {
            let props = match capture.properties(Root::Instance(instance), &spec.item) {
                Ok(props) => props,
                Err(err) => {
                    tracing::warn!(
                        activity = %definition.name,
                        error = %err,
                        "Skipping generation"
                    );
                    continue;
                }
            };
            let Some(id) = props.id else {
                continue;
            };

            self.recorder.append(&ProvenanceRecord::Generation(GenerationRecord {
                activity_id: activity_id.clone(),
                generated_id: id.clone(),
                generated_role: spec.item.role.clone(),
                entity_type: spec.item.entity_name.clone(),
                entity_location: props.location,
            }));
            self.watcher.register_generation(&spec.item, &id);

            if let Some(members) = &spec.has_members {
                for (member_id, location) in collect_items(capture, instance, members) {
                    self.recorder.append(&ProvenanceRecord::Member(MemberRecord {
                        entity_id: id.clone(),
                        member_id,
                        member_type: members.item.entity_name.clone(),
                        member_location: location,
                    }));
                }
            }
            if let Some(progenitors) = &spec.has_progenitors {
                for (progenitor_id, location) in collect_items(capture, instance, progenitors) {
                    let record = match location {
                        Some(progenitor_location) => {
                            ProvenanceRecord::Progenitor(ProgenitorRecord {
                                entity_id: id.clone(),
                                progenitor_id,
                                progenitor_location,
                            })
                        }
                        None => ProvenanceRecord::Derivation(DerivationRecord {
                            entity_id: id.clone(),
                            progenitor_id,
                        }),
                    };
                    self.recorder.append(&record);
                }
            }
        }
    }
}

/// One operation of a host type as stored in an [`ActivitySet`].
pub type Operation<T, A, R, E> = Arc<dyn Fn(&mut T, A) -> Result<R, E> + Send + Sync>;

/// Operations of a host type keyed by name, for [`Tracer::instrument_all`].
pub struct ActivitySet<T, A, R, E> {
    operations: BTreeMap<String, Operation<T, A, R, E>>,
}

impl<T, A, R, E> Default for ActivitySet<T, A, R, E> {
    fn default() -> Self {
        Self {
            operations: BTreeMap::new(),
        }
    }
}

impl<T, A, R, E> Clone for ActivitySet<T, A, R, E> {
    fn clone(&self) -> Self {
        Self {
            operations: self.operations.clone(),
        }
    }
}

impl<T, A, R, E> ActivitySet<T, A, R, E> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(
        mut self,
        name: impl Into<String>,
        op: impl Fn(&mut T, A) -> Result<R, E> + Send + Sync + 'static,
    ) -> Self {
        self.operations.insert(name.into(), Arc::new(op));
        self
    }

    /// `None` when no operation has that name.
    pub fn invoke(&self, name: &str, instance: &mut T, args: A) -> Option<Result<R, E>> {
        self.operations.get(name).map(|op| op(instance, args))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(String::as_str)
    }
}

fn new_activity_id() -> ActivityId {
    let uuid = Uuid::new_v4().simple().to_string();
    ActivityId::new(&uuid[uuid.len() - ACTIVITY_ID_LEN..])
}

fn parameter_record(
    capture: &Capture<'_>,
    instance: &dyn Traceable,
    definition: &ActivityDefinition,
    activity_id: &ActivityId,
) -> Option<ParameterRecord> {
    let mut parameters = BTreeMap::new();
    for param in &definition.parameters {
        let Some(value) = capture.resolve(Root::Instance(instance), &param.value) else {
            continue;
        };
        match serde_json::to_value(&value) {
            Ok(json) => {
                parameters.insert(param.name.clone(), json);
            }
            Err(err) => {
                tracing::warn!(parameter = %param.name, error = %err, "Skipping parameter");
            }
        }
    }
    (!parameters.is_empty()).then(|| ParameterRecord {
        activity_id: activity_id.clone(),
        parameters,
    })
}

fn usage_records(
    capture: &Capture<'_>,
    instance: &dyn Traceable,
    definition: &ActivityDefinition,
    activity_id: &ActivityId,
) -> Vec<UsageRecord> {
    let mut records = Vec::new();
    for item in &definition.usage {
        let props = match capture.properties(Root::Instance(instance), item) {
            Ok(props) => props,
            Err(err) => {
                tracing::warn!(activity = %definition.name, error = %err, "Skipping usage");
                continue;
            }
        };
        if let Some(used_id) = props.id {
            records.push(UsageRecord {
                activity_id: activity_id.clone(),
                used_id,
                used_role: item.role.clone(),
                entity_type: item.entity_name.clone(),
                entity_location: props.location,
            });
        }
    }
    records
}

/// Ids and locations of the members (or progenitors) of a generated entity.
///
/// With a `list` path every element of the resolved list is one member; a
/// resolved non-list value is a single member. Without one the instance
/// itself is the only member.
fn collect_items(
    capture: &Capture<'_>,
    instance: &dyn Traceable,
    spec: &MemberSpec,
) -> Vec<(Identity, Option<String>)> {
    let list = spec
        .list
        .as_ref()
        .map(|path| capture.resolve(Root::Instance(instance), path));

    let resolve = |root: Root<'_>| match capture.properties(root, &spec.item) {
        Ok(props) => props.id.map(|id| (id, props.location)),
        Err(err) => {
            tracing::warn!(error = %err, "Skipping member");
            None
        }
    };

    match list {
        None => resolve(Root::Instance(instance)).into_iter().collect(),
        Some(None) => Vec::new(),
        Some(Some(Value::List(items))) => items
            .iter()
            .filter_map(|item| resolve(Root::Value(item)))
            .collect(),
        Some(Some(single)) => resolve(Root::Value(&single)).into_iter().collect(),
    }
}
