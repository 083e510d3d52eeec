//! Shared test utilities and fixtures
//!
//! A small analysis host with a nested config object, plus a tracer wired to
//! an in-memory sink.

#![allow(dead_code)]

use std::sync::Arc;

use lineage_config::{Schema, SchemaFormat};
use lineage_core::{MemorySink, Tracer};
use lineage_types::{InstanceId, Instrumented, ProvenanceRecord, Traceable, Value};

/// Two activities: `get_datasets` (parameter, file usage, collection with
/// members) and `run` (a single generic result).
pub const SCHEMA: &str = r#"
[activities.get_datasets]
description = "Reduce observations to datasets"

[[activities.get_datasets.parameters]]
name = "method"
value = "config.method"

[[activities.get_datasets.usage]]
role = "observations"
entityName = "Observations"
location = "config.datastore"

[[activities.get_datasets.generation]]
role = "datasets"
entityName = "Datasets"
value = "self.datasets"

[activities.get_datasets.generation.has_members]
list = "datasets"
entityName = "Dataset"
value = "self"

[activities.run]

[[activities.run.generation]]
role = "result"
entityName = "result"
value = "self.result"

[entities.Observations]
type = "File"

[entities.Datasets]
type = "generic"

[entities.Dataset]
type = "generic"

[entities.result]
type = "generic"
"#;

pub struct Config {
    pub filename: Option<String>,
    pub method: String,
    pub datastore: String,
}

impl Traceable for Config {
    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "filename" => Some(self.filename.clone().into()),
            "method" => Some(self.method.as_str().into()),
            "datastore" => Some(self.datastore.as_str().into()),
            _ => None,
        }
    }
}

pub struct Analysis {
    pub id: InstanceId,
    pub config: Arc<Config>,
    pub datasets: Vec<String>,
    pub result: Option<String>,
}

impl Analysis {
    pub fn new(datastore: &str) -> Self {
        Self {
            id: InstanceId::new(),
            config: Arc::new(Config {
                filename: Some("analysis.toml".to_string()),
                method: "1d".to_string(),
                datastore: datastore.to_string(),
            }),
            datasets: Vec::new(),
            result: None,
        }
    }
}

impl Traceable for Analysis {
    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "config" => Some(Value::shared(&self.config)),
            "datasets" => Some(Value::List(
                self.datasets.iter().map(|d| Value::from(d.as_str())).collect(),
            )),
            "result" => Some(self.result.clone().into()),
            _ => None,
        }
    }
}

impl Instrumented for Analysis {
    fn instance_id(&self) -> &InstanceId {
        &self.id
    }
}

pub fn schema() -> Schema {
    Schema::parse(SCHEMA, SchemaFormat::Toml).expect("fixture schema is valid")
}

pub fn tracer() -> (Arc<Tracer>, MemorySink) {
    let sink = MemorySink::new();
    let tracer = Tracer::builder(schema()).sink(sink.clone()).build();
    (Arc::new(tracer), sink)
}

pub fn kinds(records: &[ProvenanceRecord]) -> Vec<&'static str> {
    records.iter().map(ProvenanceRecord::kind).collect()
}
