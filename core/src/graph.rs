//! Reassembles emitted provenance lines into a PROV-style JSON graph.

use std::collections::BTreeMap;
use std::io::BufRead;

use chrono::{DateTime, FixedOffset};
use lineage_types::{Identity, PROV_PREFIX, ProvenanceRecord};
use serde_json::{Map, Value, json};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LogParseError {
    #[error("missing closing {PROV_PREFIX} tag")]
    Unterminated,
    #[error("invalid timestamp {0:?}")]
    Timestamp(String),
    #[error("invalid record: {0}")]
    Record(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<FixedOffset>,
    pub record: ProvenanceRecord,
}

/// Extract the record from a log line.
///
/// `None` for lines that carry no provenance tag; anything before the first
/// tag (log level, target, ...) is ignored.
#[must_use]
pub fn parse_line(line: &str) -> Option<Result<LogEntry, LogParseError>> {
    let start = line.find(PROV_PREFIX)? + PROV_PREFIX.len();
    let rest = &line[start..];
    let Some(end) = rest.find(PROV_PREFIX) else {
        return Some(Err(LogParseError::Unterminated));
    };

    let raw_time = &rest[..end];
    let timestamp = match DateTime::parse_from_rfc3339(raw_time) {
        Ok(timestamp) => timestamp,
        Err(_) => return Some(Err(LogParseError::Timestamp(raw_time.to_string()))),
    };
    let body = rest[end + PROV_PREFIX.len()..].trim();
    Some(
        serde_json::from_str(body)
            .map(|record| LogEntry { timestamp, record })
            .map_err(LogParseError::from),
    )
}

const SECTIONS: &[&str] = &[
    "agent",
    "activity",
    "entity",
    "used",
    "wasGeneratedBy",
    "wasDerivedFrom",
    "hadMember",
    "wasAssociatedWith",
    "session",
];

#[derive(Debug, Default)]
pub struct ProvenanceGraph {
    nodes: BTreeMap<&'static str, Map<String, Value>>,
    relations: BTreeMap<&'static str, Map<String, Value>>,
}

impl ProvenanceGraph {
    #[must_use]
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a LogEntry>) -> Self {
        let mut graph = Self::default();
        for entry in entries {
            graph.add(&entry.record);
        }
        graph
    }

    /// Read a log, skipping lines without a tag and warning on malformed ones.
    pub fn from_reader(reader: impl BufRead) -> std::io::Result<Self> {
        let mut graph = Self::default();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            match parse_line(&line) {
                None => {}
                Some(Ok(entry)) => graph.add(&entry.record),
                Some(Err(err)) => {
                    tracing::warn!(line = idx + 1, error = %err, "Skipping malformed provenance line");
                }
            }
        }
        Ok(graph)
    }

    pub fn add(&mut self, record: &ProvenanceRecord) {
        match record {
            ProvenanceRecord::Session(session) => {
                self.node("session", &session.session_id.to_string()).extend([
                    ("prov:label".to_string(), json!(session.session_name)),
                    ("prov:startTime".to_string(), json!(session.start_time)),
                    ("config".to_string(), json!(session.config)),
                    ("system".to_string(), json!(session.system)),
                ]);
            }
            ProvenanceRecord::ActivityStart(start) => {
                self.node("activity", start.activity_id.as_str()).extend([
                    ("prov:label".to_string(), json!(start.activity_name)),
                    ("prov:startTime".to_string(), json!(start.start_time)),
                    ("in_session".to_string(), json!(start.in_session)),
                ]);
                self.node("agent", &start.agent_name);
                self.relation(
                    "wasAssociatedWith",
                    "a",
                    json!({"prov:activity": start.activity_id, "prov:agent": start.agent_name}),
                );
            }
            ProvenanceRecord::Parameters(params) => {
                self.node("activity", params.activity_id.as_str())
                    .insert("parameters".to_string(), json!(params.parameters));
            }
            ProvenanceRecord::Usage(usage) => {
                self.entity(
                    &usage.used_id,
                    usage.entity_type.as_deref(),
                    usage.entity_location.as_deref(),
                );
                let mut relation = json!({
                    "prov:activity": usage.activity_id,
                    "prov:entity": usage.used_id,
                });
                if let Some(role) = &usage.used_role {
                    relation["prov:role"] = json!(role);
                }
                self.relation("used", "u", relation);
            }
            ProvenanceRecord::Generation(generation) => {
                self.entity(
                    &generation.generated_id,
                    generation.entity_type.as_deref(),
                    generation.entity_location.as_deref(),
                );
                let mut relation = json!({
                    "prov:activity": generation.activity_id,
                    "prov:entity": generation.generated_id,
                });
                if let Some(role) = &generation.generated_role {
                    relation["prov:role"] = json!(role);
                }
                self.relation("wasGeneratedBy", "g", relation);
            }
            ProvenanceRecord::Member(member) => {
                self.entity(&member.entity_id, None, None);
                self.entity(
                    &member.member_id,
                    member.member_type.as_deref(),
                    member.member_location.as_deref(),
                );
                self.relation(
                    "hadMember",
                    "m",
                    json!({"prov:collection": member.entity_id, "prov:entity": member.member_id}),
                );
            }
            ProvenanceRecord::Derivation(derivation) => {
                self.derived(&derivation.entity_id, &derivation.progenitor_id, None);
            }
            ProvenanceRecord::Progenitor(progenitor) => {
                self.derived(
                    &progenitor.entity_id,
                    &progenitor.progenitor_id,
                    Some(&progenitor.progenitor_location),
                );
            }
            ProvenanceRecord::ActivityEnd(end) => {
                self.node("activity", end.activity_id.as_str())
                    .insert("prov:endTime".to_string(), json!(end.end_time));
            }
        }
    }

    #[must_use]
    pub fn section(&self, name: &str) -> Option<&Map<String, Value>> {
        self.nodes.get(name).or_else(|| self.relations.get(name))
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut document = Map::new();
        document.insert(
            "prefix".to_string(),
            json!({"prov": "http://www.w3.org/ns/prov#"}),
        );
        for name in SECTIONS {
            if let Some(section) = self.section(name)
                && !section.is_empty()
            {
                document.insert((*name).to_string(), Value::Object(section.clone()));
            }
        }
        Value::Object(document)
    }

    fn derived(&mut self, entity: &Identity, progenitor: &Identity, location: Option<&str>) {
        self.entity(entity, None, None);
        self.entity(progenitor, None, location);
        self.relation(
            "wasDerivedFrom",
            "d",
            json!({"prov:generatedEntity": entity, "prov:usedEntity": progenitor}),
        );
    }

    fn entity(&mut self, id: &Identity, kind: Option<&str>, location: Option<&str>) {
        let node = self.node("entity", id.as_str());
        if let Some(kind) = kind {
            node.insert("prov:type".to_string(), json!(kind));
        }
        if let Some(location) = location {
            node.insert("prov:location".to_string(), json!(location));
        }
    }

    /// Attribute map of a node, created empty on first use.
    fn node(&mut self, section: &'static str, id: &str) -> &mut Map<String, Value> {
        let entry = self
            .nodes
            .entry(section)
            .or_default()
            .entry(id.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        entry
            .as_object_mut()
            .unwrap_or_else(|| unreachable!("node entries are always objects"))
    }

    fn relation(&mut self, section: &'static str, prefix: &str, body: Value) {
        let relations = self.relations.entry(section).or_default();
        let id = format!("_:{prefix}{}", relations.len() + 1);
        relations.insert(id, body);
    }
}
