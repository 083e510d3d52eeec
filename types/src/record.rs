//! Provenance record shapes.
//!
//! Field names are part of the emitted log format and are read back by graph
//! consumers, so they keep their historical spelling (`startTime`,
//! `in_session`, ...).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{ActivityId, Identity, SessionId};

/// Tag that wraps the capture timestamp of every provenance log line.
pub const PROV_PREFIX: &str = "_PROV_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub session_name: String,
    #[serde(rename = "startTime")]
    pub start_time: String,
    pub config: Option<String>,
    pub system: SystemSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActivityStart {
    pub activity_id: ActivityId,
    pub activity_name: String,
    pub in_session: SessionId,
    #[serde(rename = "startTime")]
    pub start_time: String,
    pub agent_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterRecord {
    pub activity_id: ActivityId,
    pub parameters: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UsageRecord {
    pub activity_id: ActivityId,
    pub used_id: Identity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerationRecord {
    pub activity_id: ActivityId,
    pub generated_id: Identity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemberRecord {
    pub entity_id: Identity,
    pub member_id: Identity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_location: Option<String>,
}

/// A declared variable changed identity between two calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DerivationRecord {
    pub entity_id: Identity,
    pub progenitor_id: Identity,
}

/// A generated entity was built from a declared progenitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProgenitorRecord {
    pub entity_id: Identity,
    pub progenitor_id: Identity,
    pub progenitor_location: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActivityEnd {
    pub activity_id: ActivityId,
    #[serde(rename = "endTime")]
    pub end_time: String,
}

/// Any record the engine emits.
///
/// Serialized untagged: the field set identifies the variant. A progenitor
/// without a location has the same shape as a derivation and reads back as
/// one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProvenanceRecord {
    Session(Box<SessionRecord>),
    ActivityStart(ActivityStart),
    Parameters(ParameterRecord),
    Usage(UsageRecord),
    Generation(GenerationRecord),
    Member(MemberRecord),
    Derivation(DerivationRecord),
    Progenitor(ProgenitorRecord),
    ActivityEnd(ActivityEnd),
}

impl ProvenanceRecord {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ProvenanceRecord::Session(_) => "session",
            ProvenanceRecord::ActivityStart(_) => "activity_start",
            ProvenanceRecord::Parameters(_) => "parameters",
            ProvenanceRecord::Usage(_) => "usage",
            ProvenanceRecord::Generation(_) => "generation",
            ProvenanceRecord::Member(_) => "member",
            ProvenanceRecord::Derivation(_) => "derivation",
            ProvenanceRecord::Progenitor(_) => "progenitor",
            ProvenanceRecord::ActivityEnd(_) => "activity_end",
        }
    }

    /// The activity a record belongs to, for records that carry one.
    #[must_use]
    pub fn activity_id(&self) -> Option<&ActivityId> {
        match self {
            ProvenanceRecord::ActivityStart(r) => Some(&r.activity_id),
            ProvenanceRecord::Parameters(r) => Some(&r.activity_id),
            ProvenanceRecord::Usage(r) => Some(&r.activity_id),
            ProvenanceRecord::Generation(r) => Some(&r.activity_id),
            ProvenanceRecord::ActivityEnd(r) => Some(&r.activity_id),
            _ => None,
        }
    }
}

// ============================================================================
// System snapshot
// ============================================================================

/// Facts about the process and host that are fixed for the whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub version: String,
    pub dependencies: BTreeMap<String, String>,
    /// Application-specific variables the host asked to record.
    pub envvars: BTreeMap<String, Option<String>>,
    pub executable: Option<String>,
    pub platform: PlatformInfo,
    pub runtime: RuntimeInfo,
    /// General-purpose variables (`PATH`, `HOME`, ...).
    pub environment: BTreeMap<String, Option<String>>,
    pub arguments: Vec<String>,
    pub start_time_utc: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub architecture_bits: String,
    pub machine: String,
    pub node: Option<String>,
    pub system: String,
    pub family: String,
    pub release: Option<String>,
    pub version: Option<String>,
    pub num_cpus: usize,
    pub boot_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub implementation: String,
    pub minimum_version: String,
    pub debug_assertions: bool,
}
