//! Core domain types for Lineage.
//!
//! This crate contains pure domain types with no IO and minimal dependencies:
//! identifiers, the dynamic [`Value`] model read from host objects, the
//! [`Traceable`] capability trait, and the shapes of emitted provenance
//! records.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

/// Version of the lineage crates, recorded in session snapshots.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

mod ids;
mod record;
mod value;

pub use ids::{ActivityId, Identity, InstanceId, SessionId};
pub use record::{
    ActivityEnd, ActivityStart, DerivationRecord, GenerationRecord, MemberRecord, PROV_PREFIX,
    ParameterRecord, PlatformInfo, ProgenitorRecord, ProvenanceRecord, RuntimeInfo,
    SessionRecord, SystemSnapshot, UsageRecord,
};
pub use value::{Instrumented, Kwargs, Traceable, Value};
