//! Provenance capture for instrumented operations.
//!
//! A [`Tracer`] wraps calls on host objects that implement
//! [`Traceable`](lineage_types::Traceable). Each declared activity yields a
//! sequence of provenance records: session, activity start and end,
//! parameters, usages, generations, members, progenitors, and derivations.
//! Records are appended as tagged lines to one or more [`RecordSink`]s and can
//! be reassembled into a PROV graph with [`ProvenanceGraph`].

mod capture;
pub mod graph;
pub mod identity;
pub mod recorder;
pub mod resolver;
pub mod system;
mod tracer;
mod watcher;

pub use capture::{Capture, ItemProperties};
pub use graph::{LogEntry, LogParseError, ProvenanceGraph, parse_line};
pub use identity::{EntityIdentity, HASH_TYPE, IdentityError, file_identity};
pub use recorder::{MemorySink, PROVENANCE_TARGET, RecordSink, Recorder, SessionKey, TracingSink};
pub use resolver::{Namespace, PathResolver, Root};
pub use system::{SnapshotConfig, lineage_dependencies};
pub use tracer::{ActivitySet, Operation, Tracer, TracerBuilder};
pub use watcher::DerivationWatcher;
