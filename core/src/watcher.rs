//! Derivation tracking for generated variables.
//!
//! Every generation item that declares a `value` path registers that path
//! here together with the identity just emitted for it. Before each traced
//! call the watcher re-reads all registered paths; an identity that differs
//! from the stored one yields a derivation edge and replaces the stored
//! identity.
//!
//! Entries are never removed, so the table grows with the number of distinct
//! variable paths for the life of the process.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use lineage_config::ItemSpec;
use lineage_types::{DerivationRecord, Identity, Traceable};

use crate::capture::Capture;
use crate::resolver::Root;

struct Watch {
    variable: String,
    item: ItemSpec,
    identity: Identity,
}

#[derive(Default)]
struct WatchTable {
    entries: Vec<Watch>,
    index: HashMap<String, usize>,
}

#[derive(Default)]
pub struct DerivationWatcher {
    table: Mutex<WatchTable>,
}

impl DerivationWatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare every tracked variable against its last identity.
    ///
    /// Variables that fail to resolve or hash are logged and skipped.
    pub fn watch(
        &self,
        capture: &Capture<'_>,
        instance: &dyn Traceable,
        activity: &str,
    ) -> Vec<DerivationRecord> {
        // Host accessors run without the lock held.
        let snapshot: Vec<(String, ItemSpec, Identity)> = {
            let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            table
                .entries
                .iter()
                .map(|w| (w.variable.clone(), w.item.clone(), w.identity.clone()))
                .collect()
        };

        let mut records = Vec::new();
        let mut changed = Vec::new();
        for (variable, item, previous) in snapshot {
            let current = match capture.properties(Root::Instance(instance), &item) {
                Ok(props) => props.id,
                Err(err) => {
                    tracing::warn!(
                        variable = %variable,
                        activity,
                        error = %err,
                        "Skipping derivation check"
                    );
                    continue;
                }
            };
            let Some(current) = current else {
                continue;
            };
            if current != previous {
                tracing::info!(
                    variable = %variable,
                    activity,
                    identity = %current,
                    "Derivation detected"
                );
                records.push(DerivationRecord {
                    entity_id: current.clone(),
                    progenitor_id: previous,
                });
                changed.push((variable, current));
            }
        }

        if !changed.is_empty() {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            for (variable, current) in changed {
                if let Some(&idx) = table.index.get(&variable) {
                    table.entries[idx].identity = current;
                }
            }
        }

        records
    }

    /// Track `item.value` with the identity just generated for it. Items
    /// without a `value` path are not tracked.
    pub fn register_generation(&self, item: &ItemSpec, identity: &Identity) {
        let Some(path) = &item.value else {
            return;
        };
        let variable = path.as_str().to_string();
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(&idx) = table.index.get(&variable) {
            let entry = &mut table.entries[idx];
            entry.item = item.clone();
            entry.identity = identity.clone();
            return;
        }

        let idx = table.entries.len();
        table.entries.push(Watch {
            variable: variable.clone(),
            item: item.clone(),
            identity: identity.clone(),
        });
        table.index.insert(variable, idx);
    }

    #[must_use]
    pub fn tracked(&self, variable: &str) -> Option<Identity> {
        let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table
            .index
            .get(variable)
            .map(|&idx| table.entries[idx].identity.clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
