//! Entity identities.
//!
//! Files are identified by a SHA-256 digest of their content, generic values by
//! a digest of their canonical encoding combined with their string form. Host
//! objects that cannot describe their own content get a per-process sequence
//! number, assigned the first time the object is seen.

use std::collections::HashMap;
use std::env;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use lineage_config::{EntityKind, EntitySpec};
use lineage_types::{Identity, Traceable, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const HASH_TYPE: &str = "sha256";

const BLOCK_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
}

/// Computes identities; owns the side table for unhashable objects.
#[derive(Default)]
pub struct EntityIdentity {
    objects: Mutex<ObjectTable>,
}

impl EntityIdentity {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity of `value` under the declared entity. `None` means an
    /// undeclared entity, which is hashed as a generic value.
    pub fn compute(
        &self,
        value: &Value,
        entity: Option<&EntitySpec>,
    ) -> Result<Identity, IdentityError> {
        let kind = entity.map_or(EntityKind::Generic, |e| e.kind);
        match kind {
            EntityKind::File => file_identity(&path_text(value)),
            EntityKind::FileCollection => {
                let raw = path_text(value);
                let index = entity.and_then(|e| e.index.as_deref()).filter(|i| !i.is_empty());
                match index {
                    Some(index) if Path::new(&expand_env(&raw)).is_dir() => {
                        let indexed = Path::new(&raw).join(index);
                        file_identity(&indexed.to_string_lossy())
                    }
                    _ => file_identity(&raw),
                }
            }
            EntityKind::Generic => {
                let name = entity.map_or("", |e| e.name.as_str());
                Ok(self.generic_identity(value, name))
            }
        }
    }

    fn generic_identity(&self, value: &Value, entity_name: &str) -> Identity {
        if let Value::Object(object) = value
            && object.content_identity().is_none()
        {
            let seq = self.sequence(object);
            let mut hasher = Sha256::new();
            hasher.update(b"object");
            hasher.update(seq.to_le_bytes());
            hasher.update(Sha256::digest(entity_name.as_bytes()));
            return Identity::new(hex(&hasher.finalize()));
        }

        let mut encoded = Vec::new();
        self.encode(value, &mut encoded);
        let mut hasher = Sha256::new();
        hasher.update(Sha256::digest(&encoded));
        hasher.update(Sha256::digest(value.to_string().as_bytes()));
        Identity::new(hex(&hasher.finalize()))
    }

    /// Canonical, type-tagged encoding. Nested objects without a content
    /// identity are encoded by their sequence number.
    fn encode(&self, value: &Value, out: &mut Vec<u8>) {
        match value {
            Value::Null => out.push(b'n'),
            Value::Bool(b) => {
                out.push(b'b');
                out.push(u8::from(*b));
            }
            Value::Int(i) => {
                out.push(b'i');
                out.extend_from_slice(&i.to_le_bytes());
            }
            Value::Float(x) => {
                out.push(b'f');
                out.extend_from_slice(&x.to_bits().to_le_bytes());
            }
            Value::Str(s) => {
                out.push(b's');
                encode_str(s, out);
            }
            Value::List(items) => {
                out.push(b'l');
                out.extend_from_slice(&(items.len() as u64).to_le_bytes());
                for item in items {
                    self.encode(item, out);
                }
            }
            Value::Map(map) => {
                out.push(b'm');
                out.extend_from_slice(&(map.len() as u64).to_le_bytes());
                for (key, item) in map {
                    encode_str(key, out);
                    self.encode(item, out);
                }
            }
            Value::Object(object) => match object.content_identity() {
                Some(content) => {
                    out.push(b'o');
                    encode_str(&content, out);
                }
                None => {
                    out.push(b'r');
                    out.extend_from_slice(&self.sequence(object).to_le_bytes());
                }
            },
        }
    }

    fn sequence(&self, object: &Arc<dyn Traceable>) -> u64 {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sequence(object)
    }
}

/// Sequence numbers for objects that have no content identity.
///
/// Keyed by address but validated through a `Weak`: an address reused by a
/// new object after the old one was dropped gets a fresh number.
#[derive(Default)]
struct ObjectTable {
    next: u64,
    entries: HashMap<usize, (Weak<dyn Traceable>, u64)>,
    prune_at: usize,
}

impl ObjectTable {
    fn sequence(&mut self, object: &Arc<dyn Traceable>) -> u64 {
        let addr = Arc::as_ptr(object).cast::<()>() as usize;
        if let Some((weak, seq)) = self.entries.get(&addr)
            && weak
                .upgrade()
                .is_some_and(|live| Arc::ptr_eq(&live, object))
        {
            return *seq;
        }

        self.next += 1;
        let seq = self.next;
        self.entries.insert(addr, (Arc::downgrade(object), seq));
        if self.entries.len() > self.prune_at {
            self.entries.retain(|_, (weak, _)| weak.strong_count() > 0);
            self.prune_at = (self.entries.len() * 2).max(64);
        }
        seq
    }
}

fn encode_str(s: &str, out: &mut Vec<u8>) {
    out.extend_from_slice(&(s.len() as u64).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn path_text(value: &Value) -> String {
    match value {
        Value::Str(s) => s.clone(),
        other => other.to_string(),
    }
}

/// SHA-256 of the file at `raw` (after variable expansion). A missing file is
/// not an error: its identity is `raw` itself.
pub fn file_identity(raw: &str) -> Result<Identity, IdentityError> {
    let full_path = PathBuf::from(expand_env(raw));
    if !full_path.is_file() {
        tracing::warn!(path = %raw, "File entity not found");
        return Ok(Identity::new(raw));
    }

    let digest = hash_file(&full_path).map_err(|source| IdentityError::Read {
        path: full_path.clone(),
        source,
    })?;
    tracing::debug!(path = %raw, hash = %digest, "File entity hashed");
    Ok(Identity::new(digest))
}

fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BLOCK_SIZE];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex(&hasher.finalize()))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Expand `$NAME` and `${NAME}`. Unknown variables are left as written.
#[must_use]
pub fn expand_env(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        match env::var(name) {
            Ok(value) if !name.is_empty() => {
                out.push_str(&value);
                rest = &after[consumed..];
            }
            _ => {
                let literal = if name.is_empty() { 0 } else { consumed };
                out.push('$');
                out.push_str(&after[..literal]);
                rest = &after[literal..];
            }
        }
    }
    out.push_str(rest);
    out
}
