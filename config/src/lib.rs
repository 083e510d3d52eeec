//! Schema registry for Lineage.
//!
//! Loads the declarative description of which operations are activities and
//! how their parameters, used entities, and generated entities are found on an
//! instance. Loading happens once at startup; a malformed schema is fatal.
//!
//! ```toml
//! [activities.run]
//! description = "Fit the background model"
//!
//! [[activities.run.parameters]]
//! name = "method"
//! value = "config.fit.method"
//!
//! [[activities.run.usage]]
//! role = "observations"
//! entityName = "ObservationIndex"
//! location = "config.datastore"
//!
//! [[activities.run.generation]]
//! role = "result"
//! entityName = "FitResult"
//! value = "self.result"
//!
//! [entities.ObservationIndex]
//! type = "FileCollection"
//! index = "obs-index.fits.gz"
//!
//! [entities.FitResult]
//! type = "generic"
//! ```

mod path;
mod schema;

use std::fmt;
use std::path::{Path, PathBuf};
use std::{env, fs};

use thiserror::Error;

pub use path::{PathError, PathExpr, Segment};
pub use schema::{
    ActivityDefinition, EntityKind, EntitySpec, GenerationSpec, ItemSpec, MemberSpec,
    ParameterSpec, Schema, SchemaOptions,
};

use schema::RawSchema;

/// Version of this crate, recorded in session snapshots.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable overriding the default schema location.
pub const SCHEMA_ENV_VAR: &str = "LINEAGE_SCHEMA";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaFormat {
    Toml,
    Json,
    Yaml,
}

impl SchemaFormat {
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "toml" => Some(SchemaFormat::Toml),
            "json" => Some(SchemaFormat::Json),
            "yaml" | "yml" => Some(SchemaFormat::Yaml),
            _ => None,
        }
    }
}

impl fmt::Display for SchemaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SchemaFormat::Toml => "TOML",
            SchemaFormat::Json => "JSON",
            SchemaFormat::Yaml => "YAML",
        })
    }
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read schema {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {format} schema: {message}")]
    Parse {
        format: SchemaFormat,
        message: String,
    },
    #[error("unsupported schema format for {}", .0.display())]
    UnsupportedFormat(PathBuf),
    #[error("{context}: missing required field `{field}`")]
    MissingField {
        context: String,
        field: &'static str,
    },
    #[error("{context}: invalid path {path:?}: {source}")]
    InvalidPath {
        context: String,
        path: String,
        source: PathError,
    },
    #[error("{context}: unknown entity `{entity}`")]
    UnknownEntity { context: String, entity: String },
}

impl Schema {
    pub fn parse(text: &str, format: SchemaFormat) -> Result<Self, SchemaError> {
        let parse_err = |message: String| SchemaError::Parse { format, message };
        let raw: RawSchema = match format {
            SchemaFormat::Toml => toml::from_str(text).map_err(|e| parse_err(e.to_string()))?,
            SchemaFormat::Json => {
                serde_json::from_str(text).map_err(|e| parse_err(e.to_string()))?
            }
            SchemaFormat::Yaml => {
                serde_yaml::from_str(text).map_err(|e| parse_err(e.to_string()))?
            }
        };
        let schema = raw.compile()?;
        tracing::debug!(
            activities = schema.activities().count(),
            entities = schema.entities().count(),
            "Schema loaded"
        );
        Ok(schema)
    }

    /// Load a schema file; the format follows the file extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let format = SchemaFormat::from_path(path)
            .ok_or_else(|| SchemaError::UnsupportedFormat(path.to_path_buf()))?;
        let text = fs::read_to_string(path).map_err(|source| SchemaError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, format)
    }

    /// Load the schema from [`default_schema_path`].
    ///
    /// Returns `Ok(None)` when no schema file exists there.
    pub fn load_default() -> Result<Option<Self>, SchemaError> {
        let Some(path) = default_schema_path() else {
            return Ok(None);
        };
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No schema at default location");
            return Ok(None);
        }
        Self::load(path).map(Some)
    }
}

/// `$LINEAGE_SCHEMA`, else `<config dir>/lineage/schema.toml`.
#[must_use]
pub fn default_schema_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os(SCHEMA_ENV_VAR).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join("lineage").join("schema.toml"))
}
