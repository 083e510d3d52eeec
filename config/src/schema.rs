//! Activity and entity definitions.
//!
//! The schema is deserialized into loosely-typed `Raw*` structs first, then
//! compiled into the typed model: every dotted path is parsed into a
//! [`PathExpr`], required fields are checked, and entity references are
//! resolved. A compiled [`Schema`] is immutable.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::SchemaError;
use crate::path::{PathError, PathExpr};

// Default value function for serde (bool::default() is false, so only true needs a fn)
const fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SchemaOptions {
    /// When a resolved value is falsy, retry the leaf name in the fallback
    /// namespace. Existing schema files rely on this.
    #[serde(default = "default_true")]
    pub empty_value_fallback: bool,
}

impl Default for SchemaOptions {
    fn default() -> Self {
        Self {
            empty_value_fallback: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntityKind {
    File,
    FileCollection,
    #[default]
    Generic,
}

impl EntityKind {
    fn from_tag(tag: Option<&str>) -> Self {
        match tag {
            Some("File") => EntityKind::File,
            Some("FileCollection") => EntityKind::FileCollection,
            _ => EntityKind::Generic,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            EntityKind::File => "File",
            EntityKind::FileCollection => "FileCollection",
            EntityKind::Generic => "generic",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySpec {
    pub name: String,
    pub kind: EntityKind,
    /// Index file hashed in place of a `FileCollection` directory.
    pub index: Option<String>,
    pub namespace: Option<String>,
    pub description: Option<String>,
}

impl EntitySpec {
    /// An entity with no schema declaration: generic identity, no namespace.
    #[must_use]
    pub fn generic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntityKind::Generic,
            index: None,
            namespace: None,
            description: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSpec {
    pub name: String,
    pub value: PathExpr,
    pub description: Option<String>,
}

/// How to find one used or generated entity on an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemSpec {
    pub role: Option<String>,
    pub entity_name: Option<String>,
    pub id: Option<PathExpr>,
    pub value: Option<PathExpr>,
    pub location: Option<PathExpr>,
    pub namespace: Option<String>,
}

/// Members or progenitors of a generated entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberSpec {
    /// Collection to enumerate. Without it, the instance is the only member.
    pub list: Option<PathExpr>,
    pub item: ItemSpec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationSpec {
    pub item: ItemSpec,
    pub has_members: Option<MemberSpec>,
    pub has_progenitors: Option<MemberSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityDefinition {
    pub name: String,
    pub description: Option<String>,
    pub parameters: Vec<ParameterSpec>,
    pub usage: Vec<ItemSpec>,
    pub generation: Vec<GenerationSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    activities: BTreeMap<String, ActivityDefinition>,
    entities: BTreeMap<String, EntitySpec>,
    options: SchemaOptions,
}

impl Schema {
    #[must_use]
    pub fn activity(&self, name: &str) -> Option<&ActivityDefinition> {
        self.activities.get(name)
    }

    #[must_use]
    pub fn is_declared(&self, activity: &str) -> bool {
        self.activities.contains_key(activity)
    }

    #[must_use]
    pub fn entity(&self, name: &str) -> Option<&EntitySpec> {
        self.entities.get(name)
    }

    pub fn activities(&self) -> impl Iterator<Item = &ActivityDefinition> {
        self.activities.values()
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntitySpec> {
        self.entities.values()
    }

    #[must_use]
    pub fn options(&self) -> SchemaOptions {
        self.options
    }

    /// Namespace applied to explicit ids of an item: the item's own, else the
    /// namespace of the entity it references.
    #[must_use]
    pub fn namespace_for<'a>(&'a self, item: &'a ItemSpec) -> Option<&'a str> {
        item.namespace.as_deref().or_else(|| {
            item.entity_name
                .as_deref()
                .and_then(|name| self.entity(name))
                .and_then(|entity| entity.namespace.as_deref())
        })
    }
}

// ============================================================================
// Raw (deserialized) form
// ============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct RawSchema {
    activities: Option<BTreeMap<String, Option<RawActivity>>>,
    #[serde(default)]
    entities: BTreeMap<String, RawEntity>,
    #[serde(default)]
    options: SchemaOptions,
}

#[derive(Debug, Default, Deserialize)]
struct RawActivity {
    description: Option<String>,
    parameters: Option<Vec<RawParameter>>,
    usage: Option<Vec<RawItem>>,
    generation: Option<Vec<RawItem>>,
}

#[derive(Debug, Deserialize)]
struct RawParameter {
    name: Option<String>,
    value: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawItem {
    role: Option<String>,
    #[serde(rename = "entityName", alias = "entity_name")]
    entity_name: Option<String>,
    id: Option<String>,
    value: Option<String>,
    location: Option<String>,
    namespace: Option<String>,
    list: Option<String>,
    has_members: Option<Box<RawItem>>,
    has_progenitors: Option<Box<RawItem>>,
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    #[serde(rename = "type")]
    kind: Option<String>,
    index: Option<String>,
    namespace: Option<String>,
    description: Option<String>,
}

impl RawSchema {
    pub(crate) fn compile(self) -> Result<Schema, SchemaError> {
        let activities = self.activities.ok_or(SchemaError::MissingField {
            context: "schema".to_string(),
            field: "activities",
        })?;

        let entities: BTreeMap<String, EntitySpec> = self
            .entities
            .into_iter()
            .map(|(name, raw)| {
                let kind = EntityKind::from_tag(raw.kind.as_deref());
                if raw.index.is_some() && kind != EntityKind::FileCollection {
                    tracing::warn!(
                        entity = %name,
                        kind = kind.as_str(),
                        "Entity declares an index but is not a FileCollection; index ignored"
                    );
                }
                let spec = EntitySpec {
                    name: name.clone(),
                    kind,
                    index: raw.index,
                    namespace: raw.namespace,
                    description: raw.description,
                };
                (name, spec)
            })
            .collect();

        let mut compiled = BTreeMap::new();
        for (name, raw) in activities {
            let activity = compile_activity(&name, raw.unwrap_or_default(), &entities)?;
            compiled.insert(name, activity);
        }

        Ok(Schema {
            activities: compiled,
            entities,
            options: self.options,
        })
    }
}

fn compile_activity(
    name: &str,
    raw: RawActivity,
    entities: &BTreeMap<String, EntitySpec>,
) -> Result<ActivityDefinition, SchemaError> {
    let parameters = raw
        .parameters
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(idx, param)| {
            let context = format!("activity `{name}` parameters[{idx}]");
            let param_name = param.name.ok_or_else(|| SchemaError::MissingField {
                context: context.clone(),
                field: "name",
            })?;
            let value = param.value.ok_or_else(|| SchemaError::MissingField {
                context: context.clone(),
                field: "value",
            })?;
            Ok(ParameterSpec {
                name: param_name,
                value: compile_path(&context, &value)?,
                description: param.description,
            })
        })
        .collect::<Result<Vec<_>, SchemaError>>()?;

    let usage = raw
        .usage
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(idx, item)| {
            compile_item(&format!("activity `{name}` usage[{idx}]"), &item, entities, false)
        })
        .collect::<Result<Vec<_>, SchemaError>>()?;

    let generation = raw
        .generation
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(idx, item)| {
            let context = format!("activity `{name}` generation[{idx}]");
            let has_members = item
                .has_members
                .as_deref()
                .map(|sub| compile_member(&format!("{context}.has_members"), sub, entities))
                .transpose()?;
            let has_progenitors = item
                .has_progenitors
                .as_deref()
                .map(|sub| compile_member(&format!("{context}.has_progenitors"), sub, entities))
                .transpose()?;
            Ok(GenerationSpec {
                item: compile_item(&context, &item, entities, false)?,
                has_members,
                has_progenitors,
            })
        })
        .collect::<Result<Vec<_>, SchemaError>>()?;

    Ok(ActivityDefinition {
        name: name.to_string(),
        description: raw.description,
        parameters,
        usage,
        generation,
    })
}

fn compile_member(
    context: &str,
    raw: &RawItem,
    entities: &BTreeMap<String, EntitySpec>,
) -> Result<MemberSpec, SchemaError> {
    let list = raw
        .list
        .as_deref()
        .map(|list| compile_path(context, list))
        .transpose()?;
    let per_element = list.is_some();
    Ok(MemberSpec {
        list,
        item: compile_item(context, raw, entities, per_element)?,
    })
}

/// `per_element` items resolve against each list element, where bare `self`
/// is allowed.
fn compile_item(
    context: &str,
    raw: &RawItem,
    entities: &BTreeMap<String, EntitySpec>,
    per_element: bool,
) -> Result<ItemSpec, SchemaError> {
    if raw.id.is_none() && raw.value.is_none() && raw.location.is_none() {
        return Err(SchemaError::MissingField {
            context: context.to_string(),
            field: "id, value or location",
        });
    }
    if let Some(entity) = &raw.entity_name
        && !entities.contains_key(entity)
    {
        return Err(SchemaError::UnknownEntity {
            context: context.to_string(),
            entity: entity.clone(),
        });
    }

    let path = |raw: &Option<String>| {
        raw.as_deref()
            .map(|text| {
                if per_element {
                    compile_element_path(context, text)
                } else {
                    compile_path(context, text)
                }
            })
            .transpose()
    };

    Ok(ItemSpec {
        role: raw.role.clone(),
        entity_name: raw.entity_name.clone(),
        id: path(&raw.id)?,
        value: path(&raw.value)?,
        location: path(&raw.location)?,
        namespace: raw.namespace.clone(),
    })
}

/// Compiles a path rooted at the instance.
fn compile_path(context: &str, text: &str) -> Result<PathExpr, SchemaError> {
    let path = compile_element_path(context, text)?;
    if path.is_bare_self() {
        return Err(SchemaError::InvalidPath {
            context: context.to_string(),
            path: text.to_string(),
            source: PathError::BareSelf,
        });
    }
    Ok(path)
}

fn compile_element_path(context: &str, text: &str) -> Result<PathExpr, SchemaError> {
    PathExpr::parse(text).map_err(|source| SchemaError::InvalidPath {
        context: context.to_string(),
        path: text.to_string(),
        source,
    })
}
