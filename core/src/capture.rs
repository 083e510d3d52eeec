//! Reads declared items off an instance: ids, locations, and values.

use lineage_config::{ItemSpec, PathExpr, Schema};
use lineage_types::{Identity, Value};

use crate::identity::{EntityIdentity, IdentityError};
use crate::resolver::{PathResolver, Root};

/// What one usage, generation, member, or progenitor item resolved to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemProperties {
    pub id: Option<Identity>,
    pub location: Option<String>,
}

/// Borrowed view of everything needed to evaluate schema items.
pub struct Capture<'a> {
    schema: &'a Schema,
    resolver: PathResolver<'a>,
    identities: &'a EntityIdentity,
}

impl<'a> Capture<'a> {
    #[must_use]
    pub fn new(
        schema: &'a Schema,
        resolver: PathResolver<'a>,
        identities: &'a EntityIdentity,
    ) -> Self {
        Self {
            schema,
            resolver,
            identities,
        }
    }

    #[must_use]
    pub fn schema(&self) -> &'a Schema {
        self.schema
    }

    #[must_use]
    pub fn resolve(&self, root: Root<'_>, path: &PathExpr) -> Option<Value> {
        self.resolver.resolve(root, path)
    }

    /// An explicit `id` wins (stringified, namespaced). Otherwise the identity
    /// of `value`, or of `location` when there is no value, is computed with
    /// the item's entity type.
    pub fn properties(
        &self,
        root: Root<'_>,
        item: &ItemSpec,
    ) -> Result<ItemProperties, IdentityError> {
        let mut props = ItemProperties::default();

        if let Some(path) = &item.id
            && let Some(id) = self.resolve(root, path)
        {
            let namespace = self.schema.namespace_for(item);
            props.id = Some(Identity::new(id.to_string()).with_namespace(namespace));
        }

        let location = item.location.as_ref().and_then(|path| self.resolve(root, path));
        props.location = location.as_ref().map(ToString::to_string);

        let value = item
            .value
            .as_ref()
            .and_then(|path| self.resolve(root, path))
            .or(location);

        if props.id.is_none()
            && let Some(value) = value
        {
            let entity = item.entity_name.as_deref().and_then(|name| self.schema.entity(name));
            props.id = Some(self.identities.compute(&value, entity)?);
        }

        Ok(props)
    }
}
