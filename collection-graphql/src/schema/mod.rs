//! In-memory view of collections, fields and relations.

pub mod system;

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;

/// Prefix reserved for introspection names. Fields carrying it are never exposed.
pub(crate) const RESERVED_PREFIX: &str = "__";

/// The raw description of a relational schema, as handed over by the schema loader.
///
/// Callers without full access are expected to pass an already reduced overview.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaOverview {
    pub collections: IndexMap<String, Collection>,
    pub relations: Vec<Relation>,
}

/// A named, table-like entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub collection: String,
    /// Name of the primary key field.
    pub primary: String,
    /// A singleton collection holds exactly one record.
    #[serde(default)]
    pub singleton: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default)]
    pub fields: IndexMap<String, Field>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub field: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Field {
    pub(crate) fn is_reserved(&self) -> bool {
        self.field.starts_with(RESERVED_PREFIX)
    }
}

/// Storage type of a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldKind {
    String,
    Text,
    Uuid,
    Hash,
    Csv,
    Integer,
    BigInteger,
    Float,
    Decimal,
    Boolean,
    Date,
    DateTime,
    Time,
    Timestamp,
    Json,
    /// Virtual field without storage, typically the "one" side of a relation.
    Alias,
    #[serde(other)]
    Unknown,
}

/// Relation metadata tying a "many" side to either a single "one" side or to a set of
/// allowed collections picked by a discriminator field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub many_collection: String,
    pub many_field: String,
    #[serde(default)]
    pub one_collection: Option<String>,
    #[serde(default)]
    pub one_field: Option<String>,
    /// Discriminator field on the many side of a many-to-any relation.
    #[serde(default)]
    pub one_collection_field: Option<String>,
    #[serde(default)]
    pub one_allowed_collections: Option<Vec<String>>,
}

/// How a field relates to other collections, seen from the field's own collection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelationKind {
    /// The field stores a foreign key to `related`.
    ManyToOne { related: String },
    /// The field lists the `related` rows pointing back at this collection.
    OneToMany { related: String },
    /// The field points at a row of any of `allowed`, `discriminator` names which one.
    ManyToAny {
        allowed: Vec<String>,
        discriminator: String,
    },
}

/// Lookup of collection metadata the executor needs before dispatching a read.
pub trait CollectionMetadata: Send + Sync {
    /// Whether `collection` is a singleton, `None` if the collection is unknown.
    fn singleton(&self, collection: &str) -> Option<bool>;
}

/// Indexed view over a [`SchemaOverview`].
#[derive(Debug, Default)]
pub struct SchemaGraph {
    overview: SchemaOverview,
    many_side: HashMap<(String, String), usize>,
    one_side: HashMap<(String, String), usize>,
}

impl SchemaGraph {
    pub fn new(overview: SchemaOverview) -> Self {
        let mut many_side = HashMap::new();
        let mut one_side = HashMap::new();
        for (index, relation) in overview.relations.iter().enumerate() {
            let many_key = (relation.many_collection.clone(), relation.many_field.clone());
            let one_key = relation
                .one_collection
                .clone()
                .zip(relation.one_field.clone());

            let taken = many_side.contains_key(&many_key)
                || one_side.contains_key(&many_key)
                || one_key.as_ref().is_some_and(|key| {
                    many_side.contains_key(key) || one_side.contains_key(key)
                });
            if taken {
                tracing::warn!(
                    collection = %relation.many_collection,
                    field = %relation.many_field,
                    "ignoring relation: another relation already uses this field"
                );
                continue;
            }

            many_side.insert(many_key, index);
            if let Some(one_key) = one_key {
                one_side.insert(one_key, index);
            }
        }

        Self {
            overview,
            many_side,
            one_side,
        }
    }

    pub fn collection(&self, name: &str) -> Option<&Collection> {
        self.overview.collections.get(name)
    }

    pub fn collections(&self) -> impl Iterator<Item = &Collection> {
        self.overview.collections.values()
    }

    pub fn overview(&self) -> &SchemaOverview {
        &self.overview
    }

    /// Classifies the relation attached to `collection.field`.
    ///
    /// Returns `None` for plain scalar fields.
    pub fn classify_relation(&self, collection: &str, field: &str) -> Option<RelationKind> {
        let key = (collection.to_string(), field.to_string());
        if let Some(relation) = self.many_side.get(&key).map(|i| &self.overview.relations[*i]) {
            return match (
                &relation.one_allowed_collections,
                &relation.one_collection_field,
            ) {
                (Some(allowed), Some(discriminator)) => Some(RelationKind::ManyToAny {
                    allowed: allowed.clone(),
                    discriminator: discriminator.clone(),
                }),
                _ => relation
                    .one_collection
                    .clone()
                    .map(|related| RelationKind::ManyToOne { related }),
            };
        }
        self.one_side
            .get(&key)
            .map(|i| &self.overview.relations[*i])
            .map(|relation| RelationKind::OneToMany {
                related: relation.many_collection.clone(),
            })
    }

    /// The collections a many-to-any field may point at.
    pub fn allowed_collections(&self, collection: &str, field: &str) -> Option<&[String]> {
        let relation = self
            .many_side
            .get(&(collection.to_string(), field.to_string()))
            .map(|i| &self.overview.relations[*i])?;
        relation.one_collection_field.as_ref()?;
        relation.one_allowed_collections.as_deref()
    }
}

impl CollectionMetadata for SchemaGraph {
    fn singleton(&self, collection: &str) -> Option<bool> {
        self.collection(collection).map(|c| c.singleton)
    }
}
