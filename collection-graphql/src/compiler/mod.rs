//! Compiles a [`SchemaGraph`] into one GraphQL schema per [`Scope`].
//!
//! Types are built in two phases. Every collection first registers its type *shells*: a name
//! and a thunk producing the fields. Once every shell is known the thunks are evaluated, so a
//! field may point at any registered type regardless of declaration order or cycles.

pub(crate) mod filter;
pub(crate) mod scalars;

use std::collections::HashMap;
use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use apollo_compiler::name;
use apollo_compiler::schema::Component;
use apollo_compiler::schema::ComponentName;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::FieldDefinition;
use apollo_compiler::schema::InputObjectType;
use apollo_compiler::schema::InputValueDefinition;
use apollo_compiler::schema::ObjectType;
use apollo_compiler::schema::ScalarType;
use apollo_compiler::schema::Type;
use apollo_compiler::schema::UnionType;
use apollo_compiler::validation::Valid;
use displaydoc::Display;
use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::schema::Collection;
use crate::schema::Field;
use crate::schema::FieldKind;
use crate::schema::RelationKind;
use crate::schema::SchemaGraph;
use crate::schema::system::SYSTEM_PREFIX;
use crate::schema::system::is_system_collection;
use crate::snapshot::Snapshot;

pub(crate) const QUERY_TYPE: &str = "Query";
/// Root field added when a scope exposes no collection, an object type needs at least one field.
pub(crate) const EMPTY_ROOT_FIELD: &str = "_empty";

/// Type names a collection can not take.
const RESERVED_TYPE_NAMES: &[&str] = &[
    QUERY_TYPE,
    scalars::JSON_SCALAR,
    "String",
    "Int",
    "Float",
    "Boolean",
    "ID",
];

/// The two halves of the exposed API.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    clap::ValueEnum,
    strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Scope {
    /// User collections.
    #[default]
    Items,
    /// Collections carrying the system prefix, exposed without it.
    System,
}

impl Scope {
    /// Name of the root field exposing `collection`, `None` when the collection belongs to the
    /// other scope.
    pub fn root_field_name(self, collection: &str) -> Option<&str> {
        match self {
            Scope::Items => (!is_system_collection(collection)).then_some(collection),
            Scope::System => collection.strip_prefix(SYSTEM_PREFIX),
        }
    }

    /// Collection read by the root field named `field`.
    pub fn collection_name(self, field: &str) -> String {
        match self {
            Scope::Items => field.to_string(),
            Scope::System => format!("{SYSTEM_PREFIX}{field}"),
        }
    }
}

/// Schema compilation errors.
#[derive(Error, Debug, Display, Clone)]
#[non_exhaustive]
pub enum SchemaError {
    /// invalid {scope} schema: {message}
    Invalid { scope: Scope, message: String },
}

/// Polymorphic relation backing a union type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnionBinding {
    /// Field of the enclosing row naming the collection of the related row.
    pub discriminator: String,
    /// Member types, named after their collection.
    pub members: Vec<Name>,
}

/// The schema of one scope with the lookups needed to execute against it.
#[derive(Debug)]
pub struct CompiledScope {
    pub(crate) schema: Valid<Schema>,
    pub(crate) root_fields: IndexMap<Name, String>,
    pub(crate) unions: HashMap<Name, UnionBinding>,
}

impl CompiledScope {
    pub fn schema(&self) -> &Valid<Schema> {
        &self.schema
    }

    /// Collection read by a root field.
    pub fn collection(&self, root_field: &str) -> Option<&str> {
        self.root_fields.get(root_field).map(String::as_str)
    }

    pub fn union_binding(&self, union: &str) -> Option<&UnionBinding> {
        self.unions.get(union)
    }
}

pub(crate) struct ArgumentSpecification {
    pub(crate) name: Name,
    pub(crate) ty: Type,
}

impl From<ArgumentSpecification> for InputValueDefinition {
    fn from(argument: ArgumentSpecification) -> Self {
        InputValueDefinition {
            description: None,
            name: argument.name,
            ty: Node::new(argument.ty),
            default_value: None,
            directives: Default::default(),
        }
    }
}

pub(crate) struct FieldSpecification {
    pub(crate) name: Name,
    pub(crate) ty: Type,
    pub(crate) description: Option<String>,
    pub(crate) arguments: Vec<ArgumentSpecification>,
}

impl FieldSpecification {
    pub(crate) fn new(name: Name, ty: Type) -> Self {
        Self {
            name,
            ty,
            description: None,
            arguments: Vec::new(),
        }
    }
}

impl From<FieldSpecification> for FieldDefinition {
    fn from(field: FieldSpecification) -> Self {
        FieldDefinition {
            description: field.description.as_deref().map(Node::new_str),
            name: field.name,
            arguments: field
                .arguments
                .into_iter()
                .map(|argument| Node::new(argument.into()))
                .collect(),
            ty: field.ty,
            directives: Default::default(),
        }
    }
}

impl From<FieldSpecification> for InputValueDefinition {
    fn from(field: FieldSpecification) -> Self {
        InputValueDefinition {
            description: field.description.as_deref().map(Node::new_str),
            name: field.name,
            ty: Node::new(field.ty),
            default_value: None,
            directives: Default::default(),
        }
    }
}

type FieldsFn = dyn Fn(&ShellRegistry) -> Vec<FieldSpecification>;
type MembersFn = dyn Fn(&ShellRegistry) -> Vec<Name>;

/// A type whose name is known before its content.
pub(crate) enum TypeShell {
    Scalar {
        name: Name,
        description: Option<String>,
    },
    Object {
        name: Name,
        description: Option<String>,
        fields: Box<FieldsFn>,
    },
    InputObject {
        name: Name,
        fields: Box<FieldsFn>,
    },
    Union {
        name: Name,
        members: Box<MembersFn>,
    },
}

impl TypeShell {
    fn name(&self) -> &Name {
        match self {
            TypeShell::Scalar { name, .. }
            | TypeShell::Object { name, .. }
            | TypeShell::InputObject { name, .. }
            | TypeShell::Union { name, .. } => name,
        }
    }
}

#[derive(Default)]
pub(crate) struct ShellRegistry {
    shells: IndexMap<Name, TypeShell>,
}

impl ShellRegistry {
    /// Registers `shell` unless its name is taken.
    pub(crate) fn register(&mut self, shell: TypeShell) -> bool {
        if self.shells.contains_key(shell.name()) {
            tracing::warn!(type_name = %shell.name(), "skipping duplicate type definition");
            return false;
        }
        self.shells.insert(shell.name().clone(), shell);
        true
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.shells.contains_key(name)
    }

    /// Name of the object type of `collection`, if one was registered.
    pub(crate) fn object_type(&self, collection: &str) -> Option<Name> {
        match self.shells.get(collection) {
            Some(TypeShell::Object { name, .. }) => Some(name.clone()),
            _ => None,
        }
    }

    /// Name of the input type `name`, if one was registered.
    pub(crate) fn input_type(&self, name: &str) -> Option<Name> {
        match self.shells.get(name) {
            Some(TypeShell::InputObject { name, .. }) => Some(name.clone()),
            _ => None,
        }
    }

    pub(crate) fn union_members(&self, union: &str) -> Vec<Name> {
        match self.shells.get(union) {
            Some(TypeShell::Union { members, .. }) => members(self),
            _ => Vec::new(),
        }
    }

    /// Drops object types left without fields, together with their filter type.
    ///
    /// Dropping a type can empty the objects relating to it, so this runs until nothing
    /// changes.
    fn prune_empty_objects(&mut self) {
        loop {
            let empty = self
                .shells
                .values()
                .filter_map(|shell| match shell {
                    TypeShell::Object { name, fields, .. } if fields(self).is_empty() => {
                        Some(name.clone())
                    }
                    _ => None,
                })
                .collect::<Vec<_>>();
            if empty.is_empty() {
                return;
            }
            for name in empty {
                tracing::warn!(
                    collection = %name,
                    "omitting collection: none of its fields can be exposed"
                );
                self.shells.shift_remove(&name);
                let filter = filter::filter_type_name(&name);
                if matches!(
                    self.shells.get(filter.as_str()),
                    Some(TypeShell::InputObject { .. })
                ) {
                    self.shells.shift_remove(filter.as_str());
                }
            }
        }
    }

    /// Evaluates every thunk and writes the resulting definitions into `schema`.
    fn define(&self, schema: &mut Schema) {
        for shell in self.shells.values() {
            let definition = match shell {
                TypeShell::Scalar { name, description } => {
                    ExtendedType::Scalar(Node::new(ScalarType {
                        description: description.as_deref().map(Node::new_str),
                        name: name.clone(),
                        directives: Default::default(),
                    }))
                }
                TypeShell::Object {
                    name,
                    description,
                    fields,
                } => ExtendedType::Object(Node::new(ObjectType {
                    description: description.as_deref().map(Node::new_str),
                    name: name.clone(),
                    implements_interfaces: Default::default(),
                    directives: Default::default(),
                    fields: fields(self)
                        .into_iter()
                        .map(|field| {
                            (field.name.clone(), Component::new(FieldDefinition::from(field)))
                        })
                        .collect(),
                })),
                TypeShell::InputObject { name, fields } => {
                    ExtendedType::InputObject(Node::new(InputObjectType {
                        description: None,
                        name: name.clone(),
                        directives: Default::default(),
                        fields: fields(self)
                            .into_iter()
                            .map(|field| {
                                let definition = InputValueDefinition::from(field);
                                (definition.name.clone(), Component::new(definition))
                            })
                            .collect(),
                    }))
                }
                TypeShell::Union { name, members } => {
                    let members = members(self);
                    if members.is_empty() {
                        tracing::debug!(union = %name, "omitting union without members");
                        continue;
                    }
                    ExtendedType::Union(Node::new(UnionType {
                        description: None,
                        name: name.clone(),
                        directives: Default::default(),
                        members: members.into_iter().map(ComponentName::from).collect(),
                    }))
                }
            };
            schema.types.insert(shell.name().clone(), definition);
        }
    }
}

/// The exposed part of a collection.
pub(crate) struct CollectionShape {
    pub(crate) name: Name,
    pub(crate) collection: String,
    pub(crate) primary: String,
    pub(crate) note: Option<String>,
    pub(crate) fields: Vec<(Name, Field)>,
}

impl CollectionShape {
    fn new(graph: &SchemaGraph, collection: &Collection) -> Option<Self> {
        let Ok(name) = Name::new(&collection.collection) else {
            tracing::warn!(
                collection = %collection.collection,
                "skipping collection: not a valid GraphQL name"
            );
            return None;
        };
        if RESERVED_TYPE_NAMES.contains(&name.as_str()) || name.starts_with("__") {
            tracing::warn!(collection = %name, "skipping collection: reserved type name");
            return None;
        }

        let fields = collection
            .fields
            .values()
            .filter(|field| {
                if field.is_reserved() {
                    tracing::warn!(
                        collection = %collection.collection,
                        field = %field.field,
                        "skipping field with a reserved name"
                    );
                    return false;
                }
                true
            })
            .filter_map(|field| match Name::new(&field.field) {
                Ok(name) => Some((name, field.clone())),
                Err(_) => {
                    tracing::warn!(
                        collection = %collection.collection,
                        field = %field.field,
                        "skipping field: not a valid GraphQL name"
                    );
                    None
                }
            })
            .filter(|(_, field)| {
                field.kind != FieldKind::Alias
                    || graph
                        .classify_relation(&collection.collection, &field.field)
                        .is_some()
            })
            .collect::<Vec<_>>();

        if fields.is_empty() {
            tracing::debug!(
                collection = %collection.collection,
                "omitting collection without exposed fields"
            );
            return None;
        }

        Some(Self {
            name,
            collection: collection.collection.clone(),
            primary: collection.primary.clone(),
            note: collection.note.clone(),
            fields,
        })
    }

    pub(crate) fn is_primary(&self, field: &Field) -> bool {
        field.field == self.primary
    }
}

pub(crate) fn union_type_name(collection: &str, field: &str) -> String {
    format!("{collection}_{field}_union")
}

/// Arguments shared by root fields and one-to-many fields.
pub(crate) fn query_arguments(filter: Option<Name>) -> Vec<ArgumentSpecification> {
    let string = Type::Named(name!("String"));
    let int = Type::Named(name!("Int"));
    filter
        .map(|filter| ArgumentSpecification {
            name: name!("filter"),
            ty: Type::Named(filter),
        })
        .into_iter()
        .chain([
            ArgumentSpecification {
                name: name!("sort"),
                ty: string.clone().list(),
            },
            ArgumentSpecification {
                name: name!("limit"),
                ty: int.clone(),
            },
            ArgumentSpecification {
                name: name!("offset"),
                ty: int.clone(),
            },
            ArgumentSpecification {
                name: name!("page"),
                ty: int,
            },
            ArgumentSpecification {
                name: name!("search"),
                ty: string,
            },
        ])
        .collect()
}

fn object_shell(graph: Arc<SchemaGraph>, shape: Arc<CollectionShape>) -> TypeShell {
    TypeShell::Object {
        name: shape.name.clone(),
        description: shape.note.clone(),
        fields: Box::new(move |registry| object_fields(&graph, &shape, registry)),
    }
}

fn object_fields(
    graph: &SchemaGraph,
    shape: &CollectionShape,
    registry: &ShellRegistry,
) -> Vec<FieldSpecification> {
    shape
        .fields
        .iter()
        .filter_map(|(name, field)| {
            let mut arguments = Vec::new();
            let ty = if shape.is_primary(field) {
                Type::Named(name!("ID")).non_null()
            } else {
                match graph.classify_relation(&shape.collection, &field.field) {
                    Some(RelationKind::ManyToOne { related }) => {
                        Type::Named(related_object(registry, shape, field, &related)?)
                    }
                    Some(RelationKind::OneToMany { related }) => {
                        let object = related_object(registry, shape, field, &related)?;
                        arguments =
                            query_arguments(registry.input_type(&filter::filter_type_name(&related)));
                        Type::Named(object).non_null().list()
                    }
                    Some(RelationKind::ManyToAny { .. }) => {
                        let union = union_type_name(&shape.collection, &field.field);
                        if registry.union_members(&union).is_empty() {
                            tracing::warn!(
                                collection = %shape.collection,
                                field = %field.field,
                                "skipping polymorphic field: none of its collections is exposed"
                            );
                            return None;
                        }
                        Type::Named(Name::new(&union).ok()?)
                    }
                    None => scalars::output_type(field.kind)?,
                }
            };
            Some(FieldSpecification {
                name: name.clone(),
                ty,
                description: field.note.clone(),
                arguments,
            })
        })
        .collect()
}

fn related_object(
    registry: &ShellRegistry,
    shape: &CollectionShape,
    field: &Field,
    related: &str,
) -> Option<Name> {
    let object = registry.object_type(related);
    if object.is_none() {
        tracing::warn!(
            collection = %shape.collection,
            field = %field.field,
            related,
            "skipping relational field: related collection is not exposed"
        );
    }
    object
}

fn union_shell(name: Name, allowed: Vec<String>) -> TypeShell {
    TypeShell::Union {
        name,
        members: Box::new(move |registry| {
            allowed
                .iter()
                .filter_map(|collection| registry.object_type(collection))
                .collect()
        }),
    }
}

/// Compiles both scopes of `graph`.
pub fn compile(graph: Arc<SchemaGraph>, generation: u64) -> Result<Snapshot, SchemaError> {
    let shapes = graph
        .collections()
        .filter_map(|collection| CollectionShape::new(&graph, collection))
        .map(Arc::new)
        .collect::<Vec<_>>();

    let mut registry = ShellRegistry::default();
    let mut discriminators = IndexMap::new();
    for shape in &shapes {
        if !registry.register(object_shell(graph.clone(), shape.clone())) {
            continue;
        }
        if let Some(filter) = filter::collection_filter_shell(graph.clone(), shape.clone()) {
            registry.register(filter);
        }

        for (_, field) in &shape.fields {
            if let Some(scalar) = filter::field_filter_scalar(shape, field) {
                let operators = filter::operator_type_name(&scalar);
                if let Ok(operators) = Name::new(&operators)
                    && !registry.contains(&operators)
                {
                    registry.register(filter::operator_shell(operators, scalar));
                }
            }
            if field.kind == FieldKind::Json
                && !shape.is_primary(field)
                && !registry.contains(scalars::JSON_SCALAR)
            {
                registry.register(TypeShell::Scalar {
                    name: name!("JSON"),
                    description: Some("Arbitrary JSON value".to_string()),
                });
            }
            if let Some(RelationKind::ManyToAny {
                allowed,
                discriminator,
            }) = graph.classify_relation(&shape.collection, &field.field)
            {
                let Ok(union) = Name::new(&union_type_name(&shape.collection, &field.field))
                else {
                    continue;
                };
                if registry.register(union_shell(union.clone(), allowed)) {
                    discriminators.insert(union, discriminator);
                }
            }
        }
    }

    registry.prune_empty_objects();

    let mut base = Schema::new();
    registry.define(&mut base);

    let unions = discriminators
        .into_iter()
        .filter_map(|(union, discriminator)| {
            let members = registry.union_members(&union);
            (!members.is_empty()).then_some((
                union,
                UnionBinding {
                    discriminator,
                    members,
                },
            ))
        })
        .collect::<HashMap<_, _>>();

    let items = compile_scope(&base, &registry, &graph, &unions, Scope::Items)?;
    let system = compile_scope(&base, &registry, &graph, &unions, Scope::System)?;
    tracing::debug!(
        generation,
        types = base.types.len(),
        "compiled collection schema"
    );
    Ok(Snapshot::new(generation, graph, items, system))
}

fn compile_scope(
    base: &Schema,
    registry: &ShellRegistry,
    graph: &SchemaGraph,
    unions: &HashMap<Name, UnionBinding>,
    scope: Scope,
) -> Result<CompiledScope, SchemaError> {
    let mut schema = base.clone();
    let mut root_fields = IndexMap::new();
    let mut fields = Vec::new();

    for collection in graph.collections() {
        let Some(field_name) = scope.root_field_name(&collection.collection) else {
            continue;
        };
        let Some(object) = registry.object_type(&collection.collection) else {
            continue;
        };
        let Ok(field_name) = Name::new(field_name) else {
            tracing::warn!(
                collection = %collection.collection,
                %scope,
                "skipping root field: not a valid GraphQL name"
            );
            continue;
        };
        let ty = if collection.singleton {
            Type::Named(object)
        } else {
            Type::Named(object).non_null().list()
        };
        root_fields.insert(field_name.clone(), collection.collection.clone());
        fields.push(FieldSpecification {
            name: field_name,
            ty,
            description: collection.note.clone(),
            arguments: query_arguments(
                registry.input_type(&filter::filter_type_name(&collection.collection)),
            ),
        });
    }

    if fields.is_empty() {
        fields.push(FieldSpecification::new(
            name!("_empty"),
            Type::Named(name!("Boolean")),
        ));
    }

    schema.types.insert(
        name!("Query"),
        ExtendedType::Object(Node::new(ObjectType {
            description: None,
            name: name!("Query"),
            implements_interfaces: Default::default(),
            directives: Default::default(),
            fields: fields
                .into_iter()
                .map(|field| (field.name.clone(), Component::new(FieldDefinition::from(field))))
                .collect(),
        })),
    );
    schema.schema_definition.make_mut().query = Some(ComponentName::from(name!("Query")));

    let schema = schema.validate().map_err(|invalid| SchemaError::Invalid {
        scope,
        message: invalid.errors.to_string(),
    })?;

    Ok(CompiledScope {
        schema,
        root_fields,
        unions: unions.clone(),
    })
}
