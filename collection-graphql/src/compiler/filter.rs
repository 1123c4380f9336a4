//! Filter input types.
//!
//! Every collection gets a `<collection>_filter` input type holding `_and`/`_or` plus one entry
//! per filterable field. Scalar fields point at a shared `<scalar>_filter_operators` type, to-one
//! relations point at the filter type of the related collection.

use std::sync::Arc;

use apollo_compiler::Name;
use apollo_compiler::name;
use apollo_compiler::schema::Type;
use strum::IntoEnumIterator;

use super::CollectionShape;
use super::FieldSpecification;
use super::ShellRegistry;
use super::TypeShell;
use super::scalars;
use crate::schema::Field;
use crate::schema::RelationKind;
use crate::schema::SchemaGraph;
use crate::spec::query_plan::FilterOperator;
use crate::spec::query_plan::LogicalOperator;

pub(crate) fn filter_type_name(collection: &str) -> String {
    format!("{collection}_filter")
}

pub(crate) fn operator_type_name(scalar: &Name) -> String {
    format!("{}_filter_operators", scalar.to_lowercase())
}

/// Scalar the operators of `field` compare against, `None` for relations and unfilterable kinds.
pub(crate) fn field_filter_scalar(shape: &CollectionShape, field: &Field) -> Option<Name> {
    if shape.is_primary(field) {
        return Some(name!("ID"));
    }
    scalars::filter_scalar(field.kind)
}

/// Type accepted by `operator` for a field of type `scalar`.
pub(crate) fn operator_value_type(operator: FilterOperator, scalar: &Name) -> Type {
    match operator {
        FilterOperator::In | FilterOperator::Nin => Type::Named(scalar.clone()).list(),
        FilterOperator::Null
        | FilterOperator::Nnull
        | FilterOperator::Empty
        | FilterOperator::Nempty => Type::Named(name!("Boolean")),
        FilterOperator::Eq
        | FilterOperator::Neq
        | FilterOperator::Contains
        | FilterOperator::Ncontains
        | FilterOperator::Gt
        | FilterOperator::Gte
        | FilterOperator::Lt
        | FilterOperator::Lte => Type::Named(scalar.clone()),
    }
}

pub(crate) fn operator_shell(name: Name, scalar: Name) -> TypeShell {
    TypeShell::InputObject {
        name,
        fields: Box::new(move |_| {
            FilterOperator::iter()
                .filter_map(|operator| {
                    Some(FieldSpecification::new(
                        Name::new(operator.as_ref()).ok()?,
                        operator_value_type(operator, &scalar),
                    ))
                })
                .collect()
        }),
    }
}

pub(crate) fn collection_filter_shell(
    graph: Arc<SchemaGraph>,
    shape: Arc<CollectionShape>,
) -> Option<TypeShell> {
    let name = Name::new(&filter_type_name(&shape.collection)).ok()?;
    Some(TypeShell::InputObject {
        name,
        fields: Box::new(move |registry| filter_fields(&graph, &shape, registry)),
    })
}

fn filter_fields(
    graph: &SchemaGraph,
    shape: &CollectionShape,
    registry: &ShellRegistry,
) -> Vec<FieldSpecification> {
    let Some(own) = registry.input_type(&filter_type_name(&shape.collection)) else {
        return Vec::new();
    };
    let logical = LogicalOperator::iter().filter_map(|operator| {
        Some(FieldSpecification::new(
            Name::new(operator.as_ref()).ok()?,
            Type::Named(own.clone()).list(),
        ))
    });

    let fields = shape.fields.iter().filter_map(|(name, field)| {
        let ty = if shape.is_primary(field) {
            Type::Named(operator_type(registry, &name!("ID"))?)
        } else {
            match graph.classify_relation(&shape.collection, &field.field) {
                Some(RelationKind::ManyToOne { related }) => {
                    Type::Named(registry.input_type(&filter_type_name(&related))?)
                }
                // Filtering on related lists or polymorphic rows is not supported
                Some(RelationKind::OneToMany { .. }) | Some(RelationKind::ManyToAny { .. }) => {
                    return None;
                }
                None => Type::Named(operator_type(registry, &field_filter_scalar(shape, field)?)?),
            }
        };
        Some(FieldSpecification::new(name.clone(), ty))
    });

    logical.chain(fields).collect()
}

fn operator_type(registry: &ShellRegistry, scalar: &Name) -> Option<Name> {
    registry.input_type(&operator_type_name(scalar))
}
