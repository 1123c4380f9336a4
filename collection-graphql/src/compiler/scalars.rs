//! Storage kinds to GraphQL types.

use apollo_compiler::Name;
use apollo_compiler::name;
use apollo_compiler::schema::Type;

use crate::schema::FieldKind;

/// Custom scalar carrying arbitrary JSON.
pub(crate) const JSON_SCALAR: &str = "JSON";

/// Named scalar a field of `kind` is exposed as, `None` when the kind has no storage.
pub(crate) fn scalar_name(kind: FieldKind) -> Option<Name> {
    let name = match kind {
        FieldKind::Integer => name!("Int"),
        FieldKind::Float | FieldKind::Decimal => name!("Float"),
        FieldKind::Boolean => name!("Boolean"),
        FieldKind::Json => name!("JSON"),
        // 64 bit integers overflow GraphQL `Int`
        FieldKind::BigInteger
        | FieldKind::String
        | FieldKind::Text
        | FieldKind::Uuid
        | FieldKind::Hash
        | FieldKind::Csv
        | FieldKind::Date
        | FieldKind::DateTime
        | FieldKind::Time
        | FieldKind::Timestamp
        | FieldKind::Unknown => name!("String"),
        FieldKind::Alias => return None,
    };
    Some(name)
}

/// Output type of a non-relational field.
pub(crate) fn output_type(kind: FieldKind) -> Option<Type> {
    let scalar = scalar_name(kind)?;
    Some(match kind {
        FieldKind::Csv => Type::Named(scalar).list(),
        _ => Type::Named(scalar),
    })
}

/// Scalar used by the filter operators of a field, `None` when the field cannot be filtered.
pub(crate) fn filter_scalar(kind: FieldKind) -> Option<Name> {
    match kind {
        FieldKind::Json => None,
        _ => scalar_name(kind),
    }
}
