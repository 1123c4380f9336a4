//! Result completion over fetched rows.
//!
//! Rows come back from the accessors already nested the way the operation asked for them.
//! Completion walks the selection set over them, checks leaf values against their scalar type,
//! resolves union members and turns field errors into nulls following
//! <https://spec.graphql.org/October2021/#sec-Handling-Field-Errors>.

use std::collections::HashSet;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Name;
use apollo_compiler::executable::Field;
use apollo_compiler::executable::Selection;
use apollo_compiler::executable::SelectionSet;
use apollo_compiler::response::GraphQLError;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::ObjectType;
use apollo_compiler::schema::Type;
use apollo_compiler::validation::Valid;
use displaydoc::Display;
use indexmap::IndexMap;
use serde_json_bytes::ByteString;
use thiserror::Error;

use super::union::UnionResolver;
use crate::compiler::CompiledScope;
use crate::graphql;
use crate::graphql::ErrorExtension;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::PathElement;
use crate::json_ext::Value;
use crate::spec::TYPENAME;
use crate::spec::selection::IncludeSkip;

/// Errors raised while completing fetched data.
#[derive(Error, Debug, Display, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ExecutionError {
    /// cannot resolve the type of a '{union}' value: no member matches the related collection
    UnionMemberNotFound { union: String },
    /// {0}
    ResponseValidation(String),
}

impl ErrorExtension for ExecutionError {
    fn extension_code(&self) -> String {
        match self {
            ExecutionError::UnionMemberNotFound { .. } => "UNION_MEMBER_NOT_FOUND",
            ExecutionError::ResponseValidation(_) => "RESPONSE_VALIDATION_FAILED",
        }
        .to_string()
    }
}

/// A step in the response, with the key it has in the fetched rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Segment<'a> {
    Field { response_key: &'a str, name: &'a str },
    Index(usize),
}

/// A response path as a linked list from the leaf up, living on the stack of the recursion.
pub(crate) type LinkedPath<'a> = Option<&'a LinkedPathElement<'a>>;

pub(crate) struct LinkedPathElement<'a> {
    pub(crate) segment: Segment<'a>,
    pub(crate) next: LinkedPath<'a>,
}

/// Segments of `path` from the root down.
pub(crate) fn segments<'a>(mut path: LinkedPath<'a>) -> Vec<Segment<'a>> {
    let mut segments = Vec::new();
    while let Some(element) = path {
        segments.push(element.segment);
        path = element.next;
    }
    segments.reverse();
    segments
}

pub(crate) fn response_path(path: LinkedPath<'_>) -> Path {
    Path(
        segments(path)
            .into_iter()
            .map(|segment| match segment {
                Segment::Field { response_key, .. } => PathElement::Key(response_key.to_string()),
                Segment::Index(index) => PathElement::Index(index),
            })
            .collect(),
    )
}

/// Returned by completion when a null has to bubble up to the closest nullable parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PropagateNull;

/// Turns a propagating null into an actual null if `ty` is nullable.
pub(crate) fn try_nullify(
    ty: &Type,
    result: Result<Value, PropagateNull>,
) -> Result<Value, PropagateNull> {
    match result {
        Ok(json) => Ok(json),
        Err(PropagateNull) => {
            if ty.is_non_null() {
                Err(PropagateNull)
            } else {
                Ok(Value::Null)
            }
        }
    }
}

/// Locations of `field` in the request document.
pub(crate) fn located_error(
    error: &impl ErrorExtension,
    path: Option<Path>,
    field: &Field,
    document: &ExecutableDocument,
) -> graphql::Error {
    let located: graphql::Error =
        GraphQLError::new(String::new(), field.name.location(), &document.sources).into();
    let mut error = error.to_graphql_error(path);
    error.locations = located.locations;
    error
}

/// Groups the fields of `selection_set` that apply to `object_type` by response key.
///
/// <https://spec.graphql.org/October2021/#CollectFields()>
pub(crate) fn collect_fields<'a>(
    scope: &CompiledScope,
    document: &'a ExecutableDocument,
    variables: &Object,
    object_type: &Name,
    selection_set: &'a SelectionSet,
) -> IndexMap<&'a Name, Vec<&'a Field>> {
    let mut grouped = IndexMap::new();
    let mut visited_fragments = HashSet::new();
    collect_fields_into(
        scope,
        document,
        variables,
        object_type,
        selection_set.selections.iter(),
        &mut visited_fragments,
        &mut grouped,
    );
    grouped
}

fn collect_fields_into<'a>(
    scope: &CompiledScope,
    document: &'a ExecutableDocument,
    variables: &Object,
    object_type: &Name,
    selections: impl Iterator<Item = &'a Selection>,
    visited_fragments: &mut HashSet<&'a Name>,
    grouped: &mut IndexMap<&'a Name, Vec<&'a Field>>,
) {
    for selection in selections {
        match selection {
            Selection::Field(field) => {
                if IncludeSkip::parse(&field.directives).should_skip(variables) {
                    continue;
                }
                grouped
                    .entry(field.response_key())
                    .or_default()
                    .push(field.as_ref());
            }
            Selection::FragmentSpread(spread) => {
                if IncludeSkip::parse(&spread.directives).should_skip(variables)
                    || !visited_fragments.insert(&spread.fragment_name)
                {
                    continue;
                }
                let Some(fragment) = document.fragments.get(&spread.fragment_name) else {
                    continue;
                };
                if !does_fragment_type_apply(scope, object_type, fragment.type_condition()) {
                    continue;
                }
                collect_fields_into(
                    scope,
                    document,
                    variables,
                    object_type,
                    fragment.selection_set.selections.iter(),
                    visited_fragments,
                    grouped,
                );
            }
            Selection::InlineFragment(inline) => {
                if IncludeSkip::parse(&inline.directives).should_skip(variables) {
                    continue;
                }
                if let Some(condition) = &inline.type_condition
                    && !does_fragment_type_apply(scope, object_type, condition)
                {
                    continue;
                }
                collect_fields_into(
                    scope,
                    document,
                    variables,
                    object_type,
                    inline.selection_set.selections.iter(),
                    visited_fragments,
                    grouped,
                );
            }
        }
    }
}

/// <https://spec.graphql.org/October2021/#DoesFragmentTypeApply()>
fn does_fragment_type_apply(scope: &CompiledScope, object_type: &Name, type_condition: &Name) -> bool {
    match scope.schema.types.get(type_condition) {
        Some(ExtendedType::Object(_)) => object_type == type_condition,
        Some(ExtendedType::Union(union)) => union
            .members
            .iter()
            .any(|member| member.name == *object_type),
        _ => false,
    }
}

/// Completes the fetched value of one root field.
pub(crate) struct Completion<'a> {
    scope: &'a CompiledScope,
    document: &'a Valid<ExecutableDocument>,
    variables: &'a Object,
    errors: Vec<graphql::Error>,
}

impl<'a> Completion<'a> {
    pub(crate) fn new(
        scope: &'a CompiledScope,
        document: &'a Valid<ExecutableDocument>,
        variables: &'a Object,
    ) -> Self {
        Self {
            scope,
            document,
            variables,
            errors: Vec::new(),
        }
    }

    pub(crate) fn into_errors(self) -> Vec<graphql::Error> {
        self.errors
    }

    /// Completes `fetched`, the rows read for the root `fields`.
    ///
    /// A null propagating from a non-null position inside stops at the root field.
    pub(crate) fn complete_root(&mut self, fields: &[&'a Field], fetched: &Value) -> Value {
        let field = fields[0];
        let root = LinkedPathElement {
            segment: Segment::Field {
                response_key: field.response_key().as_str(),
                name: field.name.as_str(),
            },
            next: None,
        };
        let resolver = UnionResolver::new(self.scope, fetched);
        let result = self.complete_value(&resolver, Some(&root), field.ty(), fetched, fields);
        try_nullify(field.ty(), result).unwrap_or(Value::Null)
    }

    fn field_error(&mut self, error: ExecutionError, path: LinkedPath<'_>, field: &Field) {
        self.errors.push(located_error(
            &error,
            Some(response_path(path)),
            field,
            self.document,
        ));
    }

    /// <https://spec.graphql.org/October2021/#CompleteValue()>
    ///
    /// Returns `Err` for a field error being propagated upwards to find a nullable place
    fn complete_value(
        &mut self,
        resolver: &UnionResolver<'_>,
        path: LinkedPath<'_>,
        ty: &Type,
        value: &Value,
        fields: &[&'a Field],
    ) -> Result<Value, PropagateNull> {
        let field = fields[0];
        macro_rules! field_error {
            ($($arg: tt)+) => {
                {
                    self.field_error(
                        ExecutionError::ResponseValidation(format!($($arg)+)),
                        path,
                        field,
                    );
                    return Err(PropagateNull);
                }
            };
        }

        if value.is_null() {
            if ty.is_non_null() {
                field_error!("Non-null type {ty} resolved to null")
            }
            return Ok(Value::Null);
        }

        let ty_name = match ty {
            Type::List(inner_ty) | Type::NonNullList(inner_ty) => {
                let Value::Array(items) = value else {
                    field_error!("List type {ty} resolved to a non-list value")
                };
                let mut completed_list = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    let inner_path = LinkedPathElement {
                        segment: Segment::Index(index),
                        next: path,
                    };
                    let inner_result =
                        self.complete_value(resolver, Some(&inner_path), inner_ty, item, fields);
                    // On field error, try to nullify that item
                    match try_nullify(inner_ty, inner_result) {
                        Ok(inner_value) => completed_list.push(inner_value),
                        // If the item is non-null, try to nullify the list
                        Err(PropagateNull) => return try_nullify(ty, Err(PropagateNull)),
                    }
                }
                return Ok(Value::Array(completed_list));
            }
            Type::Named(name) | Type::NonNullNamed(name) => name,
        };

        let object_type = match self.scope.schema.types.get(ty_name) {
            Some(ExtendedType::Scalar(_)) => return self.complete_leaf(path, ty_name, value, field),
            Some(ExtendedType::Object(object_type)) => object_type,
            Some(ExtendedType::Union(_)) => {
                if !value.is_object() {
                    field_error!("Union type {ty_name} resolved to a non-object value")
                }
                let Some(member) = resolver.resolve_type(ty_name, path) else {
                    self.field_error(
                        ExecutionError::UnionMemberNotFound {
                            union: ty_name.to_string(),
                        },
                        path,
                        field,
                    );
                    return Err(PropagateNull);
                };
                match self.scope.schema.get_object(&member) {
                    Some(object_type) => object_type,
                    None => field_error!("Union member {member} is not an object type"),
                }
            }
            _ => field_error!("Unexpected output type {ty_name}"),
        };

        let Value::Object(row) = value else {
            field_error!("Object type {ty_name} resolved to a non-object value")
        };
        self.execute_selection_set(resolver, path, object_type, row, fields)
            .map(Value::Object)
    }

    fn complete_leaf(
        &mut self,
        path: LinkedPath<'_>,
        ty_name: &Name,
        value: &Value,
        field: &Field,
    ) -> Result<Value, PropagateNull> {
        let completed = match ty_name.as_str() {
            "Int" => value
                .as_i64()
                .filter(|int| i32::try_from(*int).is_ok())
                .map(|_| value.clone()),
            "Float" => value.is_number().then(|| value.clone()),
            // https://spec.graphql.org/October2021/#sec-String.Result-Coercion
            "String" => match value {
                Value::String(_) => Some(value.clone()),
                Value::Number(number) => Some(number.to_string().into()),
                Value::Bool(boolean) => Some(boolean.to_string().into()),
                _ => None,
            },
            "Boolean" => value.is_boolean().then(|| value.clone()),
            "ID" => (value.is_string() || value.is_i64() || value.is_u64()).then(|| value.clone()),
            // Custom scalars carry any JSON value
            _ => Some(value.clone()),
        };
        match completed {
            Some(completed) => Ok(completed),
            None => {
                self.field_error(
                    ExecutionError::ResponseValidation(format!(
                        "Storage returned {value}, expected {ty_name}"
                    )),
                    path,
                    field,
                );
                Err(PropagateNull)
            }
        }
    }

    /// <https://spec.graphql.org/October2021/#ExecuteSelectionSet()>
    fn execute_selection_set(
        &mut self,
        resolver: &UnionResolver<'_>,
        path: LinkedPath<'_>,
        object_type: &ObjectType,
        row: &Object,
        fields: &[&'a Field],
    ) -> Result<Object, PropagateNull> {
        let mut grouped: IndexMap<&'a Name, Vec<&'a Field>> = IndexMap::new();
        let mut visited_fragments = HashSet::new();
        let document: &'a ExecutableDocument = self.document;
        for field in fields {
            collect_fields_into(
                self.scope,
                document,
                self.variables,
                &object_type.name,
                field.selection_set.selections.iter(),
                &mut visited_fragments,
                &mut grouped,
            );
        }

        let mut response = Object::with_capacity(grouped.len());
        for (&response_key, fields) in &grouped {
            let field = fields[0];
            if field.name == TYPENAME {
                response.insert(
                    ByteString::from(response_key.as_str()),
                    object_type.name.as_str().into(),
                );
                continue;
            }
            let Some(definition) = object_type.fields.get(&field.name) else {
                self.field_error(
                    ExecutionError::ResponseValidation(format!(
                        "Undefined field {} on type {}",
                        field.name, object_type.name
                    )),
                    path,
                    field,
                );
                return Err(PropagateNull);
            };
            let field_path = LinkedPathElement {
                segment: Segment::Field {
                    response_key: response_key.as_str(),
                    name: field.name.as_str(),
                },
                next: path,
            };
            let value = row.get(field.name.as_str()).unwrap_or(&Value::Null);
            let result =
                self.complete_value(resolver, Some(&field_path), &definition.ty, value, fields);
            let completed = try_nullify(&definition.ty, result)?;
            response.insert(ByteString::from(response_key.as_str()), completed);
        }
        Ok(response)
    }
}
