//! The canonical query handed to a collection accessor.

use indexmap::IndexMap;
use serde::Serialize;
use serde::Serializer;
use serde_json_bytes::ByteString;

use super::DEEP_OPTION_PREFIX;
use super::SpecError;
use crate::json_ext::Object;
use crate::json_ext::Value;

/// Comparison applied to a single field.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    strum_macros::AsRefStr,
    strum_macros::EnumIter,
    strum_macros::EnumString,
)]
pub enum FilterOperator {
    #[serde(rename = "_eq")]
    #[strum(serialize = "_eq")]
    Eq,
    #[serde(rename = "_neq")]
    #[strum(serialize = "_neq")]
    Neq,
    #[serde(rename = "_contains")]
    #[strum(serialize = "_contains")]
    Contains,
    #[serde(rename = "_ncontains")]
    #[strum(serialize = "_ncontains")]
    Ncontains,
    #[serde(rename = "_in")]
    #[strum(serialize = "_in")]
    In,
    #[serde(rename = "_nin")]
    #[strum(serialize = "_nin")]
    Nin,
    #[serde(rename = "_gt")]
    #[strum(serialize = "_gt")]
    Gt,
    #[serde(rename = "_gte")]
    #[strum(serialize = "_gte")]
    Gte,
    #[serde(rename = "_lt")]
    #[strum(serialize = "_lt")]
    Lt,
    #[serde(rename = "_lte")]
    #[strum(serialize = "_lte")]
    Lte,
    #[serde(rename = "_null")]
    #[strum(serialize = "_null")]
    Null,
    #[serde(rename = "_nnull")]
    #[strum(serialize = "_nnull")]
    Nnull,
    #[serde(rename = "_empty")]
    #[strum(serialize = "_empty")]
    Empty,
    #[serde(rename = "_nempty")]
    #[strum(serialize = "_nempty")]
    Nempty,
}

/// Boolean composition of filters.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    strum_macros::AsRefStr,
    strum_macros::EnumIter,
    strum_macros::EnumString,
)]
pub enum LogicalOperator {
    #[strum(serialize = "_and")]
    And,
    #[strum(serialize = "_or")]
    Or,
}

/// A filter expression.
///
/// Serializes to the storage layer's JSON shape.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterNode {
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
    Comparison {
        field: String,
        operator: FilterOperator,
        value: Value,
    },
    /// A filter on the row a to-one relation points at.
    Relation {
        field: String,
        filter: Box<FilterNode>,
    },
}

impl FilterNode {
    /// Parses a filter object.
    ///
    /// Several entries in one object are combined with `And`, explicit `_and`/`_or` lists keep
    /// each of their branches. Null entries do not filter, an object holding nothing else parses
    /// to an empty `And`.
    pub fn parse(value: &Value) -> Result<FilterNode, SpecError> {
        let Value::Object(object) = value else {
            return Err(SpecError::invalid_argument(
                "filter",
                format!("expected an object, found {value}"),
            ));
        };
        let mut nodes = Vec::with_capacity(object.len());
        for (key, value) in object.iter() {
            if value.is_null() {
                continue;
            }
            if let Some(node) = Self::parse_entry(key.as_str(), value)? {
                nodes.push(node);
            }
        }
        if nodes.len() == 1 {
            Ok(nodes.remove(0))
        } else {
            Ok(FilterNode::And(nodes))
        }
    }

    /// True for a filter matching every row.
    pub fn is_empty(&self) -> bool {
        matches!(self, FilterNode::And(nodes) if nodes.is_empty())
    }

    fn parse_entry(key: &str, value: &Value) -> Result<Option<FilterNode>, SpecError> {
        if let Ok(logical) = key.parse::<LogicalOperator>() {
            // https://spec.graphql.org/October2021/#sec-List.Input-Coercion
            let branches = match value {
                Value::Array(branches) => branches
                    .iter()
                    .filter(|branch| !branch.is_null())
                    .map(Self::parse)
                    .collect::<Result<Vec<_>, _>>()?,
                branch => vec![Self::parse(branch)?],
            };
            if branches.is_empty() {
                return Ok(None);
            }
            return Ok(Some(match logical {
                LogicalOperator::And => FilterNode::And(branches),
                LogicalOperator::Or => FilterNode::Or(branches),
            }));
        }
        if key.parse::<FilterOperator>().is_ok() {
            return Err(SpecError::invalid_argument(
                "filter",
                format!("unexpected operator '{key}'"),
            ));
        }

        let Value::Object(inner) = value else {
            return Err(SpecError::invalid_argument(
                "filter",
                format!("expected an object for field '{key}', found {value}"),
            ));
        };
        let inner = inner
            .iter()
            .filter(|(_, value)| !value.is_null())
            .collect::<Vec<_>>();
        if inner.is_empty() {
            return Ok(None);
        }
        let comparisons = inner
            .iter()
            .map(|(operator, value)| {
                operator
                    .as_str()
                    .parse::<FilterOperator>()
                    .ok()
                    .map(|operator| FilterNode::Comparison {
                        field: key.to_string(),
                        operator,
                        value: (*value).clone(),
                    })
            })
            .collect::<Option<Vec<_>>>();
        match comparisons {
            Some(mut comparisons) if comparisons.len() == 1 => Ok(Some(comparisons.remove(0))),
            Some(comparisons) => Ok(Some(FilterNode::And(comparisons))),
            None => {
                let filter = Self::parse(value)?;
                Ok((!filter.is_empty()).then(|| FilterNode::Relation {
                    field: key.to_string(),
                    filter: Box::new(filter),
                }))
            }
        }
    }

    /// The storage layer's JSON shape of this filter.
    pub fn to_value(&self) -> Value {
        let mut object = Object::new();
        match self {
            FilterNode::And(nodes) | FilterNode::Or(nodes) => {
                let operator = if matches!(self, FilterNode::And(_)) {
                    LogicalOperator::And
                } else {
                    LogicalOperator::Or
                };
                object.insert(
                    operator.as_ref(),
                    Value::Array(nodes.iter().map(FilterNode::to_value).collect()),
                );
            }
            FilterNode::Comparison {
                field,
                operator,
                value,
            } => {
                let mut comparison = Object::new();
                comparison.insert(operator.as_ref(), value.clone());
                object.insert(field.as_str(), Value::Object(comparison));
            }
            FilterNode::Relation { field, filter } => {
                object.insert(field.as_str(), filter.to_value());
            }
        }
        Value::Object(object)
    }
}

impl Serialize for FilterNode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_value().serialize(serializer)
    }
}

/// Query for one collection read.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct QueryPlan {
    /// Requested field paths. Nested relation fields are dotted, fields of a polymorphic
    /// relation are written `relation:collection.field`.
    pub fields: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterNode>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    /// Queries applied to nested relations, keyed by dotted relation path.
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub deep: IndexMap<String, Object>,
}

impl QueryPlan {
    /// The filtering and paging options as a query fragment, keys prefixed for a deep block.
    pub(crate) fn deep_options(&self) -> Object {
        let mut options = Object::new();
        let mut option = |key: &str, value: Value| {
            options.insert(ByteString::from(format!("{DEEP_OPTION_PREFIX}{key}")), value);
        };
        if let Some(filter) = &self.filter {
            option("filter", filter.to_value());
        }
        if !self.sort.is_empty() {
            option(
                "sort",
                Value::Array(self.sort.iter().map(|s| s.as_str().into()).collect()),
            );
        }
        if let Some(limit) = self.limit {
            option("limit", limit.into());
        }
        if let Some(offset) = self.offset {
            option("offset", offset.into());
        }
        if let Some(page) = self.page {
            option("page", page.into());
        }
        if let Some(search) = &self.search {
            option("search", search.as_str().into());
        }
        options
    }
}

/// Turns decoded field arguments into the filtering and paging part of a [`QueryPlan`].
pub trait QuerySanitizer: Send + Sync {
    fn sanitize(&self, arguments: &Object) -> Result<QueryPlan, SpecError>;
}

/// Default [`QuerySanitizer`].
#[derive(Clone, Debug, Default)]
pub struct Sanitizer {
    /// Upper bound for `limit`. `-1` requests all rows and is clamped too.
    pub limit_max: Option<i64>,
}

impl Sanitizer {
    pub fn new(limit_max: Option<i64>) -> Self {
        Self { limit_max }
    }

    fn limit(&self, value: &Value) -> Result<i64, SpecError> {
        let limit = integer("limit", value)?;
        if limit < -1 {
            return Err(SpecError::invalid_argument(
                "limit",
                "must be -1 or a positive integer",
            ));
        }
        Ok(match self.limit_max {
            Some(max) if max >= 0 && (limit == -1 || limit > max) => max,
            _ => limit,
        })
    }
}

impl QuerySanitizer for Sanitizer {
    fn sanitize(&self, arguments: &Object) -> Result<QueryPlan, SpecError> {
        let mut plan = QueryPlan::default();
        for (key, value) in arguments.iter() {
            if value.is_null() {
                continue;
            }
            match key.as_str() {
                "filter" => plan.filter = filter(value)?,
                "sort" => plan.sort = sort(value)?,
                "limit" => plan.limit = Some(self.limit(value)?),
                "offset" => plan.offset = Some(non_negative("offset", value)?),
                "page" => plan.page = Some(non_negative("page", value)?),
                "search" => {
                    plan.search = Some(
                        value
                            .as_str()
                            .ok_or_else(|| SpecError::invalid_argument("search", "expected a string"))?
                            .to_string(),
                    )
                }
                other => tracing::debug!(argument = other, "ignoring unknown query argument"),
            }
        }
        Ok(plan)
    }
}

fn integer(argument: &str, value: &Value) -> Result<i64, SpecError> {
    value
        .as_i64()
        .ok_or_else(|| SpecError::invalid_argument(argument, format!("expected an integer, found {value}")))
}

fn non_negative(argument: &str, value: &Value) -> Result<i64, SpecError> {
    let number = integer(argument, value)?;
    if number < 0 {
        return Err(SpecError::invalid_argument(argument, "must not be negative"));
    }
    Ok(number)
}

fn sort(value: &Value) -> Result<Vec<String>, SpecError> {
    let keys = match value {
        Value::String(keys) => keys.as_str().split(',').map(str::to_string).collect(),
        Value::Array(keys) => keys
            .iter()
            .map(|key| {
                key.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| SpecError::invalid_argument("sort", "expected a list of strings"))
            })
            .collect::<Result<Vec<_>, _>>()?,
        _ => {
            return Err(SpecError::invalid_argument(
                "sort",
                "expected a string or a list of strings",
            ));
        }
    };
    Ok(keys
        .into_iter()
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
        .collect())
}

fn filter(value: &Value) -> Result<Option<FilterNode>, SpecError> {
    let parsed;
    let value = match value {
        Value::String(json) => {
            parsed = serde_json::from_str::<Value>(json.as_str()).map_err(|error| {
                SpecError::invalid_argument("filter", format!("invalid JSON: {error}"))
            })?;
            &parsed
        }
        value => value,
    };
    let filter = FilterNode::parse(value)?;
    Ok((!filter.is_empty()).then_some(filter))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json_bytes::json;

    use super::*;

    fn arguments(value: Value) -> Object {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn logical_branches_are_kept_apart() {
        let filter = FilterNode::parse(&json!({
            "_and": [
                { "field": { "_eq": 1 } },
                { "field": { "_eq": 2 } }
            ]
        }))
        .unwrap();
        assert_eq!(
            filter,
            FilterNode::And(vec![
                FilterNode::Comparison {
                    field: "field".to_string(),
                    operator: FilterOperator::Eq,
                    value: json!(1),
                },
                FilterNode::Comparison {
                    field: "field".to_string(),
                    operator: FilterOperator::Eq,
                    value: json!(2),
                },
            ])
        );
        assert_eq!(
            filter.to_value(),
            json!({ "_and": [{ "field": { "_eq": 1 } }, { "field": { "_eq": 2 } }] })
        );
    }

    #[test]
    fn nested_logical_operators_are_not_flattened() {
        let filter = FilterNode::parse(&json!({
            "_or": [
                { "_and": [{ "a": { "_eq": 1 } }, { "b": { "_null": true } }] },
                { "c": { "_in": [1, 2] } }
            ]
        }))
        .unwrap();
        let FilterNode::Or(branches) = &filter else {
            panic!("expected an or node, got {filter:?}");
        };
        assert_eq!(branches.len(), 2);
        assert!(matches!(&branches[0], FilterNode::And(inner) if inner.len() == 2));
    }

    #[test]
    fn relation_filters_nest() {
        let filter = FilterNode::parse(&json!({
            "author": { "email": { "_contains": "@example.com" } },
            "title": { "_nempty": true }
        }))
        .unwrap();
        assert_eq!(
            filter,
            FilterNode::And(vec![
                FilterNode::Relation {
                    field: "author".to_string(),
                    filter: Box::new(FilterNode::Comparison {
                        field: "email".to_string(),
                        operator: FilterOperator::Contains,
                        value: json!("@example.com"),
                    }),
                },
                FilterNode::Comparison {
                    field: "title".to_string(),
                    operator: FilterOperator::Nempty,
                    value: json!(true),
                },
            ])
        );
    }

    #[test]
    fn malformed_entries_are_rejected() {
        let error = FilterNode::parse(&json!({ "_eq": 1 })).unwrap_err();
        assert_eq!(
            error.to_string(),
            "invalid value for argument 'filter': unexpected operator '_eq'"
        );
        let error = FilterNode::parse(&json!({ "title": "x" })).unwrap_err();
        assert!(matches!(error, SpecError::InvalidArgument { .. }));
        let error = FilterNode::parse(&json!({ "_xor": [] })).unwrap_err();
        assert!(matches!(error, SpecError::InvalidArgument { .. }));
    }

    #[test]
    fn underscored_fields_are_fields() {
        let filter = FilterNode::parse(&json!({ "_status": { "_eq": 1 } })).unwrap();
        assert_eq!(
            filter,
            FilterNode::Comparison {
                field: "_status".to_string(),
                operator: FilterOperator::Eq,
                value: json!(1),
            }
        );
        let filter = FilterNode::parse(&json!({ "author": { "_role": { "_null": true } } })).unwrap();
        assert!(matches!(filter, FilterNode::Relation { field, .. } if field == "author"));
    }

    #[test]
    fn null_entries_do_not_filter() {
        let plan = Sanitizer::default()
            .sanitize(&arguments(json!({
                "filter": { "title": null, "_and": null, "author": { "email": null } }
            })))
            .unwrap();
        assert_eq!(plan.filter, None);

        let filter = FilterNode::parse(&json!({
            "_or": [null, { "title": { "_eq": "a", "_neq": null } }]
        }))
        .unwrap();
        assert_eq!(
            filter,
            FilterNode::Or(vec![FilterNode::Comparison {
                field: "title".to_string(),
                operator: FilterOperator::Eq,
                value: json!("a"),
            }])
        );
    }

    #[test]
    fn a_single_branch_stands_for_a_list() {
        let filter = FilterNode::parse(&json!({ "_and": { "id": { "_gt": 3 } } })).unwrap();
        assert_eq!(
            filter,
            FilterNode::And(vec![FilterNode::Comparison {
                field: "id".to_string(),
                operator: FilterOperator::Gt,
                value: json!(3),
            }])
        );
    }

    #[test]
    fn sort_accepts_a_comma_separated_string() {
        let plan = Sanitizer::default()
            .sanitize(&arguments(json!({ "sort": "a, -b,," })))
            .unwrap();
        assert_eq!(plan.sort, vec!["a", "-b"]);

        let plan = Sanitizer::default()
            .sanitize(&arguments(json!({ "sort": ["-date_created"] })))
            .unwrap();
        assert_eq!(plan.sort, vec!["-date_created"]);
    }

    #[test]
    fn limit_is_clamped() {
        let sanitizer = Sanitizer::new(Some(100));
        let plan = sanitizer
            .sanitize(&arguments(json!({ "limit": 500 })))
            .unwrap();
        assert_eq!(plan.limit, Some(100));
        let plan = sanitizer.sanitize(&arguments(json!({ "limit": -1 }))).unwrap();
        assert_eq!(plan.limit, Some(100));
        let plan = Sanitizer::default()
            .sanitize(&arguments(json!({ "limit": -1 })))
            .unwrap();
        assert_eq!(plan.limit, Some(-1));
        assert!(
            Sanitizer::default()
                .sanitize(&arguments(json!({ "limit": -2 })))
                .is_err()
        );
    }

    #[test]
    fn negative_paging_is_rejected() {
        let error = Sanitizer::default()
            .sanitize(&arguments(json!({ "offset": -5 })))
            .unwrap_err();
        assert_eq!(
            error.to_string(),
            "invalid value for argument 'offset': must not be negative"
        );
        assert!(
            Sanitizer::default()
                .sanitize(&arguments(json!({ "page": -1 })))
                .is_err()
        );
    }

    #[test]
    fn filter_may_be_a_json_string() {
        let plan = Sanitizer::default()
            .sanitize(&arguments(json!({
                "filter": "{\"status\":{\"_eq\":\"published\"}}",
                "search": "rust",
                "limit": null
            })))
            .unwrap();
        assert_eq!(
            plan.filter,
            Some(FilterNode::Comparison {
                field: "status".to_string(),
                operator: FilterOperator::Eq,
                value: json!("published"),
            })
        );
        assert_eq!(plan.search.as_deref(), Some("rust"));
        assert_eq!(plan.limit, None);
    }

    #[test]
    fn deep_options_carry_the_marker_prefix() {
        let plan = Sanitizer::default()
            .sanitize(&arguments(json!({
                "limit": 5,
                "sort": ["id"],
                "filter": { "id": { "_gt": 1 } }
            })))
            .unwrap();
        assert_eq!(
            Value::Object(plan.deep_options()),
            json!({
                "_filter": { "id": { "_gt": 1 } },
                "_sort": ["id"],
                "_limit": 5
            })
        );
    }
}
