use std::sync::Arc;
use std::sync::Mutex;

use pretty_assertions::assert_eq;
use serde_json_bytes::json;
use test_log::test;

use super::*;
use crate::configuration::QueryConfig;
use crate::schema::tests::fixture_overview;
use crate::services::accessor::AccessError;
use crate::services::accessor::ItemsAccessor;
use crate::services::accessor::MockItemsAccessor;
use crate::spec::query_plan::FilterNode;
use crate::spec::query_plan::FilterOperator;

fn registry() -> Arc<SchemaRegistry> {
    Arc::new(SchemaRegistry::new(fixture_overview()).unwrap())
}

/// Accessors built by `factory`, along with the collections they were built for.
fn accessors<F>(factory: F) -> (Arc<AccessorRegistry>, Arc<Mutex<Vec<String>>>)
where
    F: Fn(&str) -> MockItemsAccessor + Send + Sync + 'static,
{
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorded = seen.clone();
    let registry = AccessorRegistry::new(Arc::new(move |collection: &str| {
        recorded.lock().unwrap().push(collection.to_string());
        Arc::new(factory(collection)) as Arc<dyn ItemsAccessor>
    }));
    (Arc::new(registry), seen)
}

fn rows(value: Value) -> Vec<Object> {
    value
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row.as_object().unwrap().clone())
        .collect()
}

fn request(query: &str) -> graphql::Request {
    graphql::Request::builder().query(query).build()
}

fn codes(response: &graphql::Response) -> Vec<String> {
    response
        .errors
        .iter()
        .filter_map(|error| error.extension_code())
        .collect()
}

#[test(tokio::test)]
async fn invalid_documents_are_rejected_without_reading() {
    let (accessors, seen) = accessors(|_| MockItemsAccessor::new());
    let executor = QueryExecutor::new(registry(), accessors);

    let response = executor
        .execute(&request("{ articles { id nope } }"), Scope::Items)
        .await;
    assert_eq!(response.data, None);
    assert_eq!(codes(&response), vec!["GRAPHQL_VALIDATION_FAILED"]);

    let response = executor
        .execute(&request("{ articles { id "), Scope::Items)
        .await;
    assert_eq!(response.data, None);
    assert_eq!(codes(&response), vec!["PARSING_ERROR"]);

    // System collections are not part of the items scope
    let response = executor
        .execute(&request("{ directus_users { id } }"), Scope::Items)
        .await;
    assert_eq!(response.data, None);
    assert_eq!(codes(&response), vec!["GRAPHQL_VALIDATION_FAILED"]);

    assert!(seen.lock().unwrap().is_empty());
}

#[test(tokio::test)]
async fn unknown_operation_names_are_rejected() {
    let (accessors, seen) = accessors(|_| MockItemsAccessor::new());
    let executor = QueryExecutor::new(registry(), accessors);
    let request = graphql::Request::builder()
        .query("query A { articles { id } } query B { pages { id } }")
        .operation_name("C")
        .build();

    let response = executor.execute(&request, Scope::Items).await;
    assert_eq!(response.data, None);
    assert_eq!(codes(&response), vec!["UNKNOWN_OPERATION"]);
    assert_eq!(response.errors[0].message, r#"Unknown operation named "C""#);
    assert!(seen.lock().unwrap().is_empty());
}

#[test(tokio::test)]
async fn lists_are_read_by_query() {
    let (accessors, seen) = accessors(|_| {
        let mut accessor = MockItemsAccessor::new();
        accessor
            .expect_read_by_query()
            .withf(|query: &QueryPlan| query.fields == ["id", "title"] && query.limit == Some(2))
            .times(1)
            .returning(|_| {
                Ok(rows(json!([
                    { "id": 1, "title": "Hello" },
                    { "id": 2, "title": null },
                ])))
            });
        accessor
    });
    let executor = QueryExecutor::new(registry(), accessors);

    let response = executor
        .execute(&request("{ articles(limit: 2) { id title } }"), Scope::Items)
        .await;
    assert_eq!(
        serde_json_bytes::to_value(&response).unwrap(),
        json!({
            "data": {
                "articles": [
                    { "id": 1, "title": "Hello" },
                    { "id": 2, "title": null },
                ]
            }
        })
    );
    assert_eq!(*seen.lock().unwrap(), vec!["articles"]);
}

#[test(tokio::test)]
async fn singletons_are_read_as_one_row() {
    let (accessors, _) = accessors(|_| {
        let mut accessor = MockItemsAccessor::new();
        accessor
            .expect_read_singleton()
            .times(1)
            .returning(|_| Ok(Some(rows(json!([{ "headline": "Welcome" }])).remove(0))));
        accessor
    });
    let executor = QueryExecutor::new(registry(), accessors);

    let response = executor
        .execute(&request("{ home { headline } }"), Scope::Items)
        .await;
    assert_eq!(response.data, Some(json!({ "home": { "headline": "Welcome" } })));
    assert!(!response.has_errors());
}

#[test(tokio::test)]
async fn system_scope_reads_the_prefixed_collection() {
    let (accessors, seen) = accessors(|collection| {
        let mut accessor = MockItemsAccessor::new();
        if collection == "directus_settings" {
            accessor
                .expect_read_singleton()
                .times(1)
                .returning(|_| Ok(Some(rows(json!([{ "project_name": "Demo" }])).remove(0))));
        } else {
            accessor
                .expect_read_by_query()
                .times(1)
                .returning(|_| Ok(rows(json!([{ "email": "admin@example.com" }]))));
        }
        accessor
    });
    let executor = QueryExecutor::new(registry(), accessors);

    let response = executor
        .execute(
            &request("{ settings { project_name } users { email } }"),
            Scope::System,
        )
        .await;
    assert_eq!(
        response.data,
        Some(json!({
            "settings": { "project_name": "Demo" },
            "users": [{ "email": "admin@example.com" }]
        }))
    );
    let mut seen = seen.lock().unwrap().clone();
    seen.sort();
    assert_eq!(seen, vec!["directus_settings", "directus_users"]);
}

struct UnknownCollections;

impl CollectionMetadata for UnknownCollections {
    fn singleton(&self, _collection: &str) -> Option<bool> {
        None
    }
}

#[test(tokio::test)]
async fn singleton_lookup_falls_back_to_the_system_table() {
    let (accessors, _) = accessors(|_| {
        let mut accessor = MockItemsAccessor::new();
        accessor
            .expect_read_singleton()
            .times(1)
            .returning(|_| Ok(Some(rows(json!([{ "id": 1 }])).remove(0))));
        accessor
    });
    let executor =
        QueryExecutor::new(registry(), accessors).with_metadata(Arc::new(UnknownCollections));

    let response = executor
        .execute(&request("{ settings { id } }"), Scope::System)
        .await;
    assert_eq!(response.data, Some(json!({ "settings": { "id": 1 } })));
}

#[test(tokio::test)]
async fn failing_root_fields_do_not_affect_their_siblings() {
    let (accessors, _) = accessors(|collection| {
        let mut accessor = MockItemsAccessor::new();
        if collection == "comments" {
            accessor
                .expect_read_by_query()
                .returning(|_| Err(AccessError::Forbidden("comments".to_string())));
        } else {
            accessor
                .expect_read_by_query()
                .returning(|_| Ok(rows(json!([{ "id": 7 }]))));
        }
        accessor
    });
    let executor = QueryExecutor::new(registry(), accessors);

    let response = executor
        .execute(
            &request("{ articles { id } comments { id } }"),
            Scope::Items,
        )
        .await;
    assert_eq!(
        response.data,
        Some(json!({ "articles": [{ "id": 7 }], "comments": null }))
    );
    assert_eq!(codes(&response), vec!["FORBIDDEN"]);
    assert_eq!(
        response.errors[0].path,
        Some(Path::from_slice(&["comments"]))
    );
    assert_eq!(
        response.errors[0].message,
        "you don't have permission to access collection 'comments'"
    );
}

#[test(tokio::test)]
async fn invalid_arguments_fail_their_field_only() {
    let (accessors, seen) = accessors(|_| {
        let mut accessor = MockItemsAccessor::new();
        accessor
            .expect_read_by_query()
            .returning(|_| Ok(rows(json!([{ "id": 1 }]))));
        accessor
    });
    let executor = QueryExecutor::new(registry(), accessors);

    let response = executor
        .execute(
            &request("{ articles(limit: -5) { id } pages { id } }"),
            Scope::Items,
        )
        .await;
    assert_eq!(
        response.data,
        Some(json!({ "articles": null, "pages": [{ "id": 1 }] }))
    );
    assert_eq!(codes(&response), vec!["INVALID_QUERY"]);
    assert_eq!(*seen.lock().unwrap(), vec!["pages"]);
}

#[test(tokio::test)]
async fn aliases_and_skipped_fields() {
    let (accessors, _) = accessors(|_| {
        let mut accessor = MockItemsAccessor::new();
        accessor
            .expect_read_by_query()
            .withf(|query: &QueryPlan| query.fields == ["title"])
            .returning(|_| Ok(rows(json!([{ "title": "Hello", "body": "ignored" }]))));
        accessor
    });
    let executor = QueryExecutor::new(registry(), accessors);

    let response = executor
        .execute(
            &request(
                r#"query($withBody: Boolean = false) {
                    __typename
                    posts: articles {
                        headline: title
                        body @include(if: $withBody)
                        __typename
                    }
                }"#,
            ),
            Scope::Items,
        )
        .await;
    assert_eq!(
        serde_json_bytes::to_value(&response).unwrap(),
        json!({
            "data": {
                "__typename": "Query",
                "posts": [{ "headline": "Hello", "__typename": "articles" }]
            }
        })
    );
}

#[test(tokio::test)]
async fn union_members_follow_the_discriminator() {
    let (accessors, _) = accessors(|_| {
        let mut accessor = MockItemsAccessor::new();
        accessor
            .expect_read_by_query()
            .withf(|query: &QueryPlan| {
                query.fields
                    == [
                        "id",
                        "blocks.collection",
                        "blocks.item:block_hero.headline",
                        "blocks.item:block_text.content",
                    ]
            })
            .returning(|_| {
                Ok(rows(json!([{
                    "id": 1,
                    "blocks": [
                        { "collection": "block_hero", "item": { "headline": "Hi" } },
                        { "collection": "block_text", "item": { "content": "Body" } },
                        { "collection": "articles", "item": { "id": 3 } },
                    ]
                }])))
            });
        accessor
    });
    let executor = QueryExecutor::new(registry(), accessors);

    let response = executor
        .execute(
            &request(
                r#"{ pages { id blocks { item {
                    __typename
                    ... on block_hero { headline }
                    ... on block_text { content }
                } } } }"#,
            ),
            Scope::Items,
        )
        .await;
    assert_eq!(
        response.data,
        Some(json!({
            "pages": [{
                "id": 1,
                "blocks": [
                    { "item": { "__typename": "block_hero", "headline": "Hi" } },
                    { "item": { "__typename": "block_text", "content": "Body" } },
                    { "item": null },
                ]
            }]
        }))
    );
    assert_eq!(codes(&response), vec!["UNION_MEMBER_NOT_FOUND"]);
    assert_eq!(
        response.errors[0].path,
        Some(Path::from_slice(&["pages", "0", "blocks", "2", "item"]))
    );
}

#[test(tokio::test)]
async fn nulls_in_non_null_positions_propagate() {
    let (accessors, _) = accessors(|_| {
        let mut accessor = MockItemsAccessor::new();
        accessor
            .expect_read_by_query()
            .returning(|_| Ok(rows(json!([{ "id": 1, "title": "a" }, { "title": "b" }]))));
        accessor
    });
    let executor = QueryExecutor::new(registry(), accessors);

    let response = executor
        .execute(&request("{ articles { id title } }"), Scope::Items)
        .await;
    assert_eq!(response.data, Some(json!({ "articles": null })));
    assert_eq!(codes(&response), vec!["RESPONSE_VALIDATION_FAILED"]);
    assert_eq!(
        response.errors[0].path,
        Some(Path::from_slice(&["articles", "1", "id"]))
    );
}

#[test(tokio::test)]
async fn introspection_is_not_executed() {
    let (accessors, seen) = accessors(|_| MockItemsAccessor::new());
    let executor = QueryExecutor::new(registry(), accessors);

    let response = executor
        .execute(
            &request("{ __schema { queryType { name } } }"),
            Scope::Items,
        )
        .await;
    assert_eq!(response.data, Some(json!({ "__schema": null })));
    assert_eq!(codes(&response), vec!["OPERATION_NOT_SUPPORTED"]);
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn plans_carry_filters_and_deep_queries() {
    let (accessors, _) = accessors(|_| MockItemsAccessor::new());
    let executor = QueryExecutor::new(registry(), accessors);

    let planned = executor
        .plan_operation(
            &request(
                r#"{ articles(filter: { title: { _eq: "Hello" } }, sort: "-id", limit: 5) {
                    id
                    title
                    comments(limit: 2, sort: ["-id"]) { text }
                    author { email }
                } }"#,
            ),
            Scope::Items,
        )
        .unwrap();
    insta::assert_json_snapshot!(planned, @r###"
    [
      {
        "response_key": "articles",
        "collection": "articles",
        "singleton": false,
        "query": {
          "fields": [
            "id",
            "title",
            "comments.text",
            "author.email"
          ],
          "filter": {
            "title": {
              "_eq": "Hello"
            }
          },
          "sort": [
            "-id"
          ],
          "limit": 5,
          "deep": {
            "comments": {
              "_sort": [
                "-id"
              ],
              "_limit": 2
            }
          }
        }
      }
    ]
    "###);
}

#[test]
fn configured_limit_max_clamps_every_level() {
    let (accessors, _) = accessors(|_| MockItemsAccessor::new());
    let configuration = Configuration {
        query: QueryConfig::builder().limit_max(10).build(),
        ..Default::default()
    };
    let executor = QueryExecutor::new(registry(), accessors).with_configuration(&configuration);

    let planned = executor
        .plan_operation(
            &request("{ articles(limit: -1) { id comments(limit: 50) { id } } }"),
            Scope::Items,
        )
        .unwrap();
    assert_eq!(planned[0].query.limit, Some(10));
    assert_eq!(
        Value::Object(planned[0].query.deep["comments"].clone()),
        json!({ "_limit": 10 })
    );
}

#[test]
fn merged_root_fields_plan_once() {
    let (accessors, _) = accessors(|_| MockItemsAccessor::new());
    let executor = QueryExecutor::new(registry(), accessors);

    let planned = executor
        .plan_operation(
            &request("{ articles { id } articles { title } _typename: __typename }"),
            Scope::Items,
        )
        .unwrap();
    assert_eq!(planned.len(), 1);
    assert_eq!(planned[0].query.fields, vec!["id", "title"]);
}

#[test]
fn null_filter_entries_are_ignored() {
    let (accessors, _) = accessors(|_| MockItemsAccessor::new());
    let executor = QueryExecutor::new(registry(), accessors);

    let planned = executor
        .plan_operation(
            &request("{ articles(filter: { title: null, _and: null }) { id } }"),
            Scope::Items,
        )
        .unwrap();
    assert_eq!(planned[0].query.filter, None);

    let planned = executor
        .plan_operation(
            &request(r#"{ articles(filter: { _or: { title: { _eq: "Hello" } } }) { id } }"#),
            Scope::Items,
        )
        .unwrap();
    assert_eq!(
        planned[0].query.filter,
        Some(FilterNode::Or(vec![FilterNode::Comparison {
            field: "title".to_string(),
            operator: FilterOperator::Eq,
            value: "Hello".into(),
        }]))
    );
}
