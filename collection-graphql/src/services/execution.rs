//! Query execution against the current schema snapshot.

use std::sync::Arc;

use apollo_compiler::ExecutableDocument;
use apollo_compiler::Node;
use apollo_compiler::executable::Field;
use apollo_compiler::executable::Operation;
use apollo_compiler::executable::OperationType;
use apollo_compiler::name;
use apollo_compiler::parser::Parser;
use apollo_compiler::validation::Valid;
use futures::future::join_all;
use serde::Serialize;
use serde_json_bytes::ByteString;

use super::accessor::AccessorRegistry;
use crate::compiler::CompiledScope;
use crate::compiler::EMPTY_ROOT_FIELD;
use crate::compiler::QUERY_TYPE;
use crate::compiler::Scope;
use crate::configuration::Configuration;
use crate::execution::engine::Completion;
use crate::execution::engine::collect_fields;
use crate::execution::engine::located_error;
use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::json_ext::deep_merge;
use crate::schema::CollectionMetadata;
use crate::schema::system::StaticSystemMetadata;
use crate::snapshot::SchemaRegistry;
use crate::snapshot::Snapshot;
use crate::spec::SpecError;
use crate::spec::TYPENAME;
use crate::spec::arguments::decode_arguments;
use crate::spec::arguments::decode_value;
use crate::spec::query_plan::QueryPlan;
use crate::spec::query_plan::QuerySanitizer;
use crate::spec::query_plan::Sanitizer;
use crate::spec::selection::SelectionPlanner;

/// The data access planned for one root field.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PlannedRootField {
    pub response_key: String,
    pub collection: String,
    pub singleton: bool,
    pub query: QueryPlan,
}

/// A validated operation of one request.
struct PreparedOperation {
    snapshot: Arc<Snapshot>,
    scope: Scope,
    document: Valid<ExecutableDocument>,
    operation_name: Option<String>,
    variables: Object,
}

impl PreparedOperation {
    fn compiled(&self) -> &CompiledScope {
        self.snapshot.scope(self.scope)
    }

    fn operation(&self) -> Result<&Node<Operation>, SpecError> {
        select_operation(&self.document, self.operation_name.as_deref())
    }
}

fn select_operation<'a>(
    document: &'a ExecutableDocument,
    operation_name: Option<&str>,
) -> Result<&'a Node<Operation>, SpecError> {
    let operation = document
        .operations
        .get(operation_name)
        .map_err(|_| match operation_name {
            Some(name) => SpecError::UnknownOperation(name.to_string()),
            None => SpecError::OperationNameRequired,
        })?;
    match operation.operation_type {
        OperationType::Query => Ok(operation),
        OperationType::Mutation => Err(SpecError::OperationNotSupported("mutation".to_string())),
        OperationType::Subscription => Err(SpecError::OperationNotSupported(
            "subscription".to_string(),
        )),
    }
}

/// Variables of the request, completed with the defaults declared by the operation.
fn coerce_variables(operation: &Operation, provided: &Object) -> Object {
    let mut variables = provided.clone();
    for definition in &operation.variables {
        if variables.contains_key(definition.name.as_str()) {
            continue;
        }
        if let Some(default) = &definition.default_value {
            let value = decode_value(default, provided);
            variables.insert(ByteString::from(definition.name.as_str()), value);
        }
    }
    variables
}

/// Turns requests into [`PlannedRootField`]s.
#[derive(Clone)]
pub struct OperationPlanner {
    registry: Arc<SchemaRegistry>,
    sanitizer: Option<Arc<dyn QuerySanitizer>>,
    default_sanitizer: Sanitizer,
    metadata: Option<Arc<dyn CollectionMetadata>>,
    recursion_limit: usize,
}

impl OperationPlanner {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        let configuration = Configuration::default();
        Self {
            registry,
            sanitizer: None,
            default_sanitizer: Sanitizer::new(configuration.query.limit_max),
            metadata: None,
            recursion_limit: configuration.query.recursion_limit,
        }
    }

    /// Replaces the default [`Sanitizer`], `query.limit_max` no longer applies.
    pub fn with_sanitizer(mut self, sanitizer: Arc<dyn QuerySanitizer>) -> Self {
        self.sanitizer = Some(sanitizer);
        self
    }

    pub fn with_configuration(mut self, configuration: &Configuration) -> Self {
        self.default_sanitizer = Sanitizer::new(configuration.query.limit_max);
        self.recursion_limit = configuration.query.recursion_limit;
        self
    }

    /// Looks singletons up in `metadata` before the snapshot.
    pub fn with_metadata(mut self, metadata: Arc<dyn CollectionMetadata>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    fn sanitizer(&self) -> &dyn QuerySanitizer {
        self.sanitizer.as_deref().unwrap_or(&self.default_sanitizer)
    }

    /// Plans every root field reading a collection.
    pub fn plan(
        &self,
        request: &graphql::Request,
        scope: Scope,
    ) -> Result<Vec<PlannedRootField>, Vec<graphql::Error>> {
        let prepared = self
            .prepare(request, scope)
            .map_err(SpecError::into_graphql_errors)?;
        let operation = prepared
            .operation()
            .map_err(SpecError::into_graphql_errors)?;
        let root_fields = collect_fields(
            prepared.compiled(),
            &prepared.document,
            &prepared.variables,
            &name!("Query"),
            &operation.selection_set,
        );

        let mut planned = Vec::new();
        let mut errors = Vec::new();
        for fields in root_fields.values() {
            let field = fields[0];
            if is_meta_field(field) {
                continue;
            }
            match self.plan_root_field(&prepared, fields) {
                Ok(root_field) => planned.push(root_field),
                Err(error) => errors.push(located_error(
                    &error,
                    Some(Path::from_slice(&[field.response_key().as_str()])),
                    field,
                    &prepared.document,
                )),
            }
        }
        if errors.is_empty() {
            Ok(planned)
        } else {
            Err(errors)
        }
    }

    fn prepare(
        &self,
        request: &graphql::Request,
        scope: Scope,
    ) -> Result<PreparedOperation, SpecError> {
        let snapshot = self.registry.snapshot();
        let schema = snapshot.scope(scope).schema();

        let ast = Parser::new()
            .recursion_limit(self.recursion_limit)
            .parse_ast(&request.query, "query.graphql")
            .map_err(|invalid| {
                tracing::debug!(errors = %invalid.errors, "failed to parse query");
                SpecError::ParsingError(invalid.errors.to_string())
            })?;
        let document = ast.to_executable_validate(schema).map_err(|invalid| {
            SpecError::ValidationError(
                invalid
                    .errors
                    .iter()
                    .map(|diagnostic| graphql::Error::from(diagnostic.to_json()))
                    .collect(),
            )
        })?;

        let operation = select_operation(&document, request.operation_name.as_deref())?;
        let variables = coerce_variables(operation, &request.variables);
        Ok(PreparedOperation {
            snapshot,
            scope,
            document,
            operation_name: request.operation_name.clone(),
            variables,
        })
    }

    fn plan_root_field(
        &self,
        prepared: &PreparedOperation,
        fields: &[&Field],
    ) -> Result<PlannedRootField, SpecError> {
        let field = fields[0];
        let compiled = prepared.compiled();
        let collection = compiled
            .collection(field.name.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| prepared.scope.collection_name(field.name.as_str()));

        let arguments = decode_arguments(&field.arguments, &prepared.variables);
        let mut query = self.sanitizer().sanitize(&arguments)?;

        let planner = SelectionPlanner::new(
            &prepared.document,
            &prepared.variables,
            self.sanitizer(),
            self.recursion_limit,
        )
        .with_unions(&compiled.unions);
        // Fields sharing a response key merge their selections
        for field in fields {
            let selection = planner.plan(&field.selection_set, None)?;
            for path in selection.fields {
                if !query.fields.contains(&path) {
                    query.fields.push(path);
                }
            }
            for (path, options) in selection.deep {
                deep_merge(query.deep.entry(path).or_default(), options);
            }
        }

        let singleton = self.is_singleton(&prepared.snapshot, &collection);
        tracing::debug!(
            collection,
            singleton,
            fields = query.fields.len(),
            "planned root field"
        );
        Ok(PlannedRootField {
            response_key: field.response_key().to_string(),
            collection,
            singleton,
            query,
        })
    }

    fn is_singleton(&self, snapshot: &Snapshot, collection: &str) -> bool {
        let dynamic = match &self.metadata {
            Some(metadata) => metadata.singleton(collection),
            None => snapshot.graph().singleton(collection),
        };
        dynamic
            .or_else(|| StaticSystemMetadata.singleton(collection))
            .unwrap_or(false)
    }
}

/// Root fields answered without reading a collection.
fn is_meta_field(field: &Field) -> bool {
    field.name == TYPENAME
        || field.name == EMPTY_ROOT_FIELD
        || field.name == "__schema"
        || field.name == "__type"
}

/// Executes requests.
///
/// Root fields are read concurrently, each through the accessor its collection routes to.
/// Failures of one root field null that field only.
#[derive(Clone)]
pub struct QueryExecutor {
    planner: OperationPlanner,
    accessors: Arc<AccessorRegistry>,
}

enum RootOutcome<'a> {
    Fetched {
        fields: Vec<&'a Field>,
        value: Value,
    },
    Resolved(Value),
    Failed(graphql::Error),
}

impl QueryExecutor {
    pub fn new(registry: Arc<SchemaRegistry>, accessors: Arc<AccessorRegistry>) -> Self {
        Self {
            planner: OperationPlanner::new(registry),
            accessors,
        }
    }

    pub fn with_sanitizer(mut self, sanitizer: Arc<dyn QuerySanitizer>) -> Self {
        self.planner = self.planner.with_sanitizer(sanitizer);
        self
    }

    pub fn with_configuration(mut self, configuration: &Configuration) -> Self {
        self.planner = self.planner.with_configuration(configuration);
        self
    }

    pub fn with_metadata(mut self, metadata: Arc<dyn CollectionMetadata>) -> Self {
        self.planner = self.planner.with_metadata(metadata);
        self
    }

    /// The data access `request` would perform, without performing it.
    pub fn plan_operation(
        &self,
        request: &graphql::Request,
        scope: Scope,
    ) -> Result<Vec<PlannedRootField>, Vec<graphql::Error>> {
        self.planner.plan(request, scope)
    }

    pub async fn execute(&self, request: &graphql::Request, scope: Scope) -> graphql::Response {
        let prepared = match self.planner.prepare(request, scope) {
            Ok(prepared) => prepared,
            Err(error) => {
                return graphql::Response::builder()
                    .errors(error.into_graphql_errors())
                    .build();
            }
        };
        let operation = match prepared.operation() {
            Ok(operation) => operation,
            Err(error) => {
                return graphql::Response::builder()
                    .errors(error.into_graphql_errors())
                    .build();
            }
        };

        let root_fields = collect_fields(
            prepared.compiled(),
            &prepared.document,
            &prepared.variables,
            &name!("Query"),
            &operation.selection_set,
        );
        let outcomes = join_all(
            root_fields
                .values()
                .map(|fields| self.resolve_root_field(&prepared, fields)),
        )
        .await;

        let mut completion = Completion::new(
            prepared.compiled(),
            &prepared.document,
            &prepared.variables,
        );
        let mut data = Object::with_capacity(root_fields.len());
        let mut errors = Vec::new();
        for (response_key, outcome) in root_fields.keys().zip(outcomes) {
            let value = match outcome {
                RootOutcome::Fetched { fields, value } => completion.complete_root(&fields, &value),
                RootOutcome::Resolved(value) => value,
                RootOutcome::Failed(error) => {
                    errors.push(error);
                    Value::Null
                }
            };
            data.insert(ByteString::from(response_key.as_str()), value);
        }
        errors.extend(completion.into_errors());

        graphql::Response::builder()
            .data(Value::Object(data))
            .errors(errors)
            .build()
    }

    async fn resolve_root_field<'a>(
        &self,
        prepared: &'a PreparedOperation,
        fields: &[&'a Field],
    ) -> RootOutcome<'a> {
        let field = fields[0];
        let path = || Some(Path::from_slice(&[field.response_key().as_str()]));
        if field.name == TYPENAME {
            return RootOutcome::Resolved(QUERY_TYPE.into());
        }
        if field.name == EMPTY_ROOT_FIELD {
            return RootOutcome::Resolved(Value::Null);
        }
        if field.name.starts_with("__") {
            let error = SpecError::OperationNotSupported("introspection".to_string());
            return RootOutcome::Failed(located_error(
                &error,
                path(),
                field,
                &prepared.document,
            ));
        }

        let planned = match self.planner.plan_root_field(prepared, fields) {
            Ok(planned) => planned,
            Err(error) => {
                return RootOutcome::Failed(located_error(
                    &error,
                    path(),
                    field,
                    &prepared.document,
                ));
            }
        };

        let accessor = self.accessors.accessor(&planned.collection);
        let read = if planned.singleton {
            accessor
                .read_singleton(&planned.query)
                .await
                .map(|row| row.map(Value::Object).unwrap_or(Value::Null))
        } else {
            accessor
                .read_by_query(&planned.query)
                .await
                .map(|rows| Value::Array(rows.into_iter().map(Value::Object).collect()))
        };
        match read {
            Ok(value) => RootOutcome::Fetched {
                fields: fields.to_vec(),
                value,
            },
            Err(error) => {
                tracing::debug!(
                    collection = %planned.collection,
                    %error,
                    "collection read failed"
                );
                RootOutcome::Failed(located_error(
                    &error,
                    path(),
                    field,
                    &prepared.document,
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests;
