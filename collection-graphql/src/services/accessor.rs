//! Data access behind the executor.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use displaydoc::Display;
use thiserror::Error;

use crate::graphql::ErrorExtension;
use crate::json_ext::Object;
use crate::spec::query_plan::QueryPlan;

/// Errors raised by a collection accessor.
#[derive(Error, Debug, Display, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AccessError {
    /// you don't have permission to access collection '{0}'
    Forbidden(String),
    /// storage error: {0}
    Storage(String),
}

impl ErrorExtension for AccessError {
    fn extension_code(&self) -> String {
        match self {
            AccessError::Forbidden(_) => "FORBIDDEN",
            AccessError::Storage(_) => "STORAGE_ERROR",
        }
        .to_string()
    }
}

/// Reads rows of one collection.
///
/// Rows hold exactly the requested fields, related rows are nested under their relation field.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ItemsAccessor: Send + Sync {
    async fn read_by_query(&self, query: &QueryPlan) -> Result<Vec<Object>, AccessError>;

    async fn read_singleton(&self, query: &QueryPlan) -> Result<Option<Object>, AccessError>;
}

/// Builds the accessor of the collection it is given.
pub type AccessorFactory = Arc<dyn Fn(&str) -> Arc<dyn ItemsAccessor> + Send + Sync>;

/// System collections served by their own accessor.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    strum_macros::AsRefStr,
    strum_macros::Display,
    strum_macros::EnumIter,
    strum_macros::EnumString,
)]
pub enum SystemCollection {
    #[strum(serialize = "directus_activity")]
    Activity,
    #[strum(serialize = "directus_dashboards")]
    Dashboards,
    #[strum(serialize = "directus_files")]
    Files,
    #[strum(serialize = "directus_flows")]
    Flows,
    #[strum(serialize = "directus_folders")]
    Folders,
    #[strum(serialize = "directus_notifications")]
    Notifications,
    #[strum(serialize = "directus_operations")]
    Operations,
    #[strum(serialize = "directus_panels")]
    Panels,
    #[strum(serialize = "directus_permissions")]
    Permissions,
    #[strum(serialize = "directus_presets")]
    Presets,
    #[strum(serialize = "directus_revisions")]
    Revisions,
    #[strum(serialize = "directus_roles")]
    Roles,
    #[strum(serialize = "directus_settings")]
    Settings,
    #[strum(serialize = "directus_shares")]
    Shares,
    #[strum(serialize = "directus_users")]
    Users,
    #[strum(serialize = "directus_webhooks")]
    Webhooks,
}

/// Which factory serves a collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessorRoute {
    System(SystemCollection),
    Items,
}

/// Dispatch table from collection name to accessor.
///
/// Every collection resolves to exactly one factory: the one registered for its
/// [`SystemCollection`] if any, the generic items factory otherwise.
#[derive(Clone)]
pub struct AccessorRegistry {
    items: AccessorFactory,
    system: HashMap<SystemCollection, AccessorFactory>,
}

impl fmt::Debug for AccessorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessorRegistry")
            .field("system", &self.system.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl AccessorRegistry {
    pub fn new(items: AccessorFactory) -> Self {
        Self {
            items,
            system: HashMap::new(),
        }
    }

    /// Serves `collection` with `factory` instead of the items factory.
    pub fn with_system(mut self, collection: SystemCollection, factory: AccessorFactory) -> Self {
        self.system.insert(collection, factory);
        self
    }

    pub fn route(&self, collection: &str) -> AccessorRoute {
        match collection.parse::<SystemCollection>() {
            Ok(system) if self.system.contains_key(&system) => AccessorRoute::System(system),
            _ => AccessorRoute::Items,
        }
    }

    pub fn accessor(&self, collection: &str) -> Arc<dyn ItemsAccessor> {
        let route = self.route(collection);
        tracing::debug!(collection, ?route, "dispatching collection read");
        match route {
            AccessorRoute::System(system) => match self.system.get(&system) {
                Some(factory) => factory(collection),
                None => (self.items)(collection),
            },
            AccessorRoute::Items => (self.items)(collection),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use strum::IntoEnumIterator;
    use test_log::test;

    use super::*;

    fn recording_factory(label: &'static str, seen: Arc<Mutex<Vec<String>>>) -> AccessorFactory {
        Arc::new(move |collection: &str| {
            seen.lock()
                .unwrap()
                .push(format!("{label}:{collection}"));
            let mut accessor = MockItemsAccessor::new();
            accessor.expect_read_by_query().returning(|_| Ok(Vec::new()));
            Arc::new(accessor) as Arc<dyn ItemsAccessor>
        })
    }

    #[test]
    fn system_collections_parse_from_their_storage_name() {
        for collection in SystemCollection::iter() {
            assert!(collection.as_ref().starts_with("directus_"));
            assert_eq!(
                collection.as_ref().parse::<SystemCollection>().unwrap(),
                collection
            );
        }
        assert!("articles".parse::<SystemCollection>().is_err());
    }

    #[test]
    fn registered_system_collections_get_their_own_accessor() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let registry = AccessorRegistry::new(recording_factory("items", seen.clone()))
            .with_system(
                SystemCollection::Users,
                recording_factory("users", seen.clone()),
            );

        assert_eq!(
            registry.route("directus_users"),
            AccessorRoute::System(SystemCollection::Users)
        );
        assert_eq!(registry.route("directus_files"), AccessorRoute::Items);
        assert_eq!(registry.route("articles"), AccessorRoute::Items);

        registry.accessor("directus_users");
        registry.accessor("directus_files");
        registry.accessor("articles");
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                "users:directus_users",
                "items:directus_files",
                "items:articles"
            ]
        );
    }

    #[test(tokio::test)]
    async fn access_errors_carry_their_code() {
        let mut accessor = MockItemsAccessor::new();
        accessor
            .expect_read_singleton()
            .times(1)
            .returning(|_| Err(AccessError::Forbidden("directus_settings".to_string())));
        let error = accessor
            .read_singleton(&QueryPlan::default())
            .await
            .unwrap_err();
        assert_eq!(
            error.to_graphql_error(None).extension_code().as_deref(),
            Some("FORBIDDEN")
        );
    }
}
