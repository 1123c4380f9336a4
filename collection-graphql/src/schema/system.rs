//! Metadata of the built-in system collections.

use super::CollectionMetadata;

/// Prefix carried by every system collection name.
pub const SYSTEM_PREFIX: &str = "directus_";

/// Known system collections and whether they are singletons.
///
/// Used when the dynamic schema does not know a system collection, for instance because
/// the caller's reduced schema omits it.
pub(crate) const SYSTEM_COLLECTIONS: &[(&str, bool)] = &[
    ("directus_activity", false),
    ("directus_collections", false),
    ("directus_dashboards", false),
    ("directus_fields", false),
    ("directus_files", false),
    ("directus_flows", false),
    ("directus_folders", false),
    ("directus_migrations", false),
    ("directus_notifications", false),
    ("directus_operations", false),
    ("directus_panels", false),
    ("directus_permissions", false),
    ("directus_presets", false),
    ("directus_relations", false),
    ("directus_revisions", false),
    ("directus_roles", false),
    ("directus_sessions", false),
    ("directus_settings", true),
    ("directus_shares", false),
    ("directus_users", false),
    ("directus_webhooks", false),
];

pub fn is_system_collection(collection: &str) -> bool {
    collection.starts_with(SYSTEM_PREFIX)
}

/// Singleton flag of a known system collection.
pub fn static_singleton(collection: &str) -> Option<bool> {
    SYSTEM_COLLECTIONS
        .iter()
        .find(|(name, _)| *name == collection)
        .map(|(_, singleton)| *singleton)
}

/// [`CollectionMetadata`] backed by [`SYSTEM_COLLECTIONS`].
#[derive(Clone, Copy, Debug, Default)]
pub struct StaticSystemMetadata;

impl CollectionMetadata for StaticSystemMetadata {
    fn singleton(&self, collection: &str) -> Option<bool> {
        static_singleton(collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_is_the_only_static_singleton() {
        assert_eq!(static_singleton("directus_settings"), Some(true));
        assert_eq!(static_singleton("directus_users"), Some(false));
        assert_eq!(static_singleton("articles"), None);
        assert_eq!(
            SYSTEM_COLLECTIONS.iter().filter(|(_, s)| *s).count(),
            1,
            "only settings holds a single record"
        );
    }

    #[test]
    fn system_prefix() {
        assert!(is_system_collection("directus_files"));
        assert!(!is_system_collection("articles"));
        assert!(StaticSystemMetadata.singleton("directus_settings").unwrap_or_default());
    }
}
