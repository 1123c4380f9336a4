//! Member resolution for polymorphic relations.

use apollo_compiler::Name;

use super::engine::LinkedPath;
use super::engine::Segment;
use super::engine::segments;
use crate::compiler::CompiledScope;
use crate::json_ext::Value;

/// Resolves the member type of union values inside the rows fetched for one root field.
pub(crate) struct UnionResolver<'a> {
    scope: &'a CompiledScope,
    data: &'a Value,
}

impl<'a> UnionResolver<'a> {
    /// `data` is the value fetched for the root field.
    pub(crate) fn new(scope: &'a CompiledScope, data: &'a Value) -> Self {
        Self { scope, data }
    }

    /// Member of `union` for the value at `path`.
    ///
    /// The related row does not say what collection it comes from, the row holding the
    /// relation does: its discriminator field names the collection.
    pub(crate) fn resolve_type(&self, union: &Name, path: LinkedPath<'_>) -> Option<Name> {
        let binding = self.scope.union_binding(union)?;
        // The first segment is the root field, which `data` already is
        let mut segments = segments(path).into_iter().skip(1).collect::<Vec<_>>();
        while matches!(segments.last(), Some(Segment::Index(_))) {
            segments.pop();
        }
        // The union field itself
        segments.pop();

        let mut current = self.data;
        for segment in segments {
            current = match segment {
                Segment::Field { name, .. } => current.as_object()?.get(name)?,
                Segment::Index(index) => current.as_array()?.get(index)?,
            };
        }
        let collection = current
            .as_object()?
            .get(binding.discriminator.as_str())?
            .as_str()?;
        binding
            .members
            .iter()
            .find(|member| member.as_str() == collection)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json_bytes::json;

    use super::*;
    use crate::compiler::Scope;
    use crate::compiler::compile;
    use crate::execution::engine::LinkedPathElement;
    use crate::schema::tests::fixture_graph;

    fn field<'a>(name: &'a str, next: LinkedPath<'a>) -> LinkedPathElement<'a> {
        LinkedPathElement {
            segment: Segment::Field {
                response_key: name,
                name,
            },
            next,
        }
    }

    fn index(index: usize, next: LinkedPath<'_>) -> LinkedPathElement<'_> {
        LinkedPathElement {
            segment: Segment::Index(index),
            next,
        }
    }

    #[test]
    fn reads_the_discriminator_of_the_enclosing_row() {
        let snapshot = compile(Arc::new(fixture_graph()), 1).unwrap();
        let scope = snapshot.scope(Scope::Items);
        let data = json!([
            { "blocks": [] },
            { "blocks": [
                { "collection": "block_text", "item": { "content": "a" } },
                { "collection": "block_hero", "item": { "headline": "b" } },
            ] },
        ]);
        let resolver = UnionResolver::new(scope, &data);
        let union = Name::new("pages_blocks_item_union").unwrap();

        let root = field("pages", None);
        let row = index(1, Some(&root));
        let blocks = field("blocks", Some(&row));
        let block = index(1, Some(&blocks));
        let item = field("item", Some(&block));
        assert_eq!(
            resolver.resolve_type(&union, Some(&item)),
            Some(Name::new("block_hero").unwrap())
        );

        let block = index(0, Some(&blocks));
        let item = field("item", Some(&block));
        assert_eq!(
            resolver.resolve_type(&union, Some(&item)),
            Some(Name::new("block_text").unwrap())
        );
    }

    #[test]
    fn unknown_collections_do_not_resolve() {
        let snapshot = compile(Arc::new(fixture_graph()), 1).unwrap();
        let scope = snapshot.scope(Scope::Items);
        let data = json!([{ "collection": "articles", "item": { "id": 1 } }]);
        let resolver = UnionResolver::new(scope, &data);
        let union = Name::new("pages_blocks_item_union").unwrap();

        let root = field("pages_blocks", None);
        let row = index(0, Some(&root));
        let item = field("item", Some(&row));
        assert_eq!(resolver.resolve_type(&union, Some(&item)), None);

        let data = json!([{ "item": { "id": 1 } }]);
        let resolver = UnionResolver::new(scope, &data);
        assert_eq!(resolver.resolve_type(&union, Some(&item)), None);
    }
}
