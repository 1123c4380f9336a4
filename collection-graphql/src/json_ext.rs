//! JSON aliases and response paths.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map;
pub(crate) use serde_json_bytes::Value;

/// A JSON object.
pub type Object = Map<ByteString, Value>;

/// A path element in a GraphQL response.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathElement {
    /// An index in a list.
    Index(usize),

    /// A key in an object.
    Key(String),
}

/// A path into the `data` of a GraphQL response, as reported in [`crate::graphql::Error::path`].
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(pub Vec<PathElement>);

impl Path {
    pub fn empty() -> Path {
        Path(Vec::new())
    }

    pub fn from_slice<T: AsRef<str>>(s: &[T]) -> Self {
        Self(
            s.iter()
                .map(|x| x.as_ref())
                .map(|s| {
                    if let Ok(index) = s.parse::<usize>() {
                        PathElement::Index(index)
                    } else {
                        PathElement::Key(s.to_string())
                    }
                })
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn push(&mut self, element: PathElement) {
        self.0.push(element)
    }

    pub fn last(&self) -> Option<&PathElement> {
        self.0.last()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for element in self.0.iter() {
            write!(f, "/")?;
            match element {
                PathElement::Index(index) => write!(f, "{index}")?,
                PathElement::Key(key) => write!(f, "{key}")?,
            }
        }
        Ok(())
    }
}

/// Recursively merges `source` into `target`.
///
/// Objects are merged key by key, any other value in `source` replaces the one in `target`.
pub(crate) fn deep_merge(target: &mut Object, source: Object) {
    for (key, value) in source {
        match (target.get_mut(key.as_str()), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming);
            }
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn path_serializes_like_a_graphql_error_path() {
        let path = Path::from_slice(&["articles", "0", "author"]);
        assert_eq!(
            serde_json_bytes::to_value(&path).unwrap(),
            json!(["articles", 0, "author"])
        );
        assert_eq!(path.to_string(), "/articles/0/author");
    }

    #[test]
    fn deep_merge_keeps_existing_keys() {
        let mut target = json!({ "_limit": 5, "_filter": { "a": { "_eq": 1 } } })
            .as_object()
            .unwrap()
            .clone();
        let source = json!({ "_sort": ["id"], "_filter": { "b": { "_eq": 2 } } })
            .as_object()
            .unwrap()
            .clone();
        deep_merge(&mut target, source);
        assert_eq!(
            Value::Object(target),
            json!({
                "_limit": 5,
                "_filter": { "a": { "_eq": 1 }, "b": { "_eq": 2 } },
                "_sort": ["id"]
            })
        );
    }
}
