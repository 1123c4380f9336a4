//! GraphQL requests and responses exchanged with the transport layer, and the error codes
//! reported in them.

mod request;
mod response;

use std::fmt;

use apollo_compiler::response::GraphQLError as CompilerExecutionError;
use apollo_compiler::response::ResponseDataPathSegment;
pub use request::Request;
pub use response::Response;
use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map as JsonMap;
use serde_json_bytes::Value;

use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::PathElement;

/// Position in the query document, 1-based.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

/// <https://spec.graphql.org/October2021/#sec-Errors>
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[non_exhaustive]
pub struct Error {
    pub message: String,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Location>,

    /// Response path of the field that failed, `None` for request errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Path>,

    /// Carries the error `code`, and the offending argument for invalid arguments.
    #[serde(skip_serializing_if = "Object::is_empty")]
    pub extensions: Object,
}

#[buildstructor::buildstructor]
impl Error {
    /// `extension_code` is stored as `extensions.code` unless `extensions` already has one.
    #[builder(visibility = "pub")]
    fn new(
        message: String,
        locations: Vec<Location>,
        path: Option<Path>,
        extension_code: Option<String>,
        // Skip the `Object` type alias in order to use buildstructor's map special-casing
        mut extensions: JsonMap<ByteString, Value>,
    ) -> Self {
        if let Some(code) = extension_code {
            extensions
                .entry("code")
                .or_insert(Value::String(ByteString::from(code)));
        }
        Self {
            message,
            locations,
            path,
            extensions,
        }
    }

    /// The `code` extension.
    pub fn extension_code(&self) -> Option<String> {
        match self.extensions.get("code")? {
            Value::String(code) => Some(code.as_str().to_owned()),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.message.fmt(f)
    }
}

/// Errors reported to clients, each with a stable `code`.
pub(crate) trait ErrorExtension
where
    Self: Sized + fmt::Display,
{
    fn extension_code(&self) -> String;

    fn custom_extension_details(&self) -> Option<Object> {
        None
    }

    /// Converts into a GraphQL error located at `path`, if any.
    fn to_graphql_error(&self, path: Option<Path>) -> Error {
        let mut extensions = self.custom_extension_details().unwrap_or_default();
        extensions.insert("code", self.extension_code().into());
        Error {
            message: self.to_string(),
            locations: Vec::new(),
            path,
            extensions,
        }
    }
}

/// Validation diagnostics keep their message and locations.
impl From<CompilerExecutionError> for Error {
    fn from(error: CompilerExecutionError) -> Self {
        let path = error
            .path
            .into_iter()
            .map(|segment| match segment {
                ResponseDataPathSegment::Field(name) => PathElement::Key(name.to_string()),
                ResponseDataPathSegment::ListIndex(index) => PathElement::Index(index),
            })
            .collect::<Vec<_>>();
        Self {
            message: error.message,
            locations: error
                .locations
                .into_iter()
                .map(|location| Location {
                    line: location.line as u32,
                    column: location.column as u32,
                })
                .collect(),
            path: (!path.is_empty()).then_some(Path(path)),
            extensions: error.extensions,
        }
    }
}
