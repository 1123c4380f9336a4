use serde::Deserialize;
use serde::Serialize;

use crate::graphql::Error;
use crate::json_ext::Value;

/// A GraphQL response, as sent back to the transport layer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Response {
    /// The response data.
    ///
    /// `None` when the request was rejected before execution.
    #[serde(default)]
    pub data: Option<Value>,

    /// The optional GraphQL errors encountered.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<Error>,
}

#[buildstructor::buildstructor]
impl Response {
    /// Constructor
    #[builder(visibility = "pub")]
    fn new(data: Option<Value>, errors: Vec<Error>) -> Self {
        Self { data, errors }
    }

    /// Returns true if the response carries at least one error.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}
