//! Completion of fetched rows into the response.

pub(crate) mod engine;
pub(crate) mod union;

pub use engine::ExecutionError;
