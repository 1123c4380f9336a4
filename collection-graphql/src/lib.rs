//! Compiles a runtime description of collections, fields and relations into GraphQL schemas,
//! and resolves queries against them through pluggable collection accessors.

#![warn(unreachable_pub)]

pub mod compiler;
pub mod configuration;
mod executable;
mod execution;
pub mod graphql;
pub mod json_ext;
pub mod schema;
pub mod services;
pub mod snapshot;
pub mod spec;
pub mod subscriber;

pub use compiler::CompiledScope;
pub use compiler::SchemaError;
pub use compiler::Scope;
pub use configuration::Configuration;
pub use executable::Opt;
pub use executable::main;
pub use execution::ExecutionError;
pub use schema::SchemaOverview;
pub use services::AccessError;
pub use services::AccessorRegistry;
pub use services::ItemsAccessor;
pub use services::QueryExecutor;
pub use snapshot::SchemaRegistry;
pub use snapshot::Snapshot;
