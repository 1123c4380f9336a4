//! Implementation of the various steps in the request pipeline.

pub mod accessor;
pub mod execution;

pub use accessor::AccessError;
pub use accessor::AccessorFactory;
pub use accessor::AccessorRegistry;
pub use accessor::ItemsAccessor;
pub use accessor::SystemCollection;
pub use execution::OperationPlanner;
pub use execution::PlannedRootField;
pub use execution::QueryExecutor;
