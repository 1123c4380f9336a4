//! Compiled schemas and their hot reload.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use arc_swap::ArcSwap;

use crate::compiler::CompiledScope;
use crate::compiler::SchemaError;
use crate::compiler::Scope;
use crate::compiler::compile;
use crate::schema::SchemaGraph;
use crate::schema::SchemaOverview;

/// Both compiled scopes of one schema overview.
///
/// A snapshot never changes after compilation. Requests hold on to the snapshot they
/// started with, reloads install a new one.
#[derive(Debug)]
pub struct Snapshot {
    generation: u64,
    graph: Arc<SchemaGraph>,
    items: CompiledScope,
    system: CompiledScope,
}

impl Snapshot {
    pub(crate) fn new(
        generation: u64,
        graph: Arc<SchemaGraph>,
        items: CompiledScope,
        system: CompiledScope,
    ) -> Self {
        Self {
            generation,
            graph,
            items,
            system,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn graph(&self) -> &SchemaGraph {
        &self.graph
    }

    pub fn scope(&self, scope: Scope) -> &CompiledScope {
        match scope {
            Scope::Items => &self.items,
            Scope::System => &self.system,
        }
    }

    /// The schema of `scope` in SDL.
    pub fn sdl(&self, scope: Scope) -> String {
        self.scope(scope).schema().to_string()
    }
}

/// Holds the current [`Snapshot`].
///
/// Note: readers load the snapshot once per request and keep it for the whole request,
/// a concurrent reload only affects requests started after it.
#[derive(Debug)]
pub struct SchemaRegistry {
    current: ArcSwap<Snapshot>,
    generation: AtomicU64,
}

impl SchemaRegistry {
    pub fn new(overview: SchemaOverview) -> Result<Self, SchemaError> {
        let snapshot = compile(Arc::new(SchemaGraph::new(overview)), 1)?;
        tracing::info!(generation = 1, "schema compiled");
        Ok(Self {
            current: ArcSwap::from_pointee(snapshot),
            generation: AtomicU64::new(1),
        })
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Compiles `overview` and swaps it in.
    ///
    /// On error the current snapshot stays in place.
    pub fn reload(&self, overview: SchemaOverview) -> Result<Arc<Snapshot>, SchemaError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.install(
            generation,
            compile(Arc::new(SchemaGraph::new(overview)), generation),
        )
    }

    fn install(
        &self,
        generation: u64,
        compiled: Result<Snapshot, SchemaError>,
    ) -> Result<Arc<Snapshot>, SchemaError> {
        let snapshot = match compiled {
            Ok(snapshot) => Arc::new(snapshot),
            Err(error) => {
                tracing::error!(
                    generation,
                    %error,
                    "schema reload failed, keeping the current schema"
                );
                return Err(error);
            }
        };
        let previous = self.current.swap(snapshot.clone());
        tracing::info!(
            generation,
            previous = previous.generation(),
            "schema reloaded"
        );
        Ok(snapshot)
    }
}
