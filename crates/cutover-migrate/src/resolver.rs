//! Two-tier collaborator resolution.
//!
//! The orchestrator never holds collaborators directly; it asks the
//! [`Resolver`], which chains two strategies:
//!
//! 1. **Catalog** — handles registered up front (service discovery).
//! 2. **Factory** — an optional [`ServiceFactory`] that constructs a fresh
//!    collaborator when discovery comes up empty. Constructed handles are
//!    cached so construction happens at most once per resolver.
//!
//! Exhausting both tiers is [`Error::CollaboratorUnavailable`]: the caller
//! fails fast with no partial state committed.

use std::sync::{Arc, OnceLock};

use crate::collaborators::{
    ContentStore, DataProfiler, DocumentStore, FileParser, LineageRecorder, RoutingEngine,
    SchemaMapper, ServiceKind,
};
use crate::error::{Error, Result};

/// Collaborator handles registered up front (the discovery tier).
#[derive(Clone, Default)]
pub struct ServiceCatalog {
    content_store: Option<Arc<dyn ContentStore>>,
    file_parser: Option<Arc<dyn FileParser>>,
    data_profiler: Option<Arc<dyn DataProfiler>>,
    schema_mapper: Option<Arc<dyn SchemaMapper>>,
    routing_engine: Option<Arc<dyn RoutingEngine>>,
    document_store: Option<Arc<dyn DocumentStore>>,
    lineage_recorder: Option<Arc<dyn LineageRecorder>>,
}

impl ServiceCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a content store.
    #[must_use]
    pub fn with_content_store(mut self, handle: Arc<dyn ContentStore>) -> Self {
        self.content_store = Some(handle);
        self
    }

    /// Registers a file parser.
    #[must_use]
    pub fn with_file_parser(mut self, handle: Arc<dyn FileParser>) -> Self {
        self.file_parser = Some(handle);
        self
    }

    /// Registers a data profiler.
    #[must_use]
    pub fn with_data_profiler(mut self, handle: Arc<dyn DataProfiler>) -> Self {
        self.data_profiler = Some(handle);
        self
    }

    /// Registers a schema mapper.
    #[must_use]
    pub fn with_schema_mapper(mut self, handle: Arc<dyn SchemaMapper>) -> Self {
        self.schema_mapper = Some(handle);
        self
    }

    /// Registers a routing engine.
    #[must_use]
    pub fn with_routing_engine(mut self, handle: Arc<dyn RoutingEngine>) -> Self {
        self.routing_engine = Some(handle);
        self
    }

    /// Registers a document store.
    #[must_use]
    pub fn with_document_store(mut self, handle: Arc<dyn DocumentStore>) -> Self {
        self.document_store = Some(handle);
        self
    }

    /// Registers a lineage recorder.
    #[must_use]
    pub fn with_lineage_recorder(mut self, handle: Arc<dyn LineageRecorder>) -> Self {
        self.lineage_recorder = Some(handle);
        self
    }
}

/// The direct-construction tier.
///
/// Every method defaults to `None`; implementations override only the
/// services they know how to build.
pub trait ServiceFactory: Send + Sync {
    /// Constructs a content store.
    fn content_store(&self) -> Option<Arc<dyn ContentStore>> {
        None
    }

    /// Constructs a file parser.
    fn file_parser(&self) -> Option<Arc<dyn FileParser>> {
        None
    }

    /// Constructs a data profiler.
    fn data_profiler(&self) -> Option<Arc<dyn DataProfiler>> {
        None
    }

    /// Constructs a schema mapper.
    fn schema_mapper(&self) -> Option<Arc<dyn SchemaMapper>> {
        None
    }

    /// Constructs a routing engine.
    fn routing_engine(&self) -> Option<Arc<dyn RoutingEngine>> {
        None
    }

    /// Constructs a document store.
    fn document_store(&self) -> Option<Arc<dyn DocumentStore>> {
        None
    }

    /// Constructs a lineage recorder.
    fn lineage_recorder(&self) -> Option<Arc<dyn LineageRecorder>> {
        None
    }
}

/// Resolves collaborator handles through the catalog, then the factory.
#[derive(Default)]
pub struct Resolver {
    catalog: ServiceCatalog,
    factory: Option<Arc<dyn ServiceFactory>>,
    constructed_content_store: OnceLock<Arc<dyn ContentStore>>,
    constructed_file_parser: OnceLock<Arc<dyn FileParser>>,
    constructed_data_profiler: OnceLock<Arc<dyn DataProfiler>>,
    constructed_schema_mapper: OnceLock<Arc<dyn SchemaMapper>>,
    constructed_routing_engine: OnceLock<Arc<dyn RoutingEngine>>,
    constructed_document_store: OnceLock<Arc<dyn DocumentStore>>,
    constructed_lineage_recorder: OnceLock<Arc<dyn LineageRecorder>>,
}

/// Chains catalog, construction cache, and factory for one service.
fn two_tier<T: ?Sized>(
    kind: ServiceKind,
    registered: Option<&Arc<T>>,
    cache: &OnceLock<Arc<T>>,
    construct: impl FnOnce() -> Option<Arc<T>>,
) -> Result<Arc<T>> {
    if let Some(handle) = registered {
        return Ok(Arc::clone(handle));
    }
    if let Some(handle) = cache.get() {
        return Ok(Arc::clone(handle));
    }
    match construct() {
        Some(handle) => {
            tracing::warn!(service = %kind, "service not in catalog, constructed directly");
            let _ = cache.set(Arc::clone(&handle));
            Ok(handle)
        }
        None => Err(Error::CollaboratorUnavailable { service: kind }),
    }
}

impl Resolver {
    /// Creates a resolver over the given catalog with no factory tier.
    #[must_use]
    pub fn new(catalog: ServiceCatalog) -> Self {
        Self {
            catalog,
            ..Self::default()
        }
    }

    /// Adds the direct-construction tier.
    #[must_use]
    pub fn with_factory(mut self, factory: Arc<dyn ServiceFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Resolves the content store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CollaboratorUnavailable`] when both tiers come up
    /// empty.
    pub fn content_store(&self) -> Result<Arc<dyn ContentStore>> {
        two_tier(
            ServiceKind::ContentStore,
            self.catalog.content_store.as_ref(),
            &self.constructed_content_store,
            || self.factory.as_ref().and_then(|f| f.content_store()),
        )
    }

    /// Resolves the file parser.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CollaboratorUnavailable`] when both tiers come up
    /// empty.
    pub fn file_parser(&self) -> Result<Arc<dyn FileParser>> {
        two_tier(
            ServiceKind::FileParser,
            self.catalog.file_parser.as_ref(),
            &self.constructed_file_parser,
            || self.factory.as_ref().and_then(|f| f.file_parser()),
        )
    }

    /// Resolves the data profiler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CollaboratorUnavailable`] when both tiers come up
    /// empty.
    pub fn data_profiler(&self) -> Result<Arc<dyn DataProfiler>> {
        two_tier(
            ServiceKind::DataProfiler,
            self.catalog.data_profiler.as_ref(),
            &self.constructed_data_profiler,
            || self.factory.as_ref().and_then(|f| f.data_profiler()),
        )
    }

    /// Resolves the schema mapper.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CollaboratorUnavailable`] when both tiers come up
    /// empty.
    pub fn schema_mapper(&self) -> Result<Arc<dyn SchemaMapper>> {
        two_tier(
            ServiceKind::SchemaMapper,
            self.catalog.schema_mapper.as_ref(),
            &self.constructed_schema_mapper,
            || self.factory.as_ref().and_then(|f| f.schema_mapper()),
        )
    }

    /// Resolves the routing engine.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CollaboratorUnavailable`] when both tiers come up
    /// empty.
    pub fn routing_engine(&self) -> Result<Arc<dyn RoutingEngine>> {
        two_tier(
            ServiceKind::RoutingEngine,
            self.catalog.routing_engine.as_ref(),
            &self.constructed_routing_engine,
            || self.factory.as_ref().and_then(|f| f.routing_engine()),
        )
    }

    /// Resolves the document store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CollaboratorUnavailable`] when both tiers come up
    /// empty.
    pub fn document_store(&self) -> Result<Arc<dyn DocumentStore>> {
        two_tier(
            ServiceKind::DocumentStore,
            self.catalog.document_store.as_ref(),
            &self.constructed_document_store,
            || self.factory.as_ref().and_then(|f| f.document_store()),
        )
    }

    /// Resolves the lineage recorder.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CollaboratorUnavailable`] when both tiers come up
    /// empty.
    pub fn lineage_recorder(&self) -> Result<Arc<dyn LineageRecorder>> {
        two_tier(
            ServiceKind::LineageRecorder,
            self.catalog.lineage_recorder.as_ref(),
            &self.constructed_lineage_recorder,
            || self.factory.as_ref().and_then(|f| f.lineage_recorder()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::collaborators::memory::{InMemoryDocumentStore, RecordingLineageRecorder};

    #[test]
    fn catalog_tier_wins() {
        let catalog = ServiceCatalog::new()
            .with_document_store(Arc::new(InMemoryDocumentStore::new()));
        let resolver = Resolver::new(catalog);

        assert!(resolver.document_store().is_ok());
    }

    #[test]
    fn missing_everywhere_is_unavailable() {
        let resolver = Resolver::new(ServiceCatalog::new());
        let err = resolver.routing_engine().err().unwrap();
        assert!(matches!(
            err,
            Error::CollaboratorUnavailable {
                service: ServiceKind::RoutingEngine
            }
        ));
    }

    #[test]
    fn factory_tier_constructs_once() {
        struct CountingFactory {
            constructions: AtomicUsize,
        }

        impl ServiceFactory for CountingFactory {
            fn lineage_recorder(&self) -> Option<Arc<dyn LineageRecorder>> {
                self.constructions.fetch_add(1, Ordering::SeqCst);
                Some(Arc::new(RecordingLineageRecorder::new()))
            }
        }

        let factory = Arc::new(CountingFactory {
            constructions: AtomicUsize::new(0),
        });
        let resolver = Resolver::new(ServiceCatalog::new()).with_factory(Arc::clone(&factory) as Arc<dyn ServiceFactory>);

        let first = resolver.lineage_recorder().unwrap();
        let second = resolver.lineage_recorder().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.constructions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn factory_without_service_is_unavailable() {
        struct EmptyFactory;
        impl ServiceFactory for EmptyFactory {}

        let resolver =
            Resolver::new(ServiceCatalog::new()).with_factory(Arc::new(EmptyFactory));
        assert!(resolver.schema_mapper().is_err());
    }
}
