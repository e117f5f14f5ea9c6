use std::collections::BTreeMap;
use std::sync::Arc;

use super::common::HandlerDeps;
use super::lab::LabHandler;
use super::pharmacy::PharmacyHandler;
use super::prescription::PrescriptionHandler;
use super::traits::DomainHandler;
use super::vitals::VitalsHandler;

/// Category tag → handler. Built once at startup and shared read-only
/// by every request.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn DomainHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the vitals, lab, prescription and pharmacy handlers.
    pub fn with_builtin_handlers(deps: HandlerDeps) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(VitalsHandler::new(deps.clone())));
        registry.register(Arc::new(LabHandler::new(deps.clone())));
        registry.register(Arc::new(PrescriptionHandler::new(deps.clone())));
        registry.register(Arc::new(PharmacyHandler::new(deps)));
        registry
    }

    /// Adds a handler under its category, returning any handler it replaced.
    pub fn register(&mut self, handler: Arc<dyn DomainHandler>) -> Option<Arc<dyn DomainHandler>> {
        let category = handler.category().to_string();
        tracing::debug!(category = %category, "Registered domain handler");
        self.handlers.insert(category, handler)
    }

    pub fn get(&self, category: &str) -> Option<Arc<dyn DomainHandler>> {
        self.handlers.get(category).cloned()
    }

    pub fn contains(&self, category: &str) -> bool {
        self.handlers.contains_key(category)
    }

    /// Registered categories in sorted order.
    pub fn categories(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn handlers(&self) -> Vec<Arc<dyn DomainHandler>> {
        self.handlers.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
