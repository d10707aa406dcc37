//! Lookup table from [`ProviderKind`] to its adapter.

use std::collections::HashMap;
use std::sync::Arc;

use genflow_core::error::GenerationError;
use genflow_core::types::ProviderKind;

use crate::adapter::ProviderAdapter;
use crate::dayu::DayuAdapter;
use crate::http::ProxyClient;
use crate::kie::KieAdapter;
use crate::sutu::SutuAdapter;
use crate::yijia::YijiaAdapter;
use crate::yunwu::YunwuAdapter;

/// Registered provider adapters, shared behind `Arc`.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All five built-in adapters sharing one proxy client.
    pub fn with_defaults(client: ProxyClient) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SutuAdapter::new(client.clone())));
        registry.register(Arc::new(YunwuAdapter::new(client.clone())));
        registry.register(Arc::new(DayuAdapter::new(client.clone())));
        registry.register(Arc::new(KieAdapter::new(client.clone())));
        registry.register(Arc::new(YijiaAdapter::new(client)));
        registry
    }

    /// Register an adapter, replacing any previous one of the same kind.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn get(&self, kind: ProviderKind) -> Result<Arc<dyn ProviderAdapter>, GenerationError> {
        self.adapters.get(&kind).cloned().ok_or_else(|| {
            GenerationError::Configuration(format!("No adapter registered for provider {kind}"))
        })
    }

    /// Registered kinds in declaration order.
    pub fn kinds(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|kind| self.adapters.contains_key(kind))
            .collect()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
