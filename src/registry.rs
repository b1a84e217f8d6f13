//! Agent registry
//!
//! Maps an [`AgentId`] to a lazily-constructed handler instance. Registration
//! stores a factory plus the agent's description and topic subscriptions;
//! resolution invokes the factory on first use and memoizes the instance, so
//! construction side effects (opening a connection, priming a model client)
//! happen exactly once per identity per runtime.

use std::collections::HashMap;

use tracing::debug;

use crate::capability::{CapabilityFactory, CapabilitySvc};
use crate::error::{ChatError, Result};
use crate::items::{AgentId, Topic};

struct RegistryEntry {
    factory: CapabilityFactory,
    handler: Option<CapabilitySvc>,
    description: String,
    subscriptions: Vec<Topic>,
}

/// Per-runtime agent registry. Not shared across conversations unless the
/// caller explicitly reuses one runtime.
#[derive(Default)]
pub struct AgentRegistry {
    entries: HashMap<AgentId, RegistryEntry>,
    // Registration order; fan-out and round-robin both derive from it.
    order: Vec<AgentId>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` with a capability factory. Fails with
    /// `DuplicateIdentity` if `id` already has a live entry.
    pub fn register(
        &mut self,
        id: AgentId,
        description: impl Into<String>,
        subscriptions: Vec<Topic>,
        factory: CapabilityFactory,
    ) -> Result<()> {
        if self.entries.contains_key(&id) {
            return Err(ChatError::DuplicateIdentity(id));
        }
        debug!(agent = %id, "registered agent");
        self.order.push(id.clone());
        self.entries.insert(
            id,
            RegistryEntry {
                factory,
                handler: None,
                description: description.into(),
                subscriptions,
            },
        );
        Ok(())
    }

    /// Resolve `id` to its handler, constructing it on first use.
    ///
    /// Every subsequent call returns the same cached instance.
    pub fn resolve(&mut self, id: &AgentId) -> Result<&mut CapabilitySvc> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| ChatError::UnknownAgent(id.clone()))?;
        if entry.handler.is_none() {
            debug!(agent = %id, "constructing handler on first resolution");
            entry.handler = Some((entry.factory)());
        }
        Ok(entry.handler.as_mut().expect("handler just constructed"))
    }

    pub fn contains(&self, id: &AgentId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn description(&self, id: &AgentId) -> Option<&str> {
        self.entries.get(id).map(|e| e.description.as_str())
    }

    /// Identities in registration order.
    pub fn identities(&self) -> &[AgentId] {
        &self.order
    }

    /// Subscribers of `topic`, in subscription-registration order.
    pub fn subscribers(&self, topic: &Topic) -> Vec<AgentId> {
        self.order
            .iter()
            .filter(|id| {
                self.entries
                    .get(*id)
                    .is_some_and(|e| e.subscriptions.contains(topic))
            })
            .cloned()
            .collect()
    }
}
