// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Feature module contract and registry (C2).
//!
//! Recast from "subclass hierarchies with dynamic dispatch" (SPEC_FULL.md
//! §9) as a capability set realized by a trait object; the registry itself
//! is a flat mapping from stable string identifiers to handles. The
//! registry is built once (via [`ModuleRegistryBuilder`]) before `bind` and
//! is read-only for the remainder of the session (§5 "Shared resources").

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::ErrorCondition;
use crate::event::Stanza;

/// Stable identifier for a module. Modules are expected to use a
/// process-wide constant, but nothing in the registry depends on that; it
/// is just a string looked up at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub &'static str);

type ProcessFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ErrorCondition>> + Send + 'a>>;

/// A feature module: the unit of extension for everything the core does
/// not implement itself (XEPs, in the original system's vocabulary).
///
/// All methods besides `id`, `criteria` and `process` have default no-op
/// implementations, matching the "optional" hooks called out in §6.
pub trait Module: Send + Sync {
    /// Stable identifier used for registry lookups.
    fn id(&self) -> ModuleId;

    /// Classifier predicate: does this module want to handle `stanza`?
    ///
    /// Evaluated for every inbound stanza that was not consumed by a filter
    /// or matched against the response table (§4.2 step 4).
    fn criteria(&self, stanza: &Stanza) -> bool;

    /// Handle a stanza this module's `criteria` matched.
    ///
    /// A returned `Err` is translated by the dispatcher into an error reply
    /// using the given condition (§4.2 step 6); a panic inside this future
    /// is caught by the dispatcher and translated to `undefined-condition`.
    fn process<'a>(&'a self, stanza: Stanza) -> ProcessFuture<'a>;

    /// Inbound filter hook, run before response correlation and routing.
    /// Return `true` to consume the stanza (stop further processing).
    fn filter_incoming(&self, _stanza: &mut Stanza) -> bool {
        false
    }

    /// Outbound filter hook, run before handoff to the transport. May
    /// rewrite the stanza in place.
    fn filter_outgoing(&self, _stanza: &mut Stanza) {}

    /// Static list of feature namespace URIs this module advertises via
    /// service discovery.
    fn features(&self) -> &'static [&'static str] {
        &[]
    }

    /// Called once the underlying XML stream has (re)started.
    fn stream_started(&self) {}

    /// Called when the connection has been transparently restarted (e.g.
    /// after STARTTLS or SM resumption), as opposed to a fresh stream.
    fn connection_restarted(&self) {}

    /// Called when all session state should be dropped (teardown).
    fn reset(&self) {}
}

/// Builder for a [`ModuleRegistry`]. Modules are registered in the order
/// they should run inbound filters and be tried for routing (§4.2).
#[derive(Default)]
pub struct ModuleRegistryBuilder {
    order: Vec<Arc<dyn Module>>,
}

impl ModuleRegistryBuilder {
    /// Start with an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module. Panics if a module with the same [`ModuleId`] is
    /// already registered, since that would make routing and lookup
    /// ambiguous.
    pub fn register(mut self, module: Arc<dyn Module>) -> Self {
        let id = module.id();
        assert!(
            !self.order.iter().any(|m| m.id() == id),
            "duplicate module id {:?}",
            id
        );
        self.order.push(module);
        self
    }

    /// Finalize the registry. From this point it is read-only.
    pub fn build(self) -> ModuleRegistry {
        let mut by_id = HashMap::with_capacity(self.order.len());
        for module in &self.order {
            by_id.insert(module.id(), Arc::clone(module));
        }
        ModuleRegistry {
            order: self.order,
            by_id,
        }
    }
}

/// Read-only registry of feature modules, keyed by [`ModuleId`] and
/// iterable in registration order.
pub struct ModuleRegistry {
    order: Vec<Arc<dyn Module>>,
    by_id: HashMap<ModuleId, Arc<dyn Module>>,
}

impl ModuleRegistry {
    /// Look up a module by its stable identifier.
    pub fn get(&self, id: ModuleId) -> Option<&Arc<dyn Module>> {
        self.by_id.get(&id)
    }

    /// Iterate all registered modules in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Module>> {
        self.order.iter()
    }

    /// Number of registered modules.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// `true` if no modules are registered.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Notify every module that the stream has (re)started.
    pub fn notify_stream_started(&self) {
        for module in self.iter() {
            module.stream_started();
        }
    }

    /// Notify every module that the connection was transparently restarted.
    pub fn notify_connection_restarted(&self) {
        for module in self.iter() {
            module.connection_restarted();
        }
    }

    /// Notify every module to reset all session state.
    pub fn notify_reset(&self) {
        for module in self.iter() {
            module.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl Module for Echo {
        fn id(&self) -> ModuleId {
            ModuleId("test.echo")
        }

        fn criteria(&self, _stanza: &Stanza) -> bool {
            true
        }

        fn process<'a>(&'a self, _stanza: Stanza) -> ProcessFuture<'a> {
            Box::pin(async { Ok(()) })
        }
    }

    #[test]
    #[should_panic(expected = "duplicate module id")]
    fn rejects_duplicate_ids() {
        ModuleRegistryBuilder::new()
            .register(Arc::new(Echo))
            .register(Arc::new(Echo))
            .build();
    }

    #[test]
    fn lookup_and_iteration_order() {
        let registry = ModuleRegistryBuilder::new().register(Arc::new(Echo)).build();
        assert_eq!(registry.len(), 1);
        assert!(registry.get(ModuleId("test.echo")).is_some());
        assert!(registry.get(ModuleId("nope")).is_none());
        assert_eq!(registry.iter().count(), 1);
    }
}
