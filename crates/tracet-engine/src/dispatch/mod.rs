//! Telescope dispatch: request preparation, horizon gating and the MWA/ATCA
//! scheduling adapters.

pub mod atca;
pub mod context;
pub mod horizon;
pub mod mwa;
pub mod transport;

use std::collections::HashMap;

use tracet_core::errors::DispatchError;
use tracet_core::traits::TelescopeDispatcher;
use tracet_core::types::TelescopeFamily;

pub use self::context::{prepare_observation_context, ObservationContext};
pub use self::horizon::{check_horizon, HorizonCheck};

/// Dispatchers keyed by telescope family.
#[derive(Default)]
pub struct DispatchRegistry {
    dispatchers: HashMap<TelescopeFamily, Box<dyn TelescopeDispatcher>>,
}

impl DispatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dispatcher, replacing any previous one of the same family.
    pub fn register(&mut self, dispatcher: Box<dyn TelescopeDispatcher>) {
        self.dispatchers.insert(dispatcher.family(), dispatcher);
    }

    pub fn with(mut self, dispatcher: Box<dyn TelescopeDispatcher>) -> Self {
        self.register(dispatcher);
        self
    }

    pub fn get(&self, family: TelescopeFamily) -> Result<&dyn TelescopeDispatcher, DispatchError> {
        self.dispatchers
            .get(&family)
            .map(|d| d.as_ref())
            .ok_or_else(|| DispatchError::NoDispatcher(family.to_string()))
    }

    pub fn families(&self) -> Vec<TelescopeFamily> {
        let mut families: Vec<_> = self.dispatchers.keys().copied().collect();
        families.sort_by_key(|f| f.to_string());
        families
    }
}
