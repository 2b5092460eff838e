use crate::decision::{ProposalDecision, TriggerAlert};
use crate::errors::{GatewayError, SkymapError};
use crate::event::{Event, EventGroup};
use crate::observation::{DispatchOutcome, Observation, ObservationRequest};
use crate::types::TelescopeFamily;

/// Persistence contract the engine writes decisions and observations through.
pub trait ObservationGateway {
    fn update_decision(&self, decision: &ProposalDecision) -> Result<(), GatewayError>;
    fn latest_observation(&self, telescope: &str) -> Result<Option<Observation>, GatewayError>;
    fn create_observation(&self, observation: &Observation) -> Result<(), GatewayError>;
    fn update_event_group(&self, group: &EventGroup) -> Result<(), GatewayError>;
}

/// Event and decision queries needed to group alerts by trigger.
pub trait EventStore {
    /// Record an event and return it with its assigned id.
    fn record_event(&self, event: &Event) -> Result<Event, GatewayError>;
    fn find_group(&self, trig_id: &str) -> Result<Option<EventGroup>, GatewayError>;
    /// Insert or replace the group for its trigger id, assigning an id when new.
    fn save_group(&self, group: &EventGroup) -> Result<EventGroup, GatewayError>;
    /// Events of a trigger, newest first.
    fn events_for(&self, trig_id: &str) -> Result<Vec<Event>, GatewayError>;
    fn decisions_for(&self, event_group_id: u64) -> Result<Vec<ProposalDecision>, GatewayError>;
    /// Insert a new decision and return it with its assigned id.
    fn insert_decision(&self, decision: &ProposalDecision) -> Result<ProposalDecision, GatewayError>;
}

/// Receives decision alerts. Fire-and-forget from the engine's point of view.
pub trait AlertSink {
    fn send_trigger_alert(&self, alert: &TriggerAlert) -> Result<(), GatewayError>;
}

/// One telescope scheduling protocol.
pub trait TelescopeDispatcher {
    fn family(&self) -> TelescopeFamily;

    /// Build, submit and classify one request. Failures come back as an
    /// Error outcome carrying the reason.
    fn trigger(&self, request: &ObservationRequest<'_>) -> DispatchOutcome;

    /// Observation record to persist for one scheduled id.
    fn observation(
        &self,
        request: &ObservationRequest<'_>,
        trigger_id: &str,
        obsid: &str,
        outcome: &DispatchOutcome,
    ) -> Observation;
}

/// Resolves a skymap reference (URL or path) to raw FITS bytes.
pub trait SkymapSource {
    fn fetch(&self, reference: &str) -> Result<Vec<u8>, SkymapError>;
}
