use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use tracet_core::decision::{ProposalDecision, TriggerAlert};
use tracet_core::errors::GatewayError;
use tracet_core::event::{Event, EventGroup};
use tracet_core::observation::Observation;
use tracet_core::traits::{AlertSink, EventStore, ObservationGateway};

use super::atomic::{atomic_write, AdvisoryLock};
use super::audit_log::append_audit;

pub const STATE_FILE: &str = "tracet.state.json";
pub const AUDIT_FILE: &str = "tracet.audit.jsonl";

/// Everything the file-backed store persists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreState {
    pub next_id: u64,
    pub events: Vec<Event>,
    pub groups: Vec<EventGroup>,
    pub decisions: Vec<ProposalDecision>,
    pub observations: Vec<Observation>,
    /// Alerts handed to the sink, oldest first.
    pub alerts: Vec<TriggerAlert>,
}

impl StoreState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// File-backed store under one state directory.
///
/// Every mutation follows lock → mutate → audit → atomic write. The advisory
/// lock is held for the life of the store. Decision and observation changes
/// are appended to a hash-chained audit log.
#[derive(Debug)]
pub struct LocalStore {
    state_path: PathBuf,
    audit_path: PathBuf,
    state: Mutex<StoreState>,
    _lock: AdvisoryLock,
}

fn storage(e: impl std::fmt::Display) -> GatewayError {
    GatewayError::Storage(e.to_string())
}

impl LocalStore {
    pub fn open(dir: &Path) -> Result<Self, GatewayError> {
        std::fs::create_dir_all(dir).map_err(storage)?;
        let state_path = dir.join(STATE_FILE);
        let audit_path = dir.join(AUDIT_FILE);
        let lock = AdvisoryLock::acquire(&state_path).map_err(storage)?;

        let state = if state_path.exists() {
            let text = std::fs::read_to_string(&state_path).map_err(storage)?;
            serde_json::from_str(&text).map_err(|e| GatewayError::Decode(e.to_string()))?
        } else {
            StoreState::default()
        };

        Ok(Self {
            state_path,
            audit_path,
            state: Mutex::new(state),
            _lock: lock,
        })
    }

    pub fn audit_path(&self) -> &Path {
        &self.audit_path
    }

    pub fn snapshot(&self) -> Result<StoreState, GatewayError> {
        Ok(self.guard()?.clone())
    }

    fn guard(&self) -> Result<MutexGuard<'_, StoreState>, GatewayError> {
        self.state
            .lock()
            .map_err(|_| storage("store mutex poisoned"))
    }

    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut StoreState) -> Result<(T, Option<serde_json::Value>), GatewayError>,
    ) -> Result<T, GatewayError> {
        let mut state = self.guard()?;
        let mut next = state.clone();
        let (out, audit) = f(&mut next)?;
        if let Some(entry) = audit {
            append_audit(&self.audit_path, &entry).map_err(storage)?;
        }
        let json = serde_json::to_vec_pretty(&next).map_err(storage)?;
        atomic_write(&self.state_path, &json).map_err(storage)?;
        *state = next;
        Ok(out)
    }
}

fn decision_entry(event_type: &str, d: &ProposalDecision, previous: Option<&str>) -> serde_json::Value {
    json!({
        "event_type": event_type,
        "decision_id": d.id,
        "proposal_id": d.proposal_id,
        "trig_id": d.trig_id,
        "decision": d.decision.code(),
        "previous": previous,
    })
}

impl EventStore for LocalStore {
    fn record_event(&self, event: &Event) -> Result<Event, GatewayError> {
        let replayed = self
            .guard()?
            .events
            .iter()
            .find(|e| event.is_replay_of(e))
            .cloned();
        if let Some(stored) = replayed {
            return Ok(stored);
        }
        self.mutate(|s| {
            let mut event = event.clone();
            if event.id == 0 || s.events.iter().any(|e| e.id == event.id) {
                event.id = s.allocate_id();
            } else {
                s.next_id = s.next_id.max(event.id);
            }
            s.events.push(event.clone());
            Ok((event, None))
        })
    }

    fn find_group(&self, trig_id: &str) -> Result<Option<EventGroup>, GatewayError> {
        Ok(self
            .guard()?
            .groups
            .iter()
            .find(|g| g.trig_id == trig_id)
            .cloned())
    }

    fn save_group(&self, group: &EventGroup) -> Result<EventGroup, GatewayError> {
        self.mutate(|s| {
            let mut group = group.clone();
            match s.groups.iter_mut().find(|g| g.trig_id == group.trig_id) {
                Some(existing) => {
                    group.id = existing.id;
                    *existing = group.clone();
                }
                None => {
                    group.id = s.allocate_id();
                    s.groups.push(group.clone());
                }
            }
            Ok((group, None))
        })
    }

    fn events_for(&self, trig_id: &str) -> Result<Vec<Event>, GatewayError> {
        Ok(self
            .guard()?
            .events
            .iter()
            .rev()
            .filter(|e| e.trig_id == trig_id)
            .cloned()
            .collect())
    }

    fn decisions_for(&self, event_group_id: u64) -> Result<Vec<ProposalDecision>, GatewayError> {
        Ok(self
            .guard()?
            .decisions
            .iter()
            .filter(|d| d.event_group_id == event_group_id)
            .cloned()
            .collect())
    }

    fn insert_decision(&self, decision: &ProposalDecision) -> Result<ProposalDecision, GatewayError> {
        self.mutate(|s| {
            let mut decision = decision.clone();
            decision.id = s.allocate_id();
            s.decisions.push(decision.clone());
            let entry = decision_entry("DecisionCreated", &decision, None);
            Ok((decision, Some(entry)))
        })
    }
}

impl ObservationGateway for LocalStore {
    fn update_decision(&self, decision: &ProposalDecision) -> Result<(), GatewayError> {
        self.mutate(|s| {
            let existing = s
                .decisions
                .iter_mut()
                .find(|d| d.id == decision.id)
                .ok_or_else(|| GatewayError::NotFound(format!("proposal-decision/{}", decision.id)))?;
            let previous = existing.decision.code();
            *existing = decision.clone();
            Ok(((), Some(decision_entry("DecisionUpdated", decision, Some(previous)))))
        })
    }

    fn latest_observation(&self, telescope: &str) -> Result<Option<Observation>, GatewayError> {
        Ok(self
            .guard()?
            .observations
            .iter()
            .rev()
            .find(|o| o.telescope_name == telescope)
            .cloned())
    }

    fn create_observation(&self, observation: &Observation) -> Result<(), GatewayError> {
        self.mutate(|s| {
            s.observations.push(observation.clone());
            let entry = json!({
                "event_type": "ObservationCreated",
                "trigger_id": observation.trigger_id,
                "telescope_name": observation.telescope_name,
                "decision_id": observation.proposal_decision_id,
                "event_id": observation.event_id,
            });
            Ok(((), Some(entry)))
        })
    }

    fn update_event_group(&self, group: &EventGroup) -> Result<(), GatewayError> {
        self.mutate(|s| {
            let existing = s
                .groups
                .iter_mut()
                .find(|g| g.id == group.id)
                .ok_or_else(|| GatewayError::NotFound(format!("event-group/{}", group.id)))?;
            *existing = group.clone();
            Ok(((), None))
        })
    }
}

impl AlertSink for LocalStore {
    fn send_trigger_alert(&self, alert: &TriggerAlert) -> Result<(), GatewayError> {
        info!(
            prop_dec_id = alert.prop_dec_id,
            trigger = alert.trigger_bool,
            debug = alert.debug_bool,
            pending = alert.pending_bool,
            "trigger alert"
        );
        self.mutate(|s| {
            s.alerts.push(alert.clone());
            Ok(((), None))
        })
    }
}
