use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::EventGroup;
use crate::proposal::Proposal;
use crate::types::DecisionCode;

/// Format one reasoning-log line: `"{utc}: Event ID {id}: {message}\n"`.
pub fn reason_line(now: DateTime<Utc>, event_id: u64, message: &str) -> String {
    format!("{now}: Event ID {event_id}: {message}\n")
}

/// Mutable per-(trigger, proposal) record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalDecision {
    pub id: u64,
    pub proposal_id: u64,
    pub event_group_id: u64,
    pub trig_id: String,
    pub decision: DecisionCode,
    /// Append-only reasoning trail.
    #[serde(default)]
    pub decision_reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ra: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dec: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub az: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ra_hms: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dec_dms: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos_error: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl ProposalDecision {
    /// New Pending decision for a proposal, seeded with the group position.
    pub fn pending(id: u64, proposal: &Proposal, group: &EventGroup, now: DateTime<Utc>) -> Self {
        Self {
            id,
            proposal_id: proposal.id,
            event_group_id: group.id,
            trig_id: group.trig_id.clone(),
            decision: DecisionCode::Pending,
            decision_reason: String::new(),
            duration: None,
            ra: group.ra,
            dec: group.dec,
            alt: None,
            az: None,
            ra_hms: group.ra_hms.clone(),
            dec_dms: group.dec_dms.clone(),
            pos_error: group.pos_error,
            created_at: now,
        }
    }

    pub fn position(&self) -> Option<(f64, f64)> {
        Some((self.ra?, self.dec?))
    }

    pub fn append_reason(&mut self, now: DateTime<Utc>, event_id: u64, message: &str) {
        self.decision_reason
            .push_str(&reason_line(now, event_id, message));
    }
}

/// Body of the alert sent after each decision update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerAlert {
    pub prop_dec_id: u64,
    pub trigger_bool: bool,
    pub debug_bool: bool,
    pub pending_bool: bool,
}
