use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decision::ProposalDecision;
use crate::proposal::Proposal;
use crate::types::DecisionCode;

/// Four simultaneous pointings, ordered NE, NW, SE, SW.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubArrays {
    pub ra: Vec<f64>,
    pub dec: Vec<f64>,
}

impl SubArrays {
    pub fn pointings(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.ra.iter().copied().zip(self.dec.iter().copied())
    }
}

/// A telescope request that was actually sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub trigger_id: String,
    pub telescope_name: String,
    pub proposal_decision_id: u64,
    pub event_id: u64,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_sent_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mwa_sub_arrays: Option<SubArrays>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mwa_response: Option<serde_json::Value>,
}

/// Everything an adapter needs to build one scheduling request.
#[derive(Debug, Clone)]
pub struct ObservationRequest<'a> {
    pub proposal: &'a Proposal,
    pub decision: &'a ProposalDecision,
    pub event_id: u64,
    /// Short label shown in the telescope schedule.
    pub obsname: String,
    pub pretend: bool,
    pub vcsmode: bool,
    /// Ask for a voltage buffer dump instead of a scheduled observation.
    pub buffered: bool,
    pub sub_arrays: Option<SubArrays>,
    /// Overrides the proposal's exposure time in seconds.
    pub exptime: Option<u32>,
    pub nobs: u32,
    pub reason: String,
    pub sent_at: DateTime<Utc>,
}

/// Uniform result of one dispatch attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    /// Triggered or Error.
    pub decision: DecisionCode,
    /// Messages for the decision's reasoning log.
    pub log: Vec<String>,
    pub obsids: Vec<String>,
    /// Scheduler-side request id, when it reports one.
    pub trigger_id: Option<String>,
    pub raw: Option<serde_json::Value>,
}

impl DispatchOutcome {
    pub fn triggered(obsids: Vec<String>, raw: Option<serde_json::Value>) -> Self {
        Self {
            decision: DecisionCode::Triggered,
            log: Vec::new(),
            obsids,
            trigger_id: None,
            raw,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            decision: DecisionCode::Error,
            log: vec![message.into()],
            obsids: Vec::new(),
            trigger_id: None,
            raw: None,
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.decision == DecisionCode::Triggered
    }
}
