use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use tracet_core::decision::{ProposalDecision, TriggerAlert};
use tracet_core::event::{Event, EventGroup};
use tracet_core::proposal::Proposal;
use tracet_core::types::DecisionCode;

use crate::policy::{worth_observing, PolicyOutcome};
use crate::skymap::coords::angular_separation;

use super::{DecisionAction, DecisionReport, Engine};

/// Reason recorded on observations made from a fresh evaluation.
pub const FIRST_OBSERVATION: &str = "First observation.";

/// Inputs shared by every decision of one pass.
#[derive(Debug, Clone, Copy)]
pub struct Pass<'e> {
    pub event: &'e Event,
    pub group: &'e EventGroup,
    /// Events of the trigger, newest first.
    pub events: &'e [Event],
    /// Decisions were created during this pass.
    pub first: bool,
    pub now: DateTime<Utc>,
}

/// Next step for a decision, picked from its stored state.
#[derive(Debug, Clone, PartialEq)]
enum Transition {
    Evaluate,
    Canceled,
    Repoint { separation: f64, limit: f64 },
    Unchanged,
}

fn next_transition(decision: &ProposalDecision, proposal: &Proposal, pass: &Pass<'_>) -> Transition {
    if pass.first {
        return Transition::Evaluate;
    }
    match decision.decision {
        DecisionCode::Canceled => Transition::Canceled,
        DecisionCode::Ignored | DecisionCode::Error => Transition::Evaluate,
        DecisionCode::Triggered | DecisionCode::Pending => {
            let Some((ra, dec)) = decision.position() else {
                return Transition::Evaluate;
            };
            let Some((event_ra, event_dec)) = pass.event.position() else {
                return Transition::Unchanged;
            };
            let separation = angular_separation(event_ra, event_dec, ra, dec);
            let limit = proposal.telescope_settings.repointing_limit;
            if separation > limit {
                Transition::Repoint { separation, limit }
            } else {
                Transition::Unchanged
            }
        }
    }
}

/// Copy the event position onto the decision, keeping the old error when the
/// event reports zero.
fn take_event_position(decision: &mut ProposalDecision, event: &Event) {
    decision.ra = event.ra;
    decision.dec = event.dec;
    decision.ra_hms = event.ra_hms.clone();
    decision.dec_dms = event.dec_dms.clone();
    if event.pos_error != Some(0.0) {
        decision.pos_error = event.pos_error;
    }
}

impl Engine<'_> {
    /// Advance one proposal decision for the pass's event.
    ///
    /// Algorithm:
    /// 1. Canceled decisions only log and persist
    /// 2. Ignored/Error decisions take the event position and re-evaluate
    /// 3. Triggered/Pending decisions repoint when the event moved past the
    ///    proposal's repointing limit, re-evaluate when no position is
    ///    stored, and otherwise stay as they are
    /// 4. Every persisted evaluation or repoint sends a trigger alert
    pub(crate) fn process_decision(
        &self,
        mut decision: ProposalDecision,
        proposal: &Proposal,
        pass: &Pass<'_>,
    ) -> Result<DecisionReport> {
        let event = pass.event;
        let previous = decision.decision;

        let action = match next_transition(&decision, proposal, pass) {
            Transition::Canceled => {
                decision.append_reason(
                    pass.now,
                    event.id,
                    "Previous observation canceled so not observing.",
                );
                self.persist(&decision)?;
                DecisionAction::Canceled
            }
            Transition::Unchanged => {
                debug!(
                    trig_id = %decision.trig_id,
                    proposal = %proposal.proposal_id,
                    decision = %decision.decision,
                    "event within repointing limit, no action"
                );
                DecisionAction::Unchanged
            }
            Transition::Repoint { separation, limit } => {
                let message = format!(
                    "Repointing because separation ({separation:.4} deg) is greater than the repointing limit ({limit:.4} deg)."
                );
                info!(
                    trig_id = %decision.trig_id,
                    proposal = %proposal.proposal_id,
                    separation,
                    limit,
                    "repointing"
                );
                take_event_position(&mut decision, event);
                decision.append_reason(pass.now, event.id, &message);
                let code = self.observe_or_error(&mut decision, proposal, pass, &message);
                decision.decision = code;
                self.persist(&decision)?;
                self.alert(&decision, true, code == DecisionCode::Error, false);
                DecisionAction::Repointed
            }
            Transition::Evaluate => {
                let recheck = matches!(previous, DecisionCode::Ignored | DecisionCode::Error);
                if !pass.first && recheck {
                    take_event_position(&mut decision, event);
                    decision.append_reason(pass.now, event.id, "Checking new Event.");
                }
                let outcome = worth_observing(event, pass.group, proposal, &decision, pass.now);
                decision.decision_reason.push_str(&outcome.log);
                self.make_trigger_decision(&mut decision, proposal, pass, outcome)?;
                DecisionAction::Evaluated
            }
        };

        Ok(DecisionReport {
            decision_id: decision.id,
            proposal: proposal.proposal_id.clone(),
            previous,
            decision: decision.decision,
            action,
        })
    }

    /// Turn a policy outcome into a stored decision code.
    ///
    /// Trigger dispatches (failures become Error), pending holds, a
    /// retraction keeps the current code, and anything else is Ignored.
    fn make_trigger_decision(
        &self,
        decision: &mut ProposalDecision,
        proposal: &Proposal,
        pass: &Pass<'_>,
        outcome: PolicyOutcome,
    ) -> Result<()> {
        let mut debug = outcome.debug;
        let code = if outcome.trigger {
            let code = self.observe_or_error(decision, proposal, pass, FIRST_OBSERVATION);
            debug |= code == DecisionCode::Error;
            code
        } else if outcome.pending {
            DecisionCode::Pending
        } else if pass.event.is_retraction() {
            decision.decision
        } else {
            DecisionCode::Ignored
        };

        info!(
            trig_id = %decision.trig_id,
            event_id = pass.event.id,
            proposal = %proposal.proposal_id,
            from = %decision.decision,
            to = %code,
            "decision made"
        );
        decision.decision = code;
        self.persist(decision)?;
        self.alert(decision, outcome.trigger, debug, outcome.pending);
        Ok(())
    }

    /// Run the observation flow; an error becomes an Error decision with the
    /// reason logged.
    fn observe_or_error(
        &self,
        decision: &mut ProposalDecision,
        proposal: &Proposal,
        pass: &Pass<'_>,
        reason: &str,
    ) -> DecisionCode {
        match self.trigger_observation(decision, proposal, pass, reason) {
            Ok(code) => code,
            Err(e) => {
                warn!(
                    trig_id = %decision.trig_id,
                    proposal = %proposal.proposal_id,
                    error = %format!("{e:#}"),
                    "observation failed"
                );
                decision.append_reason(
                    pass.now,
                    pass.event.id,
                    &format!("Error triggering observation: {e:#}."),
                );
                DecisionCode::Error
            }
        }
    }

    fn persist(&self, decision: &ProposalDecision) -> Result<()> {
        self.gateway
            .update_decision(decision)
            .with_context(|| format!("cannot update proposal decision {}", decision.id))
    }

    fn alert(&self, decision: &ProposalDecision, trigger: bool, debug: bool, pending: bool) {
        let alert = TriggerAlert {
            prop_dec_id: decision.id,
            trigger_bool: trigger,
            debug_bool: debug,
            pending_bool: pending,
        };
        if let Err(e) = self.alerts.send_trigger_alert(&alert) {
            warn!(prop_dec_id = decision.id, error = %e, "trigger alert not delivered");
        }
    }
}
