use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use tracet_core::decision::ProposalDecision;
use tracet_core::event::{Event, EventGroup};
use tracet_core::proposal::Proposal;

use super::machine::Pass;
use super::{DecisionAction, DecisionReport, Engine, ProcessReport};

impl Engine<'_> {
    /// Run one event through every proposal of its trigger.
    ///
    /// Algorithm:
    /// 1. Record the event and upsert the group for its trigger id
    /// 2. Skip the group when every one of its events is ignored
    /// 3. A replayed event with decisions already made reports them unchanged
    /// 4. Improve the group's best position from the event
    /// 5. Existing decisions are walked in proposal priority order
    /// 6. No decisions yet: one Pending decision per active proposal, the
    ///    group is un-ignored and each decision is evaluated
    /// 7. Persist the group
    pub fn process_event(&self, event: &Event, now: DateTime<Utc>) -> Result<ProcessReport> {
        let replayed = self
            .store
            .events_for(&event.trig_id)?
            .iter()
            .any(|stored| event.is_replay_of(stored));
        let event = self
            .store
            .record_event(event)
            .context("cannot record event")?;
        let trig_id = event.trig_id.clone();

        let mut group = match self.store.find_group(&trig_id)? {
            Some(group) => group,
            None => self
                .store
                .save_group(&EventGroup::from_event(0, &event))
                .with_context(|| format!("cannot create event group {trig_id}"))?,
        };
        let events = self.store.events_for(&trig_id)?;

        let mut report = ProcessReport {
            trig_id: trig_id.clone(),
            event_id: event.id,
            event_group_id: group.id,
            skipped: false,
            decisions: Vec::new(),
        };

        if events.iter().all(|e| e.ignored) {
            info!(%trig_id, event_id = event.id, "all events of trigger are ignored, skipping");
            report.skipped = true;
            return Ok(report);
        }

        let existing = self.store.decisions_for(group.id)?;
        if replayed && !existing.is_empty() {
            info!(%trig_id, event_id = event.id, "event already processed, decisions unchanged");
            for (proposal, decision) in self.in_priority_order(&trig_id, existing) {
                report.decisions.push(DecisionReport {
                    decision_id: decision.id,
                    proposal: proposal.proposal_id.clone(),
                    previous: decision.decision,
                    decision: decision.decision,
                    action: DecisionAction::Unchanged,
                });
            }
            return Ok(report);
        }

        improve_group(&mut group, &event);
        let first = existing.is_empty();
        let decisions = if first {
            info!(%trig_id, "first unignored event, creating proposal decisions");
            group.ignored = false;
            let mut created = Vec::new();
            for proposal in self.proposals.iter().filter(|p| p.active) {
                let pending = ProposalDecision::pending(0, proposal, &group, now);
                created.push(self.store.insert_decision(&pending)?);
            }
            created
        } else {
            existing
        };

        let ordered = self.in_priority_order(&trig_id, decisions);
        let pass = Pass {
            event: &event,
            group: &group,
            events: &events,
            first,
            now,
        };
        for (proposal, decision) in ordered {
            let outcome = self
                .process_decision(decision, proposal, &pass)
                .with_context(|| {
                    format!("cannot process proposal {} for {trig_id}", proposal.proposal_id)
                })?;
            report.decisions.push(outcome);
        }

        let group = self.store.save_group(&group)?;
        self.gateway
            .update_event_group(&group)
            .with_context(|| format!("cannot update event group {trig_id}"))?;
        Ok(report)
    }

    /// Pair decisions with their catalog proposals, highest priority first.
    fn in_priority_order(
        &self,
        trig_id: &str,
        decisions: Vec<ProposalDecision>,
    ) -> Vec<(&Proposal, ProposalDecision)> {
        let mut ordered = Vec::new();
        for decision in decisions {
            match self.proposals.iter().find(|p| p.id == decision.proposal_id) {
                Some(proposal) => ordered.push((proposal, decision)),
                None => warn!(
                    %trig_id,
                    decision_id = decision.id,
                    proposal_id = decision.proposal_id,
                    "decision refers to a proposal missing from the catalog"
                ),
            }
        }
        ordered.sort_by_key(|(p, _)| (p.priority, p.id));
        ordered
    }
}

/// Take the event's position when it is more precise, and advance the
/// latest observation time.
fn improve_group(group: &mut EventGroup, event: &Event) {
    if let Some(err) = event.pos_error {
        let better = err != 0.0 && group.pos_error.map_or(true, |current| err < current);
        if better {
            group.ra = event.ra;
            group.dec = event.dec;
            group.ra_hms = event.ra_hms.clone();
            group.dec_dms = event.dec_dms.clone();
            group.pos_error = Some(err);
        }
    }
    group.latest_event_observed = event.event_observed;
}
