//! Per-source observing policies.
//!
//! Each source class has a fixed chain of steps over an [`EvaluationContext`].
//! The first decisive step sets `stop` plus one of trigger, debug or pending;
//! later steps check `stop` and leave a stopped context alone.

pub mod context;
pub mod grb;
pub mod gw;
pub mod nu;

use chrono::{DateTime, Utc};
use tracing::debug;

use tracet_core::decision::{reason_line, ProposalDecision};
use tracet_core::event::{Event, EventGroup};
use tracet_core::proposal::source::SourcePolicy;
use tracet_core::proposal::Proposal;
use tracet_core::types::SourceType;

pub use self::context::{EvaluationContext, PolicyOutcome, Step};

/// Run the proposal's source chain against one event.
///
/// `dec` is the decision's best-known declination.
pub fn evaluate(
    event: &Event,
    proposal: &Proposal,
    dec: Option<f64>,
    now: DateTime<Utc>,
) -> PolicyOutcome {
    let settings = &proposal.telescope_settings;
    match &proposal.source {
        SourcePolicy::Grb(params) => {
            let mut c = EvaluationContext::new(params, settings, event, dec, now);
            c.run(grb::GRB_STEPS);
            c.into_outcome()
        }
        SourcePolicy::Gw(params) => {
            let mut c = EvaluationContext::new(params, settings, event, dec, now);
            c.run(gw::GW_STEPS);
            c.into_outcome()
        }
        SourcePolicy::Nu(params) => {
            let mut c = EvaluationContext::new(params, settings, event, dec, now);
            c.run(nu::NU_STEPS);
            c.into_outcome()
        }
        SourcePolicy::Fs => PolicyOutcome {
            trigger: true,
            log: reason_line(now, event.id, "Flare star proposals always trigger."),
            ..Default::default()
        },
    }
}

/// Decide whether a proposal should react to an event of its group.
///
/// Algorithm:
/// 1. Event telescope must pass the proposal's filter
/// 2. Flare-star proposals trigger on flare-star groups outright
/// 3. Source type, stream and class (GRB/GW/NU) must all match, then the
///    source chain decides
/// 4. Anything else is logged as out of scope with no verdict
pub fn worth_observing(
    event: &Event,
    group: &EventGroup,
    proposal: &Proposal,
    decision: &ProposalDecision,
    now: DateTime<Utc>,
) -> PolicyOutcome {
    if !proposal.accepts_event_telescope(&event.telescope) {
        return PolicyOutcome {
            log: reason_line(
                now,
                event.id,
                &format!(
                    "This proposal does not trigger on events from {}.",
                    event.telescope
                ),
            ),
            ..Default::default()
        };
    }

    let group_type = group.source_type;
    let proposal_type = proposal.source_type();

    if proposal_type == SourceType::Fs && group_type == Some(SourceType::Fs) {
        let name = group.source_name.as_deref().unwrap_or_default();
        return PolicyOutcome {
            trigger: true,
            log: reason_line(now, event.id, &format!("Triggering on Flare Star {name}.")),
            ..Default::default()
        };
    }

    let stream = event.stream();
    let in_scope = group_type == Some(proposal_type)
        && proposal.accepts_stream(&stream)
        && matches!(
            proposal_type,
            SourceType::Grb | SourceType::Gw | SourceType::Nu
        );
    if in_scope {
        let outcome = evaluate(event, proposal, decision.dec, now);
        debug!(
            proposal = %proposal.proposal_id,
            event_id = event.id,
            stream = %stream,
            verdict = ?outcome.verdict(),
            "policy evaluated"
        );
        return outcome;
    }

    let label = group_type.map(|t| t.as_str()).unwrap_or("None");
    PolicyOutcome {
        log: reason_line(
            now,
            event.id,
            &format!("This proposal does not observe {label}s."),
        ),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use chrono::TimeZone;
    use tracet_core::errors::Verdict;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn proposal(name: &str) -> Proposal {
        catalog::builtin()
            .into_iter()
            .find(|p| p.proposal_id == name)
            .unwrap()
    }

    fn setup(event: &Event, proposal: &Proposal) -> (EventGroup, ProposalDecision) {
        let group = EventGroup::from_event(1, event);
        let decision = ProposalDecision::pending(1, proposal, &group, now());
        (group, decision)
    }

    #[test]
    fn wrong_event_telescope_is_out_of_scope() {
        let p = proposal("ATCA_HESS_GRBs");
        let event = Event {
            id: 2,
            telescope: "SWIFT".into(),
            event_type: "BAT_GRB_Pos".into(),
            source_type: Some(SourceType::Grb),
            ..Default::default()
        };
        let (group, decision) = setup(&event, &p);
        let out = worth_observing(&event, &group, &p, &decision, now());
        assert_eq!(out.verdict(), None);
        assert!(out.log.contains("This proposal does not trigger on events from SWIFT."));
    }

    #[test]
    fn unknown_stream_is_out_of_scope() {
        let p = proposal("MWA_VCS_GRB_swif");
        let event = Event {
            id: 2,
            telescope: "SWIFT".into(),
            event_type: "Unknown".into(),
            source_type: Some(SourceType::Grb),
            ..Default::default()
        };
        let (group, decision) = setup(&event, &p);
        let out = worth_observing(&event, &group, &p, &decision, now());
        assert_eq!(out.verdict(), None);
        assert!(out.log.contains("This proposal does not observe GRBs."));
    }

    #[test]
    fn matching_stream_runs_source_chain() {
        let p = proposal("MWA_VCS_GRB_swif");
        let event = Event {
            id: 2,
            telescope: "SWIFT".into(),
            event_type: "BAT_GRB_Pos".into(),
            source_type: Some(SourceType::Grb),
            duration: Some(1.0),
            pos_error: Some(0.01),
            swift_rate_signif: Some(9.0),
            ..Default::default()
        };
        let (group, decision) = setup(&event, &p);
        let out = worth_observing(&event, &group, &p, &decision, now());
        assert_eq!(out.verdict(), Some(Verdict::Trigger));
    }

    #[test]
    fn flare_star_proposal_triggers_on_flare_star_group() {
        let mut p = proposal("test2_neutrino");
        p.source = SourcePolicy::Fs;
        p.event_telescope = None;
        let event = Event {
            id: 5,
            telescope: "XMM".into(),
            source_type: Some(SourceType::Fs),
            source_name: Some("AD Leo".into()),
            ..Default::default()
        };
        let (group, decision) = setup(&event, &p);
        let out = worth_observing(&event, &group, &p, &decision, now());
        assert!(out.trigger);
        assert!(out.log.contains("Triggering on Flare Star AD Leo."));
    }

    #[test]
    fn flare_star_chain_always_triggers() {
        let mut p = proposal("test2_neutrino");
        p.source = SourcePolicy::Fs;
        let out = evaluate(&Event::default(), &p, None, now());
        assert!(out.trigger && !out.debug && !out.pending);
    }
}
