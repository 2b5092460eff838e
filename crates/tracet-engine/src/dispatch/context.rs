use tracet_core::decision::ProposalDecision;
use tracet_core::errors::PolicyError;
use tracet_core::event::Event;
use tracet_core::proposal::Proposal;
use tracet_core::types::TriggerOn;

/// Request flags shared by every dispatch of one observation cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservationContext {
    pub vcsmode: bool,
    pub obsname: String,
    pub pretend: bool,
    pub buffered: bool,
}

/// Derive request flags from the proposal and the trigger's events.
///
/// `events` are newest first; the first one decides test handling.
///
/// Algorithm:
/// 1. `vcsmode` when the telescope name ends with `VCS`
/// 2. `obsname` is the distinct event telescopes (first-seen order) joined by
///    `_`, then `_{trig_id}`
/// 3. Test events are refused unless the proposal accepts both kinds
/// 4. Real events on BOTH/REAL_ONLY proposals observe for real; everything
///    else pretends
pub fn prepare_observation_context(
    proposal: &Proposal,
    decision: &ProposalDecision,
    events: &[Event],
) -> Result<ObservationContext, PolicyError> {
    let vcsmode = proposal.telescope_settings.telescope.is_vcs();

    let mut telescopes: Vec<&str> = Vec::new();
    for event in events {
        if !telescopes.contains(&event.telescope.as_str()) {
            telescopes.push(&event.telescope);
        }
    }
    let obsname = format!("{}_{}", telescopes.join("_"), decision.trig_id);

    let is_test = events.first().is_some_and(Event::is_test);
    if is_test && proposal.testing != TriggerOn::Both {
        return Err(PolicyError::TestEventRejected(proposal.proposal_id.clone()));
    }
    let pretend = is_test || proposal.testing == TriggerOn::PretendReal;

    Ok(ObservationContext {
        vcsmode,
        obsname,
        pretend,
        buffered: false,
    })
}
