use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{info, warn};

use tracet_core::decision::{reason_line, ProposalDecision};
use tracet_core::event::Event;
use tracet_core::observation::{DispatchOutcome, ObservationRequest, SubArrays};
use tracet_core::proposal::source::SourcePolicy;
use tracet_core::proposal::telescope::MwaSettings;
use tracet_core::proposal::Proposal;
use tracet_core::traits::TelescopeDispatcher;
use tracet_core::types::{DecisionCode, SourceType, TelescopeFamily, TriggerOn};

use crate::dispatch::{check_horizon, prepare_observation_context, ObservationContext};
use crate::skymap::pointings::{
    default_sub_arrays, round_to_nearest_modulo_8, should_repoint, sub_arrays_from, Pointing,
    POINTING_SEPARATION_DEG,
};
use crate::skymap::pointings_for;

use super::machine::Pass;
use super::Engine;

/// Reason stored on the observation of a buffer dump.
pub const BUFFER_OBSERVATION_REASON: &str = "This is a buffer observation ID";

/// One observation cycle for a single decision.
///
/// Requests borrow the decision, so reasoning lines collect in `log` and are
/// appended once the cycle ends.
struct Cycle<'a> {
    engine: &'a Engine<'a>,
    proposal: &'a Proposal,
    decision: &'a ProposalDecision,
    dispatcher: &'a dyn TelescopeDispatcher,
    latest: &'a Event,
    event_id: u64,
    now: DateTime<Utc>,
    log: String,
    /// Outcome of the last non-buffer dispatch.
    decision_code: Option<DecisionCode>,
}

impl<'a> Cycle<'a> {
    fn note(&mut self, message: &str) {
        self.log.push_str(&reason_line(self.now, self.event_id, message));
    }

    fn request(&self, context: &ObservationContext, reason: String) -> ObservationRequest<'a> {
        ObservationRequest {
            proposal: self.proposal,
            decision: self.decision,
            event_id: self.event_id,
            obsname: context.obsname.clone(),
            pretend: context.pretend,
            vcsmode: context.vcsmode,
            buffered: context.buffered,
            sub_arrays: None,
            exptime: None,
            nobs: self
                .proposal
                .telescope_settings
                .as_mwa()
                .map_or(1, |mwa| mwa.nobs),
            reason,
            sent_at: self.now,
        }
    }

    fn dispatch(&mut self, request: &ObservationRequest<'_>) -> DispatchOutcome {
        let outcome = self.dispatcher.trigger(request);
        for line in &outcome.log {
            self.note(line);
        }
        outcome
    }

    /// Persist the first scheduled id of a successful dispatch.
    fn save(
        &self,
        request: &ObservationRequest<'_>,
        outcome: &DispatchOutcome,
        reason: Option<&str>,
    ) -> Result<()> {
        if !outcome.is_triggered() {
            return Ok(());
        }
        let Some(obsid) = outcome.obsids.first() else {
            warn!(trig_id = %self.decision.trig_id, "scheduler reported success without an obsid");
            return Ok(());
        };
        let trigger_id = outcome
            .trigger_id
            .clone()
            .unwrap_or_else(|| rand::thread_rng().gen_range(10000..99999).to_string());
        let mut observation = self
            .dispatcher
            .observation(request, &trigger_id, obsid, outcome);
        if let Some(reason) = reason {
            observation.reason = reason.to_string();
        }
        self.engine
            .gateway
            .create_observation(&observation)
            .with_context(|| format!("cannot save observation {obsid}"))
    }

    /// Send a main (non-buffer) request, keep its code and save the result.
    fn observe(&mut self, request: &ObservationRequest<'_>) -> Result<()> {
        let outcome = self.dispatch(request);
        self.note("Saving observation result.");
        self.decision_code = Some(outcome.decision);
        self.save(request, &outcome, None)
    }

    fn elapsed_seconds(&self) -> Option<f64> {
        let observed = self.latest.event_observed?;
        Some((self.now - observed).num_milliseconds() as f64 / 1000.0)
    }
}

impl Engine<'_> {
    /// Horizon-gate and dispatch the observations of one decision.
    ///
    /// Returns the decision code the cycle ends in; a cycle with no main
    /// dispatch ends Ignored.
    ///
    /// Algorithm:
    /// 1. MWA proposals check the source altitude; below the limit at both
    ///    ends of the exposure means Ignored with no request
    /// 2. MWA GW proposals run the buffer-dump, early-warning, skymap and
    ///    skymap-repoint flow
    /// 3. Other MWA proposals and ATCA proposals dispatch once and save
    pub(crate) fn trigger_observation(
        &self,
        decision: &mut ProposalDecision,
        proposal: &Proposal,
        pass: &Pass<'_>,
        reason: &str,
    ) -> Result<DecisionCode> {
        let event_id = pass.event.id;
        if let Some(check) = check_horizon(proposal, decision, pass.now) {
            for message in &check.messages {
                decision.append_reason(pass.now, event_id, message);
            }
            decision.alt = Some(check.start.alt);
            decision.az = Some(check.start.az);
            if check.is_below() {
                info!(
                    trig_id = %decision.trig_id,
                    proposal = %proposal.proposal_id,
                    alt = check.start.alt,
                    "source below horizon limit"
                );
                return Ok(DecisionCode::Ignored);
            }
        }

        let family = proposal.telescope_settings.family();
        let dispatcher = self.dispatchers.get(family)?;
        let latest = pass.events.first().unwrap_or(pass.event);

        let snapshot = decision.clone();
        let mut cycle = Cycle {
            engine: self,
            proposal,
            decision: &snapshot,
            dispatcher,
            latest,
            event_id,
            now: pass.now,
            log: String::new(),
            decision_code: None,
        };

        let result = match family {
            TelescopeFamily::Mwa => {
                let context = prepare_observation_context(proposal, &snapshot, pass.events)?;
                if proposal.source_type() == SourceType::Gw {
                    observe_mwa_gw(&mut cycle, context, pass.events.len())
                } else {
                    let request = cycle.request(&context, reason.to_string());
                    cycle.observe(&request)
                }
            }
            TelescopeFamily::Atca => observe_atca(&mut cycle, reason),
        };

        decision.decision_reason.push_str(&cycle.log);
        result?;
        match cycle.decision_code {
            Some(code) => Ok(code),
            None if snapshot.decision == DecisionCode::Triggered => {
                info!(
                    trig_id = %decision.trig_id,
                    proposal = %proposal.proposal_id,
                    "nothing dispatched, keeping earlier trigger"
                );
                Ok(DecisionCode::Triggered)
            }
            None => Ok(DecisionCode::Ignored),
        }
    }
}

/// Gravitational-wave flow for MWA.
///
/// The first event of a trigger dumps the voltage buffer, then observes
/// either the default sub-arrays (early warning) or the skymap's best
/// pointings. Later events with a skymap repoint when the new pointings moved.
fn observe_mwa_gw(
    cycle: &mut Cycle<'_>,
    mut context: ObservationContext,
    event_count: usize,
) -> Result<()> {
    let proposal = cycle.proposal;
    let mwa = proposal
        .telescope_settings
        .as_mwa()
        .context("MWA proposal without MWA settings")?;
    let trig_id = cycle.latest.trig_id.clone();

    if event_count == 1 {
        let message = "First event so sending dump MWA buffer request to MWA";
        cycle.note(message);
        context.buffered = true;
        let request = cycle.request(&context, format!("{trig_id} - {message}"));
        let outcome = cycle.dispatch(&request);
        cycle.note("Saving buffer observation result.");
        cycle.save(&request, &outcome, Some(BUFFER_OBSERVATION_REASON))?;
        context.buffered = false;

        if cycle.latest.is_early_warning() {
            observe_early_warning(cycle, &context, mwa)?;
        } else if cycle.latest.lvc_skymap_fits.is_some() {
            observe_skymap(cycle, &context, mwa)?;
        }
    }

    if event_count > 1 {
        if let Some(skymap) = cycle.latest.lvc_skymap_fits.clone() {
            repoint_from_skymap(cycle, &context, &skymap)?;
        }
    }
    Ok(())
}

fn observe_early_warning(
    cycle: &mut Cycle<'_>,
    context: &ObservationContext,
    mwa: &MwaSettings,
) -> Result<()> {
    let early = match &cycle.proposal.source {
        SourcePolicy::Gw(params) => params.early_observation_time_seconds,
        _ => return Ok(()),
    };
    let sub_arrays = default_sub_arrays(mwa, cycle.now);
    let Some(elapsed) = cycle.elapsed_seconds() else {
        cycle.note("Early warning has no event time so not making an observation.");
        return Ok(());
    };
    let early = early as f64;
    if elapsed >= early {
        info!(trig_id = %cycle.latest.trig_id, elapsed, early, "early warning too old to observe");
        return Ok(());
    }

    let est = round_to_nearest_modulo_8(early - elapsed);
    cycle.note(&format!(
        "Event time was {elapsed} seconds ago, early observation proposal setting is {early} seconds so making an observation of {est} seconds."
    ));
    cycle.note("Sending observation request to MWA.");
    let mut request = cycle.request(
        context,
        format!("{} - First event is an Early Warning so ignoring skymap", cycle.latest.trig_id),
    );
    request.sub_arrays = Some(sub_arrays);
    request.exptime = Some(est.max(0.0) as u32);
    cycle.observe(&request)
}

fn skymap_sub_arrays(cycle: &mut Cycle<'_>, skymap: &str) -> Option<(SubArrays, Vec<Pointing>)> {
    let pointings = match pointings_for(cycle.engine.skymaps, skymap, cycle.engine.spots) {
        Ok(pointings) => pointings,
        Err(e) => {
            warn!(trig_id = %cycle.latest.trig_id, skymap, error = %e, "cannot get MWA pointings from skymap");
            cycle.note(&format!("Error getting MWA pointings from skymap: {e}."));
            return None;
        }
    };
    match sub_arrays_from(&pointings) {
        Ok(sub_arrays) => Some((sub_arrays, pointings)),
        Err(e) => {
            warn!(trig_id = %cycle.latest.trig_id, skymap, error = %e, "cannot build sub-arrays from skymap");
            cycle.note(&format!("Error getting MWA pointings from skymap: {e}."));
            None
        }
    }
}

fn observe_skymap(
    cycle: &mut Cycle<'_>,
    context: &ObservationContext,
    mwa: &MwaSettings,
) -> Result<()> {
    let Some(skymap) = cycle.latest.lvc_skymap_fits.clone() else {
        return Ok(());
    };
    let Some((sub_arrays, _)) = skymap_sub_arrays(cycle, &skymap) else {
        return Ok(());
    };
    let max = cycle.proposal.telescope_settings.maximum_observation_time_seconds as f64;
    let elapsed = cycle.elapsed_seconds().unwrap_or(0.0);

    if elapsed >= max {
        cycle.note(&format!(
            "Event time was {elapsed} seconds ago, maximum_observation_time_second is {max} so not making an observation."
        ));
        return Ok(());
    }

    let est = round_to_nearest_modulo_8(max - elapsed);
    let nobs = ((est / f64::from(mwa.exptime.max(1))).floor() as u32).max(1);
    cycle.note(&format!(
        "Event time was {elapsed} seconds ago, maximum_observation_time_seconds is {max} seconds so making an observation of {est} seconds."
    ));
    cycle.note("Sending sub array observation request to MWA.");
    let mut request = cycle.request(
        context,
        format!("{} - Event contains a skymap", cycle.latest.trig_id),
    );
    request.sub_arrays = Some(sub_arrays);
    request.nobs = nobs;
    cycle.observe(&request)
}

fn repoint_from_skymap(
    cycle: &mut Cycle<'_>,
    context: &ObservationContext,
    skymap: &str,
) -> Result<()> {
    let telescope = cycle.proposal.telescope_name().to_string();
    let latest_obs = cycle
        .engine
        .gateway
        .latest_observation(&telescope)
        .with_context(|| format!("cannot fetch latest {telescope} observation"))?;
    let Some(current) = latest_obs.and_then(|o| o.mwa_sub_arrays) else {
        cycle.note("Could not find sub array position on previous observation.");
        return Ok(());
    };
    cycle.note("New event has skymap.");

    let Some((sub_arrays, pointings)) = skymap_sub_arrays(cycle, skymap) else {
        return Ok(());
    };
    if !should_repoint(&current, &pointings, POINTING_SEPARATION_DEG) {
        cycle.note(&format!(
            "New skymap is NOT more than {POINTING_SEPARATION_DEG} degrees of previous observation pointing."
        ));
        cycle.decision_code = Some(DecisionCode::Triggered);
        return Ok(());
    }

    cycle.note(&format!(
        "New skymap is more than {POINTING_SEPARATION_DEG} degrees of previous observation pointing."
    ));
    cycle.note("Sending sub array observation request to MWA.");
    let mut request = cycle.request(
        context,
        format!("{} - Updating observation positions based on event.", cycle.latest.trig_id),
    );
    request.sub_arrays = Some(sub_arrays);
    cycle.observe(&request)
}

/// ATCA dispatches once and saves every returned id.
fn observe_atca(cycle: &mut Cycle<'_>, reason: &str) -> Result<()> {
    let context = ObservationContext {
        vcsmode: false,
        obsname: cycle.decision.trig_id.clone(),
        pretend: cycle.proposal.testing == TriggerOn::PretendReal,
        buffered: false,
    };
    let request = cycle.request(&context, reason.to_string());
    let outcome = cycle.dispatch(&request);
    cycle.decision_code = Some(outcome.decision);
    for obsid in &outcome.obsids {
        let observation = cycle.dispatcher.observation(&request, obsid, obsid, &outcome);
        cycle
            .engine
            .gateway
            .create_observation(&observation)
            .with_context(|| format!("cannot save ATCA observation {obsid}"))?;
        cycle.note("Saving observation result for ATCA.");
    }
    Ok(())
}
