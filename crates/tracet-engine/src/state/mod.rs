//! Decision state: event grouping, the per-proposal state machine, the
//! observation flows it drives, and the file-backed store.

pub mod atomic;
pub mod audit_log;
pub mod grouping;
pub mod machine;
pub mod observe;
pub mod store;

use serde::Serialize;

use tracet_core::proposal::Proposal;
use tracet_core::traits::{AlertSink, EventStore, ObservationGateway, SkymapSource};
use tracet_core::types::DecisionCode;

use crate::dispatch::DispatchRegistry;
use crate::skymap::pointings::Spot;

pub use self::store::LocalStore;

/// Everything one processing pass reads from and writes to.
///
/// The catalog is read-only; every side effect goes through the store, the
/// gateway, the alert sink or a dispatcher.
pub struct Engine<'a> {
    pub proposals: &'a [Proposal],
    pub store: &'a dyn EventStore,
    pub gateway: &'a dyn ObservationGateway,
    pub alerts: &'a dyn AlertSink,
    pub dispatchers: &'a DispatchRegistry,
    pub skymaps: &'a dyn SkymapSource,
    /// Ground spots skymap pointings are chosen from.
    pub spots: &'a [Spot],
}

impl std::fmt::Debug for Engine<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("proposals", &self.proposals.len())
            .field("dispatchers", &self.dispatchers.families())
            .finish_non_exhaustive()
    }
}

/// What happened to one decision during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    /// Policy ran and a decision was made.
    Evaluated,
    /// Position moved past the repointing limit and a new request went out.
    Repointed,
    /// Previously canceled; only the log changed.
    Canceled,
    /// Nothing to do.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionReport {
    pub decision_id: u64,
    pub proposal: String,
    pub previous: DecisionCode,
    pub decision: DecisionCode,
    pub action: DecisionAction,
}

/// Summary of one `process_event` pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessReport {
    pub trig_id: String,
    pub event_id: u64,
    pub event_group_id: u64,
    /// Every event of the trigger is ignored, so nothing was evaluated.
    pub skipped: bool,
    pub decisions: Vec<DecisionReport>,
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde_json::{json, Value};

    use tracet_core::decision::ProposalDecision;
    use tracet_core::errors::{DispatchError, SkymapError};
    use tracet_core::event::Event;
    use tracet_core::proposal::telescope::Telescope;
    use tracet_core::types::SourceType;

    use super::*;
    use crate::catalog;
    use crate::config::AtcaEndpoint;
    use crate::dispatch::atca::AtcaDispatcher;
    use crate::dispatch::mwa::MwaDispatcher;
    use crate::dispatch::transport::testutil::FakeTransport;
    use crate::skymap::coords::{altaz_to_radec, angular_separation};
    use crate::skymap::fits::testutil::sky_map;
    use crate::skymap::pointings::{ground_spots, reference_time};
    use crate::state::observe::BUFFER_OBSERVATION_REASON;

    const GW_PROPOSAL: u64 = 14;
    const GRB_PROPOSAL: u64 = 7;

    struct Maps(HashMap<String, Vec<u8>>);

    impl SkymapSource for Maps {
        fn fetch(&self, reference: &str) -> Result<Vec<u8>, SkymapError> {
            self.0.get(reference).cloned().ok_or_else(|| SkymapError::Fetch {
                reference: reference.to_string(),
                reason: "unknown map".into(),
            })
        }
    }

    struct Harness {
        store: LocalStore,
        _dir: tempfile::TempDir,
        mwa: FakeTransport,
        registry: DispatchRegistry,
        proposals: Vec<Proposal>,
        maps: Maps,
        spots: Vec<Spot>,
    }

    impl Harness {
        fn new(replies: Vec<Result<Option<Value>, DispatchError>>) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = LocalStore::open(dir.path()).unwrap();
            let mwa = FakeTransport::replying(replies);
            let registry = DispatchRegistry::new()
                .with(Box::new(MwaDispatcher::new(
                    Box::new(mwa.clone()),
                    "http://mwa/trigger",
                )))
                .with(Box::new(AtcaDispatcher::new(
                    Box::new(FakeTransport::default()),
                    AtcaEndpoint::from_base_url("http://atca/api/"),
                )));
            Self {
                store,
                _dir: dir,
                mwa,
                registry,
                proposals: catalog::builtin(),
                maps: Maps(HashMap::new()),
                spots: ground_spots(),
            }
        }

        fn engine(&self) -> Engine<'_> {
            Engine {
                proposals: &self.proposals,
                store: &self.store,
                gateway: &self.store,
                alerts: &self.store,
                dispatchers: &self.registry,
                skymaps: &self.maps,
                spots: &self.spots,
            }
        }

        fn decision(&self, proposal_id: u64) -> ProposalDecision {
            self.store
                .snapshot()
                .unwrap()
                .decisions
                .into_iter()
                .find(|d| d.proposal_id == proposal_id)
                .unwrap()
        }

        fn urls(&self) -> Vec<String> {
            self.mwa.sent.borrow().iter().map(|s| s.0.clone()).collect()
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn ok_reply(obsid: u64) -> Result<Option<Value>, DispatchError> {
        Ok(Some(json!({
            "success": true,
            "trigger_id": obsid.to_string(),
            "obsid_list": [obsid],
        })))
    }

    fn swift_grb(trig_id: &str, alt: f64) -> Event {
        let (ra, dec) = altaz_to_radec(alt, 0.0, &Telescope::mwa_vcs(), now());
        Event {
            trig_id: trig_id.into(),
            telescope: "SWIFT".into(),
            event_type: "BAT_GRB_Pos".into(),
            role: Some("observation".into()),
            source_type: Some(SourceType::Grb),
            duration: Some(1.0),
            pos_error: Some(0.01),
            swift_rate_signif: Some(9.0),
            ra: Some(ra),
            dec: Some(dec),
            event_observed: Some(now() - Duration::seconds(60)),
            ..Default::default()
        }
    }

    fn lvc(trig_id: &str, event_type: &str, skymap: Option<&str>) -> Event {
        Event {
            trig_id: trig_id.into(),
            telescope: "LVC".into(),
            event_type: event_type.into(),
            role: Some("observation".into()),
            source_type: Some(SourceType::Gw),
            event_observed: Some(now() - Duration::seconds(60)),
            lvc_skymap_fits: skymap.map(str::to_string),
            ..Default::default()
        }
    }

    /// Gaussian blob centred on the sky position of a ground alt/az at the
    /// pointing reference time.
    fn blob_at(alt: f64, az: f64) -> Vec<u8> {
        let (ra0, dec0) = altaz_to_radec(alt, az, &crate::skymap::coords::mwa_site(), reference_time());
        sky_map(4, move |ra, dec| {
            let sep = angular_separation(ra, dec, ra0, dec0);
            (-(sep * sep) / 200.0).exp() * 100.0
        })
    }

    #[test]
    fn early_warning_dumps_buffer_then_observes_sub_arrays() {
        let mut h = Harness::new(vec![ok_reply(1001), ok_reply(1002)]);
        let gw = h.proposals.iter_mut().find(|p| p.id == GW_PROPOSAL).unwrap();
        gw.streams.push("LVC_EARLYWARNING".into());

        let report = h
            .engine()
            .process_event(&lvc("S240601a", "EarlyWarning", None), now())
            .unwrap();

        assert!(!report.skipped);
        assert_eq!(report.decisions.len(), h.proposals.len());
        assert_eq!(
            h.urls(),
            vec!["http://mwa/trigger/triggerbuffer", "http://mwa/trigger/triggervcs"]
        );

        let state = h.store.snapshot().unwrap();
        assert_eq!(state.observations.len(), 2);
        assert_eq!(state.observations[0].reason, BUFFER_OBSERVATION_REASON);
        assert!(state.observations[0].mwa_sub_arrays.is_none());
        assert_eq!(
            state.observations[1].mwa_sub_arrays.as_ref().map(|s| s.ra.len()),
            Some(4)
        );

        let d = h.decision(GW_PROPOSAL);
        assert_eq!(d.decision, DecisionCode::Triggered);
        assert!(d.decision_reason.contains("Early warning event so triggering."));
        assert!(d.decision_reason.contains("making an observation of 840 seconds"));

        let body = &h.mwa.sent.borrow()[1].1;
        assert_eq!(body["exptime"], 840);
    }

    #[test]
    fn replayed_early_warning_keeps_trigger() {
        let mut h = Harness::new(vec![ok_reply(1001), ok_reply(1002)]);
        let gw = h.proposals.iter_mut().find(|p| p.id == GW_PROPOSAL).unwrap();
        gw.streams.push("LVC_EARLYWARNING".into());
        let engine = h.engine();
        let notice = lvc("S240601a", "EarlyWarning", None);

        let first = engine.process_event(&notice, now()).unwrap();
        let again = engine.process_event(&notice, now()).unwrap();

        assert_eq!(first.event_id, again.event_id);
        assert!(again
            .decisions
            .iter()
            .all(|d| d.action == DecisionAction::Unchanged && d.previous == d.decision));
        assert_eq!(h.store.snapshot().unwrap().events.len(), 1);
        assert_eq!(h.urls().len(), 2);
        assert_eq!(h.decision(GW_PROPOSAL).decision, DecisionCode::Triggered);
    }

    #[test]
    fn later_early_warning_without_skymap_keeps_trigger() {
        let mut h = Harness::new(vec![ok_reply(1001), ok_reply(1002)]);
        let gw = h.proposals.iter_mut().find(|p| p.id == GW_PROPOSAL).unwrap();
        gw.streams.push("LVC_EARLYWARNING".into());
        let engine = h.engine();

        engine
            .process_event(&lvc("S240601b", "EarlyWarning", None), now())
            .unwrap();
        let mut next = lvc("S240601b", "EarlyWarning", None);
        next.sequence_num = Some(2);
        let report = engine.process_event(&next, now()).unwrap();

        let entry = report
            .decisions
            .iter()
            .find(|d| d.decision_id == h.decision(GW_PROPOSAL).id)
            .unwrap();
        assert_eq!(entry.previous, DecisionCode::Triggered);
        assert_eq!(entry.decision, DecisionCode::Triggered);
        assert_eq!(h.store.snapshot().unwrap().events.len(), 2);
        assert_eq!(h.urls().len(), 2);
    }

    #[test]
    fn group_without_decisions_takes_better_position() {
        let h = Harness::new(vec![ok_reply(1)]);
        let engine = h.engine();
        let mut quiet = swift_grb("GRB8", 90.0);
        quiet.ignored = true;
        assert!(engine.process_event(&quiet, now()).unwrap().skipped);

        let mut precise = swift_grb("GRB8", 70.0);
        precise.pos_error = Some(0.001);
        engine.process_event(&precise, now()).unwrap();

        let state = h.store.snapshot().unwrap();
        let group = state.groups.iter().find(|g| g.trig_id == "GRB8").unwrap();
        assert_eq!((group.ra, group.dec), (precise.ra, precise.dec));
        assert_eq!(group.pos_error, Some(0.001));
        assert_eq!(h.decision(GRB_PROPOSAL).ra, precise.ra);
    }

    #[test]
    fn skymap_event_observes_then_repoints_on_moved_skymap() {
        let mut h = Harness::new(vec![ok_reply(1), ok_reply(2), ok_reply(3), ok_reply(4)]);
        h.maps.0.insert("first.fits".into(), blob_at(90.0, 0.0));
        h.maps.0.insert("same.fits".into(), blob_at(90.0, 0.0));
        h.maps.0.insert("moved.fits".into(), blob_at(30.0, 180.0));
        let engine = h.engine();

        engine
            .process_event(&lvc("S2", "Preliminary", Some("first.fits")), now())
            .unwrap();
        assert_eq!(h.urls().len(), 2);
        assert_eq!(h.decision(GW_PROPOSAL).decision, DecisionCode::Triggered);

        engine
            .process_event(&lvc("S2", "Update", Some("same.fits")), now())
            .unwrap();
        assert_eq!(h.urls().len(), 2);
        let d = h.decision(GW_PROPOSAL);
        assert_eq!(d.decision, DecisionCode::Triggered);
        assert!(d.decision_reason.contains("New skymap is NOT more than"));

        engine
            .process_event(&lvc("S2", "Update", Some("moved.fits")), now())
            .unwrap();
        assert_eq!(h.urls().len(), 3);
        assert!(h.urls()[2].ends_with("/triggervcs"));
        let state = h.store.snapshot().unwrap();
        assert_eq!(state.observations.len(), 3);
        assert!(state.observations[2].reason.contains("Updating observation positions"));
    }

    #[test]
    fn unreadable_skymap_is_logged_not_fatal() {
        let h = Harness::new(vec![ok_reply(1)]);
        h.engine()
            .process_event(&lvc("S3", "Preliminary", Some("missing.fits")), now())
            .unwrap();

        assert_eq!(h.urls(), vec!["http://mwa/trigger/triggerbuffer"]);
        let d = h.decision(GW_PROPOSAL);
        assert_eq!(d.decision, DecisionCode::Ignored);
        assert!(d.decision_reason.contains("Error getting MWA pointings from skymap"));
    }

    #[test]
    fn source_below_horizon_is_ignored_without_dispatch() {
        let h = Harness::new(vec![ok_reply(1)]);
        let mut event = swift_grb("GRB1", 45.0);
        event.dec = Some(80.0);
        h.engine().process_event(&event, now()).unwrap();

        assert!(h.urls().is_empty());
        let d = h.decision(GRB_PROPOSAL);
        assert_eq!(d.decision, DecisionCode::Ignored);
        assert!(d.decision_reason.contains("Not triggering due to horizon limit"));
        assert!(d.alt.unwrap() < 0.0);
    }

    #[test]
    fn replay_within_limit_is_idempotent_and_far_move_repoints() {
        let h = Harness::new(vec![ok_reply(1), ok_reply(2)]);
        let engine = h.engine();

        engine.process_event(&swift_grb("GRB2", 90.0), now()).unwrap();
        assert_eq!(h.urls(), vec!["http://mwa/trigger/triggervcs"]);
        let first = h.decision(GRB_PROPOSAL);
        assert_eq!(first.decision, DecisionCode::Triggered);

        let report = engine.process_event(&swift_grb("GRB2", 90.0), now()).unwrap();
        let entry = report.decisions.iter().find(|d| d.decision_id == first.id).unwrap();
        assert_eq!(entry.action, DecisionAction::Unchanged);
        assert_eq!(h.urls().len(), 1);
        assert_eq!(h.decision(GRB_PROPOSAL).decision_reason, first.decision_reason);

        let report = engine.process_event(&swift_grb("GRB2", 70.0), now()).unwrap();
        let entry = report.decisions.iter().find(|d| d.decision_id == first.id).unwrap();
        assert_eq!(entry.action, DecisionAction::Repointed);
        assert_eq!(h.urls().len(), 2);
        let d = h.decision(GRB_PROPOSAL);
        assert_eq!(d.decision, DecisionCode::Triggered);
        assert!(d.decision_reason.contains("Repointing because separation (20.0"));
    }

    #[test]
    fn failed_dispatch_is_error_with_debug_alert() {
        let h = Harness::new(vec![Ok(None)]);
        h.engine().process_event(&swift_grb("GRB3", 90.0), now()).unwrap();

        let d = h.decision(GRB_PROPOSAL);
        assert_eq!(d.decision, DecisionCode::Error);
        assert!(d.decision_reason.contains("Web API error, possible server error."));

        let alerts = h.store.snapshot().unwrap().alerts;
        let alert = alerts.iter().find(|a| a.prop_dec_id == d.id).unwrap();
        assert!(alert.trigger_bool && alert.debug_bool);
        assert!(h.store.snapshot().unwrap().observations.is_empty());
    }

    #[test]
    fn canceled_decision_only_logs() {
        let h = Harness::new(vec![ok_reply(1), ok_reply(2)]);
        let engine = h.engine();
        engine.process_event(&swift_grb("GRB4", 90.0), now()).unwrap();

        let mut d = h.decision(GRB_PROPOSAL);
        d.decision = DecisionCode::Canceled;
        h.store.update_decision(&d).unwrap();

        let report = engine.process_event(&swift_grb("GRB4", 60.0), now()).unwrap();
        let entry = report.decisions.iter().find(|r| r.decision_id == d.id).unwrap();
        assert_eq!(entry.action, DecisionAction::Canceled);
        assert_eq!(h.urls().len(), 1);
        let d = h.decision(GRB_PROPOSAL);
        assert_eq!(d.decision, DecisionCode::Canceled);
        assert!(d.decision_reason.contains("Previous observation canceled so not observing."));
    }

    #[test]
    fn ignored_only_trigger_is_skipped() {
        let h = Harness::new(Vec::new());
        let mut event = swift_grb("GRB5", 90.0);
        event.ignored = true;
        let report = h.engine().process_event(&event, now()).unwrap();

        assert!(report.skipped);
        assert!(report.decisions.is_empty());
        assert!(h.store.snapshot().unwrap().decisions.is_empty());
    }

    #[test]
    fn test_event_on_real_only_proposal_is_error() {
        let h = Harness::new(vec![ok_reply(1)]);
        let mut event = swift_grb("GRB6", 90.0);
        event.role = Some("test".into());
        h.engine().process_event(&event, now()).unwrap();

        assert!(h.urls().is_empty());
        let d = h.decision(GRB_PROPOSAL);
        assert_eq!(d.decision, DecisionCode::Error);
        assert!(d.decision_reason.contains("test event not accepted"));
    }
}
