use rand::Rng;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use tracet_core::errors::DispatchError;
use tracet_core::observation::{DispatchOutcome, Observation, ObservationRequest};
use tracet_core::proposal::telescope::MwaSettings;
use tracet_core::traits::TelescopeDispatcher;
use tracet_core::types::{SourceType, TelescopeFamily};

use super::transport::HttpTransport;

pub const CREATOR: &str = "VOEvent_Auto_Trigger";
pub const BUFFER_EXPTIME: u32 = 8;
pub const SUBARRAY_NAMES: [&str; 4] = ["all_ne", "all_nw", "all_se", "all_sw"];

/// MWA trigger web service client.
pub struct MwaDispatcher {
    transport: Box<dyn HttpTransport>,
    base_url: String,
}

impl std::fmt::Debug for MwaDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MwaDispatcher")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Which scheduler call a request becomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MwaRequestKind {
    Buffer,
    SubArray,
    Single,
}

impl MwaRequestKind {
    pub fn of(request: &ObservationRequest<'_>) -> Self {
        let gw = request.proposal.source_type() == SourceType::Gw;
        if gw && request.buffered && request.vcsmode {
            MwaRequestKind::Buffer
        } else if gw && request.sub_arrays.is_some() {
            MwaRequestKind::SubArray
        } else {
            MwaRequestKind::Single
        }
    }
}

impl MwaDispatcher {
    pub fn new(transport: Box<dyn HttpTransport>, base_url: &str) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, kind: MwaRequestKind, vcsmode: bool) -> String {
        let path = match kind {
            MwaRequestKind::Buffer => "triggerbuffer",
            _ if vcsmode => "triggervcs",
            _ => "triggerobs",
        };
        format!("{}/{path}", self.base_url)
    }
}

/// Build the scheduler request body.
///
/// Algorithm:
/// 1. Common fields from the proposal and the observation context
/// 2. Buffer dumps: one 8 second observation flagged `buffered`
/// 3. Sub-array requests: the four named sub-arrays with their ra/dec lists
/// 4. Otherwise a single pointing at the decision's position
pub fn request_body(
    request: &ObservationRequest<'_>,
    mwa: &MwaSettings,
) -> Result<Value, DispatchError> {
    let kind = MwaRequestKind::of(request);
    let mut body = Map::new();
    body.insert("project_id".into(), json!(request.proposal.project.id));
    body.insert("secure_key".into(), json!(request.proposal.project.password));
    body.insert("pretend".into(), json!(request.pretend));
    body.insert("creator".into(), json!(CREATOR));
    body.insert("obsname".into(), json!(request.obsname));
    body.insert("freqspecs".into(), json!(mwa.freqspecs));
    body.insert("avoidsun".into(), json!(true));
    body.insert("inttime".into(), json!(mwa.inttime));
    body.insert("freqres".into(), json!(mwa.freqres));
    body.insert("vcsmode".into(), json!(request.vcsmode));

    let exptime = request.exptime.unwrap_or(mwa.exptime);
    match kind {
        MwaRequestKind::Buffer => {
            body.insert("nobs".into(), json!(1));
            body.insert("exptime".into(), json!(BUFFER_EXPTIME));
            body.insert("buffered".into(), json!(true));
        }
        MwaRequestKind::SubArray => {
            let subs = request
                .sub_arrays
                .as_ref()
                .ok_or(DispatchError::MissingField("sub_arrays"))?;
            body.insert("nobs".into(), json!(request.nobs));
            body.insert("exptime".into(), json!(exptime));
            body.insert("subarray_list".into(), json!(SUBARRAY_NAMES));
            body.insert("ra".into(), json!(subs.ra));
            body.insert("dec".into(), json!(subs.dec));
            body.insert("calibrator".into(), json!(true));
            body.insert("calexptime".into(), json!(mwa.calexptime));
        }
        MwaRequestKind::Single => {
            let (ra, dec) = request
                .decision
                .position()
                .ok_or(DispatchError::MissingField("ra/dec"))?;
            body.insert("nobs".into(), json!(request.nobs));
            body.insert("exptime".into(), json!(exptime));
            body.insert("ra".into(), json!(ra));
            body.insert("dec".into(), json!(dec));
            if let Some(alt) = request.decision.alt {
                body.insert("alt".into(), json!(alt));
            }
            if let Some(az) = request.decision.az {
                body.insert("az".into(), json!(az));
            }
            body.insert("calibrator".into(), json!(true));
            body.insert("calexptime".into(), json!(mwa.calexptime));
        }
    }
    Ok(Value::Object(body))
}

/// Classify a scheduler reply into a Triggered or Error outcome.
pub fn classify(reply: Result<Option<Value>, DispatchError>) -> DispatchOutcome {
    let result = match reply {
        Err(e) => return DispatchOutcome::error(format!("Exception trying to schedule event {e}")),
        Ok(None) => return DispatchOutcome::error("Web API error, possible server error."),
        Ok(Some(result)) => result,
    };

    if !result.get("success").and_then(Value::as_bool).unwrap_or(false) {
        let log: Vec<String> = match result.get("errors") {
            Some(Value::Object(errors)) => errors.values().map(|e| format!("{}.", text(e))).collect(),
            Some(Value::Array(errors)) => errors.iter().map(|e| format!("{}.", text(e))).collect(),
            Some(other) => vec![format!("{}.", text(other))],
            None => Vec::new(),
        };
        return DispatchOutcome {
            log,
            raw: Some(result),
            ..DispatchOutcome::error("")
        };
    }

    let mut obsids: Vec<String> = result
        .get("obsid_list")
        .and_then(Value::as_array)
        .map(|ids| ids.iter().map(text).collect())
        .unwrap_or_default();
    if obsids.is_empty() {
        obsids = obsids_from_stderr(
            result
                .pointer("/schedule/stderr")
                .and_then(Value::as_str)
                .unwrap_or_default(),
        );
    }

    let trigger_id = result
        .get("trigger_id")
        .filter(|v| !v.is_null())
        .map(text)
        .filter(|id| !id.is_empty());
    DispatchOutcome {
        trigger_id,
        ..DispatchOutcome::triggered(obsids, Some(result))
    }
}

/// Scheduled ids reported on the scheduler's stderr.
pub fn obsids_from_stderr(stderr: &str) -> Vec<String> {
    let mut rng = rand::thread_rng();
    let mut obsids = Vec::new();
    for line in stderr.lines() {
        if line.starts_with("INFO:Schedule metadata for") {
            if let Some((_, rest)) = line.split_once(" for ") {
                let mut id = rest.to_string();
                id.pop();
                obsids.push(id);
            }
        } else if line.starts_with("Pretending: commands not run") {
            obsids.push(format!("P{}", rng.gen_range(1000..=9999)));
        }
    }
    obsids
}

fn text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl TelescopeDispatcher for MwaDispatcher {
    fn family(&self) -> TelescopeFamily {
        TelescopeFamily::Mwa
    }

    fn trigger(&self, request: &ObservationRequest<'_>) -> DispatchOutcome {
        let Some(mwa) = request.proposal.telescope_settings.as_mwa() else {
            return DispatchOutcome::error(format!(
                "Exception trying to schedule event {}",
                DispatchError::MissingField("MWA settings")
            ));
        };
        let kind = MwaRequestKind::of(request);
        let body = match request_body(request, mwa) {
            Ok(body) => body,
            Err(e) => return DispatchOutcome::error(format!("Exception trying to schedule event {e}")),
        };
        let url = self.endpoint(kind, request.vcsmode);
        info!(
            trig_id = %request.decision.trig_id,
            event_id = request.event_id,
            kind = ?kind,
            pretend = request.pretend,
            %url,
            "sending MWA trigger"
        );
        let outcome = classify(self.transport.post_json(&url, &body, None));
        if !outcome.is_triggered() {
            warn!(trig_id = %request.decision.trig_id, log = ?outcome.log, "MWA trigger failed");
        }
        outcome
    }

    fn observation(
        &self,
        request: &ObservationRequest<'_>,
        trigger_id: &str,
        obsid: &str,
        outcome: &DispatchOutcome,
    ) -> Observation {
        Observation {
            trigger_id: trigger_id.to_string(),
            telescope_name: request.proposal.telescope_name().to_string(),
            proposal_decision_id: request.decision.id,
            event_id: request.event_id,
            reason: request.reason.clone(),
            website_link: Some(format!(
                "http://ws.mwatelescope.org/observation/obs/?obsid={obsid}"
            )),
            request_sent_at: Some(request.sent_at),
            mwa_sub_arrays: request.sub_arrays.clone(),
            mwa_response: outcome.raw.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use crate::dispatch::transport::testutil::FakeTransport;
    use chrono::{TimeZone, Utc};
    use tracet_core::decision::ProposalDecision;
    use tracet_core::event::EventGroup;
    use tracet_core::observation::SubArrays;
    use tracet_core::proposal::Proposal;
    use tracet_core::types::DecisionCode;

    fn proposal(name: &str) -> Proposal {
        let mut p = catalog::find(&catalog::builtin(), name).unwrap().clone();
        p.project.password = "key".into();
        p
    }

    fn decision(p: &Proposal) -> ProposalDecision {
        let group = EventGroup {
            id: 2,
            trig_id: "S1".into(),
            ra: Some(10.0),
            dec: Some(-30.0),
            ..Default::default()
        };
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        ProposalDecision::pending(4, p, &group, now)
    }

    fn request<'a>(p: &'a Proposal, d: &'a ProposalDecision) -> ObservationRequest<'a> {
        ObservationRequest {
            proposal: p,
            decision: d,
            event_id: 9,
            obsname: "LVC_S1".into(),
            pretend: true,
            vcsmode: true,
            buffered: false,
            sub_arrays: None,
            exptime: None,
            nobs: 1,
            reason: "S1 - reason".into(),
            sent_at: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 1).unwrap(),
        }
    }

    fn ok_reply() -> Result<Option<Value>, DispatchError> {
        Ok(Some(json!({
            "success": true,
            "trigger_id": "TEST123",
            "obsid_list": [1399000000u64],
            "schedule": {"stderr": ""}
        })))
    }

    #[test]
    fn buffer_request_shape_and_endpoint() {
        let p = proposal("MWA_GW_NSBH");
        let d = decision(&p);
        let mut req = request(&p, &d);
        req.buffered = true;
        assert_eq!(MwaRequestKind::of(&req), MwaRequestKind::Buffer);

        let transport = FakeTransport::replying(vec![ok_reply()]);
        let dispatcher = MwaDispatcher::new(Box::new(transport.clone()), "http://mwa/trigger/");
        let outcome = dispatcher.trigger(&req);
        assert!(outcome.is_triggered());
        assert_eq!(transport.sent.borrow()[0].0, "http://mwa/trigger/triggerbuffer");
        assert_eq!(outcome.obsids, vec!["1399000000"]);
        assert_eq!(outcome.trigger_id.as_deref(), Some("TEST123"));
    }

    #[test]
    fn buffer_body_fields() {
        let p = proposal("MWA_GW_NSBH");
        let d = decision(&p);
        let mut req = request(&p, &d);
        req.buffered = true;
        let body = request_body(&req, p.telescope_settings.as_mwa().unwrap()).unwrap();
        assert_eq!(body["exptime"], 8);
        assert_eq!(body["nobs"], 1);
        assert_eq!(body["buffered"], true);
        assert_eq!(body["creator"], CREATOR);
        assert_eq!(body["secure_key"], "key");
        assert_eq!(body["avoidsun"], true);
        assert!(body.get("subarray_list").is_none());
    }

    #[test]
    fn sub_array_body_fields() {
        let p = proposal("MWA_GW_NSBH");
        let d = decision(&p);
        let mut req = request(&p, &d);
        req.sub_arrays = Some(SubArrays {
            ra: vec![1.0, 2.0, 3.0, 4.0],
            dec: vec![-1.0, -2.0, -3.0, -4.0],
        });
        req.exptime = Some(896);
        req.nobs = 3;
        let body = request_body(&req, p.telescope_settings.as_mwa().unwrap()).unwrap();
        assert_eq!(body["subarray_list"], json!(SUBARRAY_NAMES));
        assert_eq!(body["ra"], json!([1.0, 2.0, 3.0, 4.0]));
        assert_eq!(body["exptime"], 896);
        assert_eq!(body["nobs"], 3);
        assert_eq!(body["calibrator"], true);
        assert_eq!(body["calexptime"], 200.0);
    }

    #[test]
    fn non_gw_sends_single_pointing_to_vcs_endpoint() {
        let p = proposal("MWA_VCS_GRB_swif");
        let d = decision(&p);
        let mut req = request(&p, &d);
        req.buffered = true;
        assert_eq!(MwaRequestKind::of(&req), MwaRequestKind::Single);

        let transport = FakeTransport::replying(vec![ok_reply()]);
        let dispatcher = MwaDispatcher::new(Box::new(transport.clone()), "http://mwa/trigger");
        assert!(dispatcher.trigger(&req).is_triggered());
        let sent = transport.sent.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "http://mwa/trigger/triggervcs");
        assert!(sent[0].2.is_none());
        let body = request_body(&req, p.telescope_settings.as_mwa().unwrap()).unwrap();
        assert_eq!(body["ra"], 10.0);
        assert_eq!(body["dec"], -30.0);
        assert_eq!(body["exptime"], 900);
    }

    #[test]
    fn endpoint_selection() {
        let dispatcher = MwaDispatcher::new(Box::new(FakeTransport::default()), "http://mwa/trigger");
        assert_eq!(
            dispatcher.endpoint(MwaRequestKind::Buffer, true),
            "http://mwa/trigger/triggerbuffer"
        );
        assert_eq!(
            dispatcher.endpoint(MwaRequestKind::Single, true),
            "http://mwa/trigger/triggervcs"
        );
        assert_eq!(
            dispatcher.endpoint(MwaRequestKind::SubArray, false),
            "http://mwa/trigger/triggerobs"
        );
    }

    #[test]
    fn single_pointing_needs_a_position() {
        let p = proposal("MWA_VCS_GRB_swif");
        let mut d = decision(&p);
        d.ra = None;
        let dispatcher = MwaDispatcher::new(Box::new(FakeTransport::default()), "http://mwa");
        let outcome = dispatcher.trigger(&request(&p, &d));
        assert_eq!(outcome.decision, DecisionCode::Error);
        assert!(outcome.log[0].contains("ra/dec"));
    }

    #[test]
    fn classify_empty_reply() {
        let outcome = classify(Ok(None));
        assert_eq!(outcome.decision, DecisionCode::Error);
        assert_eq!(outcome.log, vec!["Web API error, possible server error."]);
    }

    #[test]
    fn classify_transport_error() {
        let outcome = classify(Err(DispatchError::Transport("refused".into())));
        assert_eq!(outcome.decision, DecisionCode::Error);
        assert!(outcome.log[0].starts_with("Exception trying to schedule event transport error: refused"));
    }

    #[test]
    fn classify_scheduler_errors() {
        let outcome = classify(Ok(Some(json!({
            "success": false,
            "errors": {"a": "Sun too close", "b": "Bad key"}
        }))));
        assert_eq!(outcome.decision, DecisionCode::Error);
        assert_eq!(outcome.log, vec!["Sun too close.", "Bad key."]);
        assert!(outcome.obsids.is_empty());
    }

    #[test]
    fn obsids_parsed_from_stderr() {
        let stderr = "INFO:Schedule metadata for 1234567890:\nnoise\nPretending: commands not run\n";
        let ids = obsids_from_stderr(stderr);
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], "1234567890");
        assert!(ids[1].starts_with('P'));
        let n: u32 = ids[1][1..].parse().unwrap();
        assert!((1000..=9999).contains(&n));
    }

    #[test]
    fn classify_falls_back_to_stderr() {
        let outcome = classify(Ok(Some(json!({
            "success": true,
            "obsid_list": [],
            "trigger_id": null,
            "schedule": {"stderr": "INFO:Schedule metadata for 42:"}
        }))));
        assert!(outcome.is_triggered());
        assert_eq!(outcome.obsids, vec!["42"]);
        assert!(outcome.trigger_id.is_none());
    }

    #[test]
    fn observation_links_obsid() {
        let p = proposal("MWA_GW_NSBH");
        let d = decision(&p);
        let req = request(&p, &d);
        let dispatcher = MwaDispatcher::new(Box::new(FakeTransport::default()), "http://mwa");
        let outcome = classify(ok_reply());
        let obs = dispatcher.observation(&req, "TEST123", "1399000000", &outcome);
        assert_eq!(
            obs.website_link.as_deref(),
            Some("http://ws.mwatelescope.org/observation/obs/?obsid=1399000000")
        );
        assert_eq!(obs.proposal_decision_id, 4);
        assert_eq!(obs.event_id, 9);
        assert_eq!(obs.request_sent_at, Some(req.sent_at));
        assert!(obs.mwa_response.is_some());
    }
}
