use serde_json::{json, Map, Value};
use tracing::{info, warn};

use tracet_core::errors::DispatchError;
use tracet_core::observation::{DispatchOutcome, Observation, ObservationRequest};
use tracet_core::proposal::telescope::{AtcaBand, AtcaSettings};
use tracet_core::traits::TelescopeDispatcher;
use tracet_core::types::{TelescopeFamily, TriggerOn};

use super::transport::HttpTransport;
use crate::config::AtcaEndpoint;
use crate::skymap::coords::{format_dec_dms, format_ra_hms};

/// The 16cm receiver only has bandwidth for one frequency.
pub const BAND_16CM_FREQ: u32 = 2100;

/// ATCA rapid response service client.
pub struct AtcaDispatcher {
    transport: Box<dyn HttpTransport>,
    endpoint: AtcaEndpoint,
}

impl std::fmt::Debug for AtcaDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtcaDispatcher")
            .field("url", &self.endpoint.url())
            .finish_non_exhaustive()
    }
}

impl AtcaDispatcher {
    pub fn new(transport: Box<dyn HttpTransport>, endpoint: AtcaEndpoint) -> Self {
        Self {
            transport,
            endpoint,
        }
    }
}

/// Duration in minutes as `H:MM:SS`, with a `N day(s), ` prefix past 24 hours.
pub fn exposure_length(minutes: u32) -> String {
    let total = u64::from(minutes) * 60;
    let days = total / 86_400;
    let rem = total % 86_400;
    let hms = format!("{}:{:02}:{:02}", rem / 3600, (rem % 3600) / 60, rem % 60);
    match days {
        0 => hms,
        1 => format!("1 day, {hms}"),
        n => format!("{n} days, {hms}"),
    }
}

fn band(b: &AtcaBand) -> Value {
    json!({
        "use": b.enabled,
        "exposureLength": exposure_length(b.exptime),
        "freq1": b.freq1,
        "freq2": b.freq2,
    })
}

/// The `requestDict` describing the observation.
pub fn request_dict(
    request: &ObservationRequest<'_>,
    atca: &AtcaSettings,
) -> Result<Value, DispatchError> {
    let decision = request.decision;
    let ra = decision
        .ra_hms
        .clone()
        .or_else(|| decision.ra.map(format_ra_hms))
        .ok_or(DispatchError::MissingField("ra"))?;
    let dec = decision
        .dec_dms
        .clone()
        .or_else(|| decision.dec.map(format_dec_dms))
        .ok_or(DispatchError::MissingField("dec"))?;

    let mut cm16 = band(&atca.band_16cm);
    cm16["freq1"] = json!(BAND_16CM_FREQ);
    cm16["freq2"] = json!(BAND_16CM_FREQ);

    Ok(json!({
        "source": request.proposal.source_type().as_str(),
        "rightAscension": ra,
        "declination": dec,
        "project": request.proposal.project.id,
        "maxExposureLength": exposure_length(atca.max_exptime),
        "minExposureLength": exposure_length(atca.min_exptime),
        "scanType": "Dwell",
        "3mm": band(&atca.band_3mm),
        "7mm": band(&atca.band_7mm),
        "15mm": band(&atca.band_15mm),
        "4cm": band(&atca.band_4cm),
        "16cm": cm16,
    }))
}

/// Full service wrapper around the request dictionary.
///
/// Proposals that only pretend with real events are sent as tests with the
/// scheduler's time and score limits lifted.
pub fn request_wrapper(
    request: &ObservationRequest<'_>,
    atca: &AtcaSettings,
    endpoint: &AtcaEndpoint,
) -> Result<Value, DispatchError> {
    let project = &request.proposal.project;
    let mut wrapper = Map::new();
    wrapper.insert("requestDict".into(), request_dict(request, atca)?);
    wrapper.insert("authenticationToken".into(), json!(project.password));
    wrapper.insert("email".into(), json!(project.atca_email));
    wrapper.insert("httpAuthUsername".into(), json!(endpoint.auth.username));
    wrapper.insert("httpAuthPassword".into(), json!(endpoint.auth.password));
    wrapper.insert("serverProtocol".into(), json!(endpoint.protocol));
    wrapper.insert("serverName".into(), json!(endpoint.server));
    wrapper.insert("apiEndpoint".into(), json!(endpoint.endpoint));
    if request.proposal.testing == TriggerOn::PretendReal {
        wrapper.insert("test".into(), json!(true));
        wrapper.insert("noTimeLimit".into(), json!(true));
        wrapper.insert("noScoreLimit".into(), json!(true));
    }
    Ok(Value::Object(wrapper))
}

fn failure(reason: impl std::fmt::Display) -> DispatchOutcome {
    DispatchOutcome::error(format!("ATCA error message: {reason}"))
}

impl TelescopeDispatcher for AtcaDispatcher {
    fn family(&self) -> TelescopeFamily {
        TelescopeFamily::Atca
    }

    fn trigger(&self, request: &ObservationRequest<'_>) -> DispatchOutcome {
        let Some(atca) = request.proposal.telescope_settings.as_atca() else {
            return failure(DispatchError::MissingField("ATCA settings"));
        };
        let mut body = match request_wrapper(request, atca, &self.endpoint) {
            Ok(body) => body,
            Err(e) => return failure(e),
        };
        // HTTP auth travels in the Authorization header.
        if let Some(obj) = body.as_object_mut() {
            obj.remove("httpAuthPassword");
        }

        let url = self.endpoint.url();
        info!(
            trig_id = %request.decision.trig_id,
            event_id = request.event_id,
            %url,
            "sending ATCA rapid response request"
        );
        let auth = Some((
            self.endpoint.auth.username.as_str(),
            self.endpoint.auth.password.as_str(),
        ));
        let response = match self.transport.post_json(&url, &body, auth) {
            Ok(Some(response)) => response,
            Ok(None) => return failure("empty response"),
            Err(e) => {
                warn!(trig_id = %request.decision.trig_id, error = %e, "ATCA request failed");
                return failure(e);
            }
        };
        let id = match response.get("id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => return failure(DispatchError::Decode("response has no id".into())),
        };
        DispatchOutcome {
            trigger_id: Some(id.clone()),
            ..DispatchOutcome::triggered(vec![id], Some(response))
        }
    }

    fn observation(
        &self,
        request: &ObservationRequest<'_>,
        trigger_id: &str,
        _obsid: &str,
        _outcome: &DispatchOutcome,
    ) -> Observation {
        Observation {
            trigger_id: trigger_id.to_string(),
            telescope_name: request.proposal.telescope_name().to_string(),
            proposal_decision_id: request.decision.id,
            event_id: request.event_id,
            reason: request.reason.clone(),
            website_link: None,
            request_sent_at: None,
            mwa_sub_arrays: None,
            mwa_response: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use crate::config::HttpAuth;
    use crate::dispatch::transport::testutil::FakeTransport;
    use chrono::{TimeZone, Utc};
    use tracet_core::decision::ProposalDecision;
    use tracet_core::event::EventGroup;
    use tracet_core::proposal::Proposal;
    use tracet_core::types::DecisionCode;

    fn proposal() -> Proposal {
        let mut p = catalog::find(&catalog::builtin(), "ATCA_HESS_GRBs")
            .unwrap()
            .clone();
        p.project.password = "token".into();
        p.project.atca_email = Some("ops@example.org".into());
        p
    }

    fn decision(p: &Proposal) -> ProposalDecision {
        let group = EventGroup {
            id: 2,
            trig_id: "GRB1".into(),
            ra: Some(83.633),
            dec: Some(-22.014),
            ra_hms: Some("05:34:31.92".into()),
            dec_dms: Some("-22:00:50.4".into()),
            ..Default::default()
        };
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        ProposalDecision::pending(5, p, &group, now)
    }

    fn request<'a>(p: &'a Proposal, d: &'a ProposalDecision) -> ObservationRequest<'a> {
        ObservationRequest {
            proposal: p,
            decision: d,
            event_id: 3,
            obsname: "HESS_GRB1".into(),
            pretend: false,
            vcsmode: false,
            buffered: false,
            sub_arrays: None,
            exptime: None,
            nobs: 1,
            reason: "GRB1 - reason".into(),
            sent_at: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 1).unwrap(),
        }
    }

    fn endpoint() -> AtcaEndpoint {
        let mut ep = AtcaEndpoint::from_base_url("https://atca.example/rr/");
        ep.auth = HttpAuth {
            username: "user".into(),
            password: "pass".into(),
        };
        ep
    }

    #[test]
    fn exposure_lengths_match_timedelta_text() {
        assert_eq!(exposure_length(0), "0:00:00");
        assert_eq!(exposure_length(30), "0:30:00");
        assert_eq!(exposure_length(720), "12:00:00");
        assert_eq!(exposure_length(1440), "1 day, 0:00:00");
        assert_eq!(exposure_length(3000), "2 days, 2:00:00");
    }

    #[test]
    fn request_dict_fields() {
        let p = proposal();
        let d = decision(&p);
        let rq = request_dict(&request(&p, &d), p.telescope_settings.as_atca().unwrap()).unwrap();
        assert_eq!(rq["source"], "GRB");
        assert_eq!(rq["rightAscension"], "05:34:31.92");
        assert_eq!(rq["declination"], "-22:00:50.4");
        assert_eq!(rq["project"], "C3204");
        assert_eq!(rq["scanType"], "Dwell");
        assert_eq!(rq["minExposureLength"], "2:00:00");
        assert_eq!(rq["4cm"]["use"], true);
        assert_eq!(rq["4cm"]["freq1"], 5500);
        assert_eq!(rq["4cm"]["exposureLength"], "2:00:00");
        assert_eq!(rq["3mm"]["use"], false);
        assert_eq!(rq["16cm"]["freq1"], 2100);
        assert_eq!(rq["16cm"]["freq2"], 2100);
    }

    #[test]
    fn pretend_real_adds_test_flags() {
        let mut p = proposal();
        let d = decision(&p);
        let atca = p.telescope_settings.as_atca().unwrap().clone();
        let wrapper = request_wrapper(&request(&p, &d), &atca, &endpoint()).unwrap();
        assert!(wrapper.get("test").is_none());
        assert_eq!(wrapper["authenticationToken"], "token");
        assert_eq!(wrapper["serverName"], "atca.example");

        p.testing = TriggerOn::PretendReal;
        let wrapper = request_wrapper(&request(&p, &d), &atca, &endpoint()).unwrap();
        assert_eq!(wrapper["test"], true);
        assert_eq!(wrapper["noTimeLimit"], true);
        assert_eq!(wrapper["noScoreLimit"], true);
    }

    #[test]
    fn successful_trigger_returns_response_id() {
        let p = proposal();
        let d = decision(&p);
        let transport = FakeTransport::replying(vec![Ok(Some(json!({"id": "654321", "status": "ok"})))]);
        let dispatcher = AtcaDispatcher::new(Box::new(transport.clone()), endpoint());
        let outcome = dispatcher.trigger(&request(&p, &d));
        assert!(outcome.is_triggered());
        assert_eq!(outcome.obsids, vec!["654321"]);

        let sent = transport.sent.borrow();
        assert_eq!(sent[0].0, "https://atca.example/rr/");
        assert_eq!(sent[0].2, Some(("user".to_string(), "pass".to_string())));
        assert!(sent[0].1.get("httpAuthPassword").is_none());
        assert_eq!(sent[0].1["email"], "ops@example.org");
    }

    #[test]
    fn transport_failure_is_an_error_outcome() {
        let p = proposal();
        let d = decision(&p);
        let transport = FakeTransport::replying(vec![Err(DispatchError::Status {
            status: 500,
            body: "boom".into(),
        })]);
        let dispatcher = AtcaDispatcher::new(Box::new(transport), endpoint());
        let outcome = dispatcher.trigger(&request(&p, &d));
        assert_eq!(outcome.decision, DecisionCode::Error);
        assert!(outcome.log[0].starts_with("ATCA error message: scheduler returned HTTP 500"));
    }

    #[test]
    fn missing_id_is_an_error_outcome() {
        let p = proposal();
        let d = decision(&p);
        let transport = FakeTransport::replying(vec![Ok(Some(json!({"status": "queued"})))]);
        let dispatcher = AtcaDispatcher::new(Box::new(transport), endpoint());
        let outcome = dispatcher.trigger(&request(&p, &d));
        assert_eq!(outcome.decision, DecisionCode::Error);
        assert!(outcome.log[0].contains("response has no id"));
    }

    #[test]
    fn observation_carries_no_mwa_fields() {
        let p = proposal();
        let d = decision(&p);
        let dispatcher = AtcaDispatcher::new(Box::new(FakeTransport::default()), endpoint());
        let outcome = DispatchOutcome::triggered(vec!["1".into()], None);
        let obs = dispatcher.observation(&request(&p, &d), "1", "1", &outcome);
        assert_eq!(obs.telescope_name, "ATCA");
        assert_eq!(obs.proposal_decision_id, 5);
        assert!(obs.website_link.is_none());
    }
}
