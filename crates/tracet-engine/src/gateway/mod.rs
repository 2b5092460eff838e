//! Authenticated JSON client for the web application that owns decisions,
//! observations, event groups and trigger alerts.

use std::sync::Mutex;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info};

use tracet_core::decision::{ProposalDecision, TriggerAlert};
use tracet_core::errors::GatewayError;
use tracet_core::event::EventGroup;
use tracet_core::observation::Observation;
use tracet_core::traits::{AlertSink, ObservationGateway};

use crate::config::EngineConfig;

/// Raw HTTP answer: status code and body text.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiReply {
    pub status: u16,
    pub body: String,
}

/// One HTTP exchange with an optional bearer token.
pub trait ApiTransport {
    fn send(
        &self,
        method: Method,
        url: &str,
        bearer: Option<&str>,
        body: Option<&Value>,
    ) -> Result<ApiReply, GatewayError>;
}

pub struct ReqwestApiTransport {
    http: Client,
}

impl std::fmt::Debug for ReqwestApiTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestApiTransport").finish_non_exhaustive()
    }
}

impl ReqwestApiTransport {
    pub fn new(timeout: Duration) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self { http })
    }
}

impl ApiTransport for ReqwestApiTransport {
    fn send(
        &self,
        method: Method,
        url: &str,
        bearer: Option<&str>,
        body: Option<&Value>,
    ) -> Result<ApiReply, GatewayError> {
        let mut request = self.http.request(method, url);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        let resp = request
            .send()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(ApiReply { status, body })
    }
}

/// Session against `{base}/api/...` holding the current access token.
///
/// The token is fetched lazily: requests go out with whatever token is held,
/// and a 401 triggers one token refresh and one retry.
pub struct ApiSession<T: ApiTransport> {
    transport: T,
    base_url: String,
    username: String,
    password: String,
    token: Mutex<Option<String>>,
}

impl<T: ApiTransport> std::fmt::Debug for ApiSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiSession")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl ApiSession<ReqwestApiTransport> {
    /// Build a session from `web_app_url`, `username` and `password`.
    pub fn from_config(config: &EngineConfig) -> Result<Self, GatewayError> {
        let base_url = config
            .web_app_url
            .clone()
            .ok_or_else(|| GatewayError::Transport("WEB_APP_URL is not configured".into()))?;
        let transport = ReqwestApiTransport::new(config.http_timeout())?;
        Ok(Self::new(
            transport,
            &base_url,
            config.username.clone().unwrap_or_default(),
            config.password.clone().unwrap_or_default(),
        ))
    }
}

impl<T: ApiTransport> ApiSession<T> {
    pub fn new(transport: T, base_url: &str, username: String, password: String) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
            username,
            password,
            token: Mutex::new(None),
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/api/{endpoint}", self.base_url)
    }

    fn current_token(&self) -> Option<String> {
        self.token.lock().ok().and_then(|t| t.clone())
    }

    /// Exchange the credentials for a new access token and keep it.
    fn refresh_token(&self) -> Result<String, GatewayError> {
        let body = json!({ "username": self.username, "password": self.password });
        let reply = self
            .transport
            .send(Method::POST, &self.url("token/pair"), None, Some(&body))?;
        if reply.status == 401 {
            return Err(GatewayError::Unauthorized);
        }
        let value = decode(&check_status("token/pair", reply)?)?;
        let token = value
            .get("access")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::Decode("token response has no access token".into()))?
            .to_string();
        if let Ok(mut held) = self.token.lock() {
            *held = Some(token.clone());
        }
        debug!(base_url = %self.base_url, "access token refreshed");
        Ok(token)
    }

    /// Send one request, refreshing the token once on 401.
    ///
    /// Algorithm:
    /// 1. Send with the held token (none before the first refresh)
    /// 2. On 401, fetch a new token and resend once
    /// 3. A second 401 is `Unauthorized`, 404 is `NotFound`, any other
    ///    non-2xx is `Status`
    fn request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<String, GatewayError> {
        let url = self.url(endpoint);
        let token = self.current_token();
        let mut reply = self
            .transport
            .send(method.clone(), &url, token.as_deref(), body)?;
        if reply.status == 401 {
            info!(%endpoint, "gateway rejected token, refreshing");
            let token = self.refresh_token()?;
            reply = self.transport.send(method, &url, Some(&token), body)?;
            if reply.status == 401 {
                return Err(GatewayError::Unauthorized);
            }
        }
        check_status(endpoint, reply)
    }
}

fn check_status(endpoint: &str, reply: ApiReply) -> Result<String, GatewayError> {
    match reply.status {
        200..=299 => Ok(reply.body),
        404 => Err(GatewayError::NotFound(endpoint.to_string())),
        status => Err(GatewayError::Status {
            status,
            body: reply.body,
        }),
    }
}

fn decode(body: &str) -> Result<Value, GatewayError> {
    serde_json::from_str(body).map_err(|e| GatewayError::Decode(e.to_string()))
}

fn decision_payload(decision: &ProposalDecision) -> Value {
    json!({
        "decision": decision.decision.code(),
        "decision_reason": decision.decision_reason,
        "ra": decision.ra,
        "dec": decision.dec,
        "ra_hms": decision.ra_hms,
        "dec_dms": decision.dec_dms,
        "pos_error": decision.pos_error,
        "alt": decision.alt,
        "az": decision.az,
    })
}

fn group_payload(group: &EventGroup) -> Value {
    json!({
        "ignored": group.ignored,
        "ra": group.ra,
        "dec": group.dec,
        "ra_hms": group.ra_hms,
        "dec_dms": group.dec_dms,
        "pos_error": group.pos_error,
        "latest_event_observed": group.latest_event_observed,
    })
}

impl<T: ApiTransport> ObservationGateway for ApiSession<T> {
    fn update_decision(&self, decision: &ProposalDecision) -> Result<(), GatewayError> {
        let endpoint = format!("proposal-decision/{}/", decision.id);
        self.request(Method::PUT, &endpoint, Some(&decision_payload(decision)))?;
        Ok(())
    }

    fn latest_observation(&self, telescope: &str) -> Result<Option<Observation>, GatewayError> {
        let endpoint = format!("latest-observation/{telescope}/");
        let body = match self.request(Method::GET, &endpoint, None) {
            Ok(body) => body,
            Err(GatewayError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        if body.trim().is_empty() {
            return Ok(None);
        }
        match decode(&body)? {
            Value::Null => Ok(None),
            Value::Object(map) if map.is_empty() => Ok(None),
            value => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| GatewayError::Decode(e.to_string())),
        }
    }

    fn create_observation(&self, observation: &Observation) -> Result<(), GatewayError> {
        let body =
            serde_json::to_value(observation).map_err(|e| GatewayError::Decode(e.to_string()))?;
        self.request(Method::POST, "create-observation/", Some(&body))?;
        Ok(())
    }

    fn update_event_group(&self, group: &EventGroup) -> Result<(), GatewayError> {
        let endpoint = format!("event-group/{}/", group.id);
        self.request(Method::PUT, &endpoint, Some(&group_payload(group)))?;
        Ok(())
    }
}

impl<T: ApiTransport> AlertSink for ApiSession<T> {
    fn send_trigger_alert(&self, alert: &TriggerAlert) -> Result<(), GatewayError> {
        let body = serde_json::to_value(alert).map_err(|e| GatewayError::Decode(e.to_string()))?;
        self.request(Method::POST, "trigger-alerts/", Some(&body))?;
        Ok(())
    }
}
