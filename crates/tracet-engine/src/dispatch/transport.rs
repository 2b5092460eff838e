use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::Value;

use tracet_core::errors::DispatchError;

/// Blocking JSON POST used by the telescope adapters.
///
/// `Ok(None)` means the scheduler answered with an empty or undecodable body.
pub trait HttpTransport {
    fn post_json(
        &self,
        url: &str,
        body: &Value,
        basic_auth: Option<(&str, &str)>,
    ) -> Result<Option<Value>, DispatchError>;
}

pub struct ReqwestTransport {
    http: Client,
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport").finish_non_exhaustive()
    }
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, DispatchError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DispatchError::Transport(e.to_string()))?;
        Ok(Self { http })
    }
}

impl HttpTransport for ReqwestTransport {
    fn post_json(
        &self,
        url: &str,
        body: &Value,
        basic_auth: Option<(&str, &str)>,
    ) -> Result<Option<Value>, DispatchError> {
        let mut request = self.http.post(url).json(body);
        if let Some((user, password)) = basic_auth {
            request = request.basic_auth(user, Some(password));
        }
        let resp = request
            .send()
            .map_err(|e| DispatchError::Transport(e.to_string()))?;
        let status = resp.status();
        let text = resp
            .text()
            .map_err(|e| DispatchError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(DispatchError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        if text.trim().is_empty() {
            return Ok(None);
        }
        Ok(serde_json::from_str(&text).ok())
    }
}
