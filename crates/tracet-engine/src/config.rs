//! Engine configuration: a JSON file, then environment overrides.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Basic-auth credentials for the ATCA rapid response service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpAuth {
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
}

/// ATCA rapid response endpoint, split the way the service wrapper expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtcaEndpoint {
    /// E.g. `https://`.
    pub protocol: String,
    pub server: String,
    pub endpoint: String,
    pub auth: HttpAuth,
}

impl Default for AtcaEndpoint {
    fn default() -> Self {
        Self::from_base_url("http://test-api:8000/api/atca_proposal_request/")
    }
}

impl AtcaEndpoint {
    /// Split `proto://server/path` into its three parts.
    pub fn from_base_url(url: &str) -> Self {
        let (protocol, rest) = match url.split_once("//") {
            Some((scheme, rest)) => (format!("{scheme}//"), rest),
            None => (String::new(), url),
        };
        let (server, endpoint) = match rest.find('/') {
            Some(i) => (rest[..i].to_string(), rest[i..].to_string()),
            None => (rest.to_string(), String::new()),
        };
        Self {
            protocol,
            server,
            endpoint,
            auth: HttpAuth::default(),
        }
    }

    pub fn url(&self) -> String {
        format!("{}{}{}", self.protocol, self.server, self.endpoint)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Persistence gateway root; the HTTP gateway appends `/api/...`.
    pub web_app_url: Option<String>,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// MWA trigger web service root.
    pub mwa_trigger_url: String,
    pub atca: AtcaEndpoint,
    pub atca_email: Option<String>,
    /// Project id to password.
    #[serde(skip_serializing)]
    pub project_passwords: HashMap<String, String>,
    pub http_timeout_secs: u64,
    /// `n | az | el` table of MWA ground spots. Unset uses the built-in grid.
    pub mwa_spots_file: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            web_app_url: None,
            username: None,
            password: None,
            mwa_trigger_url: "http://mro.mwa128t.org/trigger".into(),
            atca: AtcaEndpoint::default(),
            atca_email: None,
            project_passwords: HashMap::new(),
            http_timeout_secs: 30,
            mwa_spots_file: None,
        }
    }
}

impl EngineConfig {
    /// Load from an optional JSON file, then apply process environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("cannot read config {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("invalid config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override fields from an environment lookup.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup("WEB_APP_URL") {
            self.web_app_url = Some(url);
        }
        if let Some(user) = lookup("TRACET_USERNAME") {
            self.username = Some(user);
        }
        if let Some(pw) = lookup("TRACET_PASSWORD") {
            self.password = Some(pw);
        }
        if let Some(url) = lookup("MWA_TRIGGER_URL") {
            self.mwa_trigger_url = url;
        }
        if let Some(url) = lookup("ATCA_BASEURL") {
            let auth = std::mem::take(&mut self.atca.auth);
            self.atca = AtcaEndpoint::from_base_url(&url);
            self.atca.auth = auth;
        }
        if let Some(raw) = lookup("ATCA_AUTH") {
            self.atca.auth =
                serde_json::from_str(&raw).context("ATCA_AUTH must be a JSON object")?;
        }
        if let Some(email) = lookup("ATCA_EMAIL") {
            self.atca_email = Some(email);
        }
        if let Some(raw) = lookup("PROJECT_PASSWORDS") {
            let passwords: HashMap<String, String> =
                serde_json::from_str(&raw).context("PROJECT_PASSWORDS must be a JSON object")?;
            self.project_passwords.extend(passwords);
        }
        if let Some(raw) = lookup("TRACET_HTTP_TIMEOUT_SECS") {
            self.http_timeout_secs = raw
                .parse()
                .context("TRACET_HTTP_TIMEOUT_SECS must be a number")?;
        }
        if let Some(path) = lookup("MWA_SPOTS_FILE") {
            self.mwa_spots_file = Some(PathBuf::from(path));
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}
