pub mod source;
pub mod telescope;

use serde::{Deserialize, Serialize};

use crate::types::{SourceType, TriggerOn};

use self::source::SourcePolicy;
use self::telescope::TelescopeSettings;

/// Telescope project used to authenticate scheduling requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default)]
    pub description: String,
    /// Only ATCA requires an email on the observing proposal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atca_email: Option<String>,
}

/// Static configuration of one observing proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: u64,
    pub proposal_id: String,
    pub version: String,
    pub description: String,
    /// Lower values are evaluated first.
    pub priority: i32,
    /// Only events from this telescope are considered; `None` accepts all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_telescope: Option<String>,
    /// Accepted `TELESCOPE_EVENTTYPE` streams.
    pub streams: Vec<String>,
    pub testing: TriggerOn,
    pub project: Project,
    pub telescope_settings: TelescopeSettings,
    pub source: SourcePolicy,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Proposal {
    pub fn source_type(&self) -> SourceType {
        self.source.source_type()
    }

    pub fn telescope_name(&self) -> &str {
        &self.telescope_settings.telescope.name
    }

    pub fn accepts_stream(&self, stream: &str) -> bool {
        self.streams.iter().any(|s| s == stream)
    }

    /// Whether events from `telescope` are in scope for this proposal.
    pub fn accepts_event_telescope(&self, telescope: &str) -> bool {
        match &self.event_telescope {
            None => true,
            Some(name) => name.trim() == telescope.trim(),
        }
    }
}
