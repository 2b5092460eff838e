use std::fmt;

use serde::{Deserialize, Serialize};

/// Source class of a transient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceType {
    Grb,
    Fs,
    Nu,
    Gw,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Grb => "GRB",
            SourceType::Fs => "FS",
            SourceType::Nu => "NU",
            SourceType::Gw => "GW",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted decision state. Serialized as the single-character code that
/// downstream alerting keys off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecisionCode {
    #[serde(rename = "P")]
    Pending,
    #[serde(rename = "I")]
    Ignored,
    #[serde(rename = "E")]
    Error,
    #[serde(rename = "T")]
    Triggered,
    #[serde(rename = "C")]
    Canceled,
}

impl DecisionCode {
    pub fn code(&self) -> &'static str {
        match self {
            DecisionCode::Pending => "P",
            DecisionCode::Ignored => "I",
            DecisionCode::Error => "E",
            DecisionCode::Triggered => "T",
            DecisionCode::Canceled => "C",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "P" => Some(DecisionCode::Pending),
            "I" => Some(DecisionCode::Ignored),
            "E" => Some(DecisionCode::Error),
            "T" => Some(DecisionCode::Triggered),
            "C" => Some(DecisionCode::Canceled),
            _ => None,
        }
    }
}

impl fmt::Display for DecisionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Which kinds of events a proposal reacts to, and whether it observes for real.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerOn {
    /// Real events only, pretend observations.
    PretendReal,
    /// Real events observe for real, test events pretend.
    Both,
    /// Real events only, real observations.
    RealOnly,
}

/// Scheduler family a telescope belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelescopeFamily {
    Mwa,
    Atca,
}

impl fmt::Display for TelescopeFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelescopeFamily::Mwa => write!(f, "mwa"),
            TelescopeFamily::Atca => write!(f, "atca"),
        }
    }
}
