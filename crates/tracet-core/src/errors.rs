use std::fmt;

/// Terminal outcome of one policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Trigger,
    Debug,
    Pending,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Trigger => write!(f, "trigger"),
            Verdict::Debug => write!(f, "debug"),
            Verdict::Pending => write!(f, "pending"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("invalid false alarm rate: {0}")]
    InvalidFalseAlarmRate(String),
    #[error("test event not accepted by proposal {0}")]
    TestEventRejected(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("scheduler returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("undecodable scheduler response: {0}")]
    Decode(String),
    #[error("no dispatcher registered for telescope {0}")]
    NoDispatcher(String),
    #[error("observation request is missing {0}")]
    MissingField(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unauthorized after token refresh")]
    Unauthorized,
    #[error("gateway returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("undecodable gateway response: {0}")]
    Decode(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage failure: {0}")]
    Storage(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SkymapError {
    #[error("cannot fetch skymap {reference}: {reason}")]
    Fetch { reference: String, reason: String },
    #[error("invalid FITS: {0}")]
    InvalidFits(String),
    #[error("missing column {0}")]
    MissingColumn(String),
    #[error("unsupported column format {0}")]
    UnsupportedFormat(String),
    #[error("no skymap pixel covers ra={ra:.4} dec={dec:.4}")]
    NoPixel { ra: f64, dec: f64 },
    #[error("need 4 pointings for a sub-array, found {0}")]
    TooFewPointings(usize),
    #[error("invalid spots catalog line {line}: {reason}")]
    InvalidSpots { line: usize, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("no password found for project ID: {0}")]
    MissingPassword(String),
    #[error("unknown proposal: {0}")]
    UnknownProposal(String),
    #[error("duplicate proposal id: {0}")]
    DuplicateId(u64),
}
