#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("No usable company in config")]
    NoCompanies,

    #[error("{company}: malformed record: {reason}")]
    Malformed { company: String, reason: String },

    #[error("{company}: missing required field `{field}`")]
    MissingField {
        company: String,
        field: &'static str,
    },

    #[error("{company}: invalid careers_url `{url}`")]
    InvalidUrl { company: String, url: String },

    #[error("{company}: invalid `{field}` selector `{selector}`")]
    InvalidSelector {
        company: String,
        field: &'static str,
        selector: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Worth retrying: timeouts, 5xx, empty bodies.
    #[error("transient fetch failure: {0}")]
    Transient(String),

    #[error("fatal fetch failure: {0}")]
    Fatal(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("invalid `{field}` selector `{selector}`")]
    Selector {
        field: &'static str,
        selector: String,
    },

    #[error("invalid base url `{0}`")]
    BaseUrl(String),

    #[error("parser panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ScraperError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error")]
    DatabaseError(#[from] sqlx::error::Error),
}
