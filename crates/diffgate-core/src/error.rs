use thiserror::Error;

/// Library-wide error type for the gate pipeline.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("missing or invalid webhook signature")]
    InvalidSignature,

    #[error("malformed payload: {0}")]
    InvalidPayload(String),

    #[error("changed file entry is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("secret `{0}` is not set")]
    SecretLookup(String),

    #[error("secret store failure: {0}")]
    SecretStore(String),

    #[error("GitHub API request failed")]
    Api(#[from] reqwest::Error),

    #[error("GitHub API returned {status} for {endpoint}")]
    ApiStatus { status: u16, endpoint: String },

    #[error("static-analysis engine failed: {0}")]
    Engine(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl GateError {
    /// HTTP status the transport should answer with when this error
    /// escapes webhook handling.
    pub fn http_status(&self) -> u16 {
        match self {
            GateError::InvalidSignature => 401,
            GateError::InvalidPayload(_) | GateError::MissingField(_) => 400,
            GateError::Api(_) | GateError::ApiStatus { .. } => 502,
            _ => 500,
        }
    }
}
