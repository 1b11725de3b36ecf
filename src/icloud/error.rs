use thiserror::Error;

#[derive(Error, Debug)]
pub enum ICloudError {
    #[error("Failed login: {0}")]
    FailedLogin(String),

    #[error("API error (HTTP {code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Malformed record {record}: {reason}")]
    MalformedRecord { record: String, reason: String },

    #[error("Account has no {0} webservice; is the session authenticated?")]
    MissingWebservice(&'static str),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Header(#[from] reqwest::header::InvalidHeaderValue),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ICloudError {
    /// Build an `ApiError` from a non-success response body, preferring the
    /// human-readable fields Apple puts in its JSON error payloads.
    pub fn from_response_body(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| {
                ["errorMessage", "reason", "error"]
                    .iter()
                    .find_map(|k| v[*k].as_str().map(str::to_string))
            })
            .unwrap_or_else(|| body.to_string());
        ICloudError::ApiError {
            code: status,
            message,
        }
    }
}
