use http::StatusCode;

/// Terminal outcome of a chat request that produced no stream.
///
/// `kind()` is the stable code the UI maps to a user-facing message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("upstream error: {message}")]
    Upstream { message: String, retryable: bool },
    #[error("all API keys are failing: {message}")]
    PoolExhausted { message: String },
    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::InvalidRequest(_) => "invalid_request",
            DispatchError::Configuration(_) => "configuration_error",
            DispatchError::Upstream { .. } => "upstream_error",
            DispatchError::PoolExhausted { .. } => "pool_exhausted",
            DispatchError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            DispatchError::PoolExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::Configuration(_)
            | DispatchError::Upstream { .. }
            | DispatchError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_documented_statuses() {
        let cases = [
            (DispatchError::InvalidRequest("x".into()), 400, "invalid_request"),
            (DispatchError::Configuration("x".into()), 500, "configuration_error"),
            (
                DispatchError::Upstream {
                    message: "x".into(),
                    retryable: false,
                },
                500,
                "upstream_error",
            ),
            (
                DispatchError::PoolExhausted {
                    message: "x".into(),
                },
                503,
                "pool_exhausted",
            ),
        ];
        for (err, status, kind) in cases {
            assert_eq!(err.status().as_u16(), status);
            assert_eq!(err.kind(), kind);
        }
    }
}
