use std::time::Duration;

/// How the caller should react to a [`GatewayError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recovery {
    /// Repeating the same request will fail the same way.
    Abort,
    /// The backend may accept the request on a later attempt.
    Retry,
    /// The call ended for a local reason; the caller decides.
    Local,
}

/// Failures of a single gateway call.
#[derive(Clone, Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("prompt too long: {0}")]
    PromptTooLong(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("gateway misconfigured: {0}")]
    Misconfigured(String),

    #[error("throttled by the model backend")]
    Throttled { retry_after: Option<Duration> },
    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("model backend overloaded")]
    Overloaded,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("circuit open, calls suspended for {0:?}")]
    CircuitOpen(Duration),
    #[error("stream ended without a final message")]
    IncompleteStream,
    #[error("no response within {0:?}")]
    Timeout(Duration),
}

impl GatewayError {
    pub fn recovery(&self) -> Recovery {
        match self {
            Self::Unauthorized(_) | Self::PromptTooLong(_) | Self::BadRequest(_) | Self::Misconfigured(_) => {
                Recovery::Abort
            }
            Self::Throttled { .. }
            | Self::Upstream { .. }
            | Self::Overloaded
            | Self::Transport(_)
            | Self::StreamInterrupted(_) => Recovery::Retry,
            Self::CircuitOpen(_) | Self::IncompleteStream | Self::Timeout(_) => Recovery::Local,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.recovery() == Recovery::Retry
    }

    pub fn is_fatal(&self) -> bool {
        self.recovery() == Recovery::Abort
    }

    /// Server-provided wait before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Throttled { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Stable label for log fields.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::PromptTooLong(_) => "prompt_too_long",
            Self::BadRequest(_) => "bad_request",
            Self::Misconfigured(_) => "misconfigured",
            Self::Throttled { .. } => "throttled",
            Self::Upstream { .. } => "upstream",
            Self::Overloaded => "overloaded",
            Self::Transport(_) => "transport",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::CircuitOpen(_) => "circuit_open",
            Self::IncompleteStream => "incomplete_stream",
            Self::Timeout(_) => "timeout",
        }
    }

    /// Map a non-success HTTP status from the messages endpoint.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::Unauthorized(body),
            413 => Self::PromptTooLong(body),
            400 => Self::BadRequest(body),
            429 => Self::Throttled { retry_after: None },
            529 => Self::Overloaded,
            500..=599 => Self::Upstream { status, body },
            _ => Self::BadRequest(format!("unexpected status {status}: {body}")),
        }
    }

    /// Map the `error.type` of an error event delivered inside a stream.
    pub fn from_api_error(error_type: &str, message: String) -> Self {
        match error_type {
            "overloaded_error" => Self::Overloaded,
            "rate_limit_error" => Self::Throttled { retry_after: None },
            "authentication_error" | "permission_error" => Self::Unauthorized(message),
            "request_too_large" => Self::PromptTooLong(message),
            "invalid_request_error" if message.contains("too long") || message.contains("too many tokens") => {
                Self::PromptTooLong(message)
            }
            "invalid_request_error" => Self::BadRequest(message),
            _ => Self::Upstream { status: 500, body: message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovery_by_variant() {
        assert_eq!(GatewayError::Overloaded.recovery(), Recovery::Retry);
        assert_eq!(GatewayError::Transport("reset".into()).recovery(), Recovery::Retry);
        assert_eq!(GatewayError::Unauthorized("key".into()).recovery(), Recovery::Abort);
        assert_eq!(GatewayError::IncompleteStream.recovery(), Recovery::Local);
        assert_eq!(GatewayError::CircuitOpen(Duration::from_secs(30)).recovery(), Recovery::Local);
    }

    #[test]
    fn retry_after_only_when_throttled() {
        let throttled = GatewayError::Throttled {
            retry_after: Some(Duration::from_secs(5)),
        };
        assert_eq!(throttled.retry_after(), Some(Duration::from_secs(5)));
        assert_eq!(GatewayError::Overloaded.retry_after(), None);
    }

    #[test]
    fn status_codes() {
        assert!(GatewayError::from_status(401, "no".into()).is_fatal());
        assert!(GatewayError::from_status(429, String::new()).is_retryable());
        assert!(GatewayError::from_status(529, String::new()).is_retryable());
        assert!(GatewayError::from_status(502, "bad gateway".into()).is_retryable());
        assert_eq!(GatewayError::from_status(418, "teapot".into()).error_kind(), "bad_request");
    }

    #[test]
    fn stream_error_types() {
        assert!(matches!(
            GatewayError::from_api_error("invalid_request_error", "prompt is too long".into()),
            GatewayError::PromptTooLong(_)
        ));
        assert!(matches!(
            GatewayError::from_api_error("invalid_request_error", "tools: missing name".into()),
            GatewayError::BadRequest(_)
        ));
        assert!(matches!(
            GatewayError::from_api_error("api_error", "boom".into()),
            GatewayError::Upstream { status: 500, .. }
        ));
    }
}
