use std::time::Duration;

/// Terminal failure of a decode session.
///
/// Parsing-cascade failures never surface here individually; only the
/// exhaustion of every strategy becomes [`DecodeError::UnparsableResponse`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Server error: status={status}, message={message}")]
    Server { status: u16, message: String },
    #[error("Stall timeout: no data for {}s", elapsed.as_secs())]
    StallTimeout { elapsed: Duration },
    #[error("Unparsable response: no readable content in {bytes} bytes")]
    UnparsableResponse { bytes: usize },
}

/// Broad error category, used for log fields and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Server,
    Stall,
    Parse,
}

impl DecodeError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            DecodeError::Transport(_) => ErrorCategory::Network,
            DecodeError::Server { .. } => ErrorCategory::Server,
            DecodeError::StallTimeout { .. } => ErrorCategory::Stall,
            DecodeError::UnparsableResponse { .. } => ErrorCategory::Parse,
        }
    }

    /// Build a server error from a non-2xx status and its (optional) body.
    ///
    /// Recognises `{"error":"…"}` and `{"error":{"message":"…"}}`; a short
    /// non-JSON body is used verbatim, anything else falls back to
    /// `HTTP error {status}`.
    #[must_use]
    pub fn from_http_status(status: u16, body: &str) -> Self {
        DecodeError::Server {
            status,
            message: server_error_message(body).unwrap_or_else(|| format!("HTTP error {status}")),
        }
    }

    /// An `{"error":…}` line sent mid-stream after a successful status.
    #[must_use]
    pub fn in_stream(message: impl Into<String>) -> Self {
        DecodeError::Server {
            status: 200,
            message: message.into(),
        }
    }

    /// The single user-facing message for this failure: what likely went wrong
    /// and what to try next.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            DecodeError::Transport(detail) => format!(
                "Could not reach the model server ({detail}). Check that the server is running and the configured address is correct, then retry."
            ),
            DecodeError::Server { status, message } if (200..300).contains(status) => format!(
                "The model server stopped generating: {message}. Retry the request; if it keeps happening, check the server's logs and available memory."
            ),
            DecodeError::Server { status, message } => format!(
                "The model server rejected the request (HTTP {status}): {message}. Check that the requested model is installed and loaded, then retry."
            ),
            DecodeError::StallTimeout { elapsed } => format!(
                "The model server stopped responding for {}s without producing any text. Try a simpler or shorter prompt, retry the request, or check the server's health and resource usage.",
                elapsed.as_secs()
            ),
            DecodeError::UnparsableResponse { bytes } => format!(
                "The model server returned {bytes} bytes that contained no readable text. Retry the request; if it keeps happening, try another model or update the server."
            ),
        }
    }
}

const MAX_RAW_ERROR_BODY_CHARS: usize = 200;

fn server_error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        let error = value.get("error")?;
        let message = match error {
            serde_json::Value::String(message) => message.as_str(),
            serde_json::Value::Object(fields) => fields.get("message")?.as_str()?,
            _ => return None,
        };
        let message = message.trim();
        return (!message.is_empty()).then(|| message.to_owned());
    }

    if trimmed.starts_with('{') || trimmed.starts_with('<') {
        return None;
    }
    (trimmed.chars().count() <= MAX_RAW_ERROR_BODY_CHARS).then(|| trimmed.to_owned())
}
