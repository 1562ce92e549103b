use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::debug;

pub type AppResult<T> = Result<T, Error>;

/// how much of the sandbox output a resolution error keeps
pub const OUTPUT_EXCERPT_CHARS: usize = 2000;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// remote fetch failed or came back malformed
    #[error("{0}")]
    Upstream(String),

    /// a structural element we rely on is missing from the page
    #[error("{0}")]
    Parse(String),

    /// every extraction strategy came up empty
    #[error("{0}")]
    NotFound(String),

    /// the sandbox ran but nothing usable came out of it
    #[error("{message}")]
    Resolution { message: String, output: String },

    #[error("{message}")]
    AccessDenied {
        message: String,
        url: String,
        suggestion: String,
    },

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    InternalServerErrorWithContext(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: String,
    category: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggestion: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<&'a str>,
}

impl Error {
    pub fn resolution(message: impl Into<String>, output: &str) -> Self {
        let output: String = output.chars().take(OUTPUT_EXCERPT_CHARS).collect();
        Self::Resolution {
            message: format!("{} (output, first {} chars):\n{}", message.into(), OUTPUT_EXCERPT_CHARS, output),
            output,
        }
    }

    pub fn access_denied(url: impl Into<String>) -> Self {
        Self::AccessDenied {
            message: "Access forbidden - the CDN blocked the relay request".to_string(),
            url: url.into(),
            suggestion: "The upstream protection layer rejected this server. Retry to rotate the \
                         client identity, or pick a different source for the episode."
                .to_string(),
        }
    }

    /// prefixes the message while keeping the category, "Failed to get sources: ..."
    pub fn context(self, context: &str) -> Self {
        let wrap = |message: String| format!("{}: {}", context, message);
        match self {
            Self::Upstream(m) => Self::Upstream(wrap(m)),
            Self::Parse(m) => Self::Parse(wrap(m)),
            Self::NotFound(m) => Self::NotFound(wrap(m)),
            Self::Resolution { message, output } => Self::Resolution {
                message: wrap(message),
                output,
            },
            Self::AccessDenied {
                message,
                url,
                suggestion,
            } => Self::AccessDenied {
                message: wrap(message),
                url,
                suggestion,
            },
            Self::BadRequest(m) => Self::BadRequest(wrap(m)),
            Self::InternalServerErrorWithContext(m) => {
                Self::InternalServerErrorWithContext(wrap(m))
            }
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            Self::Upstream(_) => "upstream_error",
            Self::Parse(_) => "parse_error",
            Self::NotFound(_) => "not_found",
            Self::Resolution { .. } => "resolution_error",
            Self::AccessDenied { .. } => "access_denied",
            Self::BadRequest(_) => "bad_request",
            Self::InternalServerErrorWithContext(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Upstream(_) | Self::Parse(_) => StatusCode::BAD_GATEWAY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::AccessDenied { .. } => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Resolution { .. } | Self::InternalServerErrorWithContext(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        debug!("responding with {} ({})", status, self.category());

        let (suggestion, url, output) = match &self {
            Self::AccessDenied {
                url, suggestion, ..
            } => (Some(suggestion.as_str()), Some(url.as_str()), None),
            Self::Resolution { output, .. } => (None, None, Some(output.as_str())),
            _ => (None, None, None),
        };

        let body = ErrorBody {
            error: self.to_string(),
            category: self.category(),
            suggestion,
            url,
            output,
        };

        (status, Json(body)).into_response()
    }
}
