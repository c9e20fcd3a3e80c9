use std::time::Duration;

use race_tunnel_instruments::{ClassifyOutcome, Outcome};

/// Longest response body kept in an error, in characters.
const MAX_ERROR_BODY: usize = 512;

/// Why a call to the service did not produce the expected response.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// No response within the call timeout. The request was abandoned and is not retried.
    #[error("no response within {0:?}")]
    Timeout(Duration),
    /// The request never got an HTTP response, for example a refused or reset connection.
    #[error("transport failure: {0}")]
    Transport(#[source] reqwest::Error),
    /// The service answered with a status other than 2xx.
    #[error("rejected with HTTP {status} ({outcome}): {body}")]
    Rejected {
        status: u16,
        outcome: Outcome,
        body: String,
    },
    /// A 2xx response whose body did not match the expected shape.
    #[error("malformed response body ({source}): {body}")]
    Parse {
        body: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid request URL: {0}")]
    Url(#[from] url::ParseError),
}

impl CallError {
    pub(crate) fn rejected(status: u16, outcome: Outcome, body: &str) -> Self {
        Self::Rejected {
            status,
            outcome,
            body: truncate(body),
        }
    }

    pub(crate) fn parse(body: &str, source: serde_json::Error) -> Self {
        Self::Parse {
            body: truncate(body),
            source,
        }
    }

    /// The HTTP status, when the service responded at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl ClassifyOutcome for CallError {
    fn outcome(&self) -> Outcome {
        match self {
            Self::Timeout(_) => Outcome::Timeout,
            Self::Transport(_) | Self::Parse { .. } => Outcome::ServerError,
            Self::Rejected { outcome, .. } => *outcome,
            Self::Url(_) => Outcome::ClientError,
        }
    }
}

fn truncate(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY {
        return body.to_string();
    }

    let mut truncated: String = body.chars().take(MAX_ERROR_BODY).collect();
    truncated.push_str("...");
    truncated
}
