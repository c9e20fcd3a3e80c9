use std::fmt;

/// Classification of a single completed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Outcome {
    Success,
    /// An expected rejection caused by contention on a locked resource.
    Conflict,
    ClientError,
    ServerError,
    Timeout,
}

impl Outcome {
    pub const ALL: [Outcome; 5] = [
        Outcome::Success,
        Outcome::Conflict,
        Outcome::ClientError,
        Outcome::ServerError,
        Outcome::Timeout,
    ];

    /// Classify an HTTP status code. Statuses listed in `conflict_statuses` win over the generic
    /// 4xx bucket. Informational and redirect statuses are unexpected from a JSON API and count as
    /// client errors.
    pub fn from_status(status: u16, conflict_statuses: &[u16]) -> Outcome {
        if conflict_statuses.contains(&status) {
            return Outcome::Conflict;
        }

        match status {
            200..=299 => Outcome::Success,
            500..=599 => Outcome::ServerError,
            _ => Outcome::ClientError,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Conflict => "conflict",
            Outcome::ClientError => "client_error",
            Outcome::ServerError => "server_error",
            Outcome::Timeout => "timeout",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Anything that can be turned into an [Outcome] once a call has finished.
///
/// Implemented for `Result<T, E>` where the error classifies itself, so an instrumented call can be
/// reported from its return value alone.
pub trait ClassifyOutcome {
    fn outcome(&self) -> Outcome;
}

impl ClassifyOutcome for Outcome {
    fn outcome(&self) -> Outcome {
        *self
    }
}

impl<T, E> ClassifyOutcome for Result<T, E>
where
    E: ClassifyOutcome,
{
    fn outcome(&self) -> Outcome {
        match self {
            Ok(_) => Outcome::Success,
            Err(e) => e.outcome(),
        }
    }
}
