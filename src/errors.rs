use thiserror::Error;

/// Failures raised by a telemetry provider while fetching a session.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// No session exists for the requested key. Analyses treat this as "no data".
    #[error("session not found: {year} {circuit} ({session_type})")]
    SessionNotFound {
        year: i32,
        circuit: String,
        session_type: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("malformed telemetry in {file}: {reason}")]
    Malformed { file: String, reason: String },
}

/// Errors that escape an analysis call. Missing data never ends up here.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("telemetry provider failure: {0}")]
    Provider(#[from] ProviderError),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Outcome of an analysis that ran without a system failure.
///
/// `NoData` and `DriverNotFound` are normal answers: callers should report them
/// to the user instead of retrying.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Ready(T),
    NoData(String),
    DriverNotFound(String),
}

impl<T> Outcome<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Outcome::Ready(_))
    }

    pub fn ready(self) -> Option<T> {
        match self {
            Outcome::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U> {
        match self {
            Outcome::Ready(value) => Outcome::Ready(f(value)),
            Outcome::NoData(reason) => Outcome::NoData(reason),
            Outcome::DriverNotFound(id) => Outcome::DriverNotFound(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_not_found_message_names_the_key() {
        let err = ProviderError::SessionNotFound {
            year: 2025,
            circuit: "Monaco".to_string(),
            session_type: "R".to_string(),
        };
        assert_eq!(err.to_string(), "session not found: 2025 Monaco (R)");
    }

    #[test]
    fn provider_errors_convert_into_analysis_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err: AnalysisError = ProviderError::from(io).into();
        assert!(matches!(err, AnalysisError::Provider(ProviderError::Io(_))));
    }

    #[test]
    fn outcome_map_keeps_non_ready_variants() {
        let missing: Outcome<u32> = Outcome::DriverNotFound("ZZZ".to_string());
        assert_eq!(missing.map(|v| v + 1), Outcome::DriverNotFound("ZZZ".to_string()));
        assert_eq!(Outcome::Ready(1).map(|v| v + 1).ready(), Some(2));
    }
}
