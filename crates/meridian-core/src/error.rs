//! Error types for Meridian

use thiserror::Error;

/// Result type alias using Meridian's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Meridian error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Routing errors (E1100-E1199)
    #[error("No eligible agent for task type '{0}'")]
    NoCandidates(String),

    #[error("Agent '{0}' is not registered with the router")]
    UnknownAgent(String),

    // Meta-learning errors (E1200-E1299)
    #[error("State store unavailable: {0}")]
    PersistenceUnavailable(String),

    #[error("Aggregation skipped tenant '{tenant}': {reason}")]
    AggregationPartial { tenant: String, reason: String },

    #[error("Invalid privacy budget: epsilon must be positive, got {0}")]
    InvalidPrivacyBudget(f64),

    // Database errors (E400-E499)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoCandidates(_) => "E1100",
            Self::UnknownAgent(_) => "E1101",
            Self::PersistenceUnavailable(_) => "E1200",
            Self::AggregationPartial { .. } => "E1201",
            Self::InvalidPrivacyBudget(_) => "E1202",
            Self::DatabaseError(_) => "E400",
            Self::Serialization(_) => "E801",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::NoCandidates(_) => {
                Some("Relax required specializations or raise max_parallel_tasks".to_string())
            }
            Self::PersistenceUnavailable(_) => {
                Some("The next scheduled sync will retry automatically".to_string())
            }
            Self::InvalidPrivacyBudget(_) => {
                Some("meridian config set meta.epsilon 1.0".to_string())
            }
            _ => None,
        }
    }

    /// Whether the caller can recover by retrying later or broadening constraints
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NoCandidates(_)
                | Self::PersistenceUnavailable(_)
                | Self::AggregationPartial { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_candidates_error() {
        let error = Error::NoCandidates("transcription".to_string());
        assert_eq!(error.code(), "E1100");
        assert!(error.suggestion().is_some());
        assert!(error.to_string().contains("transcription"));
        assert!(error.is_recoverable());
    }

    #[test]
    fn test_unknown_agent_error() {
        let error = Error::UnknownAgent("ghost".to_string());
        assert_eq!(error.code(), "E1101");
        assert_eq!(error.suggestion(), None);
        assert!(!error.is_recoverable());
    }

    #[test]
    fn test_aggregation_partial_error() {
        let error = Error::AggregationPartial {
            tenant: "acme".to_string(),
            reason: "missing field".to_string(),
        };
        assert_eq!(error.code(), "E1201");
        assert!(error.to_string().contains("acme"));
        assert!(error.to_string().contains("missing field"));
    }

    #[test]
    fn test_serialization_error_from() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let error: Error = parse.into();
        assert_eq!(error.code(), "E801");
    }
}
