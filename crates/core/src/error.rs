//! Error types for differential privacy operations.

/// Errors that can occur while accounting for or releasing private values.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum DpError {
    /// Invalid argument provided at a call boundary.
    #[error("invalid argument: {msg}")]
    InvalidArgument {
        /// Human-readable error description.
        msg: String,
    },

    /// The accounting family cannot represent the event.
    #[error("unsupported event: {msg}")]
    UnsupportedEvent {
        /// Human-readable error description.
        msg: String,
    },

    /// A privacy query was made before any event was composed.
    #[error("no event has been composed yet")]
    NotAccountedYet,

    /// Budget split fractions sum above one.
    #[error("the provided privacy budget split ({total}) was greater than 1.0")]
    BudgetOverflow {
        /// Sum of the requested fractions.
        total: f64,
    },

    /// Numerical computation error.
    #[error("numerical error: {msg}")]
    NumericalError {
        /// Human-readable error description.
        msg: String,
    },
}

/// Result type for DP operations.
pub type Result<T> = std::result::Result<T, DpError>;

impl DpError {
    /// Create an invalid argument error.
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        Self::InvalidArgument { msg: msg.into() }
    }

    /// Create an unsupported event error.
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        Self::UnsupportedEvent { msg: msg.into() }
    }

    /// Create a numerical error.
    pub fn numerical<S: Into<String>>(msg: S) -> Self {
        Self::NumericalError { msg: msg.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_overflow_reports_total() {
        let err = DpError::BudgetOverflow { total: 1.25 };
        assert_eq!(
            err.to_string(),
            "the provided privacy budget split (1.25) was greater than 1.0"
        );
    }

    #[test]
    fn helpers_pick_variant() {
        assert!(matches!(
            DpError::invalid("x"),
            DpError::InvalidArgument { .. }
        ));
        assert!(matches!(
            DpError::unsupported("x"),
            DpError::UnsupportedEvent { .. }
        ));
    }
}
