// =============================================================================
// error.rs — WHAT CAN GO WRONG, AND WHO GETS TO HEAR ABOUT IT
// =============================================================================
//
// Four kinds of trouble reach the settlement layer:
//
//   InvalidInput       : the caller sent nonsense. Tell them. Don't retry.
//   NotFound           : nothing matched. Tell them. Don't retry.
//   Persistence        : the store fell over. The in-flight trip is dead.
//   UpstreamUnavailable: the pricing engine is down. NOBODY hears about it
//                         except the logs; the gateway prices with the
//                         fallback rate and life goes on.
//
// InvalidConfig only exists at startup.
// =============================================================================

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettlementError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    /// Never returned by `TripOrchestrator`; the pricing gateway absorbs it.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type SettlementResult<T> = Result<T, SettlementError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_context() {
        let err = SettlementError::NotFound("no trips for rider 42".into());
        assert_eq!(err.to_string(), "not found: no trips for rider 42");

        let err = SettlementError::InvalidInput("distance must be positive".into());
        assert!(err.to_string().starts_with("invalid input"));
    }
}
