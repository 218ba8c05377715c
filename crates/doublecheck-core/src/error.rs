//! Error types for the confirmation broker.

use crate::request::Outcome;
use crate::token::RequestToken;

/// Rejected submission. Nothing was stored.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    #[error("actor cannot receive requests")]
    UnaddressableActor,

    #[error("invalid ttl: {reason}")]
    InvalidTtl { reason: String },

    #[error("too many active requests (max {max})")]
    CapacityExceeded { max: usize },

    /// The request's `on_request` step refused to present it.
    #[error("request was not presented: {message}")]
    NotPresented { message: String },
}

/// Structural failures of the request store.
///
/// These abort the operation; the indices are never left half-updated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("no free token after {attempts} attempts")]
    TokenSpaceExhausted { attempts: usize },

    #[error("request store lock poisoned")]
    Poisoned,
}

/// Broker errors.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("registration rejected: {0}")]
    Registration(#[from] RegistrationError),

    /// Nothing live for the given actor or token.
    #[error("no active confirmation request")]
    NoActiveRequest,

    /// A request was found but its TTL had elapsed. Its `on_expire` has run;
    /// `callback_error` holds that callback's failure, if any.
    #[error("confirmation request expired")]
    RequestExpired {
        token: RequestToken,
        callback_error: Option<String>,
    },

    /// The outcome callback failed. The entry has been removed regardless.
    #[error("{outcome} callback for {token} failed: {message}")]
    Callback {
        outcome: Outcome,
        token: RequestToken,
        message: String,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl BrokerError {
    /// Whether the caller should treat this as "nothing to confirm/deny"
    /// rather than a fault.
    pub fn is_nothing_pending(&self) -> bool {
        matches!(self, Self::NoActiveRequest | Self::RequestExpired { .. })
    }
}

/// Configuration loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {message}")]
    Invalid { message: String },
}

/// Result type for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_pending_covers_missing_and_expired() {
        assert!(BrokerError::NoActiveRequest.is_nothing_pending());
        let token = "7d0b6f2e-4f7a-4f43-9b5e-2b1c1b5a0c11".parse().unwrap();
        assert!(BrokerError::RequestExpired {
            token,
            callback_error: None
        }
        .is_nothing_pending());
        assert!(!BrokerError::Store(StoreError::Poisoned).is_nothing_pending());
        assert!(!BrokerError::from(RegistrationError::UnaddressableActor).is_nothing_pending());
    }

    #[test]
    fn callback_error_names_outcome() {
        let token = "7d0b6f2e-4f7a-4f43-9b5e-2b1c1b5a0c11".parse().unwrap();
        let err = BrokerError::Callback {
            outcome: Outcome::Denied,
            token,
            message: "boom".into(),
        };
        assert_eq!(
            err.to_string(),
            "denied callback for 7d0b6f2e-4f7a-4f43-9b5e-2b1c1b5a0c11 failed: boom"
        );
    }
}
