//! Request tokens.
//!
//! Tokens are sampled, not sequential, so a fresh draw can collide with a
//! live token. The store retries up to [`MAX_TOKEN_ATTEMPTS`] draws.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Number of draws the store makes before giving up on a free token.
pub const MAX_TOKEN_ATTEMPTS: usize = 16;

/// Unique identifier addressing one outstanding request directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestToken(Uuid);

impl RequestToken {
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl FromStr for RequestToken {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Source of candidate tokens.
pub trait TokenGenerator: Send + Sync {
    fn generate(&self) -> RequestToken;
}

/// Random (v4) UUID tokens.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidTokenGenerator;

impl TokenGenerator for UuidTokenGenerator {
    fn generate(&self) -> RequestToken {
        RequestToken(Uuid::new_v4())
    }
}
