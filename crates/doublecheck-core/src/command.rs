//! Interpreting an actor's next command.
//!
//! A broker claims the confirm/deny words of its [`Vocabulary`]. Anything
//! else is left to the host's normal dispatch.

use crate::request::Outcome;
use crate::token::RequestToken;
use serde::{Deserialize, Serialize};

/// The words a broker answers to, matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Vocabulary {
    pub confirm: Vec<String>,
    pub deny: Vec<String>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            confirm: vec!["confirm".into(), "ok".into(), "yes".into()],
            deny: vec!["deny".into(), "cancel".into(), "no".into()],
        }
    }
}

impl Vocabulary {
    /// Which decision `command` asks for, if it is one of ours.
    ///
    /// A single leading `/` is ignored.
    pub fn classify(&self, command: &str) -> Option<Decision> {
        let word = normalize(command);
        if contains(&self.confirm, word) {
            Some(Decision::Confirm)
        } else if contains(&self.deny, word) {
            Some(Decision::Deny)
        } else {
            None
        }
    }

    /// Whether two vocabularies compete for at least one word.
    pub fn overlaps(&self, other: &Vocabulary) -> bool {
        self.words().any(|word| other.classify(word).is_some())
    }

    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.confirm.iter().chain(self.deny.iter()).map(String::as_str)
    }

    /// Primary confirm word, used in user-facing hints.
    pub fn primary_confirm(&self) -> &str {
        self.confirm.first().map(String::as_str).unwrap_or("confirm")
    }

    /// Primary deny word, used in user-facing hints.
    pub fn primary_deny(&self) -> &str {
        self.deny.first().map(String::as_str).unwrap_or("deny")
    }
}

fn normalize(command: &str) -> &str {
    let trimmed = command.trim();
    trimmed.strip_prefix('/').unwrap_or(trimmed)
}

fn contains(words: &[String], word: &str) -> bool {
    words.iter().any(|w| normalize(w).eq_ignore_ascii_case(word))
}

/// The two answers an actor can give.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Confirm,
    Deny,
}

impl Decision {
    pub fn outcome(self) -> Outcome {
        match self {
            Self::Confirm => Outcome::Confirmed,
            Self::Deny => Outcome::Denied,
        }
    }
}

/// Which request a resolving action addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveTarget<A> {
    /// The actor's current request.
    Actor(A),
    /// A request by token, regardless of owner.
    Token(RequestToken),
    /// A request by token, only if `actor` owns it.
    Owned { actor: A, token: RequestToken },
}

impl<A> ResolveTarget<A> {
    /// Token first, actor fallback: an argument that parses as a token
    /// targets that token (owned by `actor`); anything else targets the
    /// actor's current request.
    pub fn parse(actor: A, argument: &str) -> Self {
        match argument.parse::<RequestToken>() {
            Ok(token) => Self::Owned { actor, token },
            Err(_) => Self::Actor(actor),
        }
    }

    /// The token named explicitly, if any.
    pub fn token(&self) -> Option<RequestToken> {
        match self {
            Self::Actor(_) => None,
            Self::Token(token) | Self::Owned { token, .. } => Some(*token),
        }
    }
}
