//! User-facing text.
//!
//! The broker never renders anything itself; hosts use these strings to tell
//! an actor what happened. Templates accept `{confirm}`, `{deny}` and
//! `{token}` placeholders.

use crate::command::Vocabulary;
use crate::error::{BrokerError, RegistrationError};
use crate::token::RequestToken;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Messages {
    /// Shown after a prompt.
    pub instructions: String,
    /// Clickable/copyable action line carrying the token.
    pub action_line: String,
    pub no_request: String,
    pub expired: String,
    pub confirmed: String,
    pub denied: String,
    pub expired_notice: String,
    pub busy: String,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            instructions: "Please /{confirm} or /{deny} the action.".into(),
            action_line: "    [Confirm] /{confirm} {token}    [Deny] /{deny} {token}".into(),
            no_request: "No active confirmation request!".into(),
            expired: "The confirmation request expired!".into(),
            confirmed: "Action confirmed.".into(),
            denied: "Action denied.".into(),
            expired_notice: "Action request expired!".into(),
            busy: "Too many pending confirmations, try again later.".into(),
        }
    }
}

impl Messages {
    pub fn instructions(&self, vocabulary: &Vocabulary) -> String {
        render(&self.instructions, vocabulary, None)
    }

    pub fn action_line(&self, vocabulary: &Vocabulary, token: RequestToken) -> String {
        render(&self.action_line, vocabulary, Some(token))
    }

    /// Text for errors an actor should see, `None` for internal faults.
    pub fn for_error(&self, err: &BrokerError) -> Option<&str> {
        match err {
            BrokerError::NoActiveRequest => Some(self.no_request.as_str()),
            BrokerError::RequestExpired { .. } => Some(self.expired.as_str()),
            BrokerError::Registration(RegistrationError::CapacityExceeded { .. }) => {
                Some(self.busy.as_str())
            }
            _ => None,
        }
    }
}

fn render(template: &str, vocabulary: &Vocabulary, token: Option<RequestToken>) -> String {
    let mut out = template
        .replace("{confirm}", vocabulary.primary_confirm())
        .replace("{deny}", vocabulary.primary_deny());
    if let Some(token) = token {
        out = out.replace("{token}", &token.to_string());
    }
    out
}
