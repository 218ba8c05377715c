//! Pending decisions and their outcome callbacks.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Outcome callback: receives the actor and the request's argument bundle.
///
/// The returned value is handed back to whoever resolved the request in
/// [`Resolution::value`](crate::Resolution::value).
pub type Callback<A> = Arc<dyn Fn(&A, &Value) -> anyhow::Result<Value> + Send + Sync>;

/// Presentation step run by `submit` before the request is stored. An error
/// rejects the submission.
pub type Presenter<A> = Arc<dyn Fn(&A, &Value) -> anyhow::Result<()> + Send + Sync>;

/// Terminal state of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Confirmed,
    Denied,
    Expired,
    Cancelled,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Denied => "denied",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable yes/no proposal addressed to one actor.
///
/// Missing callbacks are no-ops for that outcome.
pub struct Request<A> {
    prompt: String,
    args: Value,
    ttl: Option<Duration>,
    on_request: Option<Presenter<A>>,
    on_confirm: Option<Callback<A>>,
    on_deny: Option<Callback<A>>,
    on_expire: Option<Callback<A>>,
}

impl<A> Request<A> {
    pub fn builder() -> RequestBuilder<A> {
        RequestBuilder::default()
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn args(&self) -> &Value {
        &self.args
    }

    /// Requested time-to-live; `None` defers to the broker default.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub(crate) fn callback(&self, outcome: Outcome) -> Option<&Callback<A>> {
        match outcome {
            Outcome::Confirmed => self.on_confirm.as_ref(),
            Outcome::Denied => self.on_deny.as_ref(),
            Outcome::Expired => self.on_expire.as_ref(),
            Outcome::Cancelled => None,
        }
    }

    /// Show the request to `actor`. Without an `on_request` step this is a
    /// no-op.
    pub(crate) fn present(&self, actor: &A) -> anyhow::Result<()> {
        match &self.on_request {
            Some(present) => present(actor, &self.args),
            None => Ok(()),
        }
    }

    /// Run the callback for `outcome`. Missing callbacks yield `null`.
    pub(crate) fn fire(&self, outcome: Outcome, actor: &A) -> anyhow::Result<Value> {
        match self.callback(outcome) {
            Some(callback) => callback(actor, &self.args),
            None => Ok(Value::Null),
        }
    }
}

impl<A> fmt::Debug for Request<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("prompt", &self.prompt)
            .field("args", &self.args)
            .field("ttl", &self.ttl)
            .field("on_request", &self.on_request.is_some())
            .field("on_confirm", &self.on_confirm.is_some())
            .field("on_deny", &self.on_deny.is_some())
            .field("on_expire", &self.on_expire.is_some())
            .finish()
    }
}

pub struct RequestBuilder<A> {
    prompt: String,
    args: Value,
    ttl: Option<Duration>,
    on_request: Option<Presenter<A>>,
    on_confirm: Option<Callback<A>>,
    on_deny: Option<Callback<A>>,
    on_expire: Option<Callback<A>>,
}

impl<A> Default for RequestBuilder<A> {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            args: Value::Null,
            ttl: None,
            on_request: None,
            on_confirm: None,
            on_deny: None,
            on_expire: None,
        }
    }
}

impl<A> RequestBuilder<A> {
    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Runs when the request is submitted, before it is stored.
    pub fn on_request<F>(mut self, f: F) -> Self
    where
        F: Fn(&A, &Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_request = Some(Arc::new(f));
        self
    }

    pub fn on_confirm<F>(mut self, f: F) -> Self
    where
        F: Fn(&A, &Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.on_confirm = Some(Arc::new(f));
        self
    }

    pub fn on_deny<F>(mut self, f: F) -> Self
    where
        F: Fn(&A, &Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.on_deny = Some(Arc::new(f));
        self
    }

    pub fn on_expire<F>(mut self, f: F) -> Self
    where
        F: Fn(&A, &Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.on_expire = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> Request<A> {
        Request {
            prompt: self.prompt,
            args: self.args,
            ttl: self.ttl,
            on_request: self.on_request,
            on_confirm: self.on_confirm,
            on_deny: self.on_deny,
            on_expire: self.on_expire,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_callbacks_are_no_ops() {
        let request: Request<String> = Request::builder().prompt("delete world?").build();
        let actor = "alice".to_string();
        for outcome in [Outcome::Confirmed, Outcome::Denied, Outcome::Expired] {
            assert_eq!(request.fire(outcome, &actor).unwrap(), Value::Null);
        }
    }

    #[test]
    fn callbacks_receive_actor_and_args() {
        let request: Request<String> = Request::builder()
            .args(json!({ "world": "nether" }))
            .on_confirm(|actor, args| Ok(json!(format!("{actor} deleted {}", args["world"]))))
            .on_deny(|_, _| anyhow::bail!("deny handler offline"))
            .build();
        let actor = "alice".to_string();

        assert_eq!(
            request.fire(Outcome::Confirmed, &actor).unwrap(),
            json!("alice deleted \"nether\"")
        );
        assert!(request.fire(Outcome::Denied, &actor).is_err());
        assert!(request.callback(Outcome::Cancelled).is_none());
    }

    #[test]
    fn present_sees_args_and_may_refuse() {
        let request: Request<String> = Request::builder()
            .args(json!({ "world": "nether" }))
            .on_request(|actor, args| {
                anyhow::ensure!(args["world"] != "nether", "{actor} cannot see the nether");
                Ok(())
            })
            .build();
        let err = request.present(&"alice".to_string()).unwrap_err();
        assert_eq!(err.to_string(), "alice cannot see the nether");

        let silent: Request<String> = Request::builder().build();
        assert!(silent.present(&"alice".to_string()).is_ok());
    }
}
