//! ConfirmationBroker: the public request lifecycle service.
//!
//! ```text
//!            submit                      resolve / remove / sweep
//!   caller ─────────▶ RequestStore ◀──────────────────────────── caller
//!     │                 (one lock,                  │
//!     │                  two indices)               │ entry handed back
//!     ▼                                             ▼
//!   OccupationBus ──▶ sibling brokers       fire exactly one callback
//!   (sync delivery)   drop their claim      (after the lock is released)
//! ```
//!
//! Every entry ends in exactly one of `Confirmed`, `Denied`, `Expired`,
//! `Cancelled`. Whoever takes an entry out of the store decides its outcome;
//! every other path then finds nothing.
//!
//! An entry whose TTL has already elapsed when a resolve or a supersede takes
//! it out ends as `Expired` and fires `on_expire`, exactly as if the sweeper
//! had reached it first. Removal and occupation never fire anything.

use crate::actor::Actor;
use crate::clock::{Clock, SystemClock};
use crate::command::{Decision, ResolveTarget, Vocabulary};
use crate::config::BrokerConfig;
use crate::error::{BrokerError, BrokerResult, ConfigError, RegistrationError};
use crate::messages::Messages;
use crate::occupation::{BrokerId, OccupationBus, OccupationListener, OccupationSignal};
use crate::request::{Outcome, Request};
use crate::store::{Entry, Lookup, RequestStore};
use crate::token::{RequestToken, TokenGenerator, UuidTokenGenerator};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A request that reached a terminal state through the broker.
#[derive(Debug, Clone)]
pub struct Resolution<A> {
    pub token: RequestToken,
    pub actor: A,
    pub outcome: Outcome,
    /// Whatever the outcome callback returned (`null` when there was none).
    pub value: Value,
}

/// Result of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub callback_failures: usize,
}

/// Cheaply cloneable handle to one broker instance.
pub struct ConfirmationBroker<A: Actor> {
    inner: Arc<BrokerInner<A>>,
}

impl<A: Actor> Clone for ConfirmationBroker<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct BrokerInner<A: Actor> {
    id: BrokerId,
    store: RequestStore<A>,
    vocabulary: Arc<Vocabulary>,
    messages: Messages,
    default_ttl: Duration,
    sweep_interval: Duration,
    clock: Arc<dyn Clock>,
    bus: Option<OccupationBus<A>>,
}

pub struct BrokerBuilder<A: Actor> {
    config: BrokerConfig,
    clock: Arc<dyn Clock>,
    tokens: Arc<dyn TokenGenerator>,
    bus: Option<OccupationBus<A>>,
}

impl<A: Actor> Default for BrokerBuilder<A> {
    fn default() -> Self {
        Self {
            config: BrokerConfig::default(),
            clock: Arc::new(SystemClock),
            tokens: Arc::new(UuidTokenGenerator),
            bus: None,
        }
    }
}

impl<A: Actor> BrokerBuilder<A> {
    pub fn config(mut self, config: BrokerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn token_generator(mut self, tokens: Arc<dyn TokenGenerator>) -> Self {
        self.tokens = tokens;
        self
    }

    /// Join an occupation bus shared with sibling brokers.
    pub fn bus(mut self, bus: OccupationBus<A>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn build(self) -> Result<ConfirmationBroker<A>, ConfigError> {
        self.config.validate()?;
        let BrokerConfig {
            vocabulary,
            default_ttl_secs,
            sweep_interval_ms,
            max_active_requests,
            messages,
        } = self.config;

        let inner = Arc::new(BrokerInner {
            id: BrokerId::new(),
            store: RequestStore::with_generator(self.tokens).with_max_active(max_active_requests),
            vocabulary: Arc::new(vocabulary),
            messages,
            default_ttl: Duration::from_secs(default_ttl_secs),
            sweep_interval: Duration::from_millis(sweep_interval_ms),
            clock: self.clock,
            bus: self.bus,
        });

        if let Some(bus) = &inner.bus {
            let listener: Weak<dyn OccupationListener<A>> = Arc::downgrade(&inner) as _;
            bus.subscribe(listener);
        }
        debug!(broker = %inner.id, "confirmation broker ready");

        Ok(ConfirmationBroker { inner })
    }
}

impl<A: Actor> ConfirmationBroker<A> {
    pub fn builder() -> BrokerBuilder<A> {
        BrokerBuilder::default()
    }

    /// Broker with default configuration, wall clock, no bus.
    pub fn new() -> Self {
        let cfg = BrokerConfig::default();
        Self {
            inner: Arc::new(BrokerInner {
                id: BrokerId::new(),
                store: RequestStore::new().with_max_active(cfg.max_active_requests),
                vocabulary: Arc::new(cfg.vocabulary),
                default_ttl: Duration::from_secs(cfg.default_ttl_secs),
                sweep_interval: Duration::from_millis(cfg.sweep_interval_ms),
                messages: cfg.messages,
                clock: Arc::new(SystemClock),
                bus: None,
            }),
        }
    }

    pub fn id(&self) -> BrokerId {
        self.inner.id
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.inner.vocabulary
    }

    pub fn messages(&self) -> &Messages {
        &self.inner.messages
    }

    pub fn default_ttl(&self) -> Duration {
        self.inner.default_ttl
    }

    pub fn sweep_interval(&self) -> Duration {
        self.inner.sweep_interval
    }

    pub(crate) fn downgrade(&self) -> WeakBroker<A> {
        WeakBroker(Arc::downgrade(&self.inner))
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Register `request` for `actor` and claim the actor's vocabulary.
    ///
    /// The request's `on_request` step runs first; if it fails nothing is
    /// stored. A pending request the actor already had is superseded
    /// silently. When this returns, sibling brokers on the bus have already
    /// dropped their own claim on `actor`.
    pub fn submit(&self, actor: A, request: Request<A>) -> BrokerResult<RequestToken> {
        if !actor.is_addressable() {
            return Err(RegistrationError::UnaddressableActor.into());
        }
        let ttl = self.ttl_for(&request)?;
        if let Err(e) = request.present(&actor) {
            debug!(broker = %self.inner.id, actor = ?actor, error = %format!("{e:#}"), "request not presented");
            return Err(RegistrationError::NotPresented {
                message: format!("{e:#}"),
            }
            .into());
        }

        let claim = self.inner.bus.as_ref().map(|bus| bus.claim());
        let now = self.now();
        let put = self
            .inner
            .store
            .put_at(actor.clone(), Arc::new(request), ttl, now)?;
        let token = put.entry.token();
        let delivered = self.inner.bus.as_ref().map(|bus| {
            bus.publish(&OccupationSignal {
                sender: self.inner.id,
                actor: actor.clone(),
                vocabulary: Arc::clone(&self.inner.vocabulary),
            })
        });
        drop(claim);

        if let Some(previous) = put.displaced {
            self.inner.discard_displaced(previous, now);
        }
        debug!(
            broker = %self.inner.id,
            token = %token,
            actor = ?actor,
            expires_at = %put.entry.expires_at(),
            "request submitted"
        );
        if let Some(delivered) = delivered {
            debug!(broker = %self.inner.id, token = %token, delivered, "occupation published");
        }

        Ok(token)
    }

    fn ttl_for(&self, request: &Request<A>) -> Result<chrono::Duration, RegistrationError> {
        let ttl = request.ttl().unwrap_or(self.inner.default_ttl);
        if ttl.is_zero() {
            return Err(RegistrationError::InvalidTtl {
                reason: "ttl must be greater than zero".into(),
            });
        }
        chrono::Duration::from_std(ttl).map_err(|_| RegistrationError::InvalidTtl {
            reason: format!("ttl {ttl:?} is out of range"),
        })
    }

    pub fn resolve_confirm(&self, target: ResolveTarget<A>) -> BrokerResult<Resolution<A>> {
        self.resolve(target, Decision::Confirm)
    }

    pub fn resolve_deny(&self, target: ResolveTarget<A>) -> BrokerResult<Resolution<A>> {
        self.resolve(target, Decision::Deny)
    }

    /// Take the targeted request out of the store and fire `decision`'s
    /// callback.
    ///
    /// Fails with `NoActiveRequest` when nothing live matches the target,
    /// and with `RequestExpired` when the entry found had outlived its TTL
    /// without being swept. Its `on_expire` fires in that case.
    pub fn resolve(&self, target: ResolveTarget<A>, decision: Decision) -> BrokerResult<Resolution<A>> {
        let lookup = match &target {
            ResolveTarget::Actor(actor) => Lookup::Actor(actor),
            ResolveTarget::Token(token) => Lookup::Token(*token),
            ResolveTarget::Owned { actor, token } => Lookup::Owned {
                actor,
                token: *token,
            },
        };

        let Some(entry) = self.inner.store.take(lookup)? else {
            return Err(BrokerError::NoActiveRequest);
        };

        if entry.is_expired_at(self.now()) {
            let token = entry.token();
            let callback_error = match self.inner.fire(entry, Outcome::Expired) {
                Ok(_) => None,
                Err(BrokerError::Callback { message, .. }) => Some(message),
                Err(e) => Some(e.to_string()),
            };
            return Err(BrokerError::RequestExpired {
                token,
                callback_error,
            });
        }

        self.inner.fire(entry, decision.outcome())
    }

    /// Interpret an actor's command.
    ///
    /// Returns `None` when `command` is not one of this broker's words, so
    /// the host should dispatch it normally. `argument` may carry a token;
    /// otherwise the actor's current request is addressed.
    pub fn handle_command(
        &self,
        actor: A,
        command: &str,
        argument: &str,
    ) -> Option<BrokerResult<Resolution<A>>> {
        let decision = self.inner.vocabulary.classify(command)?;
        Some(self.resolve(ResolveTarget::parse(actor, argument), decision))
    }

    /// Cancel the actor's pending request without firing any callback.
    ///
    /// Idempotent: returns whether there was anything to cancel.
    pub fn remove(&self, actor: &A) -> BrokerResult<bool> {
        let Some(entry) = self.inner.store.remove_actor(actor)? else {
            return Ok(false);
        };
        debug!(
            broker = %self.inner.id,
            token = %entry.token(),
            actor = ?actor,
            outcome = %Outcome::Cancelled,
            "request removed"
        );
        Ok(true)
    }

    pub fn get(&self, actor: &A) -> BrokerResult<Option<Entry<A>>> {
        Ok(self.inner.store.get_by_actor_at(actor, self.now())?)
    }

    pub fn get_by_token(&self, token: RequestToken) -> BrokerResult<Option<Entry<A>>> {
        Ok(self.inner.store.get_by_token_at(token, self.now())?)
    }

    /// Snapshot of all live requests, soonest expiry first.
    pub fn list_active(&self) -> BrokerResult<Vec<Entry<A>>> {
        Ok(self.inner.store.list_active_at(self.now())?)
    }

    /// Expire every request whose TTL has elapsed, firing `on_expire` once
    /// for each.
    pub fn sweep(&self) -> BrokerResult<SweepReport> {
        let now = self.now();
        let mut report = SweepReport::default();
        for entry in self.inner.store.sweep_expired_at(now)? {
            report.expired += 1;
            if self.inner.fire(entry, Outcome::Expired).is_err() {
                report.callback_failures += 1;
            }
        }
        if report.expired > 0 {
            debug!(
                broker = %self.inner.id,
                expired = report.expired,
                failures = report.callback_failures,
                "sweep finished"
            );
        }
        Ok(report)
    }
}

/// Non-owning handle, used by background tasks so they do not keep a
/// dropped broker alive.
pub(crate) struct WeakBroker<A: Actor>(Weak<BrokerInner<A>>);

impl<A: Actor> WeakBroker<A> {
    pub(crate) fn upgrade(&self) -> Option<ConfirmationBroker<A>> {
        self.0.upgrade().map(|inner| ConfirmationBroker { inner })
    }
}

impl<A: Actor> Default for ConfirmationBroker<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Actor> BrokerInner<A> {
    /// Run the outcome callback for an entry already removed from the store.
    fn fire(&self, entry: Entry<A>, outcome: Outcome) -> BrokerResult<Resolution<A>> {
        let token = entry.token();
        match entry.request().fire(outcome, entry.actor()) {
            Ok(value) => {
                debug!(broker = %self.id, token = %token, actor = ?entry.actor(), %outcome, "request resolved");
                Ok(Resolution {
                    token,
                    actor: entry.actor().clone(),
                    outcome,
                    value,
                })
            }
            Err(e) => {
                warn!(
                    broker = %self.id,
                    token = %token,
                    actor = ?entry.actor(),
                    %outcome,
                    error = %format!("{e:#}"),
                    "outcome callback failed"
                );
                Err(BrokerError::Callback {
                    outcome,
                    token,
                    message: format!("{e:#}"),
                })
            }
        }
    }

    /// A superseded live entry is dropped silently; one that had already
    /// expired still gets its `on_expire`.
    fn discard_displaced(&self, entry: Entry<A>, now: DateTime<Utc>) {
        if entry.is_expired_at(now) {
            // `fire` logs a failure; the new request stands regardless.
            let _ = self.fire(entry, Outcome::Expired);
            return;
        }
        debug!(broker = %self.id, token = %entry.token(), actor = ?entry.actor(), "request superseded");
    }
}

impl<A: Actor> OccupationListener<A> for BrokerInner<A> {
    fn listener_id(&self) -> BrokerId {
        self.id
    }

    fn on_occupation(&self, signal: &OccupationSignal<A>) {
        if signal.sender == self.id || !self.vocabulary.overlaps(&signal.vocabulary) {
            return;
        }
        match self.store.remove_actor(&signal.actor) {
            Ok(Some(entry)) => {
                info!(
                    broker = %self.id,
                    claimed_by = %signal.sender,
                    token = %entry.token(),
                    actor = ?signal.actor,
                    "pending request yielded to another broker"
                );
            }
            Ok(None) => {}
            Err(e) => {
                warn!(broker = %self.id, error = %e, "failed to honour occupation signal");
            }
        }
    }
}

impl<A: Actor> Drop for BrokerInner<A> {
    fn drop(&mut self) {
        if let Some(bus) = &self.bus {
            bus.unsubscribe(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn broker_with_clock(clock: Arc<ManualClock>) -> ConfirmationBroker<String> {
        ConfirmationBroker::builder()
            .clock(clock)
            .build()
            .unwrap()
    }

    fn counting(counter: &Arc<AtomicUsize>) -> impl Fn(&String, &Value) -> anyhow::Result<Value> {
        let counter = Arc::clone(counter);
        move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        }
    }

    #[test]
    fn unaddressable_actor_is_rejected_before_any_state_change() {
        let broker = ConfirmationBroker::<String>::new();
        let err = broker
            .submit("  ".to_string(), Request::builder().build())
            .unwrap_err();
        assert!(matches!(
            err,
            BrokerError::Registration(RegistrationError::UnaddressableActor)
        ));
        assert!(broker.list_active().unwrap().is_empty());
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let broker = ConfirmationBroker::<String>::new();
        let err = broker
            .submit(
                "alice".to_string(),
                Request::builder().ttl(Duration::ZERO).build(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            BrokerError::Registration(RegistrationError::InvalidTtl { .. })
        ));
    }

    #[test]
    fn default_ttl_applies_when_request_has_none() {
        let clock = Arc::new(ManualClock::starting_now());
        let broker = broker_with_clock(clock.clone());
        let start = clock.now();
        broker
            .submit("alice".to_string(), Request::builder().build())
            .unwrap();
        let entry = broker.get(&"alice".to_string()).unwrap().unwrap();
        assert_eq!(entry.expires_at(), start + chrono::Duration::seconds(15));
    }

    #[test]
    fn superseding_an_expired_entry_fires_its_expiry() {
        let clock = Arc::new(ManualClock::starting_now());
        let broker = broker_with_clock(clock.clone());
        let expired = Arc::new(AtomicUsize::new(0));
        let alice = "alice".to_string();

        broker
            .submit(
                alice.clone(),
                Request::builder()
                    .ttl(Duration::from_secs(1))
                    .on_expire(counting(&expired))
                    .build(),
            )
            .unwrap();
        clock.advance(Duration::from_secs(2));
        broker
            .submit(alice.clone(), Request::builder().build())
            .unwrap();

        assert_eq!(expired.load(Ordering::SeqCst), 1);
        assert_eq!(broker.sweep().unwrap(), SweepReport::default());
    }

    #[test]
    fn remove_never_fires_even_past_the_deadline() {
        let clock = Arc::new(ManualClock::starting_now());
        let broker = broker_with_clock(clock.clone());
        let expired = Arc::new(AtomicUsize::new(0));
        let alice = "alice".to_string();

        broker
            .submit(
                alice.clone(),
                Request::builder()
                    .ttl(Duration::from_secs(1))
                    .on_expire(counting(&expired))
                    .build(),
            )
            .unwrap();
        clock.advance(Duration::from_secs(1));

        assert!(broker.remove(&alice).unwrap());
        assert!(!broker.remove(&alice).unwrap());
        assert_eq!(broker.sweep().unwrap().expired, 0);
        assert_eq!(expired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handle_command_ignores_foreign_words() {
        let broker = ConfirmationBroker::<String>::new();
        broker
            .submit("alice".to_string(), Request::builder().build())
            .unwrap();
        assert!(broker
            .handle_command("alice".to_string(), "teleport", "")
            .is_none());
        assert_eq!(broker.list_active().unwrap().len(), 1);
    }

    #[test]
    fn sweep_counts_callback_failures() {
        let clock = Arc::new(ManualClock::starting_now());
        let broker = broker_with_clock(clock.clone());
        broker
            .submit(
                "alice".to_string(),
                Request::builder()
                    .ttl(Duration::from_secs(1))
                    .on_expire(|_, _| anyhow::bail!("mailbox full"))
                    .build(),
            )
            .unwrap();
        broker
            .submit(
                "bob".to_string(),
                Request::builder().ttl(Duration::from_secs(1)).build(),
            )
            .unwrap();
        clock.advance(Duration::from_secs(5));

        assert_eq!(
            broker.sweep().unwrap(),
            SweepReport {
                expired: 2,
                callback_failures: 1
            }
        );
        assert!(broker.list_active().unwrap().is_empty());
    }
}
