//! RequestStore: dual-indexed, TTL-bounded storage of outstanding requests.
//!
//! Both indices live behind one mutex:
//! - `by_actor`: actor -> token (at most one live request per actor)
//! - `by_token`: token -> entry (owns the entry)
//!
//! Every mutation updates both maps under the same guard, and every fallible
//! step (capacity check, token draw) runs before the first write. An entry is
//! therefore reachable from both indices or from neither.
//!
//! The store never runs callbacks. Removal hands the entry back to the
//! caller, which fires the outcome after the guard is released.

use crate::actor::Actor;
use crate::error::{BrokerResult, RegistrationError, StoreError};
use crate::request::Request;
use crate::token::{RequestToken, TokenGenerator, UuidTokenGenerator, MAX_TOKEN_ATTEMPTS};
use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// One outstanding request as stored.
#[derive(Debug)]
pub struct Entry<A> {
    token: RequestToken,
    actor: A,
    request: Arc<Request<A>>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl<A: Clone> Clone for Entry<A> {
    fn clone(&self) -> Self {
        Self {
            token: self.token,
            actor: self.actor.clone(),
            request: Arc::clone(&self.request),
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

impl<A> Entry<A> {
    pub fn token(&self) -> RequestToken {
        self.token
    }

    pub fn actor(&self) -> &A {
        &self.actor
    }

    pub fn request(&self) -> &Arc<Request<A>> {
        &self.request
    }

    pub fn prompt(&self) -> &str {
        self.request.prompt()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// An entry is expired from `expires_at` on (inclusive).
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Time left before expiry, `None` once expired.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        (self.expires_at - now).to_std().ok().filter(|d| !d.is_zero())
    }
}

impl<A: Serialize> Serialize for Entry<A> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Entry", 5)?;
        s.serialize_field("token", &self.token)?;
        s.serialize_field("actor", &self.actor)?;
        s.serialize_field("prompt", self.request.prompt())?;
        s.serialize_field("created_at", &self.created_at)?;
        s.serialize_field("expires_at", &self.expires_at)?;
        s.end()
    }
}

/// Result of [`RequestStore::put_at`].
#[derive(Debug)]
pub struct PutOutcome<A> {
    pub entry: Entry<A>,
    /// The actor's previous entry, removed from both indices. Not fired.
    pub displaced: Option<Entry<A>>,
}

/// How to find the entry a resolving action refers to.
#[derive(Debug)]
pub enum Lookup<'a, A> {
    Actor(&'a A),
    Token(RequestToken),
    /// The token, but only if `actor` owns it.
    Owned { actor: &'a A, token: RequestToken },
}

impl<A> Clone for Lookup<'_, A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A> Copy for Lookup<'_, A> {}

struct Indices<A> {
    by_actor: HashMap<A, RequestToken>,
    by_token: HashMap<RequestToken, Entry<A>>,
}

impl<A: Actor> Indices<A> {
    fn find(&self, lookup: Lookup<'_, A>) -> Option<RequestToken> {
        match lookup {
            Lookup::Actor(actor) => self.by_actor.get(actor).copied(),
            Lookup::Token(token) => self.by_token.contains_key(&token).then_some(token),
            Lookup::Owned { actor, token } => self
                .by_token
                .get(&token)
                .filter(|entry| &entry.actor == actor)
                .map(|_| token),
        }
    }

    fn remove(&mut self, token: RequestToken) -> Option<Entry<A>> {
        let entry = self.by_token.remove(&token)?;
        if self.by_actor.get(&entry.actor) == Some(&token) {
            self.by_actor.remove(&entry.actor);
        }
        Some(entry)
    }

    fn live_count(&self, now: DateTime<Utc>) -> usize {
        self.by_token
            .values()
            .filter(|entry| !entry.is_expired_at(now))
            .count()
    }
}

/// Thread-safe store of outstanding requests.
pub struct RequestStore<A> {
    indices: Mutex<Indices<A>>,
    tokens: Arc<dyn TokenGenerator>,
    max_active: Option<usize>,
}

impl<A: Actor> Default for RequestStore<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Actor> RequestStore<A> {
    /// Unbounded store drawing random UUID tokens.
    pub fn new() -> Self {
        Self::with_generator(Arc::new(UuidTokenGenerator))
    }

    pub fn with_generator(tokens: Arc<dyn TokenGenerator>) -> Self {
        Self {
            indices: Mutex::new(Indices {
                by_actor: HashMap::new(),
                by_token: HashMap::new(),
            }),
            tokens,
            max_active: None,
        }
    }

    /// Reject new actors once this many live entries exist.
    pub fn with_max_active(mut self, max_active: Option<usize>) -> Self {
        self.max_active = max_active;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, Indices<A>>, StoreError> {
        self.indices.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Install `request` for `actor`, displacing any previous entry.
    ///
    /// `expires_at = now + ttl`. The displaced entry is returned unfired.
    pub fn put_at(
        &self,
        actor: A,
        request: Arc<Request<A>>,
        ttl: chrono::Duration,
        now: DateTime<Utc>,
    ) -> BrokerResult<PutOutcome<A>> {
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| RegistrationError::InvalidTtl {
                reason: "expiry overflows the calendar".into(),
            })?;

        let mut indices = self.lock()?;

        if let Some(max) = self.max_active {
            let supersedes = indices.by_actor.contains_key(&actor);
            if !supersedes && indices.by_token.len() >= max && indices.live_count(now) >= max {
                return Err(RegistrationError::CapacityExceeded { max }.into());
            }
        }

        let token = self.draw_token(&indices)?;

        let entry = Entry {
            token,
            actor: actor.clone(),
            request,
            created_at: now,
            expires_at,
        };

        let displaced = indices
            .by_actor
            .insert(actor, token)
            .and_then(|previous| indices.by_token.remove(&previous));
        indices.by_token.insert(token, entry.clone());

        Ok(PutOutcome { entry, displaced })
    }

    fn draw_token(&self, indices: &Indices<A>) -> Result<RequestToken, StoreError> {
        for attempt in 1..=MAX_TOKEN_ATTEMPTS {
            let candidate = self.tokens.generate();
            if !indices.by_token.contains_key(&candidate) {
                return Ok(candidate);
            }
            tracing::warn!(attempt, token = %candidate, "request token collision, redrawing");
        }
        Err(StoreError::TokenSpaceExhausted {
            attempts: MAX_TOKEN_ATTEMPTS,
        })
    }

    /// Live entry for `actor`, if any. Does not mutate.
    pub fn get_by_actor_at(&self, actor: &A, now: DateTime<Utc>) -> Result<Option<Entry<A>>, StoreError> {
        self.get_at(Lookup::Actor(actor), now)
    }

    /// Live entry for `token`, if any. Does not mutate.
    pub fn get_by_token_at(
        &self,
        token: RequestToken,
        now: DateTime<Utc>,
    ) -> Result<Option<Entry<A>>, StoreError> {
        self.get_at(Lookup::Token(token), now)
    }

    /// Non-mutating lookup; entries past `expires_at` read as absent.
    pub fn get_at(&self, lookup: Lookup<'_, A>, now: DateTime<Utc>) -> Result<Option<Entry<A>>, StoreError> {
        let indices = self.lock()?;
        Ok(indices
            .find(lookup)
            .and_then(|token| indices.by_token.get(&token))
            .filter(|entry| !entry.is_expired_at(now))
            .cloned())
    }

    /// Atomically remove the entry `lookup` refers to, expired or not.
    ///
    /// Exactly one concurrent caller gets `Some` for a given entry.
    pub fn take(&self, lookup: Lookup<'_, A>) -> Result<Option<Entry<A>>, StoreError> {
        let mut indices = self.lock()?;
        Ok(indices.find(lookup).and_then(|token| indices.remove(token)))
    }

    /// Remove by token. Removing an absent token is a no-op.
    pub fn remove(&self, token: RequestToken) -> Result<Option<Entry<A>>, StoreError> {
        self.take(Lookup::Token(token))
    }

    /// Remove the actor's entry. Removing an absent entry is a no-op.
    pub fn remove_actor(&self, actor: &A) -> Result<Option<Entry<A>>, StoreError> {
        self.take(Lookup::Actor(actor))
    }

    /// Remove every entry with `expires_at <= now` and hand them over.
    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> Result<ExpiredEntries<A>, StoreError> {
        let mut indices = self.lock()?;
        let expired: Vec<RequestToken> = indices
            .by_token
            .values()
            .filter(|entry| entry.is_expired_at(now))
            .map(|entry| entry.token)
            .collect();
        let mut removed: Vec<Entry<A>> = expired
            .into_iter()
            .filter_map(|token| indices.remove(token))
            .collect();
        drop(indices);

        removed.sort_by_key(|entry| entry.expires_at);
        Ok(ExpiredEntries {
            inner: removed.into_iter(),
        })
    }

    /// Snapshot of live entries, soonest expiry first.
    pub fn list_active_at(&self, now: DateTime<Utc>) -> Result<Vec<Entry<A>>, StoreError> {
        let indices = self.lock()?;
        let mut active: Vec<Entry<A>> = indices
            .by_token
            .values()
            .filter(|entry| !entry.is_expired_at(now))
            .cloned()
            .collect();
        drop(indices);

        active.sort_by_key(|entry| (entry.expires_at, entry.token));
        Ok(active)
    }

    /// Entries physically held, including expired ones not yet swept.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.by_token.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    #[cfg(test)]
    fn is_consistent(&self) -> bool {
        let indices = self.lock().unwrap();
        indices.by_actor.len() == indices.by_token.len()
            && indices.by_actor.iter().all(|(actor, token)| {
                indices
                    .by_token
                    .get(token)
                    .map(|entry| &entry.actor == actor && entry.token == *token)
                    .unwrap_or(false)
            })
    }
}

/// Entries removed by one sweep. One-shot: each is yielded once.
pub struct ExpiredEntries<A> {
    inner: std::vec::IntoIter<Entry<A>>,
}

impl<A> Iterator for ExpiredEntries<A> {
    type Item = Entry<A>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<A> ExactSizeIterator for ExpiredEntries<A> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BrokerError;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request(prompt: &str) -> Arc<Request<String>> {
        Arc::new(Request::builder().prompt(prompt).build())
    }

    fn secs(s: i64) -> chrono::Duration {
        chrono::Duration::seconds(s)
    }

    /// Replays a fixed sequence of tokens, then repeats the last one.
    struct ScriptedTokens {
        script: Vec<RequestToken>,
        next: AtomicUsize,
    }

    impl TokenGenerator for ScriptedTokens {
        fn generate(&self) -> RequestToken {
            let i = self.next.fetch_add(1, Ordering::SeqCst);
            self.script[i.min(self.script.len() - 1)]
        }
    }

    fn scripted(script: Vec<RequestToken>) -> Arc<ScriptedTokens> {
        Arc::new(ScriptedTokens {
            script,
            next: AtomicUsize::new(0),
        })
    }

    #[test]
    fn put_indexes_by_actor_and_token() {
        let store = RequestStore::new();
        let now = Utc::now();
        let put = store
            .put_at("alice".to_string(), request("reset?"), secs(15), now)
            .unwrap();
        assert!(put.displaced.is_none());
        assert_eq!(put.entry.expires_at(), now + secs(15));

        let by_actor = store.get_by_actor_at(&"alice".to_string(), now).unwrap().unwrap();
        let by_token = store.get_by_token_at(put.entry.token(), now).unwrap().unwrap();
        assert_eq!(by_actor.token(), by_token.token());
        assert_eq!(by_actor.prompt(), "reset?");
        assert!(store.is_consistent());
    }

    #[test]
    fn second_put_displaces_first_without_leaving_its_token() {
        let store = RequestStore::new();
        let now = Utc::now();
        let alice = "alice".to_string();
        let first = store.put_at(alice.clone(), request("one"), secs(15), now).unwrap();
        let second = store.put_at(alice.clone(), request("two"), secs(15), now).unwrap();

        let displaced = second.displaced.expect("first entry displaced");
        assert_eq!(displaced.token(), first.entry.token());
        assert!(store.get_by_token_at(first.entry.token(), now).unwrap().is_none());
        assert_eq!(
            store.get_by_actor_at(&alice, now).unwrap().unwrap().prompt(),
            "two"
        );
        assert_eq!(store.len().unwrap(), 1);
        assert!(store.is_consistent());
    }

    #[test]
    fn reads_treat_expired_entries_as_absent_without_removing_them() {
        let store = RequestStore::new();
        let now = Utc::now();
        let alice = "alice".to_string();
        let put = store.put_at(alice.clone(), request("x"), secs(1), now).unwrap();

        let later = now + secs(1);
        assert!(store.get_by_actor_at(&alice, later).unwrap().is_none());
        assert!(store.get_by_token_at(put.entry.token(), later).unwrap().is_none());
        assert_eq!(store.len().unwrap(), 1, "lazy expiry leaves the entry until swept");
    }

    #[test]
    fn take_is_exclusive() {
        let store = RequestStore::new();
        let now = Utc::now();
        let alice = "alice".to_string();
        let put = store.put_at(alice.clone(), request("x"), secs(15), now).unwrap();

        assert!(store.take(Lookup::Actor(&alice)).unwrap().is_some());
        assert!(store.take(Lookup::Token(put.entry.token())).unwrap().is_none());
        assert!(store.remove_actor(&alice).unwrap().is_none());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn owned_lookup_ignores_tokens_of_other_actors() {
        let store = RequestStore::new();
        let now = Utc::now();
        let alice = "alice".to_string();
        let bob = "bob".to_string();
        let put = store.put_at(alice.clone(), request("x"), secs(15), now).unwrap();

        let stolen = store
            .take(Lookup::Owned {
                actor: &bob,
                token: put.entry.token(),
            })
            .unwrap();
        assert!(stolen.is_none());
        assert!(store
            .take(Lookup::Owned {
                actor: &alice,
                token: put.entry.token(),
            })
            .unwrap()
            .is_some());
    }

    #[test]
    fn sweep_yields_each_expired_entry_once() {
        let store = RequestStore::new();
        let now = Utc::now();
        store.put_at("a".to_string(), request("a"), secs(1), now).unwrap();
        store.put_at("b".to_string(), request("b"), secs(2), now).unwrap();
        store.put_at("c".to_string(), request("c"), secs(60), now).unwrap();

        let swept: Vec<String> = store
            .sweep_expired_at(now + secs(2))
            .unwrap()
            .map(|entry| entry.actor().clone())
            .collect();
        assert_eq!(swept, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(store.sweep_expired_at(now + secs(2)).unwrap().len(), 0);
        assert_eq!(store.len().unwrap(), 1);
        assert!(store.is_consistent());
    }

    #[test]
    fn collision_is_retried() {
        let taken = RequestToken::from_uuid(uuid::Uuid::new_v4());
        let fresh = RequestToken::from_uuid(uuid::Uuid::new_v4());
        let store = RequestStore::with_generator(scripted(vec![taken, taken, fresh]));
        let now = Utc::now();

        let first = store.put_at("a".to_string(), request("a"), secs(5), now).unwrap();
        assert_eq!(first.entry.token(), taken);
        let second = store.put_at("b".to_string(), request("b"), secs(5), now).unwrap();
        assert_eq!(second.entry.token(), fresh);
    }

    #[test]
    fn exhausted_token_space_mutates_nothing() {
        let taken = RequestToken::from_uuid(uuid::Uuid::new_v4());
        let store = RequestStore::with_generator(scripted(vec![taken]));
        let now = Utc::now();
        store.put_at("a".to_string(), request("a"), secs(5), now).unwrap();

        let err = store
            .put_at("b".to_string(), request("b"), secs(5), now)
            .unwrap_err();
        assert!(matches!(
            err,
            BrokerError::Store(StoreError::TokenSpaceExhausted { .. })
        ));
        assert!(store.get_by_actor_at(&"b".to_string(), now).unwrap().is_none());
        assert_eq!(store.len().unwrap(), 1);
        assert!(store.is_consistent());
    }

    #[test]
    fn capacity_rejects_new_actors_but_not_supersede() {
        let store = RequestStore::new().with_max_active(Some(2));
        let now = Utc::now();
        store.put_at("a".to_string(), request("a"), secs(5), now).unwrap();
        store.put_at("b".to_string(), request("b"), secs(1), now).unwrap();

        let err = store
            .put_at("c".to_string(), request("c"), secs(5), now)
            .unwrap_err();
        assert!(matches!(
            err,
            BrokerError::Registration(RegistrationError::CapacityExceeded { max: 2 })
        ));

        store.put_at("a".to_string(), request("a2"), secs(5), now).unwrap();

        // Expired entries do not count against the bound.
        store
            .put_at("c".to_string(), request("c"), secs(5), now + secs(1))
            .unwrap();
        assert_eq!(store.len().unwrap(), 3);
        assert!(store.is_consistent());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Put(u8, i64),
        TakeActor(u8),
        TakeToken(usize),
        Sweep(i64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..4, 1i64..10).prop_map(|(a, ttl)| Op::Put(a, ttl)),
            (0u8..4).prop_map(Op::TakeActor),
            (0usize..16).prop_map(Op::TakeToken),
            (0i64..12).prop_map(Op::Sweep),
        ]
    }

    proptest! {
        #[test]
        fn indices_never_drift(ops in proptest::collection::vec(op(), 1..64)) {
            let store = RequestStore::new();
            let start = Utc::now();
            let mut issued: Vec<RequestToken> = Vec::new();

            for op in ops {
                match op {
                    Op::Put(actor, ttl) => {
                        let put = store
                            .put_at(actor.to_string(), request("p"), secs(ttl), start)
                            .unwrap();
                        issued.push(put.entry.token());
                    }
                    Op::TakeActor(actor) => {
                        store.remove_actor(&actor.to_string()).unwrap();
                    }
                    Op::TakeToken(i) => {
                        if let Some(token) = issued.get(i) {
                            store.remove(*token).unwrap();
                        }
                    }
                    Op::Sweep(offset) => {
                        for entry in store.sweep_expired_at(start + secs(offset)).unwrap() {
                            prop_assert!(entry.is_expired_at(start + secs(offset)));
                        }
                    }
                }
                prop_assert!(store.is_consistent());
                prop_assert!(store.len().unwrap() <= 4);
            }
        }
    }
}
