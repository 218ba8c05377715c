//! Time-bounded confirm/deny requests, resolved exactly once.
//!
//! A host that is about to do something consequential on an actor's behalf
//! registers a [`Request`] with a [`ConfirmationBroker`] instead. The broker
//! provides:
//!
//! - one pending request per actor (a new submission supersedes the old one)
//! - an unguessable [`RequestToken`] per request, so an actor can answer a
//!   specific prompt
//! - exactly one terminal outcome per request: confirmed, denied, expired
//!   or cancelled
//! - lazy expiry on every read, plus an optional background [`Sweeper`]
//! - an [`OccupationBus`] so sibling brokers sharing confirm/deny words never
//!   both claim the same actor
//!
//! # Quick Start
//!
//! ```
//! use doublecheck_core::{ConfirmationBroker, Request};
//! use std::time::Duration;
//!
//! # fn main() -> anyhow::Result<()> {
//! let broker = ConfirmationBroker::<String>::new();
//!
//! let token = broker.submit(
//!     "alice".to_string(),
//!     Request::builder()
//!         .prompt("Delete 3 files?")
//!         .ttl(Duration::from_secs(30))
//!         .on_confirm(|actor, _args| {
//!             println!("deleting for {actor}");
//!             Ok(serde_json::Value::Null)
//!         })
//!         .build(),
//! )?;
//!
//! // Later, when alice types `/confirm <token>`:
//! if let Some(result) = broker.handle_command("alice".to_string(), "/confirm", &token.to_string()) {
//!     let resolution = result?;
//!     assert_eq!(resolution.token, token);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! [`BrokerConfig`] is read from YAML (see [`config`]) and can be overridden
//! from the environment:
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `DOUBLECHECK_DEFAULT_TTL_SECS` | TTL for requests without their own (default: 15) |
//! | `DOUBLECHECK_SWEEP_INTERVAL_MS` | Background sweep period (default: 1000) |

pub mod actor;
pub mod broker;
pub mod clock;
pub mod command;
pub mod config;
pub mod error;
pub mod messages;
pub mod occupation;
pub mod request;
pub mod store;
pub mod sweeper;
pub mod token;

pub use actor::Actor;
pub use broker::{BrokerBuilder, ConfirmationBroker, Resolution, SweepReport};
pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{Decision, ResolveTarget, Vocabulary};
pub use config::BrokerConfig;
pub use error::{BrokerError, BrokerResult, ConfigError, RegistrationError, StoreError};
pub use messages::Messages;
pub use occupation::{BrokerId, OccupationBus, OccupationListener, OccupationSignal};
pub use request::{Callback, Outcome, Presenter, Request, RequestBuilder};
pub use store::{Entry, Lookup, RequestStore};
pub use sweeper::{Sweeper, MIN_SWEEP_PERIOD};
pub use token::{RequestToken, TokenGenerator, UuidTokenGenerator, MAX_TOKEN_ATTEMPTS};
