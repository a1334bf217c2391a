//! # hookrelay-core
//!
//! Routing and authentication primitives for the hookrelay webhook relay.
//!
//! - [`matching`]: case-insensitive exact/glob matching for repository and
//!   branch names
//! - [`signature`]: `X-Hub-Signature-256` HMAC verification over raw bodies
//! - [`rules`]: [`Rule`] and [`Destination`] definitions
//! - [`index`]: first-match [`RuleIndex`] and the atomically swappable
//!   [`RuleIndexHandle`]
//! - [`event`]: the validated [`EventRecord`] handed over by the ingress layer
//! - [`retry`]: backoff schedules shared by the transports
//! - [`logging`]: `tracing` subscriber setup
//!
//! Nothing in this crate performs I/O. Matching and resolution never fail:
//! the absence of a match is a normal return value.

#![deny(unsafe_code)]

pub mod errors;
pub mod event;
pub mod index;
pub mod logging;
pub mod matching;
pub mod retry;
pub mod rules;
pub mod signature;

pub use errors::SignatureError;
pub use event::EventRecord;
pub use index::{RuleIndex, RuleIndexHandle};
pub use matching::match_pattern;
pub use retry::BackoffPolicy;
pub use rules::{Destination, Rule};
pub use signature::verify_signature;
