//! # hookrelay-transport
//!
//! Delivery of OneBot v11 actions to chat-bot backends.
//!
//! - [`PersistentTransport`]: one long-lived WebSocket per backend, with
//!   requests correlated to responses through a [`CorrelationTable`] and
//!   automatic reconnection with backoff
//! - [`StatelessTransport`]: one HTTP request per action
//! - [`TransportRegistry`]: named transports plus their lifecycle
//!
//! Both transports implement [`BotTransport`], so callers pick a backend by
//! name and never care which wire it uses.

#![deny(unsafe_code)]

pub mod correlation;
pub mod errors;
pub mod factory;
pub mod onebot;
pub mod persistent;
pub mod registry;
pub mod stateless;
pub mod transport;

pub use correlation::{CorrelationTable, PendingResponse};
pub use errors::{Result, TransportError};
pub use factory::build_transport;
pub use onebot::{MessageType, OneBotRequest, OneBotResponse, text_message, text_segment};
pub use persistent::{ConnectionState, PersistentConfig, PersistentTransport};
pub use registry::{TransportRegistry, TransportStatus};
pub use stateless::{StatelessConfig, StatelessTransport};
pub use transport::{BotTransport, TransportKind};
