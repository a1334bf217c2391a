//! # hookrelay-server
//!
//! The HTTP side of the relay.
//!
//! - [`routes`]: `POST {webhookPath}` ingress and `GET /health`
//! - [`github`]: typed views over GitHub webhook payloads
//! - [`format`]: plain-text notifications per event type
//! - [`dispatch`]: signature check, rule resolution and fan-out delivery
//! - [`shutdown`]: signal-driven graceful shutdown

#![deny(unsafe_code)]

pub mod dispatch;
pub mod errors;
pub mod format;
pub mod github;
pub mod health;
pub mod routes;
pub mod server;
pub mod shutdown;

pub use dispatch::{DeliveryReport, DeliveryStatus, Dispatcher, FailedDelivery, Outcome};
pub use errors::{DispatchError, IngressError};
pub use routes::{AppState, WebhookResponse, WebhookStatus, router};
pub use server::RelayServer;
pub use shutdown::ShutdownCoordinator;
