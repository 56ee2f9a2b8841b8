//! Client-side request layer for the cloud storage service.
//!
//! * [`api::client::ApiClient`] builds authenticated JSON requests, caches GET
//!   responses for five minutes and normalises every failure into [`ApiError`].
//! * [`store::jobs::JobTracker`] mirrors server-side background jobs and
//!   re-polls each active one until it reaches a terminal status.
//! * [`bootstrap::sequencer::Bootstrapper`] gates start-up on a health probe and
//!   session restore, publishing progress on a watch channel.
//!
//! Every stateful piece is an explicitly constructed value; share them with
//! `Arc` instead of relying on globals.

pub mod api;
pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod store;
pub mod telemetry;
pub mod transport;

pub use api::client::{ApiClient, RequestOptions};
pub use config::ClientConfig;
pub use error::{ApiError, ApiResult};
