//! First-party analytics client
//!
//! This module is the sending half of the pipeline:
//! - [`AnalyticsClient`] builds records for page views, interactions and
//!   session ends, gated by the visitor's consent
//! - [`HttpTransport`] posts them to the collector
//! - local buffers keep an audit copy of every record and a queue of failed
//!   submissions that [`AnalyticsClient::retry_failed`] drains
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mird_core::client::{AnalyticsClient, ClientStores, HttpTransport, SystemClock};
//! use mird_core::store::MemoryStore;
//! use mird_core::{Config, PageContext};
//!
//! # async fn run() -> mird_core::Result<()> {
//! let config = Config::load()?;
//! let transport = Arc::new(HttpTransport::new(&config.client)?);
//! let stores = ClientStores {
//!     local: MemoryStore::shared(),
//!     session: MemoryStore::shared(),
//! };
//! let mut client = AnalyticsClient::new(
//!     &config.client,
//!     transport,
//!     stores,
//!     PageContext::default(),
//!     Arc::new(SystemClock),
//! )?;
//! client.init();
//! client.track_event("Engagement", "CTA Click", Some("Enroll Now"), None);
//! client.flush().await;
//! # Ok(())
//! # }
//! ```

mod buffer;
mod interactions;
mod session;
mod tracker;
mod transport;

pub use buffer::{RecordBuffer, BACKUP_KEY, FAILED_KEY};
pub use interactions::{EventSpec, Interaction, ScrollDepthTracker, ScrollPosition, SCROLL_DEPTHS};
pub use session::{
    load_session, persist_session, record_activity, Clock, ManualClock, SessionTimer, SystemClock,
    ACTIVITY_KEY, PAGEVIEWS_KEY, SESSION_KEY,
};
pub use tracker::{AnalyticsClient, ClientStores, RetryReport};
pub use transport::{HttpTransport, TrackResponse, Transport, TOKEN_HEADER};
