//! # mird-core
//!
//! Core library for the MIRD landing-page analytics pipeline.
//!
//! This library provides:
//! - Consent storage keyed by cookie category
//! - The analytics client: sessions, page views, interaction events, local
//!   buffers and the failed-submission queue
//! - The collector endpoint: token check, IP anonymization, JSON-lines storage
//!   with rotation, session summaries
//! - EU redirect decisions for enrolment clicks
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Records flow in one direction:
//! - **Client:** consent-gated records are buffered locally and posted with
//!   the shared token
//! - **Collector:** accepted records are enriched and appended to disk
//!
//! ## Example
//!
//! ```rust,no_run
//! use mird_core::collector::{serve, shutdown_signal, CollectorState};
//! use mird_core::Config;
//!
//! # async fn run() -> mird_core::Result<()> {
//! let config = Config::load()?;
//! let state = CollectorState::new(config.collector)?;
//! serve(state, shutdown_signal()).await?;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use consent::ConsentStore;
pub use error::{Error, Result};
pub use types::*;

// Public modules
pub mod client;
pub mod collector;
pub mod config;
pub mod consent;
pub mod error;
pub mod geo;
pub mod logging;
pub mod store;
pub mod types;
