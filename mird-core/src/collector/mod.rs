//! Tracking endpoint
//!
//! Receives analytics records over HTTP, anonymizes the sender address and
//! appends them to JSON-lines files on disk.
//!
//! ## Storage
//!
//! - every accepted record goes to the main data file, enriched with
//!   `server_timestamp` and `anonymized_ip`
//! - records carrying a `sessionId` are also copied, unenriched, into a
//!   per-session file
//! - a `session_end` record turns the session file into a summary mail
//!   (when a recipient is configured) and removes it
//!
//! ## Usage
//!
//! ```toml
//! [collector]
//! bind = "127.0.0.1:8080"
//! data_file = "/srv/mird/analytics_data.json"
//! security_token = "change-me"
//! allowed_origins = ["https://tglauner.com"]
//! notification_email = "ops@example.com"
//! ```

mod anonymize;
mod error_log;
mod lock;
mod server;
mod storage;
mod summary;

pub use anonymize::{anonymize_addr, anonymize_ip, UNKNOWN_IP};
pub use error_log::ErrorLog;
pub use lock::{sidecar_path, FileLock};
pub use server::{router, serve, serve_listener, shutdown_signal, CollectorState, TrackError, MAX_BODY_BYTES};
pub use storage::{sanitize_session_id, EventLog};
pub use summary::{compose_summary, summary_mail, Mail, Mailer, SendmailMailer, SUMMARY_SUBJECT};
