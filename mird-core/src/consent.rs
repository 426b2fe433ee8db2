//! Cookie consent persistence
//!
//! The consent banner offers three choices (Accept All, Essential Only, Save
//! Preferences). Each overwrites the single record stored under
//! [`CONSENT_KEY`] in the visitor's durable store.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::store::SharedStore;
use crate::types::ConsentRecord;

/// Durable store key of the consent record
pub const CONSENT_KEY: &str = "mird_consent";

/// Reads and writes the visitor's [`ConsentRecord`].
#[derive(Clone)]
pub struct ConsentStore {
    store: SharedStore,
}

impl ConsentStore {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Last saved record, or the defaults.
    ///
    /// Unreadable or malformed data is logged and treated as "no choice made".
    pub fn get(&self) -> ConsentRecord {
        let raw = match self.store.get(CONSENT_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return ConsentRecord::default(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read stored consent");
                return ConsentRecord::default();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(error = %e, "Error parsing stored consent, using defaults");
                ConsentRecord::default()
            }
        }
    }

    /// Overwrites the stored record, marking it accepted at `now`.
    pub fn save_at(&self, record: ConsentRecord, now: DateTime<Utc>) -> Result<ConsentRecord> {
        let record = ConsentRecord {
            essential: true,
            accepted: true,
            timestamp: Some(now),
            ..record
        };
        self.store
            .set(CONSENT_KEY, &serde_json::to_string(&record)?)?;
        tracing::debug!(
            functional = record.functional,
            analytics = record.analytics,
            "Consent saved"
        );
        Ok(record)
    }

    /// Overwrites the stored record, marking it accepted now.
    pub fn save(&self, record: ConsentRecord) -> Result<ConsentRecord> {
        self.save_at(record, Utc::now())
    }

    /// "Accept All"
    pub fn accept_all(&self) -> Result<ConsentRecord> {
        self.save(ConsentRecord::with_choices(true, true))
    }

    /// "Essential Only"
    pub fn essential_only(&self) -> Result<ConsentRecord> {
        self.save(ConsentRecord::with_choices(false, false))
    }

    /// "Save Preferences" from the preferences modal
    pub fn save_preferences(&self, functional: bool, analytics: bool) -> Result<ConsentRecord> {
        self.save(ConsentRecord::with_choices(functional, analytics))
    }
}
