//! Session bookkeeping and the inactivity timer
//!
//! The session id and page-view count live in the per-tab store under
//! [`SESSION_KEY`] and [`PAGEVIEWS_KEY`]. The inactivity timer is a single
//! deadline: re-arming replaces it, firing clears it, so at most one expiry is
//! ever pending and each period of inactivity rotates the session once.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::error::Result;
use crate::store::SharedStore;
use crate::types::Session;

/// Per-tab store key of the session id
pub const SESSION_KEY: &str = "mird_session";

/// Per-tab store key of the page-view counter
pub const PAGEVIEWS_KEY: &str = "mird_pageviews";

/// Per-tab store key of the last activity (RFC 3339)
pub const ACTIVITY_KEY: &str = "mird_session_activity";

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(start),
        })
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Re-armable single deadline.
#[derive(Debug, Clone)]
pub struct SessionTimer {
    timeout: Duration,
    deadline: Option<DateTime<Utc>>,
}

impl SessionTimer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: None,
        }
    }

    /// Cancels any pending deadline and starts a full window from `now`.
    pub fn arm(&mut self, now: DateTime<Utc>) {
        self.deadline = Some(now + self.timeout);
    }

    /// Returns true exactly once when the pending deadline has passed.
    pub fn fire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }
}

/// Loads or creates the tab's session.
///
/// An existing id keeps its stored page-view count unless its last recorded
/// activity is at least `timeout` old; an expired or missing id starts a new
/// session with a count of zero.
pub fn load_session(store: &SharedStore, now: DateTime<Utc>, timeout: Duration) -> Result<Session> {
    if let Some(id) = store.get(SESSION_KEY)?.filter(|id| !id.is_empty()) {
        let last_activity = store
            .get(ACTIVITY_KEY)?
            .and_then(|raw| DateTime::parse_from_rfc3339(raw.trim()).ok())
            .map(|at| at.with_timezone(&Utc));

        match last_activity {
            Some(at) if now - at >= timeout => {
                tracing::info!(previous = %id, idle_since = %at, "Stored session expired");
            }
            _ => {
                let page_view_count = store
                    .get(PAGEVIEWS_KEY)?
                    .and_then(|raw| raw.trim().parse().ok())
                    .unwrap_or(0);
                return Ok(Session {
                    id,
                    page_view_count,
                    start_time: now,
                });
            }
        }
    }

    let session = Session::new(now);
    persist_session(store, &session)?;
    record_activity(store, now)?;
    Ok(session)
}

/// Writes id and page-view count to the per-tab store.
pub fn persist_session(store: &SharedStore, session: &Session) -> Result<()> {
    store.set(SESSION_KEY, &session.id)?;
    store.set(PAGEVIEWS_KEY, &session.page_view_count.to_string())
}

/// Stores `now` as the session's last activity.
pub fn record_activity(store: &SharedStore, now: DateTime<Utc>) -> Result<()> {
    store.set(
        ACTIVITY_KEY,
        &now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn t0() -> DateTime<Utc> {
        "2025-05-28T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn test_timer_fires_once() {
        let mut timer = SessionTimer::new(Duration::minutes(30));
        assert!(!timer.fire_if_due(t0()));

        timer.arm(t0());
        assert!(!timer.fire_if_due(t0() + Duration::minutes(29)));
        assert!(timer.fire_if_due(t0() + Duration::minutes(30)));
        assert!(!timer.fire_if_due(t0() + Duration::minutes(90)));
        assert!(!timer.is_pending());
    }

    #[test]
    fn test_rearm_replaces_deadline() {
        let mut timer = SessionTimer::new(Duration::minutes(30));
        timer.arm(t0());
        timer.arm(t0() + Duration::minutes(20));

        assert_eq!(timer.deadline(), Some(t0() + Duration::minutes(50)));
        assert!(!timer.fire_if_due(t0() + Duration::minutes(40)));
        assert!(timer.fire_if_due(t0() + Duration::minutes(50)));
    }

    #[test]
    fn test_load_session_creates_and_resumes() {
        let store = MemoryStore::shared();

        let created = load_session(&store, t0(), Duration::minutes(30)).unwrap();
        assert_eq!(created.page_view_count, 0);
        assert_eq!(store.get(SESSION_KEY).unwrap(), Some(created.id.clone()));

        store.set(PAGEVIEWS_KEY, "4").unwrap();
        let resumed = load_session(&store, t0(), Duration::minutes(30)).unwrap();
        assert_eq!(resumed.id, created.id);
        assert_eq!(resumed.page_view_count, 4);
    }

    #[test]
    fn test_load_session_expires_after_stored_inactivity() {
        let store = MemoryStore::shared();
        let timeout = Duration::minutes(30);

        let created = load_session(&store, t0(), timeout).unwrap();
        store.set(PAGEVIEWS_KEY, "3").unwrap();

        record_activity(&store, t0() + Duration::minutes(10)).unwrap();
        let still_active = load_session(&store, t0() + Duration::minutes(39), timeout).unwrap();
        assert_eq!(still_active.id, created.id);

        let expired = load_session(&store, t0() + Duration::minutes(40), timeout).unwrap();
        assert_ne!(expired.id, created.id);
        assert_eq!(expired.page_view_count, 0);
        assert_eq!(store.get(SESSION_KEY).unwrap(), Some(expired.id.clone()));
        assert_eq!(store.get(PAGEVIEWS_KEY).unwrap().as_deref(), Some("0"));
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(t0());
        clock.advance(Duration::seconds(90));
        assert_eq!(clock.now(), t0() + Duration::seconds(90));
    }
}
