//! The analytics client context
//!
//! [`AnalyticsClient`] owns everything a page load needs: the consent flag,
//! the session and its inactivity timer, the scroll-depth dedup set and the
//! in-flight submissions. All tracking calls take `&mut self`; none of them
//! return errors, failures degrade to logging and local buffering.
//!
//! Submissions are spawned onto a tokio [`JoinSet`], so tracking calls must
//! run inside a tokio runtime. [`AnalyticsClient::flush`] waits for them.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;

use crate::config::ClientConfig;
use crate::consent::ConsentStore;
use crate::error::Result;
use crate::store::SharedStore;
use crate::types::{EventKind, EventRecord, PageContext, Session};

use super::buffer::{RecordBuffer, BACKUP_KEY, FAILED_KEY};
use super::interactions::{Interaction, ScrollDepthTracker};
use super::session::{load_session, persist_session, record_activity, Clock, SessionTimer};
use super::transport::Transport;

/// The two stores a client reads and writes
#[derive(Clone)]
pub struct ClientStores {
    /// Survives sessions: consent and record buffers
    pub local: SharedStore,
    /// Scoped to one tab: session id and page-view count
    pub session: SharedStore,
}

/// Outcome of [`AnalyticsClient::retry_failed`]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetryReport {
    /// Records delivered on this sweep
    pub sent: usize,
    /// Records that failed again and went back into the queue
    pub requeued: usize,
}

/// First-party analytics client for one page load.
pub struct AnalyticsClient<T: Transport> {
    transport: Arc<T>,
    clock: Arc<dyn Clock>,
    consent: ConsentStore,
    session_store: SharedStore,
    backup: RecordBuffer,
    failed: RecordBuffer,
    beacon_timeout: Duration,
    page: PageContext,
    consent_given: bool,
    listening: bool,
    session: Session,
    timer: SessionTimer,
    scroll: ScrollDepthTracker,
    in_flight: JoinSet<()>,
}

impl<T: Transport> AnalyticsClient<T> {
    /// Create a client for `page`, resuming the tab's session if one exists.
    ///
    /// The client stays passive until [`init`](Self::init) is called.
    pub fn new(
        config: &ClientConfig,
        transport: Arc<T>,
        stores: ClientStores,
        page: PageContext,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let session = load_session(&stores.session, clock.now(), config.session_timeout())?;

        Ok(Self {
            transport,
            consent: ConsentStore::new(Arc::clone(&stores.local)),
            backup: RecordBuffer::new(
                Arc::clone(&stores.local),
                BACKUP_KEY,
                config.max_buffered_records,
            ),
            failed: RecordBuffer::new(
                Arc::clone(&stores.local),
                FAILED_KEY,
                config.max_buffered_records,
            ),
            session_store: stores.session,
            beacon_timeout: Duration::from_secs(config.beacon_timeout_secs),
            page,
            consent_given: false,
            listening: false,
            session,
            timer: SessionTimer::new(config.session_timeout()),
            scroll: ScrollDepthTracker::new(),
            in_flight: JoinSet::new(),
            clock,
        })
    }

    /// Reads consent, starts the inactivity timer and, when analytics is
    /// allowed, starts listening and records the page view.
    pub fn init(&mut self) {
        self.consent_given = self.consent.get().analytics;
        self.touch(self.clock.now());

        tracing::debug!(
            session_id = %self.session.id,
            consent = self.consent_given,
            "Analytics initialized"
        );

        if self.consent_given {
            self.listening = true;
            self.track_page_view();
        }
    }

    /// Like [`init`](Self::init) for a page whose view was already recorded:
    /// reads consent and attaches listeners without a new page view.
    pub fn resume(&mut self) {
        self.consent_given = self.consent.get().analytics;
        self.listening = self.consent_given;
        self.touch(self.clock.now());
    }

    /// Applies a consent change from the banner. Repeating the current state
    /// is a no-op.
    pub fn update_consent(&mut self, granted: bool) {
        if granted == self.consent_given && granted == self.listening {
            return;
        }

        self.consent_given = granted;
        self.listening = granted;

        if granted {
            self.track_page_view();
        }
    }

    /// Records an interaction. No-op without analytics consent.
    pub fn track_event(
        &mut self,
        category: &str,
        action: &str,
        label: Option<&str>,
        value: Option<f64>,
    ) {
        let now = self.poll_session();
        if !self.consent_given {
            return;
        }

        let record = self.record(
            now,
            EventKind::Event {
                category: category.to_string(),
                action: action.to_string(),
                label: label.map(str::to_string),
                value,
                page: self.page.path.clone(),
            },
        );

        self.send_data(record);
        self.touch(now);
    }

    /// Counts and records a page view. No-op without analytics consent.
    pub fn track_page_view(&mut self) {
        let now = self.poll_session();
        if !self.consent_given {
            return;
        }

        self.session.page_view_count += 1;
        if let Err(e) = persist_session(&self.session_store, &self.session) {
            tracing::warn!(error = %e, "Failed to persist page-view count");
        }

        let record = self.record(
            now,
            EventKind::Pageview {
                page: self.page.path.clone(),
                title: self.page.title.clone(),
                referrer: self.page.referrer.clone(),
                page_view_count: self.session.page_view_count,
            },
        );

        self.send_data(record);
        self.touch(now);
    }

    /// Feeds a page interaction through the attached listeners.
    ///
    /// Click and scroll interactions are ignored while detached. Enrolment
    /// clicks come from the redirect flow rather than a listener and are only
    /// gated by consent.
    pub fn handle(&mut self, interaction: Interaction) {
        if let Interaction::EnrollClick { .. } = interaction {
            if let Some(spec) = interaction.event_spec() {
                self.track_event(spec.category, spec.action, spec.label.as_deref(), None);
            }
            return;
        }

        if !self.listening {
            return;
        }

        match interaction {
            Interaction::Scroll(position) => {
                for depth in self.scroll.observe(position) {
                    let label = format!("{depth}%");
                    self.track_event("Engagement", "Scroll Depth", Some(&label), None);
                }
            }
            other => {
                if let Some(spec) = other.event_spec() {
                    self.track_event(spec.category, spec.action, spec.label.as_deref(), None);
                }
            }
        }
    }

    /// The page is going away: send `session_end` through the beacon path.
    ///
    /// The send is bounded by the beacon timeout, skips the local buffers and
    /// reports nothing back.
    pub fn page_unload(&mut self) {
        let now = self.poll_session();
        if !self.consent_given || !self.listening {
            return;
        }

        let record = self.record(
            now,
            EventKind::SessionEnd {
                page_view_count: self.session.page_view_count,
            },
        );

        let transport = Arc::clone(&self.transport);
        let timeout = self.beacon_timeout;
        self.in_flight.spawn(async move {
            match tokio::time::timeout(timeout, transport.beacon(&record)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(error = %e, "Beacon failed"),
                Err(_) => tracing::debug!("Beacon timed out"),
            }
        });
    }

    /// Moves to another page within the same tab.
    pub fn navigate(&mut self, page: PageContext) {
        self.page = page;
        self.scroll.reset();
    }

    /// Fires the inactivity timer if its deadline has passed.
    pub fn tick(&mut self) {
        self.poll_session();
    }

    /// Waits for every in-flight submission to finish.
    pub async fn flush(&mut self) {
        while let Some(result) = self.in_flight.join_next().await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Submission task failed");
            }
        }
    }

    /// Resends everything in the failed queue; records that fail again are
    /// queued for the next sweep. Nothing is sent without consent.
    pub async fn retry_failed(&mut self) -> Result<RetryReport> {
        let mut report = RetryReport::default();
        if !self.consent_given {
            return Ok(report);
        }

        for record in self.failed.take()? {
            match self.transport.send(&record).await {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    tracing::warn!(error = %e, "Retry failed");
                    self.failed.push(&record)?;
                    report.requeued += 1;
                }
            }
        }

        tracing::info!(sent = report.sent, requeued = report.requeued, "Retry sweep done");
        Ok(report)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn consent_given(&self) -> bool {
        self.consent_given
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn pending_submissions(&self) -> usize {
        self.in_flight.len()
    }

    /// Every submitted record (audit trail)
    pub fn backup(&self) -> &RecordBuffer {
        &self.backup
    }

    /// Records waiting for a retry sweep
    pub fn failed(&self) -> &RecordBuffer {
        &self.failed
    }

    /// Restarts the inactivity window and stores it for later page loads.
    fn touch(&mut self, now: DateTime<Utc>) {
        self.timer.arm(now);
        if let Err(e) = record_activity(&self.session_store, now) {
            tracing::warn!(error = %e, "Failed to persist session activity");
        }
    }

    fn poll_session(&mut self) -> DateTime<Utc> {
        let now = self.clock.now();
        if self.timer.fire_if_due(now) {
            let previous = std::mem::replace(&mut self.session, Session::new(now));
            if let Err(e) = persist_session(&self.session_store, &self.session) {
                tracing::warn!(error = %e, "Failed to persist new session");
            }
            tracing::info!(
                previous = %previous.id,
                session_id = %self.session.id,
                "Session expired after inactivity"
            );
        }
        now
    }

    fn record(&self, now: DateTime<Utc>, kind: EventKind) -> EventRecord {
        EventRecord {
            timestamp: now,
            session_id: self.session.id.clone(),
            kind,
        }
    }

    fn send_data(&mut self, record: EventRecord) {
        tracing::debug!(event_type = record.event_type(), "Analytics data");

        if let Err(e) = self.backup.push(&record) {
            tracing::warn!(error = %e, "Failed to buffer analytics record");
        }

        let transport = Arc::clone(&self.transport);
        let failed = self.failed.clone();
        self.in_flight.spawn(async move {
            if let Err(e) = transport.send(&record).await {
                tracing::warn!(error = %e, "Error sending analytics");
                if let Err(e) = failed.push(&record) {
                    tracing::warn!(error = %e, "Failed to queue record for retry");
                }
            }
        });
    }
}
