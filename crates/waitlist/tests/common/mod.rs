//! Common test helpers and fixtures for engine integration tests
//!
//! Collaborators are replaced by recording mocks and time is driven by a
//! `ManualClock`, so offer deadlines are deterministic.

#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use waitlist::{
    store::{CasOutcome, Transition},
    BookingError, BookingRef, BookingRequest, BookingService, EntryStore, InMemoryEntryStore,
    JoinResponse, NotificationDispatcher, NotifyError, OfferNotification, WaitlistEngine,
};
use waitlist_core::{
    Clock, EntryEvent, EntryId, EntryStatus, FreedSlot, GroupKey, JoinRequest, ManualClock,
    NewEntryEvent, TimeRange, WaitlistEntry, WaitlistStats,
};

pub const SALON: &str = "salon-1";
pub const SERVICE: &str = "service-x";

/// 2024-05-31 09:00 UTC, the day before the test queues' date.
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 31, 9, 0, 0)
        .single()
        .unwrap_or_default()
}

pub fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap_or_default()
}

pub fn at(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap_or_default()
}

pub fn range(start: (u32, u32), end: (u32, u32)) -> TimeRange {
    TimeRange {
        start: at(start.0, start.1),
        end: at(end.0, end.1),
    }
}

pub fn join_request(user: &str, ranges: Vec<TimeRange>) -> JoinRequest {
    JoinRequest {
        user_id: user.to_string(),
        salon_id: SALON.to_string(),
        service_id: SERVICE.to_string(),
        staff_id: None,
        preferred_date: date(),
        preferred_time_slots: ranges,
    }
}

pub fn freed_slot(h: u32, m: u32, staff: Option<&str>) -> FreedSlot {
    FreedSlot {
        salon_id: SALON.to_string(),
        service_id: SERVICE.to_string(),
        staff_id: staff.map(String::from),
        date: date(),
        time: at(h, m),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MOCK COLLABORATORS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Records every booking; fails the first `failures` calls.
#[derive(Debug, Default)]
pub struct MockBooking {
    calls: Mutex<Vec<BookingRequest>>,
    failures: AtomicUsize,
}

impl MockBooking {
    pub fn failing(times: usize) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures: AtomicUsize::new(times),
        }
    }

    pub fn calls(&self) -> Vec<BookingRequest> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl BookingService for MockBooking {
    async fn create_booking(&self, request: &BookingRequest) -> Result<BookingRef, BookingError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.clone());
        }
        let should_fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(BookingError::Service("booking backend down".into()));
        }
        Ok(BookingRef(format!("bk-{}", request.entry_id)))
    }
}

/// Records notifications; optionally fails every one of them.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<OfferNotification>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<OfferNotification> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl NotificationDispatcher for RecordingNotifier {
    async fn notify(&self, notification: &OfferNotification) -> Result<(), NotifyError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification.clone());
        }
        if self.fail {
            return Err(NotifyError("push gateway unreachable".into()));
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// FAULT-INJECTING STORE
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// In-memory store whose group listing can be made to fail or stall.
///
/// Several engines can share one instance, like processes sharing a database.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: InMemoryEntryStore,
    failures: AtomicUsize,
    delay: Mutex<Option<std::time::Duration>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` group listings with a database error.
    pub fn fail_group_listings(&self, times: usize) {
        self.failures.store(times, Ordering::SeqCst);
    }

    /// Stall the next group listing for `by` before it reads the store.
    pub fn delay_next_group_listing(&self, by: std::time::Duration) {
        if let Ok(mut delay) = self.delay.lock() {
            *delay = Some(by);
        }
    }
}

#[async_trait::async_trait]
impl EntryStore for FlakyStore {
    async fn insert(&self, entry: WaitlistEntry) -> waitlist_core::Result<WaitlistEntry> {
        self.inner.insert(entry).await
    }

    async fn get(&self, id: &EntryId) -> waitlist_core::Result<Option<WaitlistEntry>> {
        self.inner.get(id).await
    }

    async fn compare_and_set(
        &self,
        id: &EntryId,
        transition: &Transition,
    ) -> waitlist_core::Result<CasOutcome> {
        self.inner.compare_and_set(id, transition).await
    }

    async fn list_by_group(
        &self,
        key: &GroupKey,
        status: EntryStatus,
    ) -> waitlist_core::Result<Vec<WaitlistEntry>> {
        let delay = self.delay.lock().ok().and_then(|mut d| d.take());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let should_fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(waitlist_core::Error::Database("database is locked".into()));
        }
        self.inner.list_by_group(key, status).await
    }

    async fn list_by_user(&self, user_id: &str) -> waitlist_core::Result<Vec<WaitlistEntry>> {
        self.inner.list_by_user(user_id).await
    }

    async fn find_offer_for_slot(
        &self,
        slot: &FreedSlot,
    ) -> waitlist_core::Result<Option<WaitlistEntry>> {
        self.inner.find_offer_for_slot(slot).await
    }

    async fn list_offers(&self) -> waitlist_core::Result<Vec<WaitlistEntry>> {
        self.inner.list_offers().await
    }

    async fn list_overdue_offers(
        &self,
        now: DateTime<Utc>,
    ) -> waitlist_core::Result<Vec<WaitlistEntry>> {
        self.inner.list_overdue_offers(now).await
    }

    async fn list_pending_cascades(&self) -> waitlist_core::Result<Vec<WaitlistEntry>> {
        self.inner.list_pending_cascades().await
    }

    async fn clear_pending_cascade(&self, id: &EntryId) -> waitlist_core::Result<bool> {
        self.inner.clear_pending_cascade(id).await
    }

    async fn stats(&self) -> waitlist_core::Result<WaitlistStats> {
        self.inner.stats().await
    }

    async fn append_event(&self, event: NewEntryEvent) -> waitlist_core::Result<EntryEvent> {
        self.inner.append_event(event).await
    }

    async fn fetch_events(&self, id: &EntryId) -> waitlist_core::Result<Vec<EntryEvent>> {
        self.inner.fetch_events(id).await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HARNESS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Harness {
    pub engine: WaitlistEngine,
    pub store: Arc<InMemoryEntryStore>,
    pub clock: ManualClock,
    pub booking: Arc<MockBooking>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub async fn new() -> Result<Self> {
        Self::with(MockBooking::default(), RecordingNotifier::default()).await
    }

    pub async fn with(booking: MockBooking, notifier: RecordingNotifier) -> Result<Self> {
        let store = Arc::new(InMemoryEntryStore::new());
        let clock = ManualClock::new(start_time());
        let booking = Arc::new(booking);
        let notifier = Arc::new(notifier);
        let engine = start_engine(
            Arc::clone(&store),
            &clock,
            Arc::clone(&booking),
            Arc::clone(&notifier),
        )
        .await?;
        Ok(Self {
            engine,
            store,
            clock,
            booking,
            notifier,
        })
    }

    /// Join `user` for the default queue, one second after the previous join.
    pub async fn join(&self, user: &str, ranges: Vec<TimeRange>) -> Result<JoinResponse> {
        self.clock.advance(Duration::seconds(1));
        Ok(self.engine.join(join_request(user, ranges)).await?)
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

pub async fn start_engine(
    store: Arc<InMemoryEntryStore>,
    clock: &ManualClock,
    booking: Arc<MockBooking>,
    notifier: Arc<RecordingNotifier>,
) -> Result<WaitlistEngine> {
    start_engine_over(store, clock, booking, notifier).await
}

/// Start an engine over any store, with a 300s offer TTL.
pub async fn start_engine_over(
    store: Arc<dyn EntryStore>,
    clock: &ManualClock,
    booking: Arc<MockBooking>,
    notifier: Arc<RecordingNotifier>,
) -> Result<WaitlistEngine> {
    Ok(WaitlistEngine::builder(store, booking)
        .notifier(notifier)
        .clock(Arc::new(clock.clone()))
        .offer_ttl(std::time::Duration::from_secs(300))
        .start()
        .await?)
}

/// Poll until `id` reaches `status`, yielding to background tasks between checks.
pub async fn wait_for_status(
    engine: &WaitlistEngine,
    id: &waitlist_core::EntryId,
    status: waitlist_core::EntryStatus,
) -> Result<waitlist_core::WaitlistEntry> {
    for _ in 0..200 {
        let entry = engine.get(id).await?;
        if entry.status == status {
            return Ok(entry);
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    anyhow::bail!("entry {id} never reached {status}")
}
