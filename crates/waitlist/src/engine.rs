//! The waitlist engine facade.
//!
//! `WaitlistEngine` owns the components and exposes the public operations.
//! Each operation that touches an entry's state takes the key lock of its
//! grouping key first, so joins, offers, confirms, skips and expirations
//! for one (salon, service, date) run one at a time.

use std::{sync::Arc, time::Duration};

use futures::future::join_all;
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
};
use waitlist_core::{
    Clock, EntryEvent, EntryId, EntryListing, Error, FreedSlot, GroupKey, JoinRequest, Result,
    SystemClock, WaitlistEntry, WaitlistStats,
};

use crate::{
    cascade::{CascadeController, CascadeOutcome},
    collaborators::{BookingRef, BookingService, NotificationDispatcher, TracingNotifier},
    config::EngineConfig,
    keylock::{KeyGuard, KeyedLocks},
    matcher::SlotMatcher,
    offer::{ExpireOutcome, OfferManager},
    queue::{JoinResponse, WaitlistQueue},
    store::EntryStore,
    timers::ExpirationTimers,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// BUILDER
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct EngineBuilder {
    store: Arc<dyn EntryStore>,
    booking: Arc<dyn BookingService>,
    notifier: Arc<dyn NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    offer_ttl: Duration,
}

impl EngineBuilder {
    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn NotificationDispatcher>) -> Self {
        self.notifier = notifier;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn offer_ttl(mut self, ttl: Duration) -> Self {
        self.offer_ttl = ttl;
        self
    }

    /// Take the offer TTL from a loaded config.
    #[must_use]
    pub fn config(self, config: &EngineConfig) -> Self {
        self.offer_ttl(config.offer_ttl())
    }

    /// Start the engine: spawn the expiry driver, resume cascades left
    /// pending, expire offers that fell due while nothing was running, and
    /// re-arm timers for live offers.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` for an out-of-range TTL, or a store
    /// error if recovery cannot read the outstanding offers.
    pub async fn start(self) -> Result<WaitlistEngine> {
        let ttl = chrono::Duration::from_std(self.offer_ttl)
            .map_err(|e| Error::InvalidConfig(format!("Offer TTL out of range: {e}")))?;
        if ttl <= chrono::Duration::zero() {
            return Err(Error::InvalidConfig("Offer TTL must be positive".into()));
        }

        let (due_tx, due_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(4);
        let timers = ExpirationTimers::new();

        let offers = Arc::new(OfferManager::new(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            timers.clone(),
            due_tx,
            self.booking,
            self.notifier,
            ttl,
        ));
        let inner = Arc::new(EngineInner {
            queue: WaitlistQueue::new(Arc::clone(&self.store), Arc::clone(&self.clock)),
            cascade: CascadeController::new(
                SlotMatcher::new(Arc::clone(&self.store)),
                Arc::clone(&offers),
            ),
            offers,
            store: self.store,
            clock: self.clock,
            locks: KeyedLocks::new(),
            timers,
        });

        let driver = spawn_expiry_driver(Arc::clone(&inner), due_rx, shutdown_tx.subscribe());
        let engine = WaitlistEngine {
            inner,
            shutdown_tx,
            background: Mutex::new(vec![driver]),
        };

        engine.recover().await?;
        Ok(engine)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ENGINE
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct EngineInner {
    store: Arc<dyn EntryStore>,
    clock: Arc<dyn Clock>,
    locks: KeyedLocks<GroupKey>,
    timers: ExpirationTimers,
    queue: WaitlistQueue,
    offers: Arc<OfferManager>,
    cascade: CascadeController,
}

impl EngineInner {
    async fn lock_entry(&self, id: &EntryId) -> Result<KeyGuard<GroupKey>> {
        let entry = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.clone()))?;
        Ok(self.locks.lock(entry.group_key()).await)
    }

    /// Cascade the slot `from` gave up, then clear its pending marker.
    ///
    /// A failed cascade leaves the marker set and yields `Deferred`.
    async fn pass_on(
        &self,
        from: &EntryId,
        slot: &FreedSlot,
        guard: &KeyGuard<GroupKey>,
    ) -> CascadeOutcome {
        match self.cascade.reoffer(slot, guard).await {
            Ok(outcome) => {
                if let Err(e) = self.store.clear_pending_cascade(from).await {
                    tracing::warn!(entry_id = %from, error = %e, "Failed to clear pending cascade");
                }
                outcome
            }
            Err(e) => {
                tracing::warn!(
                    entry_id = %from,
                    slot = %slot,
                    error = %e,
                    "Cascade failed, deferred to the next sweep"
                );
                CascadeOutcome::Deferred
            }
        }
    }

    async fn handle_expiration(&self, id: &EntryId) -> Result<Option<CascadeOutcome>> {
        let guard = self.lock_entry(id).await?;
        match self.offers.expire(id, &guard).await? {
            ExpireOutcome::Expired(slot) => Ok(Some(self.pass_on(id, &slot, &guard).await)),
            ExpireOutcome::NotYetDue(_) | ExpireOutcome::Ignored(_) => Ok(None),
        }
    }

    async fn resume_cascade(&self, pending: &WaitlistEntry) -> Result<Option<CascadeOutcome>> {
        let guard = self.locks.lock(pending.group_key()).await;
        let Some(current) = self
            .store
            .get(&pending.id)
            .await?
            .filter(|e| e.cascade_pending)
        else {
            return Ok(None);
        };
        let Some(slot) = current.offered_slot() else {
            self.store.clear_pending_cascade(&current.id).await?;
            return Ok(None);
        };
        Ok(Some(self.pass_on(&current.id, &slot, &guard).await))
    }

    async fn resume_pending_cascades(&self) -> Result<()> {
        for entry in self.store.list_pending_cascades().await? {
            match self.resume_cascade(&entry).await {
                Ok(Some(CascadeOutcome::Deferred) | None) => {}
                Ok(Some(outcome)) => {
                    tracing::info!(entry_id = %entry.id, ?outcome, "Resumed pending cascade");
                }
                Err(e) => {
                    tracing::warn!(entry_id = %entry.id, error = %e, "Failed to resume cascade");
                }
            }
        }
        Ok(())
    }

    async fn reconcile(&self) -> Result<usize> {
        self.resume_pending_cascades().await?;
        let overdue = self.store.list_overdue_offers(self.clock.now()).await?;
        if overdue.is_empty() {
            return Ok(0);
        }
        tracing::info!(count = overdue.len(), "Reconciling overdue offers");

        let results = join_all(overdue.iter().map(|e| self.handle_expiration(&e.id))).await;
        let expired = overdue
            .iter()
            .zip(results)
            .filter(|(entry, result)| match result {
                Ok(outcome) => outcome.is_some(),
                Err(e) => {
                    tracing::warn!(entry_id = %entry.id, error = %e, "Failed to expire overdue offer");
                    false
                }
            })
            .count();
        Ok(expired)
    }
}

fn spawn_expiry_driver(
    inner: Arc<EngineInner>,
    mut due: mpsc::UnboundedReceiver<EntryId>,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                next = due.recv() => {
                    let Some(id) = next else { break };
                    let inner = Arc::clone(&inner);
                    tokio::spawn(async move {
                        if let Err(e) = inner.handle_expiration(&id).await {
                            tracing::warn!(entry_id = %id, error = %e, "Expiration failed");
                        }
                    });
                }
            }
        }
        tracing::debug!("Expiry driver stopped");
    })
}

/// The salon waitlist engine.
///
/// Dropping the engine stops its background tasks; call
/// [`WaitlistEngine::shutdown`] to also wait for them and abort timers.
pub struct WaitlistEngine {
    inner: Arc<EngineInner>,
    shutdown_tx: broadcast::Sender<()>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl WaitlistEngine {
    /// Start building an engine over `store` that books through `booking`.
    ///
    /// Defaults: system clock, log-only notifications, 5 minute offers.
    pub fn builder(store: Arc<dyn EntryStore>, booking: Arc<dyn BookingService>) -> EngineBuilder {
        EngineBuilder {
            store,
            booking,
            notifier: Arc::new(TracingNotifier),
            clock: Arc::new(SystemClock),
            offer_ttl: Duration::from_secs(waitlist_core::DEFAULT_OFFER_TTL_SECS.unsigned_abs()),
        }
    }

    async fn recover(&self) -> Result<()> {
        let expired = self.inner.reconcile().await?;
        let live = self.inner.store.list_offers().await?;
        for entry in &live {
            self.inner.offers.rearm(entry).await;
        }
        if expired > 0 || !live.is_empty() {
            tracing::info!(expired, rearmed = live.len(), "Recovered outstanding offers");
        }
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // QUEUE OPERATIONS
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Add a customer to the back of the queue for their (salon, service, date).
    pub async fn join(&self, request: JoinRequest) -> Result<JoinResponse> {
        let key = GroupKey {
            salon_id: request.salon_id.clone(),
            service_id: request.service_id.clone(),
            date: request.preferred_date,
        };
        let guard = self.inner.locks.lock(key).await;
        self.inner.queue.join(request, &guard).await
    }

    /// Leave the queue. Only valid while `waiting`.
    pub async fn leave(&self, id: &EntryId) -> Result<WaitlistEntry> {
        let guard = self.inner.lock_entry(id).await?;
        self.inner.queue.leave(id, &guard).await
    }

    /// Current 1-indexed queue position; `None` unless `waiting`.
    pub async fn get_position(&self, id: &EntryId) -> Result<Option<u32>> {
        let entry = self.get(id).await?;
        self.inner.queue.position_of(&entry).await
    }

    /// All of a user's entries, newest first, with positions.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<EntryListing>> {
        self.inner.queue.list_for_user(user_id).await
    }

    pub async fn get(&self, id: &EntryId) -> Result<WaitlistEntry> {
        self.inner
            .store
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.clone()))
    }

    /// Audit trail of an entry, oldest first.
    pub async fn events(&self, id: &EntryId) -> Result<Vec<EntryEvent>> {
        self.get(id).await?;
        self.inner.store.fetch_events(id).await
    }

    pub async fn stats(&self) -> Result<WaitlistStats> {
        self.inner.store.stats().await
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // OFFER OPERATIONS
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// A slot became bookable. Offers it down the queue, or releases it.
    ///
    /// A repeated event for a slot that already has an outstanding offer
    /// returns [`CascadeOutcome::AlreadyOffered`] and changes nothing.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` for blank ids or a sub-second time.
    pub async fn on_slot_freed(&self, slot: FreedSlot) -> Result<CascadeOutcome> {
        slot.validate()?;
        let guard = self.inner.locks.lock(slot.group_key()).await;
        if let Some(holder) = self.inner.store.find_offer_for_slot(&slot).await? {
            tracing::debug!(slot = %slot, entry_id = %holder.id, "Duplicate slot-freed event");
            return Ok(CascadeOutcome::AlreadyOffered(holder));
        }
        self.inner.cascade.reoffer(&slot, &guard).await
    }

    /// Accept an outstanding offer and create the booking.
    pub async fn confirm(&self, id: &EntryId) -> Result<BookingRef> {
        let guard = self.inner.lock_entry(id).await?;
        self.inner.offers.confirm(id, &guard).await
    }

    /// Decline an outstanding offer. The slot cascades to the next entry.
    ///
    /// Once the skip is stored it stands: a cascade that fails afterwards
    /// returns [`CascadeOutcome::Deferred`] and is retried by
    /// [`Self::reconcile`].
    pub async fn skip(&self, id: &EntryId) -> Result<CascadeOutcome> {
        let guard = self.inner.lock_entry(id).await?;
        let slot = self.inner.offers.skip(id, &guard).await?;
        Ok(self.inner.pass_on(id, &slot, &guard).await)
    }

    /// Run the expiration action for one entry, cascading if it expired.
    pub async fn handle_expiration(&self, id: &EntryId) -> Result<Option<CascadeOutcome>> {
        self.inner.handle_expiration(id).await
    }

    /// Resume cascades left pending by an earlier failure, then expire every
    /// overdue offer. Returns how many expired.
    pub async fn reconcile(&self) -> Result<usize> {
        self.inner.reconcile().await
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // LIFECYCLE
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Run [`Self::reconcile`] every `interval` until shutdown.
    pub async fn spawn_sweeper(&self, interval: Duration) {
        let inner = Arc::clone(&self.inner);
        let mut shutdown = self.shutdown_tx.subscribe();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => {
                        match inner.reconcile().await {
                            Ok(0) => {}
                            Ok(expired) => tracing::info!(expired, "Sweep expired overdue offers"),
                            Err(e) => tracing::warn!(error = %e, "Sweep failed"),
                        }
                        let pruned = inner.locks.prune_idle().await;
                        let fired = inner.timers.cleanup_completed().await;
                        tracing::trace!(pruned, fired, "Sweep housekeeping");
                    }
                }
            }
            tracing::debug!("Sweeper stopped");
        });
        self.background.lock().await.push(task);
    }

    /// Number of offers with a pending in-memory timer.
    pub async fn pending_timers(&self) -> usize {
        self.inner.timers.pending_count().await
    }

    /// Stop background tasks and abort all timers.
    ///
    /// Offers stay durable; a restarted engine re-arms or expires them.
    pub async fn shutdown(&self) {
        tracing::debug!("Shutting down waitlist engine");
        let _ = self.shutdown_tx.send(());
        let tasks: Vec<JoinHandle<()>> = self.background.lock().await.drain(..).collect();
        for result in join_all(tasks).await {
            if let Err(e) = result {
                if !e.is_cancelled() {
                    tracing::warn!(error = %e, "Background task ended abnormally");
                }
            }
        }
        self.inner.timers.shutdown_all().await;
    }
}

impl Drop for WaitlistEngine {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}
