//! `SQLite` entry store using `SQLx`.
//!
//! Embedded schema, no migration files. Every status change is a single
//! guarded `UPDATE ... RETURNING`, so the compare-and-set is atomic in the
//! database even across processes sharing the file. A partial unique index
//! over live offers keeps one physical slot from being offered twice.

use chrono::{DateTime, Utc};
use sqlx::{
    query::QueryAs,
    sqlite::{SqliteArguments, SqlitePoolOptions},
    Sqlite, SqlitePool,
};
use waitlist_core::{
    EntryEvent, EntryId, EntryStatus, Error, FreedSlot, GroupKey, NewEntryEvent, Result,
    WaitlistEntry, WaitlistStats,
};

use super::{
    entities::{format_date, format_time, to_micros, EntryRow, EventRow, ENTRY_COLUMNS},
    CasOutcome, EntryStore, OfferGuard, SlotChange, Transition,
};

/// Database schema, executed once on open.
const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS waitlist_entries (
    sequence INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT UNIQUE NOT NULL,
    user_id TEXT NOT NULL,
    salon_id TEXT NOT NULL,
    service_id TEXT NOT NULL,
    staff_id TEXT,
    preferred_date TEXT NOT NULL,
    preferred_time_slots TEXT NOT NULL,
    status TEXT NOT NULL CHECK(status IN ('waiting', 'slot_available', 'confirmed', 'expired', 'cancelled')),
    offer_date TEXT,
    offer_time TEXT,
    offer_staff_id TEXT,
    offer_expires_at INTEGER,
    cascade_pending INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_entries_group
    ON waitlist_entries(salon_id, service_id, preferred_date, status, created_at, sequence);
CREATE INDEX IF NOT EXISTS idx_entries_user ON waitlist_entries(user_id);
CREATE INDEX IF NOT EXISTS idx_entries_offer_deadline
    ON waitlist_entries(status, offer_expires_at);
CREATE UNIQUE INDEX IF NOT EXISTS idx_entries_live_offer
    ON waitlist_entries(salon_id, service_id, offer_date, offer_time, COALESCE(offer_staff_id, ''))
    WHERE status = 'slot_available';
CREATE INDEX IF NOT EXISTS idx_entries_cascade_pending
    ON waitlist_entries(cascade_pending) WHERE cascade_pending = 1;

CREATE TABLE IF NOT EXISTS entry_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entry_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    details_json TEXT,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_entry ON entry_events(entry_id, id);
";

const OFFER_ASSIGNMENTS: &str =
    ", offer_date = ?, offer_time = ?, offer_staff_id = ?, offer_expires_at = ?";

fn db_error(context: &str) -> impl FnOnce(sqlx::Error) -> Error + '_ {
    move |e| Error::Database(format!("{context}: {e}"))
}

/// Entry store backed by a `SQLite` connection pool.
#[derive(Debug, Clone)]
pub struct SqliteEntryStore {
    pool: SqlitePool,
}

impl SqliteEntryStore {
    /// Open (creating if needed) the database at `database_url` and ensure the schema.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` if the connection or schema setup fails.
    pub async fn open(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .min_connections(1)
            .connect(database_url)
            .await
            .map_err(db_error("Failed to connect to database"))?;
        let store = Self::from_pool(pool);
        store.init().await?;
        Ok(store)
    }

    /// Wrap an existing pool. Call [`Self::init`] before use.
    #[must_use]
    pub const fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` if the schema statements fail.
    pub async fn init(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(db_error("Failed to initialize schema"))
    }

    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_entries<'q>(
        &self,
        query: QueryAs<'q, Sqlite, EntryRow, SqliteArguments<'q>>,
    ) -> Result<Vec<WaitlistEntry>> {
        query
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to query entries"))?
            .into_iter()
            .map(WaitlistEntry::try_from)
            .collect()
    }
}

#[async_trait::async_trait]
impl EntryStore for SqliteEntryStore {
    async fn insert(&self, entry: WaitlistEntry) -> Result<WaitlistEntry> {
        let slots_json = serde_json::to_string(&entry.preferred_time_slots)?;
        let offer = entry.available_slot.as_ref();

        let sequence: i64 = sqlx::query_scalar(
            "INSERT INTO waitlist_entries (id, user_id, salon_id, service_id, staff_id,
                 preferred_date, preferred_time_slots, status, offer_date, offer_time,
                 offer_staff_id, offer_expires_at, cascade_pending, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING sequence",
        )
        .bind(entry.id.as_str())
        .bind(&entry.user_id)
        .bind(&entry.salon_id)
        .bind(&entry.service_id)
        .bind(entry.staff_id.as_deref())
        .bind(format_date(entry.preferred_date))
        .bind(slots_json)
        .bind(entry.status.as_str())
        .bind(offer.map(|o| format_date(o.date)))
        .bind(offer.map(|o| format_time(o.time)))
        .bind(offer.and_then(|o| o.staff_id.as_deref()))
        .bind(offer.map(|o| to_micros(o.expires_at)))
        .bind(entry.cascade_pending)
        .bind(to_micros(entry.created_at))
        .bind(to_micros(entry.updated_at))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::Database(format!("Entry '{}' already exists", entry.id))
            }
            other => Error::Database(format!("Failed to insert entry: {other}")),
        })?;

        Ok(WaitlistEntry { sequence, ..entry })
    }

    async fn get(&self, id: &EntryId) -> Result<Option<WaitlistEntry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM waitlist_entries WHERE id = ?");
        sqlx::query_as::<_, EntryRow>(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to get entry"))?
            .map(WaitlistEntry::try_from)
            .transpose()
    }

    async fn compare_and_set(&self, id: &EntryId, transition: &Transition) -> Result<CasOutcome> {
        let guard_sql = match transition.guard {
            OfferGuard::None => "",
            OfferGuard::LiveAt(_) => " AND offer_expires_at > ?",
            OfferGuard::OverdueAt(_) => " AND offer_expires_at <= ?",
        };
        let (offer, slot_sql) = match &transition.slot {
            SlotChange::Set(offer) => (Some(offer), OFFER_ASSIGNMENTS),
            SlotChange::Clear => (None, OFFER_ASSIGNMENTS),
            SlotChange::Keep => (None, ""),
        };
        let sql = format!(
            "UPDATE waitlist_entries
             SET status = ?, updated_at = ?, cascade_pending = ?{slot_sql}
             WHERE id = ? AND status = ?{guard_sql}
             RETURNING {ENTRY_COLUMNS}"
        );

        let mut query = sqlx::query_as::<_, EntryRow>(&sql)
            .bind(transition.to.as_str())
            .bind(to_micros(transition.at))
            .bind(transition.pending_cascade);
        if !slot_sql.is_empty() {
            query = query
                .bind(offer.map(|o| format_date(o.date)))
                .bind(offer.map(|o| format_time(o.time)))
                .bind(offer.and_then(|o| o.staff_id.clone()))
                .bind(offer.map(|o| to_micros(o.expires_at)));
        }
        query = query.bind(id.as_str()).bind(transition.from.as_str());
        match transition.guard {
            OfferGuard::None => {}
            OfferGuard::LiveAt(at) | OfferGuard::OverdueAt(at) => {
                query = query.bind(to_micros(at));
            }
        }

        let updated = match query.fetch_optional(&self.pool).await {
            Ok(row) => row,
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Ok(CasOutcome::SlotHeld);
            }
            Err(e) => return Err(Error::Database(format!("Failed to update entry: {e}"))),
        };

        match updated {
            Some(row) => Ok(CasOutcome::Applied(row.try_into()?)),
            None => Ok(self
                .get(id)
                .await?
                .map_or(CasOutcome::Missing, CasOutcome::Conflict)),
        }
    }

    async fn list_by_group(
        &self,
        key: &GroupKey,
        status: EntryStatus,
    ) -> Result<Vec<WaitlistEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM waitlist_entries
             WHERE salon_id = ? AND service_id = ? AND preferred_date = ? AND status = ?
             ORDER BY created_at ASC, sequence ASC"
        );
        self.fetch_entries(
            sqlx::query_as(&sql)
                .bind(key.salon_id.clone())
                .bind(key.service_id.clone())
                .bind(format_date(key.date))
                .bind(status.as_str()),
        )
        .await
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<WaitlistEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM waitlist_entries
             WHERE user_id = ?
             ORDER BY created_at DESC, sequence DESC"
        );
        self.fetch_entries(sqlx::query_as(&sql).bind(user_id.to_string()))
            .await
    }

    async fn find_offer_for_slot(&self, slot: &FreedSlot) -> Result<Option<WaitlistEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM waitlist_entries
             WHERE status = 'slot_available' AND salon_id = ? AND service_id = ?
               AND offer_date = ? AND offer_time = ? AND offer_staff_id IS ?
             LIMIT 1"
        );
        let entries = self
            .fetch_entries(
                sqlx::query_as(&sql)
                    .bind(slot.salon_id.clone())
                    .bind(slot.service_id.clone())
                    .bind(format_date(slot.date))
                    .bind(format_time(slot.time))
                    .bind(slot.staff_id.clone()),
            )
            .await?;
        Ok(entries.into_iter().next())
    }

    async fn list_offers(&self) -> Result<Vec<WaitlistEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM waitlist_entries
             WHERE status = 'slot_available'
             ORDER BY offer_expires_at ASC"
        );
        self.fetch_entries(sqlx::query_as(&sql)).await
    }

    async fn list_overdue_offers(&self, now: DateTime<Utc>) -> Result<Vec<WaitlistEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM waitlist_entries
             WHERE status = 'slot_available' AND offer_expires_at <= ?
             ORDER BY created_at ASC, sequence ASC"
        );
        self.fetch_entries(sqlx::query_as(&sql).bind(to_micros(now)))
            .await
    }

    async fn list_pending_cascades(&self) -> Result<Vec<WaitlistEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM waitlist_entries
             WHERE cascade_pending = 1
             ORDER BY updated_at ASC, sequence ASC"
        );
        self.fetch_entries(sqlx::query_as(&sql)).await
    }

    async fn clear_pending_cascade(&self, id: &EntryId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE waitlist_entries SET cascade_pending = 0
             WHERE id = ? AND cascade_pending = 1",
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to clear pending cascade"))?;
        Ok(result.rows_affected() == 1)
    }

    async fn stats(&self) -> Result<WaitlistStats> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM waitlist_entries GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to count entries"))?;

        rows.into_iter()
            .try_fold(WaitlistStats::default(), |mut stats, (status, count)| {
                let status: EntryStatus = status.parse()?;
                let count = usize::try_from(count)
                    .map_err(|e| Error::Database(format!("Invalid count {count}: {e}")))?;
                stats.record(status, count);
                Ok(stats)
            })
    }

    async fn append_event(&self, event: NewEntryEvent) -> Result<EntryEvent> {
        let details_json = event
            .details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO entry_events (entry_id, event_type, details_json, created_at)
             VALUES (?, ?, ?, ?)
             RETURNING id",
        )
        .bind(event.entry_id.as_str())
        .bind(event.event_type.as_str())
        .bind(details_json)
        .bind(to_micros(event.created_at))
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to append event"))?;

        Ok(EntryEvent {
            id,
            entry_id: event.entry_id,
            event_type: event.event_type,
            details: event.details,
            created_at: event.created_at,
        })
    }

    async fn fetch_events(&self, id: &EntryId) -> Result<Vec<EntryEvent>> {
        sqlx::query_as::<_, EventRow>(
            "SELECT id, entry_id, event_type, details_json, created_at
             FROM entry_events
             WHERE entry_id = ?
             ORDER BY id ASC",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to fetch events"))?
        .into_iter()
        .map(EntryEvent::try_from)
        .collect()
    }
}
