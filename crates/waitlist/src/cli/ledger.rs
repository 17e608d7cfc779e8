//! Booking ledger used by the binary as its `BookingService`.
//!
//! Records confirmed bookings in a `bookings` table next to the waitlist
//! tables. A physical slot can be booked once; a second booking for it is
//! reported as unavailable.

use chrono::Utc;
use sqlx::SqlitePool;
use waitlist_core::{Error, Result};

use crate::collaborators::{BookingError, BookingRef, BookingRequest, BookingService};

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS bookings (
    booking_ref TEXT PRIMARY KEY,
    entry_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    salon_id TEXT NOT NULL,
    service_id TEXT NOT NULL,
    staff_key TEXT NOT NULL,
    date TEXT NOT NULL,
    time TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_bookings_slot
    ON bookings(salon_id, service_id, staff_key, date, time);
";

#[derive(Debug, Clone)]
pub struct SqliteBookingLedger {
    pool: SqlitePool,
}

impl SqliteBookingLedger {
    /// Create the ledger over `pool`, ensuring its table exists.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` if the schema cannot be created.
    pub async fn open(pool: SqlitePool) -> Result<Self> {
        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to initialize bookings table: {e}")))?;
        Ok(Self { pool })
    }

    /// Number of bookings recorded.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` if the query fails.
    pub async fn count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM bookings")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to count bookings: {e}")))
    }
}

#[async_trait::async_trait]
impl BookingService for SqliteBookingLedger {
    async fn create_booking(&self, request: &BookingRequest) -> std::result::Result<BookingRef, BookingError> {
        let booking_ref = BookingRef(format!("bk-{}", uuid::Uuid::new_v4()));

        sqlx::query(
            "INSERT INTO bookings (booking_ref, entry_id, user_id, salon_id, service_id,
                 staff_key, date, time, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&booking_ref.0)
        .bind(request.entry_id.as_str())
        .bind(&request.user_id)
        .bind(&request.salon_id)
        .bind(&request.service_id)
        .bind(request.staff_id.as_deref().unwrap_or(""))
        .bind(request.date.format("%Y-%m-%d").to_string())
        .bind(request.time.format("%H:%M:%S").to_string())
        .bind(Utc::now().timestamp_micros())
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => BookingError::Unavailable(
                format!("{} {} is already booked", request.date, request.time),
            ),
            other => BookingError::Service(other.to_string()),
        })?;

        tracing::info!(
            booking_ref = %booking_ref,
            entry_id = %request.entry_id,
            salon_id = %request.salon_id,
            date = %request.date,
            time = %request.time,
            "Booking recorded"
        );
        Ok(booking_ref)
    }
}
