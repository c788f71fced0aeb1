//! Schema bootstrap for the patient registry.
//!
//! Every statement is `IF NOT EXISTS`, so running this against an already
//! provisioned file is a no-op and two instances racing to provision the same
//! file both succeed. The CHECK constraints mirror the validation engine for
//! everything SQLite can express deterministically; the date-of-birth window
//! depends on the current date and is enforced by validation alone.

use sqlx::SqlitePool;
use tracing::debug;

use crate::error::StorageFault;

/// Unique index names, also matched against constraint-violation messages by
/// the persistence gateway.
pub(crate) const EMAIL_INDEX: &str = "idx_patients_email";
pub(crate) const PHONE_INDEX: &str = "idx_patients_phone";

/// Create the patients table and its indexes if they are missing.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<(), StorageFault> {
    // Patients table
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS patients (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            first_name      TEXT NOT NULL CHECK (length(first_name) BETWEEN 1 AND 100),
            last_name       TEXT NOT NULL CHECK (length(last_name) BETWEEN 1 AND 100),
            preferred_name  TEXT CHECK (preferred_name IS NULL OR length(preferred_name) <= 100),
            date_of_birth   TEXT NOT NULL,
            gender          TEXT NOT NULL CHECK (gender IN ('male', 'female', 'other', 'prefer_not_to_say')),
            email           TEXT CHECK (email IS NULL OR email LIKE '%_@_%'),
            phone           TEXT CHECK (
                phone IS NULL
                OR (phone GLOB '+[0-9]*'
                    AND length(phone) BETWEEN 11 AND 16
                    AND substr(phone, 2) NOT GLOB '*[^0-9]*')
                OR (length(phone) BETWEEN 10 AND 15
                    AND phone NOT GLOB '*[^0-9]*')
            ),
            address         TEXT CHECK (address IS NULL OR length(address) <= 200),
            state           TEXT CHECK (state IS NULL OR length(state) <= 100),
            city            TEXT CHECK (city IS NULL OR length(city) <= 100),
            medical_history TEXT,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .execute(pool)
    .await
    .map_err(StorageFault::from)?;

    // Listing order is (last_name, first_name); keep it indexed
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_patients_name
         ON patients (last_name, first_name)",
    )
    .execute(pool)
    .await
    .map_err(StorageFault::from)?;

    // Partial unique indexes: NULL email/phone stays unconstrained
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_patients_email
         ON patients (email) WHERE email IS NOT NULL",
    )
    .execute(pool)
    .await
    .map_err(StorageFault::from)?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_patients_phone
         ON patients (phone) WHERE phone IS NOT NULL",
    )
    .execute(pool)
    .await
    .map_err(StorageFault::from)?;

    debug!("patient schema ensured");
    Ok(())
}
