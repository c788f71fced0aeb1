//! Persistence gateway for patient records.
//!
//! The only module that issues statements against the store. Mutations
//! re-validate their input (fails closed before any I/O), and uniqueness is
//! enforced twice: a friendly pre-check first, then the store's own unique
//! indexes as the authority. A pre-check cannot close the race with a
//! concurrent insert, so unique-index violations coming back from the store
//! are remapped onto the offending field instead of surfacing as faults.

use std::sync::Arc;

use chrono::NaiveDate;
use sqlx::SqlitePool;
use tracing::{debug, info, instrument, warn};

use crate::error::{RegistryError, StorageFault, ValidationError};
use crate::models::{Gender, NewPatient, Patient};
use crate::schema;
use crate::store::Store;
use crate::validation::{self, Field, FieldErrors};

const PATIENT_COLUMNS: &str = "id, first_name, last_name, preferred_name, date_of_birth, gender, \
     email, phone, address, state, city, medical_history, created_at";

/// Store-level unique constraints and the field each one guards. SQLite names
/// the index (and the column) in its violation message.
const UNIQUE_CONSTRAINTS: &[(&str, Field)] = &[
    (schema::EMAIL_INDEX, Field::Email),
    ("patients.email", Field::Email),
    (schema::PHONE_INDEX, Field::Phone),
    ("patients.phone", Field::Phone),
];

pub struct PatientDatabase {
    store: Arc<Store>,
}

impl PatientDatabase {
    pub fn new(store: Arc<Store>) -> Self {
        PatientDatabase { store }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Validate and persist a candidate record, returning the stored row.
    #[instrument(skip(self, candidate), fields(last_name = %candidate.last_name))]
    pub async fn add_patient(&self, candidate: &NewPatient) -> Result<Patient, RegistryError> {
        let candidate = candidate.normalized();
        validation::validate(&candidate).map_err(ValidationError::Invalid)?;

        // validate() guarantees these parse; handled anyway
        let date_of_birth = parse_date_of_birth(&candidate.date_of_birth)?;
        let gender = parse_gender(&candidate.gender)?;

        let pool = self.store.open().await?;

        if let Some(email) = candidate.email.as_deref() {
            if self.email_taken(&pool, email).await? {
                return Err(ValidationError::Duplicate { field: Field::Email }.into());
            }
        }
        if let Some(phone) = candidate.phone.as_deref() {
            if self.phone_taken(&pool, phone).await? {
                return Err(ValidationError::Duplicate { field: Field::Phone }.into());
            }
        }

        let sql = format!(
            "INSERT INTO patients (
                first_name, last_name, preferred_name, date_of_birth, gender,
                email, phone, address, state, city, medical_history
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            RETURNING {PATIENT_COLUMNS}"
        );
        let inserted = sqlx::query_as::<_, Patient>(&sql)
            .bind(&candidate.first_name)
            .bind(&candidate.last_name)
            .bind(&candidate.preferred_name)
            .bind(date_of_birth)
            .bind(gender)
            .bind(&candidate.email)
            .bind(&candidate.phone)
            .bind(&candidate.address)
            .bind(&candidate.state)
            .bind(&candidate.city)
            .bind(&candidate.medical_history)
            .fetch_one(&*pool)
            .await
            .map_err(remap_constraint_error)?;

        info!(id = inserted.id, "patient registered");
        Ok(inserted)
    }

    /// All patients, ordered by last then first name (case-sensitive, the
    /// store's default collation).
    #[instrument(skip(self))]
    pub async fn get_patients(&self) -> Result<Vec<Patient>, RegistryError> {
        let pool = self.store.open().await?;
        let sql = format!(
            "SELECT {PATIENT_COLUMNS} FROM patients ORDER BY last_name, first_name"
        );
        let patients = sqlx::query_as::<_, Patient>(&sql)
            .fetch_all(&*pool)
            .await
            .map_err(StorageFault::from)?;
        debug!(count = patients.len(), "fetched patient list");
        Ok(patients)
    }

    /// Case-insensitive substring match on first or last name. Wildcard
    /// characters in the term are taken literally. An empty term matches
    /// everyone.
    #[instrument(skip(self))]
    pub async fn search_patients(&self, term: &str) -> Result<Vec<Patient>, RegistryError> {
        let pool = self.store.open().await?;
        let pattern = like_pattern(term.trim());
        let sql = format!(
            "SELECT {PATIENT_COLUMNS} FROM patients
             WHERE first_name LIKE ?1 ESCAPE '\\' OR last_name LIKE ?1 ESCAPE '\\'
             ORDER BY last_name, first_name"
        );
        let patients = sqlx::query_as::<_, Patient>(&sql)
            .bind(&pattern)
            .fetch_all(&*pool)
            .await
            .map_err(StorageFault::from)?;
        debug!(count = patients.len(), "search finished");
        Ok(patients)
    }

    /// Single row by id; `None` when the id is unknown.
    pub async fn get_patient(&self, id: i64) -> Result<Option<Patient>, RegistryError> {
        let pool = self.store.open().await?;
        let sql = format!("SELECT {PATIENT_COLUMNS} FROM patients WHERE id = ?1");
        let patient = sqlx::query_as::<_, Patient>(&sql)
            .bind(id)
            .fetch_optional(&*pool)
            .await
            .map_err(StorageFault::from)?;
        Ok(patient)
    }

    /// Delete by id, returning how many rows went away. Deleting an unknown
    /// id is not an error; it returns 0.
    #[instrument(skip(self))]
    pub async fn delete_patient(&self, id: i64) -> Result<u64, RegistryError> {
        let pool = self.store.open().await?;
        let result = sqlx::query("DELETE FROM patients WHERE id = ?1")
            .bind(id)
            .execute(&*pool)
            .await
            .map_err(StorageFault::from)?;

        let removed = result.rows_affected();
        if removed > 0 {
            info!(id, "patient deleted");
        } else {
            debug!(id, "delete matched no rows");
        }
        Ok(removed)
    }

    pub async fn count_patients(&self) -> Result<u64, RegistryError> {
        let pool = self.store.open().await?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM patients")
            .fetch_one(&*pool)
            .await
            .map_err(StorageFault::from)?;
        Ok(count as u64)
    }

    async fn email_taken(&self, pool: &SqlitePool, email: &str) -> Result<bool, StorageFault> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM patients WHERE email = ?1)")
            .bind(email)
            .fetch_one(pool)
            .await
            .map_err(StorageFault::from)
    }

    async fn phone_taken(&self, pool: &SqlitePool, phone: &str) -> Result<bool, StorageFault> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM patients WHERE phone = ?1)")
            .bind(phone)
            .fetch_one(pool)
            .await
            .map_err(StorageFault::from)
    }
}

/// Classify an insert failure. Unique violations are identified by the
/// driver's structured error kind, then attributed to a field by matching the
/// constraint name; everything else stays a storage fault with the original
/// message intact.
fn remap_constraint_error(err: sqlx::Error) -> RegistryError {
    if let sqlx::Error::Database(db_err) = &err {
        if matches!(db_err.kind(), sqlx::error::ErrorKind::UniqueViolation) {
            let detail = db_err.message();
            for (constraint, field) in UNIQUE_CONSTRAINTS {
                if detail.contains(constraint) {
                    warn!(%field, "unique index hit behind the pre-check (concurrent insert)");
                    return ValidationError::Duplicate { field: *field }.into();
                }
            }
        }
    }
    StorageFault::from(err).into()
}

fn parse_date_of_birth(raw: &str) -> Result<NaiveDate, RegistryError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| invalid(Field::DateOfBirth, "Date of birth must be a valid YYYY-MM-DD date"))
}

fn parse_gender(raw: &str) -> Result<Gender, RegistryError> {
    Gender::parse(raw).ok_or_else(|| {
        invalid(Field::Gender, "Gender must be one of male, female, other or prefer_not_to_say")
    })
}

fn invalid(field: Field, reason: &str) -> RegistryError {
    let mut errors = FieldErrors::default();
    errors.note(field, reason);
    ValidationError::Invalid(errors).into()
}

/// Wrap the term for a contains-match, escaping LIKE metacharacters.
fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}
