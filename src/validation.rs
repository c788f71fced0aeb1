//! Field-level validation for candidate patient records.
//!
//! Pure functions over the candidate: no store access here. Uniqueness of
//! email and phone needs store state and is enforced by the persistence
//! gateway instead. Checks per field stop at the first violation, so a
//! missing required field reports "required" and nothing else.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{Months, NaiveDate, Utc};

use crate::models::{Gender, NewPatient};

pub const NAME_MAX: usize = 100;
pub const ADDRESS_MAX: usize = 200;
pub const REGION_MAX: usize = 100;

/// Births further back than this are treated as data entry slips.
pub const MAX_PATIENT_AGE_YEARS: u32 = 120;

/// Identifies the patient field a violation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    FirstName,
    LastName,
    PreferredName,
    DateOfBirth,
    Gender,
    Email,
    Phone,
    Address,
    State,
    City,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::FirstName => "first_name",
            Field::LastName => "last_name",
            Field::PreferredName => "preferred_name",
            Field::DateOfBirth => "date_of_birth",
            Field::Gender => "gender",
            Field::Email => "email",
            Field::Phone => "phone",
            Field::Address => "address",
            Field::State => "state",
            Field::City => "city",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// First violation found for each offending field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(BTreeMap<Field, String>);

impl FieldErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, field: Field) -> bool {
        self.0.contains_key(&field)
    }

    pub fn get(&self, field: Field) -> Option<&str> {
        self.0.get(&field).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, &str)> + '_ {
        self.0.iter().map(|(field, reason)| (*field, reason.as_str()))
    }

    /// Records a violation unless the field already has one.
    pub(crate) fn note(&mut self, field: Field, reason: impl Into<String>) {
        self.0.entry(field).or_insert_with(|| reason.into());
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, reason) in self.iter() {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", field, reason)?;
            first = false;
        }
        Ok(())
    }
}

/// Validate a candidate against today's date.
pub fn validate(candidate: &NewPatient) -> Result<(), FieldErrors> {
    validate_on(candidate, Utc::now().date_naive())
}

/// Validate with an explicit "today", which anchors the date-of-birth window.
pub fn validate_on(candidate: &NewPatient, today: NaiveDate) -> Result<(), FieldErrors> {
    let mut errors = FieldErrors::default();

    check_name(&mut errors, Field::FirstName, &candidate.first_name, "First name");
    check_name(&mut errors, Field::LastName, &candidate.last_name, "Last name");

    if let Some(name) = present(&candidate.preferred_name) {
        if name.chars().count() > NAME_MAX {
            errors.note(
                Field::PreferredName,
                format!("Preferred name must be at most {} characters", NAME_MAX),
            );
        }
    }

    check_date_of_birth(&mut errors, &candidate.date_of_birth, today);
    check_gender(&mut errors, &candidate.gender);

    if let Some(email) = present(&candidate.email) {
        if !validator::validate_email(email) {
            errors.note(Field::Email, "Invalid email address");
        }
    }

    if let Some(phone) = present(&candidate.phone) {
        if !phone_is_valid(phone) {
            errors.note(
                Field::Phone,
                "Phone must be 10 to 15 digits with an optional leading +",
            );
        }
    }

    check_bound(&mut errors, Field::Address, &candidate.address, ADDRESS_MAX, "Address");
    check_bound(&mut errors, Field::State, &candidate.state, REGION_MAX, "State");
    check_bound(&mut errors, Field::City, &candidate.city, REGION_MAX, "City");

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Oldest acceptable birth date. chrono clamps Feb 29 to Feb 28 when the
/// target year is not a leap year.
pub fn earliest_birth_date(today: NaiveDate) -> NaiveDate {
    today
        .checked_sub_months(Months::new(MAX_PATIENT_AGE_YEARS * 12))
        .unwrap_or(NaiveDate::MIN)
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn check_name(errors: &mut FieldErrors, field: Field, value: &str, label: &str) {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        errors.note(field, format!("{} is required", label));
    } else if trimmed.chars().count() > NAME_MAX {
        errors.note(field, format!("{} must be at most {} characters", label, NAME_MAX));
    }
}

fn check_bound(errors: &mut FieldErrors, field: Field, value: &Option<String>, max: usize, label: &str) {
    if let Some(text) = present(value) {
        if text.chars().count() > max {
            errors.note(field, format!("{} must be at most {} characters", label, max));
        }
    }
}

fn check_date_of_birth(errors: &mut FieldErrors, raw: &str, today: NaiveDate) {
    let raw = raw.trim();
    if raw.is_empty() {
        errors.note(Field::DateOfBirth, "Date of birth is required");
        return;
    }
    let Ok(date_of_birth) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") else {
        errors.note(Field::DateOfBirth, "Date of birth must be a valid YYYY-MM-DD date");
        return;
    };
    if date_of_birth > today {
        errors.note(Field::DateOfBirth, "Date of birth cannot be in the future");
    } else if date_of_birth < earliest_birth_date(today) {
        errors.note(
            Field::DateOfBirth,
            format!("Date of birth cannot be more than {} years ago", MAX_PATIENT_AGE_YEARS),
        );
    }
}

fn check_gender(errors: &mut FieldErrors, raw: &str) {
    let raw = raw.trim();
    if raw.is_empty() {
        errors.note(Field::Gender, "Gender is required");
    } else if Gender::parse(raw).is_none() {
        errors.note(
            Field::Gender,
            "Gender must be one of male, female, other or prefer_not_to_say",
        );
    }
}

fn phone_is_valid(phone: &str) -> bool {
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    (10..=15).contains(&digits.len()) && digits.bytes().all(|b| b.is_ascii_digit())
}
