use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A persisted patient row. `id` and `created_at` are assigned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Patient {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub preferred_name: Option<String>,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub state: Option<String>,
    pub city: Option<String>,
    pub medical_history: Option<String>,
    pub created_at: NaiveDateTime,
}

impl Patient {
    /// Name the front desk calls the patient by.
    pub fn display_name(&self) -> &str {
        self.preferred_name.as_deref().unwrap_or(&self.first_name)
    }
}

/// Candidate payload for registration. Date of birth and gender arrive as
/// plain text (the way a form submits them) and are checked during
/// validation; nothing here is trusted until it passes the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewPatient {
    pub first_name: String,
    pub last_name: String,
    pub preferred_name: Option<String>,
    pub date_of_birth: String,
    pub gender: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub state: Option<String>,
    pub city: Option<String>,
    pub medical_history: Option<String>,
}

impl NewPatient {
    /// Copy with every field trimmed; optional fields that trim to nothing
    /// become absent so they bypass validation and store as NULL.
    pub fn normalized(&self) -> NewPatient {
        NewPatient {
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            preferred_name: trim_opt(&self.preferred_name),
            date_of_birth: self.date_of_birth.trim().to_string(),
            gender: self.gender.trim().to_string(),
            email: trim_opt(&self.email),
            phone: trim_opt(&self.phone),
            address: trim_opt(&self.address),
            state: trim_opt(&self.state),
            city: trim_opt(&self.city),
            medical_history: trim_opt(&self.medical_history),
        }
    }
}

fn trim_opt(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    Other,
    PreferNotToSay,
}

impl Gender {
    pub const ALL: [Gender; 4] = [
        Gender::Male,
        Gender::Female,
        Gender::Other,
        Gender::PreferNotToSay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
            Gender::PreferNotToSay => "prefer_not_to_say",
        }
    }

    /// Exact-match parse of the stored representation.
    pub fn parse(value: &str) -> Option<Gender> {
        Gender::ALL.into_iter().find(|g| g.as_str() == value)
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}
