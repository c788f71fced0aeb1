//! Gateway behavior against a real on-disk store.

use std::sync::Arc;

use chrono::NaiveDate;
use fake::faker::address::en::{CityName, StateName, StreetName};
use fake::Fake;
use tempfile::TempDir;

use clinicdesk::config::DatabaseConfig;
use clinicdesk::{
    Field, Gender, NewPatient, PatientDatabase, RegistryError, Store, StoreStatus, ValidationError,
};

fn temp_store(dir: &TempDir) -> Arc<Store> {
    let path = dir.path().join("patients.sqlite");
    Arc::new(Store::new(DatabaseConfig {
        path: path.to_string_lossy().into_owned(),
        max_connections: 4,
        busy_timeout_ms: 5_000,
    }))
}

fn candidate(first: &str, last: &str) -> NewPatient {
    NewPatient {
        first_name: first.into(),
        last_name: last.into(),
        date_of_birth: "1984-09-30".into(),
        gender: "female".into(),
        address: Some(StreetName().fake::<String>()),
        state: Some(StateName().fake::<String>()),
        city: Some(CityName().fake::<String>()),
        ..Default::default()
    }
}

#[tokio::test]
async fn add_returns_the_stored_row() {
    let dir = TempDir::new().unwrap();
    let db = PatientDatabase::new(temp_store(&dir));

    let mut submitted = candidate("Amelia", "Reyes");
    submitted.email = Some("  amelia@example.com ".into());
    submitted.phone = Some("+14155550123".into());
    submitted.medical_history = Some("Penicillin allergy.".into());

    let patient = db.add_patient(&submitted).await.unwrap();

    assert!(patient.id >= 1);
    assert_eq!(patient.first_name, "Amelia");
    assert_eq!(patient.date_of_birth, NaiveDate::from_ymd_opt(1984, 9, 30).unwrap());
    assert_eq!(patient.gender, Gender::Female);
    assert_eq!(patient.email.as_deref(), Some("amelia@example.com"), "email arrives trimmed");
    assert_eq!(patient.phone.as_deref(), Some("+14155550123"));

    let fetched = db.get_patient(patient.id).await.unwrap().expect("row must exist");
    assert_eq!(fetched, patient);
}

#[tokio::test]
async fn rejected_candidate_never_touches_the_store() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(&dir);
    let db = PatientDatabase::new(store.clone());

    let err = db.add_patient(&NewPatient::default()).await.unwrap_err();
    match err {
        RegistryError::Validation(ValidationError::Invalid(fields)) => {
            assert!(fields.contains(Field::FirstName));
            assert!(fields.contains(Field::DateOfBirth));
        }
        other => panic!("expected field errors, got {other:?}"),
    }
    assert_eq!(store.status(), StoreStatus::Uninitialized, "no I/O for invalid input");
}

#[tokio::test]
async fn listing_orders_by_last_name_then_first_name() {
    let dir = TempDir::new().unwrap();
    let db = PatientDatabase::new(temp_store(&dir));

    // Deliberately reversed pairs: ordering is by last name first
    db.add_patient(&candidate("Zed", "Amy")).await.unwrap();
    db.add_patient(&candidate("Amy", "Zed")).await.unwrap();
    db.add_patient(&candidate("Luis", "Lopez")).await.unwrap();
    db.add_patient(&candidate("Ana", "Lopez")).await.unwrap();

    let listed = db.get_patients().await.unwrap();
    let names: Vec<(String, String)> = listed
        .into_iter()
        .map(|p| (p.last_name, p.first_name))
        .collect();

    assert_eq!(
        names,
        vec![
            ("Amy".to_string(), "Zed".to_string()),
            ("Lopez".to_string(), "Ana".to_string()),
            ("Lopez".to_string(), "Luis".to_string()),
            ("Zed".to_string(), "Amy".to_string()),
        ]
    );
}

#[tokio::test]
async fn search_matches_either_name_ignoring_case() {
    let dir = TempDir::new().unwrap();
    let db = PatientDatabase::new(temp_store(&dir));

    db.add_patient(&candidate("Amelia", "Reyes")).await.unwrap();
    db.add_patient(&candidate("Robert", "Amery")).await.unwrap();
    db.add_patient(&candidate("Dana", "Brook")).await.unwrap();

    let hits = db.search_patients("AME").await.unwrap();
    let last_names: Vec<_> = hits.iter().map(|p| p.last_name.as_str()).collect();
    assert_eq!(last_names, vec!["Amery", "Reyes"], "match on last or first name, listing order");

    assert_eq!(db.search_patients("zzz").await.unwrap().len(), 0);
    assert_eq!(db.search_patients("").await.unwrap().len(), 3, "empty term matches everyone");
}

#[tokio::test]
async fn search_treats_wildcards_literally() {
    let dir = TempDir::new().unwrap();
    let db = PatientDatabase::new(temp_store(&dir));

    db.add_patient(&candidate("Amelia", "Reyes")).await.unwrap();

    assert_eq!(db.search_patients("%").await.unwrap().len(), 0);
    assert_eq!(db.search_patients("_").await.unwrap().len(), 0);
}

#[tokio::test]
async fn duplicate_email_is_rejected_without_adding_a_row() {
    let dir = TempDir::new().unwrap();
    let db = PatientDatabase::new(temp_store(&dir));

    let mut first = candidate("Amelia", "Reyes");
    first.email = Some("shared@example.com".into());
    db.add_patient(&first).await.unwrap();

    let mut second = candidate("Dana", "Brook");
    second.email = Some("shared@example.com".into());
    let err = db.add_patient(&second).await.unwrap_err();

    match err {
        RegistryError::Validation(ValidationError::Duplicate { field }) => {
            assert_eq!(field, Field::Email)
        }
        other => panic!("expected duplicate email, got {other:?}"),
    }
    assert_eq!(db.count_patients().await.unwrap(), 1);
}

#[tokio::test]
async fn duplicate_phone_is_rejected() {
    let dir = TempDir::new().unwrap();
    let db = PatientDatabase::new(temp_store(&dir));

    let mut first = candidate("Amelia", "Reyes");
    first.phone = Some("+14155550123".into());
    db.add_patient(&first).await.unwrap();

    let mut second = candidate("Dana", "Brook");
    second.phone = Some("+14155550123".into());
    let err = db.add_patient(&second).await.unwrap_err();

    assert!(matches!(
        err,
        RegistryError::Validation(ValidationError::Duplicate { field: Field::Phone })
    ));
}

#[tokio::test]
async fn absent_unique_fields_do_not_collide() {
    let dir = TempDir::new().unwrap();
    let db = PatientDatabase::new(temp_store(&dir));

    // No email, no phone on either record
    db.add_patient(&candidate("Amelia", "Reyes")).await.unwrap();
    db.add_patient(&candidate("Dana", "Brook")).await.unwrap();

    assert_eq!(db.count_patients().await.unwrap(), 2);
}

#[tokio::test]
async fn delete_returns_the_removed_count() {
    let dir = TempDir::new().unwrap();
    let db = PatientDatabase::new(temp_store(&dir));

    let patient = db.add_patient(&candidate("Amelia", "Reyes")).await.unwrap();

    assert_eq!(db.delete_patient(patient.id).await.unwrap(), 1);
    assert_eq!(db.get_patient(patient.id).await.unwrap(), None);

    // Unknown ids are a quiet no-op
    assert_eq!(db.delete_patient(patient.id).await.unwrap(), 0);
    assert_eq!(db.delete_patient(999_999).await.unwrap(), 0);
}

#[tokio::test]
async fn freed_unique_values_can_be_reused() {
    let dir = TempDir::new().unwrap();
    let db = PatientDatabase::new(temp_store(&dir));

    let mut first = candidate("Amelia", "Reyes");
    first.email = Some("front@example.com".into());
    let stored = db.add_patient(&first).await.unwrap();
    db.delete_patient(stored.id).await.unwrap();

    let mut second = candidate("Dana", "Brook");
    second.email = Some("front@example.com".into());
    db.add_patient(&second).await.unwrap();
}

#[tokio::test]
async fn rows_survive_reopening_the_file() {
    let dir = TempDir::new().unwrap();

    let added = {
        let db = PatientDatabase::new(temp_store(&dir));
        db.add_patient(&candidate("Amelia", "Reyes")).await.unwrap()
    };

    // Fresh handle over the same file
    let db = PatientDatabase::new(temp_store(&dir));
    let fetched = db.get_patient(added.id).await.unwrap().expect("row must persist");
    assert_eq!(fetched, added);
}
