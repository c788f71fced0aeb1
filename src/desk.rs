//! One open desk = one application instance.
//!
//! Composes the store handle, the persistence gateway and a sync client, and
//! enforces the publish discipline: notifications go out only after the store
//! has committed, and never when a mutation fails or turns out to be a no-op.

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::Config;
use crate::database::PatientDatabase;
use crate::error::RegistryError;
use crate::models::{NewPatient, Patient};
use crate::store::Store;
use crate::sync::{MessageBus, SyncClient};

pub struct Desk {
    store: Arc<Store>,
    database: PatientDatabase,
    sync: SyncClient,
}

impl Desk {
    /// Open an instance on the given bus. The store stays untouched until the
    /// first operation needs it.
    pub fn open(config: &Config, bus: Arc<dyn MessageBus>) -> Desk {
        Desk::with_store(Arc::new(Store::new(config.database.clone())), bus)
    }

    pub fn with_store(store: Arc<Store>, bus: Arc<dyn MessageBus>) -> Desk {
        let database = PatientDatabase::new(store.clone());
        let sync = SyncClient::attach(bus);
        Desk { store, database, sync }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn database(&self) -> &PatientDatabase {
        &self.database
    }

    pub fn sync(&self) -> &SyncClient {
        &self.sync
    }

    /// Shorthand for [`SyncClient::changes`].
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.sync.changes()
    }

    /// Register a patient; once the row is committed, announce it to every
    /// instance on the bus.
    pub async fn add_patient(&self, candidate: &NewPatient) -> Result<Patient, RegistryError> {
        let patient = self.database.add_patient(candidate).await?;
        self.sync.publish_added(&patient);
        Ok(patient)
    }

    /// Delete by id. Announces the deletion only when a row actually went
    /// away.
    pub async fn delete_patient(&self, id: i64) -> Result<u64, RegistryError> {
        let removed = self.database.delete_patient(id).await?;
        if removed > 0 {
            self.sync.publish_deleted(id);
        }
        Ok(removed)
    }

    pub async fn get_patients(&self) -> Result<Vec<Patient>, RegistryError> {
        self.database.get_patients().await
    }

    pub async fn search_patients(&self, term: &str) -> Result<Vec<Patient>, RegistryError> {
        self.database.search_patients(term).await
    }

    pub async fn get_patient(&self, id: i64) -> Result<Option<Patient>, RegistryError> {
        self.database.get_patient(id).await
    }

    pub async fn count_patients(&self) -> Result<u64, RegistryError> {
        self.database.count_patients().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast;

    use crate::sync::{MockMessageBus, SyncEventKind};

    fn candidate() -> NewPatient {
        NewPatient {
            first_name: "Amelia".into(),
            last_name: "Reyes".into(),
            date_of_birth: "1984-09-30".into(),
            gender: "female".into(),
            ..Default::default()
        }
    }

    /// Bus mock that tolerates the attach/detach presence traffic.
    fn presence_tolerant_mock() -> MockMessageBus {
        let mut bus = MockMessageBus::new();
        bus.expect_subscribe().returning(|| broadcast::channel(8).1);
        bus.expect_name().return_const("mock".to_string());
        bus.expect_publish()
            .withf(|event| !event.kind.is_data_change())
            .returning(|_| 0);
        bus
    }

    #[tokio::test]
    async fn add_publishes_exactly_once_after_commit() {
        let mut bus = presence_tolerant_mock();
        bus.expect_publish()
            .withf(|event| event.kind == SyncEventKind::PatientAdded)
            .times(1)
            .returning(|_| 1);

        let desk = Desk::with_store(Arc::new(Store::in_memory()), Arc::new(bus));
        desk.add_patient(&candidate()).await.unwrap();
    }

    #[tokio::test]
    async fn rejected_add_publishes_nothing() {
        // No data-change expectation registered: any such publish panics
        let bus = presence_tolerant_mock();
        let desk = Desk::with_store(Arc::new(Store::in_memory()), Arc::new(bus));

        let err = desk.add_patient(&NewPatient::default()).await.unwrap_err();
        assert!(matches!(err, RegistryError::Validation(_)));
    }

    #[tokio::test]
    async fn delete_of_missing_row_publishes_nothing() {
        let bus = presence_tolerant_mock();
        let desk = Desk::with_store(Arc::new(Store::in_memory()), Arc::new(bus));

        assert_eq!(desk.delete_patient(4242).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_of_existing_row_publishes_the_id() {
        let mut bus = presence_tolerant_mock();
        bus.expect_publish()
            .withf(|event| event.kind == SyncEventKind::PatientAdded)
            .times(1)
            .returning(|_| 1);
        bus.expect_publish()
            .withf(|event| {
                event.kind == SyncEventKind::PatientDeleted
                    && event.data.as_ref().and_then(|d| d["id"].as_i64()).is_some()
            })
            .times(1)
            .returning(|_| 1);

        let desk = Desk::with_store(Arc::new(Store::in_memory()), Arc::new(bus));
        let patient = desk.add_patient(&candidate()).await.unwrap();
        assert_eq!(desk.delete_patient(patient.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn validation_failure_leaves_the_store_untouched() {
        let bus = presence_tolerant_mock();
        let store = Arc::new(Store::in_memory());
        let desk = Desk::with_store(store.clone(), Arc::new(bus));

        let _ = desk.add_patient(&NewPatient::default()).await.unwrap_err();
        assert_eq!(
            store.status(),
            crate::store::StoreStatus::Uninitialized,
            "rejected input must fail before any store I/O"
        );
    }
}
