//! Clinicdesk core library
//!
//! Embedded patient registry for clinic front desks. Several instances of the
//! application can point at the same database file; every committed change is
//! announced on a shared message bus so sibling instances know to re-read.
//!
//! The pieces compose bottom-up: [`validation`] checks candidate records,
//! [`store`] owns the lazily-initialized SQLite handle, [`database`] is the
//! persistence gateway, [`sync`] carries change notifications between
//! instances, and [`desk`] ties one instance of all of the above together.

pub mod database;
pub mod desk;
pub mod error;
pub mod models;
pub mod schema;
pub mod store;
pub mod sync;
pub mod validation;

pub use database::PatientDatabase;
pub use desk::Desk;
pub use error::{RegistryError, StorageFault, ValidationError};
pub use models::{Gender, NewPatient, Patient};
pub use store::{Store, StoreStatus};
pub use sync::{BroadcastBus, MessageBus, SyncClient, SyncEvent, SyncEventKind};
pub use validation::{Field, FieldErrors};

/// Application configuration
pub mod config {
    use serde::Deserialize;

    use crate::sync;

    #[derive(Debug, Clone, Deserialize)]
    #[serde(default)]
    pub struct Config {
        pub database: DatabaseConfig,
        pub sync: SyncConfig,
    }

    impl Default for Config {
        fn default() -> Self {
            Config {
                database: DatabaseConfig::default(),
                sync: SyncConfig::default(),
            }
        }
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(default)]
    pub struct DatabaseConfig {
        /// Path of the SQLite file; `:memory:` opens a throwaway database.
        pub path: String,
        pub max_connections: u32,
        pub busy_timeout_ms: u64,
    }

    impl Default for DatabaseConfig {
        fn default() -> Self {
            DatabaseConfig {
                path: "data/clinicdesk.sqlite".into(),
                max_connections: 5,
                busy_timeout_ms: 5_000,
            }
        }
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(default)]
    pub struct SyncConfig {
        /// Channel name; instances only see each other on the same channel.
        pub channel: String,
        /// Buffered events per subscriber before the transport drops old ones.
        pub capacity: usize,
    }

    impl Default for SyncConfig {
        fn default() -> Self {
            SyncConfig {
                channel: sync::DEFAULT_CHANNEL.into(),
                capacity: sync::DEFAULT_CAPACITY,
            }
        }
    }

    /// Load configuration from file
    pub fn load_config() -> Result<Config, config::ConfigError> {
        // Environment-specific settings override the defaults, environment
        // variables override both (e.g. CLINICDESK_DATABASE__PATH).
        let env = std::env::var("CLINICDESK_ENV").unwrap_or_else(|_| "development".into());

        config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("CLINICDESK").separator("__"))
            .build()?
            .try_deserialize()
    }
}
