pub mod patient;

pub use patient::{Gender, NewPatient, Patient};
