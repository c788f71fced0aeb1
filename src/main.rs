//! Clinicdesk
//!
//! Interactive front desk for the patient registry. Start several copies
//! pointed at the same database file and they keep each other current
//! through the sync bus.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use clinicdesk::{config, BroadcastBus, Desk, NewPatient, RegistryError, ValidationError};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let config = config::load_config().context("failed to load configuration")?;

    // Open this instance on the shared channel
    let bus = Arc::new(BroadcastBus::new(&config.sync.channel, config.sync.capacity));
    let desk = Desk::open(&config, bus);

    // Warm the store so schema problems surface before the first command
    desk.store().open().await.context("failed to open the patient store")?;
    info!(path = %config.database.path, "registry ready");

    // React to change notifications the way a list view would
    let mut changes = desk.changes();
    tokio::spawn(async move {
        while changes.changed().await.is_ok() {
            println!("(registry changed - 'list' to refresh)");
        }
    });

    print_help();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            break; // EOF
        }
        let line = line.trim();
        let (command, rest) = match line.split_once(' ') {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };

        match command {
            "" => {}
            "help" => print_help(),
            "list" => match desk.get_patients().await {
                Ok(patients) => render(&patients),
                Err(err) => eprintln!("error: {}", err),
            },
            "search" => match desk.search_patients(rest).await {
                Ok(patients) => render(&patients),
                Err(err) => eprintln!("error: {}", err),
            },
            "add" => add_interactive(&desk).await?,
            "delete" => match rest.parse::<i64>() {
                Ok(id) => match desk.delete_patient(id).await {
                    Ok(0) => println!("no patient with id {}", id),
                    Ok(_) => println!("deleted patient {}", id),
                    Err(err) => eprintln!("error: {}", err),
                },
                Err(_) => println!("usage: delete <id>"),
            },
            "count" => match desk.count_patients().await {
                Ok(count) => println!("{} patient(s) registered", count),
                Err(err) => eprintln!("error: {}", err),
            },
            "quit" | "exit" => break,
            other => println!("unknown command '{}'; try 'help'", other),
        }
    }

    Ok(())
}

fn print_help() {
    println!("commands:");
    println!("  list            show all patients");
    println!("  search <term>   match first or last names");
    println!("  add             register a patient (prompts per field)");
    println!("  delete <id>     remove a patient");
    println!("  count           number of registered patients");
    println!("  quit            leave");
}

async fn add_interactive(desk: &Desk) -> Result<()> {
    let candidate = NewPatient {
        first_name: prompt("first name")?,
        last_name: prompt("last name")?,
        preferred_name: prompt_optional("preferred name")?,
        date_of_birth: prompt("date of birth (YYYY-MM-DD)")?,
        gender: prompt("gender (male/female/other/prefer_not_to_say)")?,
        email: prompt_optional("email")?,
        phone: prompt_optional("phone")?,
        address: prompt_optional("address")?,
        state: prompt_optional("state")?,
        city: prompt_optional("city")?,
        medical_history: prompt_optional("medical history")?,
    };

    match desk.add_patient(&candidate).await {
        Ok(patient) => {
            println!("registered #{} {} {}", patient.id, patient.first_name, patient.last_name)
        }
        Err(RegistryError::Validation(ValidationError::Invalid(fields))) => {
            println!("patient not registered:");
            for (field, reason) in fields.iter() {
                println!("  {}: {}", field, reason);
            }
        }
        Err(RegistryError::Validation(err)) => println!("patient not registered: {}", err),
        Err(err) => eprintln!("error: {}", err),
    }
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}: ", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn prompt_optional(label: &str) -> Result<Option<String>> {
    let value = prompt(&format!("{} (optional)", label))?;
    Ok((!value.is_empty()).then_some(value))
}

fn render(patients: &[clinicdesk::Patient]) {
    if patients.is_empty() {
        println!("no patients found");
        return;
    }
    println!(
        "{:<5} {:<28} {:<11} {:<18} {:<28} {:<16}",
        "id", "name", "born", "gender", "email", "phone"
    );
    for patient in patients {
        let name = format!("{}, {}", patient.last_name, patient.first_name);
        println!(
            "{:<5} {:<28} {:<11} {:<18} {:<28} {:<16}",
            patient.id,
            name,
            patient.date_of_birth.to_string(),
            patient.gender,
            patient.email.as_deref().unwrap_or("-"),
            patient.phone.as_deref().unwrap_or("-"),
        );
    }
}
