use criterion::{black_box, criterion_group, criterion_main, Criterion};

use clinicdesk::validation::validate;
use clinicdesk::NewPatient;

fn complete_candidate() -> NewPatient {
    NewPatient {
        first_name: "Amelia".into(),
        last_name: "Reyes".into(),
        preferred_name: Some("Amy".into()),
        date_of_birth: "1984-09-30".into(),
        gender: "female".into(),
        email: Some("amelia.reyes@example.com".into()),
        phone: Some("+14155550123".into()),
        address: Some("12 Harbor Lane".into()),
        state: Some("Oregon".into()),
        city: Some("Portland".into()),
        medical_history: Some("Penicillin allergy. Asthma, mild.".into()),
    }
}

fn broken_candidate() -> NewPatient {
    NewPatient {
        first_name: "a".repeat(101),
        last_name: String::new(),
        date_of_birth: "not-a-date".into(),
        gender: "unknown".into(),
        email: Some("not an email".into()),
        phone: Some("123".into()),
        ..Default::default()
    }
}

fn bench_validation(c: &mut Criterion) {
    let complete = complete_candidate();
    c.bench_function("validate_complete_record", |b| {
        b.iter(|| validate(black_box(&complete)))
    });

    let broken = broken_candidate();
    c.bench_function("validate_worst_case_rejection", |b| {
        b.iter(|| validate(black_box(&broken)).is_err())
    });
}

criterion_group!(benches, bench_validation);
criterion_main!(benches);
