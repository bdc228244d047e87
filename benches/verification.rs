//! Performance benchmarks for signing and verification.
//!
//! Run with: `cargo bench --bench verification`
//!
//! ## What Is Measured
//!
//! | Operation | Axis | Notes |
//! |-----------|------|-------|
//! | sign | pending step count | canonicalization + one Ed25519 signature |
//! | verify | covered step count | canonicalization + Ed25519 + chain check |
//! | verify (cached resolver) | covered step count | chain check amortized |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;

use chrono::TimeZone;
use chrono::Utc;
use ed25519_dalek::SigningKey;
use provenance_kernel::{
    CachedResolver, Certificate, CertificateParams, InMemorySigner, Record, SelfContainedResolver,
};
use serde_json::json;

const TRUST_FRAMEWORK: &str = "https://registry.core.trust.ib1.org/trust-framework";
const SCHEME: &str = "https://registry.core.trust.ib1.org/scheme/supply";

fn make_signer(issuer: &SigningKey) -> InMemorySigner {
    let member = SigningKey::from_bytes(&[6; 32]);
    let certificate = Certificate::issue(
        CertificateParams {
            serial: 6,
            subject: "https://directory.core.trust.ib1.org/member/237256".to_string(),
            issuer: "signing-issuer-ca".to_string(),
            public_key: member.verifying_key(),
            roles: vec![format!("{SCHEME}/role/energy-data-provider")],
            application: None,
            not_before: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            not_after: Utc.with_ymd_and_hms(2124, 1, 1, 0, 0, 0).unwrap(),
        },
        issuer,
    );
    InMemorySigner::new(member, certificate).expect("issued key matches its certificate")
}

/// Build a record with `n` pending origin steps.
fn make_unsigned_record(n: usize) -> Record {
    let mut record = Record::new(TRUST_FRAMEWORK);
    for i in 0..n {
        record
            .add_step(json!({
                "type": "origin",
                "scheme": SCHEME,
                "sourceType": format!("{SCHEME}/source-type/Meter"),
                "origin": format!("https://meter-{i}.example.com/"),
                "external": false,
                "supply:assurance": {"missingData": format!("{SCHEME}/assurance/missing-data/Missing")},
            }))
            .expect("bench fixture step is valid");
    }
    record
}

fn bench_sign(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let issuer = SigningKey::from_bytes(&[99; 32]);
    let signer = make_signer(&issuer);

    let mut group = c.benchmark_group("sign");
    for &n in &[1usize, 10, 50] {
        let template = make_unsigned_record(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let mut record = template.clone();
                rt.block_on(record.sign(&signer)).expect("sign succeeds");
                black_box(record)
            });
        });
    }
    group.finish();
}

fn bench_verify(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let issuer = SigningKey::from_bytes(&[99; 32]);
    let signer = make_signer(&issuer);
    let resolver = SelfContainedResolver::new(issuer.verifying_key());

    let mut group = c.benchmark_group("verify");
    for &n in &[1usize, 10, 50] {
        let mut record = make_unsigned_record(n);
        rt.block_on(record.sign(&signer)).expect("sign succeeds");

        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &record, |b, record| {
            b.iter(|| {
                let reports = rt.block_on(record.verify(&resolver)).expect("verifies");
                black_box(reports)
            });
        });
    }
    group.finish();
}

fn bench_verify_cached_resolver(c: &mut Criterion) {
    let rt = Runtime::new().expect("tokio runtime");
    let issuer = SigningKey::from_bytes(&[99; 32]);
    let signer = make_signer(&issuer);
    let resolver = CachedResolver::new(SelfContainedResolver::new(issuer.verifying_key()));

    let mut group = c.benchmark_group("verify_cached");
    for &n in &[1usize, 10, 50] {
        let mut record = make_unsigned_record(n);
        rt.block_on(record.sign(&signer)).expect("sign succeeds");
        // Warm the resolution cache.
        rt.block_on(record.verify(&resolver)).expect("verifies");

        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &record, |b, record| {
            b.iter(|| {
                let reports = rt.block_on(record.verify(&resolver)).expect("verifies");
                black_box(reports)
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_sign,
    bench_verify,
    bench_verify_cached_resolver
);
criterion_main!(benches);
