//! Service tests against a real SQLite ledger and a temporary blob area.

use std::sync::Arc;

use earmark_protocol::invariants::{assert_all, assert_released_has_verified_proof};
use earmark_protocol::{content_hash, EntryKind, Error, FeeRate, LedgerEvent, ProofStatus};
use rust_decimal::Decimal;
use tempfile::TempDir;

use crate::blobs::BlobStore;
use crate::db::{self, Pools};
use crate::errors::LedgerError;
use crate::service::LedgerService;

pub(crate) struct Harness {
    pub service: Arc<LedgerService>,
    pub pools: Pools,
    pub blob_dir: std::path::PathBuf,
    _dir: TempDir,
}

pub(crate) async fn harness() -> Harness {
    harness_at("sqlite::memory:", tempfile::tempdir().unwrap()).await
}

async fn harness_at(url: &str, dir: TempDir) -> Harness {
    let pools = db::init_pool(url).await.unwrap();
    let blob_dir = dir.path().join("blobs");
    let blobs = BlobStore::open(&blob_dir).await.unwrap();
    let service = LedgerService::new(pools.clone(), blobs, FeeRate::default());
    Harness {
        service,
        pools,
        blob_dir,
        _dir: dir,
    }
}

fn amount(units: i64) -> Decimal {
    Decimal::new(units, 0)
}

impl Harness {
    async fn kinds_for(&self, id: i64) -> Vec<EntryKind> {
        self.service
            .beneficiary_ledger(id)
            .await
            .unwrap()
            .iter()
            .map(|e| e.event.kind())
            .collect()
    }

    /// Check the cross-record rules over the whole store.
    async fn check(&self) {
        let beneficiaries = self.service.list_beneficiaries().await.unwrap();
        let ledger = self.service.list_ledger().await.unwrap();
        let proofs = self.service.list_proofs().await.unwrap();
        assert_all(&beneficiaries, &ledger);
        for b in &beneficiaries {
            let statuses: Vec<ProofStatus> = proofs
                .iter()
                .filter(|p| p.beneficiary_id == b.id)
                .map(|p| p.status)
                .collect();
            assert_released_has_verified_proof(b, &statuses);
        }
    }
}

fn protocol_error(err: LedgerError) -> Error {
    match err {
        LedgerError::Protocol(e) => e,
        other => panic!("expected a protocol error, got {other}"),
    }
}

// ─────────────────────────────────────────────────────────
// Lifecycle scenarios
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn funded_and_verified_beneficiary_is_released() {
    let h = harness().await;
    let s = &h.service;
    let b = s.add_beneficiary("Cindy Lee", amount(1000), "").await.unwrap();

    s.donate(b.id, amount(1000)).await.unwrap();
    assert!(!s.get_beneficiary(b.id).await.unwrap().released);

    let p = s.submit_proof(b.id, "invoice.pdf", b"school invoice").await.unwrap();
    assert_eq!(p.status, ProofStatus::Reviewing);
    assert!(!s.get_beneficiary(b.id).await.unwrap().released);

    let verified = s.verify_proof(&p.hash).await.unwrap();
    assert_eq!(verified.status, ProofStatus::Verified);
    assert!(verified.decided_at.is_some());

    let b = s.get_beneficiary(b.id).await.unwrap();
    assert!(b.released);
    assert!(b.admin_charged);
    assert_eq!(b.doc_hash.as_deref(), Some(p.hash.as_str()));
    assert_eq!(
        h.kinds_for(b.id).await,
        vec![
            EntryKind::Donation,
            EntryKind::ProofUpload,
            EntryKind::ProofVerified,
            EntryKind::AdminFee,
            EntryKind::Release,
        ]
    );

    let ledger = s.list_ledger().await.unwrap();
    match &ledger[3].event {
        LedgerEvent::AdminFee {
            admin_fee,
            student_amount,
            ..
        } => {
            assert_eq!(*admin_fee, Decimal::new(5000, 2));
            assert_eq!(*student_amount, Decimal::new(95000, 2));
        }
        other => panic!("expected admin_fee, got {other:?}"),
    }
    match &ledger[4].event {
        LedgerEvent::Release {
            amount_released, ..
        } => assert_eq!(*amount_released, amount(1000)),
        other => panic!("expected release, got {other:?}"),
    }
    h.check().await;
}

#[tokio::test]
async fn funded_without_proof_is_not_released() {
    let h = harness().await;
    let s = &h.service;
    let b = s.add_beneficiary("Ben Wong", amount(1000), "").await.unwrap();

    s.donate(b.id, amount(400)).await.unwrap();
    s.donate(b.id, amount(600)).await.unwrap();
    assert!(s.evaluate_release(b.id).await.unwrap().is_empty());

    let b = s.get_beneficiary(b.id).await.unwrap();
    assert!(b.is_fully_funded());
    assert!(!b.released);
    assert_eq!(
        h.kinds_for(b.id).await,
        vec![EntryKind::Donation, EntryKind::Donation]
    );
    h.check().await;
}

#[tokio::test]
async fn second_proof_is_refused_while_first_is_active() {
    let h = harness().await;
    let s = &h.service;
    let b = s.add_beneficiary("Alice Chan", amount(2000), "").await.unwrap();
    s.donate(b.id, amount(2000)).await.unwrap();
    s.submit_proof(b.id, "first.pdf", b"first").await.unwrap();

    let before = s.list_ledger().await.unwrap().len();
    let err = s.submit_proof(b.id, "second.pdf", b"second").await.unwrap_err();

    assert!(matches!(protocol_error(err), Error::PreconditionFailed(_)));
    assert_eq!(s.list_ledger().await.unwrap().len(), before);
    assert_eq!(s.list_proofs().await.unwrap().len(), 1);
    h.check().await;
}

#[tokio::test]
async fn invalid_donations_change_nothing() {
    let h = harness().await;
    let s = &h.service;
    let b = s.add_beneficiary("Ben Wong", amount(1500), "").await.unwrap();
    s.donate(b.id, amount(100)).await.unwrap();

    for bad in [amount(-5), Decimal::ZERO, Decimal::new(1001, 3)] {
        let err = s.donate(b.id, bad).await.unwrap_err();
        assert!(matches!(protocol_error(err), Error::Validation(_)));
    }

    assert_eq!(s.get_beneficiary(b.id).await.unwrap().received, amount(100));
    assert_eq!(s.list_ledger().await.unwrap().len(), 1);
}

#[tokio::test]
async fn donation_to_unknown_beneficiary_is_not_found() {
    let h = harness().await;
    let err = h.service.donate(42, amount(10)).await.unwrap_err();
    assert!(matches!(protocol_error(err), Error::NotFound(_)));
}

#[tokio::test]
async fn donation_after_full_funding_is_refused() {
    let h = harness().await;
    let s = &h.service;
    let b = s.add_beneficiary("Cindy Lee", amount(1000), "").await.unwrap();
    s.donate(b.id, amount(1200)).await.unwrap();

    // Overfunding is kept as received.
    assert_eq!(s.get_beneficiary(b.id).await.unwrap().received, amount(1200));

    let err = s.donate(b.id, amount(1)).await.unwrap_err();
    assert!(matches!(protocol_error(err), Error::PreconditionFailed(_)));
}

#[tokio::test]
async fn proof_before_full_funding_is_refused() {
    let h = harness().await;
    let s = &h.service;
    let b = s.add_beneficiary("Ben Wong", amount(1500), "").await.unwrap();
    s.donate(b.id, amount(1499)).await.unwrap();

    let err = s.submit_proof(b.id, "early.pdf", b"early").await.unwrap_err();
    assert!(matches!(protocol_error(err), Error::PreconditionFailed(_)));
    assert!(s.list_proofs().await.unwrap().is_empty());
    assert_eq!(std::fs::read_dir(&h.blob_dir).unwrap().count(), 0);
}

#[tokio::test]
async fn empty_name_is_refused() {
    let h = harness().await;
    let err = h
        .service
        .add_beneficiary("   ", amount(10), "")
        .await
        .unwrap_err();
    assert!(matches!(protocol_error(err), Error::Validation(_)));
    assert!(h.service.list_beneficiaries().await.unwrap().is_empty());
}

// ─────────────────────────────────────────────────────────
// Release engine
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn release_evaluation_is_idempotent() {
    let h = harness().await;
    let s = &h.service;
    let b = s.add_beneficiary("Cindy Lee", amount(1000), "").await.unwrap();
    s.donate(b.id, amount(1000)).await.unwrap();
    let p = s.submit_proof(b.id, "proof.pdf", b"proof").await.unwrap();
    s.verify_proof(&p.hash).await.unwrap();

    let before = s.list_ledger().await.unwrap();
    for _ in 0..3 {
        assert!(s.evaluate_release(b.id).await.unwrap().is_empty());
    }
    assert_eq!(s.list_ledger().await.unwrap(), before);

    let err = s.verify_proof(&p.hash).await.unwrap_err();
    assert!(matches!(
        protocol_error(err),
        Error::InvalidState {
            from: ProofStatus::Verified,
            ..
        }
    ));
    h.check().await;
}

#[tokio::test]
async fn release_notice_is_published_after_commit() {
    let h = harness().await;
    let s = &h.service;
    let mut notices = s.subscribe();
    let b = s.add_beneficiary("Alice Chan", amount(2000), "").await.unwrap();
    s.donate(b.id, amount(2000)).await.unwrap();
    assert!(notices.try_recv().is_err());

    let p = s.submit_proof(b.id, "proof.pdf", b"alice").await.unwrap();
    s.verify_proof(&p.hash).await.unwrap();

    let notice = notices.try_recv().unwrap();
    assert_eq!(notice.beneficiary_id, b.id);
    assert_eq!(notice.beneficiary_name, "Alice Chan");
    assert_eq!(notice.amount_released, amount(2000));
    assert_eq!(notice.admin_fee, Some(Decimal::new(10000, 2)));
    assert!(notices.try_recv().is_err());
}

#[tokio::test]
async fn storage_failure_during_release_rolls_back_verification() {
    let h = harness().await;
    let s = &h.service;
    let b = s.add_beneficiary("Cindy Lee", amount(1000), "").await.unwrap();
    s.donate(b.id, amount(1000)).await.unwrap();
    let p = s.submit_proof(b.id, "proof.pdf", b"proof").await.unwrap();

    sqlx::query(
        "CREATE TRIGGER fail_release BEFORE INSERT ON ledger_entries \
         WHEN NEW.kind = 'release' BEGIN SELECT RAISE(ABORT, 'disk full'); END",
    )
    .execute(&h.pools.writer)
    .await
    .unwrap();

    let err = s.verify_proof(&p.hash).await.unwrap_err();
    assert!(err.is_storage(), "unexpected error: {err}");

    // Nothing from the failed transaction is visible.
    assert_eq!(s.get_proof(&p.hash).await.unwrap().status, ProofStatus::Reviewing);
    let after = s.get_beneficiary(b.id).await.unwrap();
    assert!(!after.admin_charged);
    assert!(!after.released);
    assert_eq!(after.doc_hash, None);
    assert_eq!(
        h.kinds_for(b.id).await,
        vec![EntryKind::Donation, EntryKind::ProofUpload]
    );

    // Once storage recovers, the same verification goes through.
    sqlx::query("DROP TRIGGER fail_release")
        .execute(&h.pools.writer)
        .await
        .unwrap();
    s.verify_proof(&p.hash).await.unwrap();
    assert!(s.get_beneficiary(b.id).await.unwrap().released);
    h.check().await;
}

#[tokio::test]
async fn ledger_rows_cannot_be_rewritten() {
    let h = harness().await;
    let s = &h.service;
    let b = s.add_beneficiary("Ben Wong", amount(100), "").await.unwrap();
    s.donate(b.id, amount(50)).await.unwrap();

    let update = sqlx::query("UPDATE ledger_entries SET gross = '1'")
        .execute(&h.pools.writer)
        .await;
    assert!(update.is_err());
    let delete = sqlx::query("DELETE FROM ledger_entries")
        .execute(&h.pools.writer)
        .await;
    assert!(delete.is_err());
    assert_eq!(s.list_ledger().await.unwrap().len(), 1);
}

// ─────────────────────────────────────────────────────────
// Proof lifecycle
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn proof_bytes_round_trip_through_the_blob_area() {
    let h = harness().await;
    let s = &h.service;
    let b = s.add_beneficiary("Cindy Lee", amount(10), "").await.unwrap();
    s.donate(b.id, amount(10)).await.unwrap();

    let bytes = b"%PDF-1.4 enrolment letter".to_vec();
    let p = s.submit_proof(b.id, "letter.pdf", &bytes).await.unwrap();

    assert_eq!(p.hash, content_hash(&bytes));
    assert_eq!(std::fs::read(h.blob_dir.join(&p.hash)).unwrap(), bytes);
    assert!(s.verify_blob(&p.hash).await.unwrap());

    std::fs::write(h.blob_dir.join(&p.hash), b"altered").unwrap();
    assert!(!s.verify_blob(&p.hash).await.unwrap());
}

#[tokio::test]
async fn rejected_proof_allows_a_new_submission() {
    let h = harness().await;
    let s = &h.service;
    let b = s.add_beneficiary("Ben Wong", amount(500), "").await.unwrap();
    s.donate(b.id, amount(500)).await.unwrap();

    let first = s.submit_proof(b.id, "blurry.jpg", b"blurry").await.unwrap();
    let rejected = s.reject_proof(&first.hash).await.unwrap();
    assert_eq!(rejected.status, ProofStatus::Rejected);
    assert!(!s.get_beneficiary(b.id).await.unwrap().released);

    // The same bytes are already on record.
    let err = s.submit_proof(b.id, "blurry.jpg", b"blurry").await.unwrap_err();
    assert!(matches!(protocol_error(err), Error::PreconditionFailed(_)));

    let err = s.verify_proof(&first.hash).await.unwrap_err();
    assert!(matches!(protocol_error(err), Error::InvalidState { .. }));

    let second = s.submit_proof(b.id, "sharp.jpg", b"sharp").await.unwrap();
    s.verify_proof(&second.hash).await.unwrap();

    assert!(s.get_beneficiary(b.id).await.unwrap().released);
    assert_eq!(
        h.kinds_for(b.id).await,
        vec![
            EntryKind::Donation,
            EntryKind::ProofUpload,
            EntryKind::ProofRejected,
            EntryKind::ProofUpload,
            EntryKind::ProofVerified,
            EntryKind::AdminFee,
            EntryKind::Release,
        ]
    );
    h.check().await;
}

#[tokio::test]
async fn unknown_proof_is_not_found() {
    let h = harness().await;
    let err = h.service.verify_proof(&"0".repeat(64)).await.unwrap_err();
    assert!(matches!(protocol_error(err), Error::NotFound(_)));
}

// ─────────────────────────────────────────────────────────
// Concurrency and persistence
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_donations_are_all_counted() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("ledger.db").display());
    let h = harness_at(&url, dir).await;
    let b = h
        .service
        .add_beneficiary("Alice Chan", amount(2000), "")
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let service = h.service.clone();
        tasks.push(tokio::spawn(async move {
            service.donate(b.id, amount(10)).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let b = h.service.get_beneficiary(b.id).await.unwrap();
    assert_eq!(b.received, amount(200));
    let ledger = h.service.list_ledger().await.unwrap();
    assert_eq!(ledger.len(), 20);
    h.check().await;
}

#[tokio::test]
async fn ledger_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("ledger.db").display());

    let pools = db::init_pool(&url).await.unwrap();
    let blobs = BlobStore::open(dir.path().join("blobs")).await.unwrap();
    let service = LedgerService::new(pools.clone(), blobs.clone(), FeeRate::default());
    let b = service
        .add_beneficiary("Ben Wong", amount(1500), "")
        .await
        .unwrap();
    service.donate(b.id, amount(700)).await.unwrap();
    drop(service);
    pools.reader.close().await;
    pools.writer.close().await;

    let pools = db::init_pool(&url).await.unwrap();
    let service = LedgerService::new(pools, blobs, FeeRate::default());
    assert_eq!(service.get_beneficiary(b.id).await.unwrap().received, amount(700));
    assert_eq!(service.list_ledger().await.unwrap().len(), 1);
}

// ─────────────────────────────────────────────────────────
// Reads
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn seeding_only_fills_an_empty_registry() {
    let h = harness().await;
    assert_eq!(h.service.seed_demo_if_empty().await.unwrap(), 3);
    assert_eq!(h.service.seed_demo_if_empty().await.unwrap(), 0);

    let names: Vec<String> = h
        .service
        .list_beneficiaries()
        .await
        .unwrap()
        .into_iter()
        .map(|b| b.name)
        .collect();
    assert_eq!(names, ["Alice Chan", "Ben Wong", "Cindy Lee"]);
}

#[tokio::test]
async fn summary_reflects_the_store() {
    let h = harness().await;
    let s = &h.service;
    h.service.seed_demo_if_empty().await.unwrap();
    let cindy = 3;
    s.donate(cindy, amount(1000)).await.unwrap();
    s.donate(2, amount(500)).await.unwrap();
    let p = s.submit_proof(cindy, "proof.pdf", b"cindy").await.unwrap();
    s.verify_proof(&p.hash).await.unwrap();

    let summary = s.summary().await.unwrap();
    assert_eq!(summary.beneficiaries, 3);
    assert_eq!(summary.fully_funded, 1);
    assert_eq!(summary.released, 1);
    assert_eq!(summary.total_need, amount(4500));
    assert_eq!(summary.total_received, amount(1500));
    assert_eq!(summary.released_total, amount(1000));
    assert_eq!(summary.remaining, amount(3000));
    assert_eq!(summary.admin_fee_collected, amount(50));
}

#[tokio::test]
async fn csv_export_has_one_row_per_entry() {
    let h = harness().await;
    let s = &h.service;
    let b = s.add_beneficiary("Cindy Lee", amount(1000), "").await.unwrap();
    s.donate(b.id, amount(1000)).await.unwrap();
    let p = s.submit_proof(b.id, "proof, final.pdf", b"cindy").await.unwrap();
    s.verify_proof(&p.hash).await.unwrap();

    let csv = String::from_utf8(s.export_ledger_csv().await.unwrap()).unwrap();
    let lines: Vec<&str> = csv.split("\r\n").filter(|l| !l.is_empty()).collect();
    assert_eq!(lines.len(), 6);
    assert_eq!(lines[0], crate::export::CSV_HEADER.join(","));

    let kinds: Vec<&str> = lines[1..]
        .iter()
        .map(|l| l.split(',').nth(1).unwrap())
        .collect();
    assert_eq!(
        kinds,
        ["donation", "proof_upload", "proof_verified", "admin_fee", "release"]
    );
    assert!(lines[2].contains("\"proof, final.pdf\""));
    assert!(lines[4].ends_with(",Cindy Lee,,50.00,950.00,,,"));
    assert!(lines[5].ends_with(",Cindy Lee,,,,,,1000.00"));
}

// ─────────────────────────────────────────────────────────
// Amount limits and resource bounds
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn amounts_beyond_the_cap_are_validation_errors() {
    let h = harness().await;
    let s = &h.service;

    let err = s.add_beneficiary("Max", Decimal::MAX, "").await.unwrap_err();
    assert!(matches!(protocol_error(err), Error::Validation(_)));

    let b = s
        .add_beneficiary("Max", earmark_protocol::MAX_AMOUNT, "")
        .await
        .unwrap();
    s.donate(b.id, amount(1)).await.unwrap();
    let err = s.donate(b.id, Decimal::MAX).await.unwrap_err();
    assert!(matches!(protocol_error(err), Error::Validation(_)));

    assert_eq!(s.get_beneficiary(b.id).await.unwrap().received, amount(1));
    assert_eq!(s.list_ledger().await.unwrap().len(), 1);
}

#[tokio::test]
async fn summary_over_out_of_range_rows_is_a_storage_error() {
    let h = harness().await;
    for name in ["A", "B"] {
        db::insert_beneficiary(&h.pools.writer, name, "", Decimal::MAX, db::now())
            .await
            .unwrap();
    }

    let err = h.service.summary().await.unwrap_err();
    assert!(err.is_storage(), "unexpected error: {err}");
}

#[tokio::test]
async fn unknown_ids_leave_no_lock_slots_behind() {
    let h = harness().await;
    for id in 1_000..1_200 {
        let err = h.service.donate(id, amount(5)).await.unwrap_err();
        assert!(matches!(protocol_error(err), Error::NotFound(_)));
        assert!(h.service.evaluate_release(id).await.is_err());
    }
    assert_eq!(h.service.lock_slots(), 0);
}
