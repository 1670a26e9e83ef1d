//! Assertion helpers over beneficiary snapshots and the ledger history.
//!
//! Available to this crate's tests and, through the `testutils` feature, to
//! downstream crates that persist the protocol.

#![allow(dead_code)]

use rust_decimal::Decimal;

use crate::{Beneficiary, EntryKind, LedgerEntry, ProofStatus};

fn count_kind(ledger: &[LedgerEntry], beneficiary_id: i64, kind: EntryKind) -> usize {
    ledger
        .iter()
        .filter(|e| e.event.beneficiary_id() == beneficiary_id && e.event.kind() == kind)
        .count()
}

/// `received` never decreases.
pub fn assert_received_monotonic(before: Decimal, after: Decimal) {
    assert!(
        after >= before,
        "received decreased from {before} to {after}"
    );
}

/// `released` implies `admin_charged`.
pub fn assert_flags_consistent(b: &Beneficiary) {
    assert!(
        !b.released || b.admin_charged,
        "beneficiary {} released without the fee being charged",
        b.id
    );
}

/// Exactly one `admin_fee` entry when `admin_charged`, none otherwise.
pub fn assert_fee_charged_once(b: &Beneficiary, ledger: &[LedgerEntry]) {
    let fees = count_kind(ledger, b.id, EntryKind::AdminFee);
    assert_eq!(
        fees,
        usize::from(b.admin_charged),
        "beneficiary {} has {fees} admin_fee entries but admin_charged = {}",
        b.id,
        b.admin_charged
    );
}

/// Exactly one `release` entry when `released`, none otherwise.
pub fn assert_released_once(b: &Beneficiary, ledger: &[LedgerEntry]) {
    let releases = count_kind(ledger, b.id, EntryKind::Release);
    assert_eq!(
        releases,
        usize::from(b.released),
        "beneficiary {} has {releases} release entries but released = {}",
        b.id,
        b.released
    );
}

/// Every `release` is preceded by a `proof_verified` for the same beneficiary.
pub fn assert_release_follows_verification(ledger: &[LedgerEntry]) {
    for release in ledger.iter().filter(|e| e.event.kind() == EntryKind::Release) {
        let owner = release.event.beneficiary_id();
        let verified_before = ledger.iter().any(|e| {
            e.seq < release.seq
                && e.event.beneficiary_id() == owner
                && e.event.kind() == EntryKind::ProofVerified
        });
        assert!(
            verified_before,
            "release #{} for beneficiary {owner} has no earlier proof_verified entry",
            release.seq
        );
    }
}

/// A released beneficiary owns a verified proof.
pub fn assert_released_has_verified_proof(b: &Beneficiary, statuses: &[ProofStatus]) {
    if b.released {
        assert!(
            statuses.contains(&ProofStatus::Verified),
            "beneficiary {} released without a verified proof",
            b.id
        );
    }
}

/// Sequence ids strictly increase in append order.
pub fn assert_ledger_ordered(ledger: &[LedgerEntry]) {
    for pair in ledger.windows(2) {
        assert!(
            pair[0].seq < pair[1].seq,
            "ledger out of order: #{} before #{}",
            pair[0].seq,
            pair[1].seq
        );
    }
}

/// `received` equals the sum of this beneficiary's donation entries.
pub fn assert_received_matches_donations(b: &Beneficiary, ledger: &[LedgerEntry]) {
    let donated: Decimal = ledger
        .iter()
        .filter_map(|e| match &e.event {
            crate::LedgerEvent::Donation {
                beneficiary_id,
                gross,
                ..
            } if *beneficiary_id == b.id => Some(*gross),
            _ => None,
        })
        .sum();
    assert_eq!(
        b.received, donated,
        "beneficiary {} received {} but donations sum to {donated}",
        b.id, b.received
    );
}

/// Run every snapshot/ledger invariant.
pub fn assert_all(beneficiaries: &[Beneficiary], ledger: &[LedgerEntry]) {
    assert_ledger_ordered(ledger);
    assert_release_follows_verification(ledger);
    for b in beneficiaries {
        assert_flags_consistent(b);
        assert_fee_charged_once(b, ledger);
        assert_released_once(b, ledger);
        assert_received_matches_donations(b, ledger);
    }
}
