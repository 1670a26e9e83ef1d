//! # Earmark Protocol
//!
//! Rules for donations earmarked to individual beneficiaries. Funds become
//! releasable only when two independent conditions hold: the beneficiary is
//! fully funded, and a proof-of-need document has been verified. A one-time
//! service fee is charged at the moment of release.
//!
//! | Phase        | Entry Point(s)                                   |
//! |--------------|--------------------------------------------------|
//! | Registration | [`new_beneficiary`]                              |
//! | Funding      | [`donation::apply_donation`]                     |
//! | Proof        | [`proof::ensure_can_submit`], [`proof::transition`] |
//! | Release      | [`release::evaluate`]                            |
//!
//! ## Architecture
//!
//! This crate performs no I/O. Every operation takes the current snapshot,
//! mutates it in place, and returns the [`LedgerEvent`]s the caller must
//! append. The caller is responsible for persisting the snapshot and the
//! events inside one transaction, serialised per beneficiary.

use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

pub mod donation;
pub mod fee;
pub mod proof;
pub mod release;
mod types;

#[cfg(any(test, feature = "testutils"))]
pub mod invariants;


pub use fee::{FeeRate, FeeSplit};
pub use release::ReleaseOutcome;
pub use types::{
    Beneficiary, BeneficiaryId, EntryColumns, EntryKind, LedgerEntry, LedgerEvent, Proof,
    ProofStatus, Timestamp,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Bad input, rejected before any mutation.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A business rule forbids the operation in the current state.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("invalid state: proof {hash} is {from}, cannot become {to}")]
    InvalidState {
        hash: String,
        from: ProofStatus,
        to: ProofStatus,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Lowercase hex SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Largest accepted `need` or donation amount (one trillion).
///
/// Keeps every snapshot and summary total far below `Decimal::MAX`.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(3_567_587_328, 232, 0, false, 0);

/// Reject non-positive amounts, amounts above [`MAX_AMOUNT`], and amounts
/// finer than a cent.
pub fn validate_amount(field: &str, amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(Error::Validation(format!(
            "{field} must be positive, got {amount}"
        )));
    }
    if amount > MAX_AMOUNT {
        return Err(Error::Validation(format!(
            "{field} must not exceed {MAX_AMOUNT}, got {amount}"
        )));
    }
    if amount.normalize().scale() > fee::MONEY_SCALE {
        return Err(Error::Validation(format!(
            "{field} must not have more than {} decimal places, got {amount}",
            fee::MONEY_SCALE
        )));
    }
    Ok(())
}

/// Build a fresh beneficiary snapshot. `id` is assigned by the registry.
pub fn new_beneficiary(
    id: BeneficiaryId,
    name: &str,
    story: &str,
    need: Decimal,
    now: Timestamp,
) -> Result<Beneficiary> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::Validation("name must not be empty".to_string()));
    }
    validate_amount("need", need)?;

    Ok(Beneficiary {
        id,
        name: name.to_string(),
        story: story.trim().to_string(),
        need,
        received: Decimal::ZERO,
        released: false,
        admin_charged: false,
        doc_hash: None,
        created_at: now,
    })
}
