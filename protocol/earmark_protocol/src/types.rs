//! # Types
//!
//! Shared data structures used across the earmark protocol and the backend
//! that persists it.
//!
//! ## Design decisions
//!
//! ### Beneficiary snapshot
//!
//! A [`Beneficiary`] is the current, mutable view of one earmarked target.
//! `need` is fixed at creation. `received` only grows. `released` and
//! `admin_charged` are one-way flags, and `released` implies `admin_charged`.
//!
//! ### Proof status as a finite-state machine
//!
//! [`ProofStatus`] enforces a strict forward-only lifecycle:
//!
//! ```text
//! Submitted ──► Reviewing ──► Verified
//!                   └───────► Rejected
//! ```
//!
//! `Verified` and `Rejected` are terminal.
//!
//! ### Ledger events as a sum type
//!
//! Every [`LedgerEvent`] variant carries only the fields meaningful for its
//! kind. The flat column layout used for storage and CSV export is a
//! projection of the variant, never the other way round.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::Error;

pub type BeneficiaryId = i64;

/// Unix timestamp in seconds.
pub type Timestamp = i64;

/// Current state of a beneficiary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beneficiary {
    /// Unique identifier (auto-incremented by the registry).
    pub id: BeneficiaryId,
    pub name: String,
    /// One-line story shown to donors.
    pub story: String,
    /// Funding target. Immutable after creation.
    pub need: Decimal,
    /// Sum of every applied donation. Never decremented.
    pub received: Decimal,
    /// Funds have been disbursed.
    pub released: bool,
    /// The one-time service fee has been charged.
    pub admin_charged: bool,
    /// Content hash of the verified proof, once accepted.
    pub doc_hash: Option<String>,
    pub created_at: Timestamp,
}

impl Beneficiary {
    pub fn is_fully_funded(&self) -> bool {
        self.received >= self.need
    }

    /// Amount still missing towards `need`, never negative.
    pub fn remaining(&self) -> Decimal {
        (self.need - self.received).max(Decimal::ZERO)
    }

    /// `received` capped at `need`, as shown on progress displays.
    pub fn received_capped(&self) -> Decimal {
        self.received.min(self.need)
    }
}

/// Lifecycle status of a proof-of-need submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofStatus {
    /// Received, not yet queued for review.
    Submitted,
    /// Awaiting a reviewer decision.
    Reviewing,
    /// Accepted; unlocks release.
    Verified,
    /// Declined. The beneficiary may submit again.
    Rejected,
}

impl ProofStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Reviewing => "reviewing",
            Self::Verified => "verified",
            Self::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Verified | Self::Rejected)
    }

    /// Whether moving from `self` to `to` is a legal edge.
    pub fn can_transition_to(&self, to: ProofStatus) -> bool {
        matches!(
            (self, to),
            (Self::Submitted, Self::Reviewing)
                | (Self::Reviewing, Self::Verified)
                | (Self::Reviewing, Self::Rejected)
        )
    }
}

impl fmt::Display for ProofStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProofStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submitted" => Ok(Self::Submitted),
            "reviewing" => Ok(Self::Reviewing),
            "verified" => Ok(Self::Verified),
            "rejected" => Ok(Self::Rejected),
            other => Err(Error::Validation(format!("unknown proof status `{other}`"))),
        }
    }
}

/// A proof-of-need document attached to a beneficiary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub id: i64,
    pub beneficiary_id: BeneficiaryId,
    pub filename: String,
    /// Lowercase hex SHA-256 of the raw bytes. Identity key for the proof.
    pub hash: String,
    pub status: ProofStatus,
    /// Location of the content-addressed blob.
    pub storage_path: String,
    pub submitted_at: Timestamp,
    /// When the proof reached a terminal status.
    pub decided_at: Option<Timestamp>,
}

impl Proof {
    /// Counts towards the one-proof-per-beneficiary rule.
    pub fn is_active(&self) -> bool {
        self.status != ProofStatus::Rejected
    }
}

/// Storage/export identifier of a ledger entry kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Donation,
    ProofUpload,
    ProofVerified,
    ProofRejected,
    AdminFee,
    Release,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Donation => "donation",
            Self::ProofUpload => "proof_upload",
            Self::ProofVerified => "proof_verified",
            Self::ProofRejected => "proof_rejected",
            Self::AdminFee => "admin_fee",
            Self::Release => "release",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "donation" => Ok(Self::Donation),
            "proof_upload" => Ok(Self::ProofUpload),
            "proof_verified" => Ok(Self::ProofVerified),
            "proof_rejected" => Ok(Self::ProofRejected),
            "admin_fee" => Ok(Self::AdminFee),
            "release" => Ok(Self::Release),
            other => Err(Error::Validation(format!("unknown ledger kind `{other}`"))),
        }
    }
}

/// Payload of a ledger entry, one variant per kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    Donation {
        beneficiary_id: BeneficiaryId,
        beneficiary_name: String,
        gross: Decimal,
    },
    ProofUpload {
        beneficiary_id: BeneficiaryId,
        beneficiary_name: String,
        filename: String,
        file_hash: String,
    },
    ProofVerified {
        beneficiary_id: BeneficiaryId,
        beneficiary_name: String,
        filename: String,
        file_hash: String,
    },
    ProofRejected {
        beneficiary_id: BeneficiaryId,
        beneficiary_name: String,
        filename: String,
        file_hash: String,
    },
    AdminFee {
        beneficiary_id: BeneficiaryId,
        beneficiary_name: String,
        admin_fee: Decimal,
        student_amount: Decimal,
    },
    Release {
        beneficiary_id: BeneficiaryId,
        beneficiary_name: String,
        amount_released: Decimal,
    },
}

impl LedgerEvent {
    pub fn kind(&self) -> EntryKind {
        match self {
            Self::Donation { .. } => EntryKind::Donation,
            Self::ProofUpload { .. } => EntryKind::ProofUpload,
            Self::ProofVerified { .. } => EntryKind::ProofVerified,
            Self::ProofRejected { .. } => EntryKind::ProofRejected,
            Self::AdminFee { .. } => EntryKind::AdminFee,
            Self::Release { .. } => EntryKind::Release,
        }
    }

    pub fn beneficiary_id(&self) -> BeneficiaryId {
        match self {
            Self::Donation { beneficiary_id, .. }
            | Self::ProofUpload { beneficiary_id, .. }
            | Self::ProofVerified { beneficiary_id, .. }
            | Self::ProofRejected { beneficiary_id, .. }
            | Self::AdminFee { beneficiary_id, .. }
            | Self::Release { beneficiary_id, .. } => *beneficiary_id,
        }
    }

    pub fn beneficiary_name(&self) -> &str {
        match self {
            Self::Donation { beneficiary_name, .. }
            | Self::ProofUpload { beneficiary_name, .. }
            | Self::ProofVerified { beneficiary_name, .. }
            | Self::ProofRejected { beneficiary_name, .. }
            | Self::AdminFee { beneficiary_name, .. }
            | Self::Release { beneficiary_name, .. } => beneficiary_name,
        }
    }

    /// Flat column view used by storage and CSV export.
    pub fn columns(&self) -> EntryColumns<'_> {
        let mut cols = EntryColumns::default();
        match self {
            Self::Donation { gross, .. } => cols.gross = Some(*gross),
            Self::ProofUpload { filename, file_hash, .. }
            | Self::ProofVerified { filename, file_hash, .. }
            | Self::ProofRejected { filename, file_hash, .. } => {
                cols.filename = Some(filename);
                cols.file_hash = Some(file_hash);
            }
            Self::AdminFee { admin_fee, student_amount, .. } => {
                cols.admin_fee = Some(*admin_fee);
                cols.student_amount = Some(*student_amount);
            }
            Self::Release { amount_released, .. } => {
                cols.amount_released = Some(*amount_released)
            }
        }
        cols
    }
}

/// Kind-specific columns of a ledger entry; `None` where not applicable.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntryColumns<'a> {
    pub gross: Option<Decimal>,
    pub admin_fee: Option<Decimal>,
    pub student_amount: Option<Decimal>,
    pub filename: Option<&'a str>,
    pub file_hash: Option<&'a str>,
    pub amount_released: Option<Decimal>,
}

/// An appended, immutable ledger entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Monotonic sequence id assigned by the store.
    pub seq: i64,
    pub time: Timestamp,
    #[serde(flatten)]
    pub event: LedgerEvent,
}
