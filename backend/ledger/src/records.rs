//! Row shapes as stored in / read from SQLite, and their conversion into
//! protocol types.
//!
//! Amounts are stored as decimal strings. Ledger rows are flat; decoding
//! rebuilds the tagged [`LedgerEvent`] and refuses rows whose kind-specific
//! columns are missing.

use std::str::FromStr;

use earmark_protocol::{Beneficiary, EntryKind, LedgerEntry, LedgerEvent, Proof, ProofStatus};
use rust_decimal::Decimal;

use crate::errors::LedgerError;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BeneficiaryRow {
    pub id: i64,
    pub name: String,
    pub story: String,
    pub need: String,
    pub received: String,
    pub released: bool,
    pub admin_charged: bool,
    pub doc_hash: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProofRow {
    pub id: i64,
    pub beneficiary_id: i64,
    pub filename: String,
    pub hash: String,
    pub status: String,
    pub storage_path: String,
    pub submitted_at: i64,
    pub decided_at: Option<i64>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LedgerRow {
    pub id: i64,
    pub created_at: i64,
    pub kind: String,
    pub beneficiary_id: i64,
    pub beneficiary_name: String,
    pub gross: Option<String>,
    pub admin_fee: Option<String>,
    pub student_amount: Option<String>,
    pub filename: Option<String>,
    pub file_hash: Option<String>,
    pub amount_released: Option<String>,
}

fn decimal(raw: &str, column: &str) -> Result<Decimal, LedgerError> {
    Decimal::from_str(raw)
        .map_err(|e| LedgerError::Corrupt(format!("column `{column}` = {raw:?}: {e}")))
}

impl TryFrom<BeneficiaryRow> for Beneficiary {
    type Error = LedgerError;

    fn try_from(row: BeneficiaryRow) -> Result<Self, Self::Error> {
        Ok(Beneficiary {
            id: row.id,
            need: decimal(&row.need, "need")?,
            received: decimal(&row.received, "received")?,
            name: row.name,
            story: row.story,
            released: row.released,
            admin_charged: row.admin_charged,
            doc_hash: row.doc_hash,
            created_at: row.created_at,
        })
    }
}

impl TryFrom<ProofRow> for Proof {
    type Error = LedgerError;

    fn try_from(row: ProofRow) -> Result<Self, Self::Error> {
        let status = ProofStatus::from_str(&row.status)
            .map_err(|e| LedgerError::Corrupt(format!("proof {}: {e}", row.id)))?;
        Ok(Proof {
            id: row.id,
            beneficiary_id: row.beneficiary_id,
            filename: row.filename,
            hash: row.hash,
            status,
            storage_path: row.storage_path,
            submitted_at: row.submitted_at,
            decided_at: row.decided_at,
        })
    }
}

impl LedgerRow {
    fn required(&self, value: &Option<String>, column: &str) -> Result<String, LedgerError> {
        value.clone().ok_or_else(|| {
            LedgerError::Corrupt(format!(
                "ledger entry #{} ({}) is missing `{column}`",
                self.id, self.kind
            ))
        })
    }

    fn required_amount(
        &self,
        value: &Option<String>,
        column: &str,
    ) -> Result<Decimal, LedgerError> {
        decimal(&self.required(value, column)?, column)
    }
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = LedgerError;

    fn try_from(row: LedgerRow) -> Result<Self, Self::Error> {
        let kind = EntryKind::from_str(&row.kind)
            .map_err(|e| LedgerError::Corrupt(format!("ledger entry #{}: {e}", row.id)))?;
        let beneficiary_id = row.beneficiary_id;
        let beneficiary_name = row.beneficiary_name.clone();

        let event = match kind {
            EntryKind::Donation => LedgerEvent::Donation {
                beneficiary_id,
                beneficiary_name,
                gross: row.required_amount(&row.gross, "gross")?,
            },
            EntryKind::ProofUpload => LedgerEvent::ProofUpload {
                beneficiary_id,
                beneficiary_name,
                filename: row.required(&row.filename, "filename")?,
                file_hash: row.required(&row.file_hash, "file_hash")?,
            },
            EntryKind::ProofVerified => LedgerEvent::ProofVerified {
                beneficiary_id,
                beneficiary_name,
                filename: row.required(&row.filename, "filename")?,
                file_hash: row.required(&row.file_hash, "file_hash")?,
            },
            EntryKind::ProofRejected => LedgerEvent::ProofRejected {
                beneficiary_id,
                beneficiary_name,
                filename: row.required(&row.filename, "filename")?,
                file_hash: row.required(&row.file_hash, "file_hash")?,
            },
            EntryKind::AdminFee => LedgerEvent::AdminFee {
                beneficiary_id,
                beneficiary_name,
                admin_fee: row.required_amount(&row.admin_fee, "admin_fee")?,
                student_amount: row.required_amount(&row.student_amount, "student_amount")?,
            },
            EntryKind::Release => LedgerEvent::Release {
                beneficiary_id,
                beneficiary_name,
                amount_released: row.required_amount(&row.amount_released, "amount_released")?,
            },
        };

        Ok(LedgerEntry {
            seq: row.id,
            time: row.created_at,
            event,
        })
    }
}
