//! Database layer: migrations and queries for the three relations.
//!
//! Every query takes a generic [`SqliteExecutor`], so the same function runs
//! against the pool for reads and against an open transaction for the
//! read-modify-write paths in [`crate::service`].

use std::str::FromStr;
use std::time::Duration;

use earmark_protocol::{Beneficiary, BeneficiaryId, LedgerEntry, LedgerEvent, Proof, Timestamp};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{SqliteExecutor, SqlitePool};
use tracing::info;

use crate::errors::Result;
use crate::records::{BeneficiaryRow, LedgerRow, ProofRow};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection pools for the ledger database.
///
/// Every read-modify-write transaction runs on `writer`, which holds a
/// single connection, so SQLite never has to upgrade a read snapshot to a
/// write lock mid-transaction. Plain reads use `reader`.
#[derive(Debug, Clone)]
pub struct Pools {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

/// Establish the SQLite connection pools and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<Pools> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    let in_memory = url.contains(":memory:");
    let base = SqliteConnectOptions::from_str(&url)?
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT);
    let mut options = base.clone().create_if_missing(true);
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    let writer = SqlitePoolOptions::new()
        .max_connections(1)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&writer).await?;
    info!("Database migrations applied successfully");

    // An in-memory database exists only on its own connection.
    let reader = if in_memory {
        writer.clone()
    } else {
        SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(base.read_only(true))
            .await?
    };

    Ok(Pools { reader, writer })
}

pub fn now() -> Timestamp {
    chrono::Utc::now().timestamp()
}

fn amount(value: Option<Decimal>) -> Option<String> {
    value.map(|d| d.to_string())
}

// ─────────────────────────────────────────────────────────
// Beneficiaries
// ─────────────────────────────────────────────────────────

const BENEFICIARY_COLUMNS: &str =
    "id, name, story, need, received, released, admin_charged, doc_hash, created_at";

/// Insert a new beneficiary and return its id.
pub async fn insert_beneficiary<'e, E: SqliteExecutor<'e>>(
    ex: E,
    name: &str,
    story: &str,
    need: Decimal,
    created_at: Timestamp,
) -> Result<BeneficiaryId> {
    let id = sqlx::query(
        r#"
        INSERT INTO beneficiaries (name, story, need, received, released, admin_charged, created_at)
        VALUES (?1, ?2, ?3, '0', 0, 0, ?4)
        "#,
    )
    .bind(name)
    .bind(story)
    .bind(need.to_string())
    .bind(created_at)
    .execute(ex)
    .await?
    .last_insert_rowid();
    Ok(id)
}

pub async fn get_beneficiary<'e, E: SqliteExecutor<'e>>(
    ex: E,
    id: BeneficiaryId,
) -> Result<Option<Beneficiary>> {
    let row = sqlx::query_as::<_, BeneficiaryRow>(&format!(
        "SELECT {BENEFICIARY_COLUMNS} FROM beneficiaries WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(ex)
    .await?;
    row.map(Beneficiary::try_from).transpose()
}

/// Overwrite the mutable snapshot columns. `need` and `created_at` are
/// never rewritten.
pub async fn update_beneficiary<'e, E: SqliteExecutor<'e>>(
    ex: E,
    b: &Beneficiary,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE beneficiaries
        SET    name = ?1, story = ?2, received = ?3, released = ?4,
               admin_charged = ?5, doc_hash = ?6
        WHERE  id = ?7
        "#,
    )
    .bind(&b.name)
    .bind(&b.story)
    .bind(b.received.to_string())
    .bind(b.released)
    .bind(b.admin_charged)
    .bind(&b.doc_hash)
    .bind(b.id)
    .execute(ex)
    .await?;
    Ok(())
}

/// All beneficiaries in creation order.
pub async fn list_beneficiaries<'e, E: SqliteExecutor<'e>>(ex: E) -> Result<Vec<Beneficiary>> {
    let rows = sqlx::query_as::<_, BeneficiaryRow>(&format!(
        "SELECT {BENEFICIARY_COLUMNS} FROM beneficiaries ORDER BY id ASC"
    ))
    .fetch_all(ex)
    .await?;
    rows.into_iter().map(Beneficiary::try_from).collect()
}

pub async fn count_beneficiaries<'e, E: SqliteExecutor<'e>>(ex: E) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM beneficiaries")
        .fetch_one(ex)
        .await?;
    Ok(count)
}

// ─────────────────────────────────────────────────────────
// Ledger entries (append-only)
// ─────────────────────────────────────────────────────────

/// Append `event`, stamping it with `at` or the current time.
///
/// The returned entry carries the sequence id assigned by SQLite.
pub async fn append_entry<'e, E: SqliteExecutor<'e>>(
    ex: E,
    event: &LedgerEvent,
    at: Option<Timestamp>,
) -> Result<LedgerEntry> {
    let time = at.unwrap_or_else(now);
    let cols = event.columns();

    let seq = sqlx::query(
        r#"
        INSERT INTO ledger_entries
            (created_at, kind, beneficiary_id, beneficiary_name, gross, admin_fee,
             student_amount, filename, file_hash, amount_released)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
    )
    .bind(time)
    .bind(event.kind().as_str())
    .bind(event.beneficiary_id())
    .bind(event.beneficiary_name())
    .bind(amount(cols.gross))
    .bind(amount(cols.admin_fee))
    .bind(amount(cols.student_amount))
    .bind(cols.filename)
    .bind(cols.file_hash)
    .bind(amount(cols.amount_released))
    .execute(ex)
    .await?
    .last_insert_rowid();

    Ok(LedgerEntry {
        seq,
        time,
        event: event.clone(),
    })
}

const LEDGER_COLUMNS: &str = "id, created_at, kind, beneficiary_id, beneficiary_name, gross, \
     admin_fee, student_amount, filename, file_hash, amount_released";

/// All entries in append order (oldest first).
pub async fn list_entries<'e, E: SqliteExecutor<'e>>(ex: E) -> Result<Vec<LedgerEntry>> {
    let rows = sqlx::query_as::<_, LedgerRow>(&format!(
        "SELECT {LEDGER_COLUMNS} FROM ledger_entries ORDER BY id ASC"
    ))
    .fetch_all(ex)
    .await?;
    rows.into_iter().map(LedgerEntry::try_from).collect()
}

/// Entries for one beneficiary in append order.
pub async fn entries_for_beneficiary<'e, E: SqliteExecutor<'e>>(
    ex: E,
    beneficiary_id: BeneficiaryId,
) -> Result<Vec<LedgerEntry>> {
    let rows = sqlx::query_as::<_, LedgerRow>(&format!(
        "SELECT {LEDGER_COLUMNS} FROM ledger_entries WHERE beneficiary_id = ?1 ORDER BY id ASC"
    ))
    .bind(beneficiary_id)
    .fetch_all(ex)
    .await?;
    rows.into_iter().map(LedgerEntry::try_from).collect()
}

// ─────────────────────────────────────────────────────────
// Proofs
// ─────────────────────────────────────────────────────────

const PROOF_COLUMNS: &str =
    "id, beneficiary_id, filename, hash, status, storage_path, submitted_at, decided_at";

/// Insert `proof` and return its id.
pub async fn insert_proof<'e, E: SqliteExecutor<'e>>(ex: E, proof: &Proof) -> Result<i64> {
    let id = sqlx::query(
        r#"
        INSERT INTO proofs
            (beneficiary_id, filename, hash, status, storage_path, submitted_at, decided_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(proof.beneficiary_id)
    .bind(&proof.filename)
    .bind(&proof.hash)
    .bind(proof.status.as_str())
    .bind(&proof.storage_path)
    .bind(proof.submitted_at)
    .bind(proof.decided_at)
    .execute(ex)
    .await?
    .last_insert_rowid();
    Ok(id)
}

pub async fn update_proof_status<'e, E: SqliteExecutor<'e>>(ex: E, proof: &Proof) -> Result<()> {
    sqlx::query("UPDATE proofs SET status = ?1, decided_at = ?2 WHERE id = ?3")
        .bind(proof.status.as_str())
        .bind(proof.decided_at)
        .bind(proof.id)
        .execute(ex)
        .await?;
    Ok(())
}

pub async fn proof_by_hash<'e, E: SqliteExecutor<'e>>(ex: E, hash: &str) -> Result<Option<Proof>> {
    let row = sqlx::query_as::<_, ProofRow>(&format!(
        "SELECT {PROOF_COLUMNS} FROM proofs WHERE hash = ?1"
    ))
    .bind(hash)
    .fetch_optional(ex)
    .await?;
    row.map(Proof::try_from).transpose()
}

/// The beneficiary's non-rejected proof, if any.
pub async fn active_proof<'e, E: SqliteExecutor<'e>>(
    ex: E,
    beneficiary_id: BeneficiaryId,
) -> Result<Option<Proof>> {
    let row = sqlx::query_as::<_, ProofRow>(&format!(
        "SELECT {PROOF_COLUMNS} FROM proofs WHERE beneficiary_id = ?1 AND status != 'rejected'"
    ))
    .bind(beneficiary_id)
    .fetch_optional(ex)
    .await?;
    row.map(Proof::try_from).transpose()
}

pub async fn has_verified_proof<'e, E: SqliteExecutor<'e>>(
    ex: E,
    beneficiary_id: BeneficiaryId,
) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT 1 FROM proofs WHERE beneficiary_id = ?1 AND status = 'verified' LIMIT 1",
    )
    .bind(beneficiary_id)
    .fetch_optional(ex)
    .await?;
    Ok(row.is_some())
}

/// All proofs in submission order.
pub async fn list_proofs<'e, E: SqliteExecutor<'e>>(ex: E) -> Result<Vec<Proof>> {
    let rows = sqlx::query_as::<_, ProofRow>(&format!(
        "SELECT {PROOF_COLUMNS} FROM proofs ORDER BY id ASC"
    ))
    .fetch_all(ex)
    .await?;
    rows.into_iter().map(Proof::try_from).collect()
}
