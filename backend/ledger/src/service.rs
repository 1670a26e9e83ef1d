//! Transactional core behind the REST API.
//!
//! Every mutation follows the same shape:
//!
//! 1. validate input (no lock, no I/O),
//! 2. take the beneficiary's lock,
//! 3. open a transaction on the writer pool,
//! 4. re-read the snapshot, apply the protocol rule, write the snapshot and
//!    the ledger entries, run release evaluation,
//! 5. commit, then publish any release notice.
//!
//! An error anywhere before the commit drops the transaction, which rolls
//! back the snapshot and the ledger together.

use std::sync::Arc;

use earmark_protocol::{
    content_hash, donation, new_beneficiary, proof, release, validate_amount, Beneficiary,
    BeneficiaryId, Error, FeeRate, LedgerEntry, LedgerEvent, Proof,
};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::SqliteConnection;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::blobs::BlobStore;
use crate::db::{self, Pools};
use crate::errors::{LedgerError, Result};
use crate::export;
use crate::locks::KeyedLocks;
use crate::summary::Summary;

/// Advisory notice published when funds are released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseNotice {
    pub beneficiary_id: BeneficiaryId,
    pub beneficiary_name: String,
    pub amount_released: Decimal,
    pub admin_fee: Option<Decimal>,
    pub seq: i64,
}

pub struct LedgerService {
    pools: Pools,
    blobs: BlobStore,
    locks: KeyedLocks,
    fee_rate: FeeRate,
    notices: broadcast::Sender<ReleaseNotice>,
}

fn beneficiary_not_found(id: BeneficiaryId) -> LedgerError {
    Error::NotFound(format!("beneficiary {id}")).into()
}

fn proof_not_found(hash: &str) -> LedgerError {
    Error::NotFound(format!("proof {hash}")).into()
}

async fn load_beneficiary(conn: &mut SqliteConnection, id: BeneficiaryId) -> Result<Beneficiary> {
    db::get_beneficiary(conn, id)
        .await?
        .ok_or_else(|| beneficiary_not_found(id))
}

impl LedgerService {
    pub fn new(pools: Pools, blobs: BlobStore, fee_rate: FeeRate) -> Arc<Self> {
        let (notices, _) = broadcast::channel(64);
        Arc::new(Self {
            pools,
            blobs,
            locks: KeyedLocks::new(),
            fee_rate,
            notices,
        })
    }

    pub fn fee_rate(&self) -> FeeRate {
        self.fee_rate
    }

    /// Ids with a live per-beneficiary lock slot.
    #[cfg(test)]
    pub fn lock_slots(&self) -> usize {
        self.locks.len()
    }

    /// Receive release notices from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ReleaseNotice> {
        self.notices.subscribe()
    }

    // ─────────────────────────────────────────────────────────
    // Beneficiary registry
    // ─────────────────────────────────────────────────────────

    pub async fn add_beneficiary(
        &self,
        name: &str,
        need: Decimal,
        story: &str,
    ) -> Result<Beneficiary> {
        let draft = new_beneficiary(0, name, story, need, db::now())?;
        let id = db::insert_beneficiary(
            &self.pools.writer,
            &draft.name,
            &draft.story,
            draft.need,
            draft.created_at,
        )
        .await?;
        info!("Beneficiary {id} added: {} (need {})", draft.name, draft.need);
        Ok(Beneficiary { id, ..draft })
    }

    pub async fn get_beneficiary(&self, id: BeneficiaryId) -> Result<Beneficiary> {
        db::get_beneficiary(&self.pools.reader, id)
            .await?
            .ok_or_else(|| beneficiary_not_found(id))
    }

    pub async fn list_beneficiaries(&self) -> Result<Vec<Beneficiary>> {
        db::list_beneficiaries(&self.pools.reader).await
    }

    /// Create the demo beneficiaries if the registry is empty.
    pub async fn seed_demo_if_empty(&self) -> Result<usize> {
        if db::count_beneficiaries(&self.pools.reader).await? > 0 {
            return Ok(0);
        }
        let demo = [
            ("Alice Chan", 2000, "Alice dreams to continue secondary school."),
            ("Ben Wong", 1500, "Ben needs tuition for next semester."),
            ("Cindy Lee", 1000, "Cindy needs school supplies & uniform."),
        ];
        for (name, need, story) in demo {
            self.add_beneficiary(name, Decimal::new(need, 0), story).await?;
        }
        info!("Seeded {} demo beneficiaries", demo.len());
        Ok(demo.len())
    }

    // ─────────────────────────────────────────────────────────
    // Donation intake
    // ─────────────────────────────────────────────────────────

    /// Apply a settled donation and return its ledger entry.
    pub async fn donate(&self, id: BeneficiaryId, amount: Decimal) -> Result<LedgerEntry> {
        validate_amount("amount", amount)?;

        let _guard = self.locks.lock(id).await;
        let mut tx = self.pools.writer.begin().await?;

        let mut b = load_beneficiary(&mut tx, id).await?;
        let event = donation::apply_donation(&mut b, amount)?;
        db::update_beneficiary(&mut *tx, &b).await?;
        let entry = db::append_entry(&mut *tx, &event, None).await?;
        let released = self.run_release(&mut tx, &mut b).await?;

        tx.commit().await?;
        info!(
            "Donation #{} of {amount} to beneficiary {id} ({} of {})",
            entry.seq, b.received, b.need
        );
        self.announce(&released);
        Ok(entry)
    }

    // ─────────────────────────────────────────────────────────
    // Proof lifecycle
    // ─────────────────────────────────────────────────────────

    /// Store the proof bytes and queue the proof for review.
    pub async fn submit_proof(
        &self,
        id: BeneficiaryId,
        filename: &str,
        content: &[u8],
    ) -> Result<Proof> {
        proof::validate_submission(filename, content)?;

        let _guard = self.locks.lock(id).await;
        let mut tx = self.pools.writer.begin().await?;

        let b = load_beneficiary(&mut tx, id).await?;
        let active = db::active_proof(&mut *tx, id).await?;
        proof::ensure_can_submit(&b, active.as_ref())?;

        let hash = content_hash(content);
        if let Some(existing) = db::proof_by_hash(&mut *tx, &hash).await? {
            return Err(Error::PreconditionFailed(format!(
                "content {hash} is already on record for beneficiary {}",
                existing.beneficiary_id
            ))
            .into());
        }

        let blob = self.blobs.put(content).await?;
        let now = db::now();
        let (mut p, event) = proof::submit(
            &b,
            active.as_ref(),
            filename,
            &blob.hash,
            &blob.path.to_string_lossy(),
            now,
        )?;
        p.id = db::insert_proof(&mut *tx, &p).await?;
        db::append_entry(&mut *tx, &event, Some(now)).await?;

        tx.commit().await?;
        info!("Proof {} submitted for beneficiary {id}, now {}", p.hash, p.status);
        Ok(p)
    }

    /// `Reviewing → Verified`, then evaluate release.
    pub async fn verify_proof(&self, hash: &str) -> Result<Proof> {
        let owner = self.get_proof(hash).await?.beneficiary_id;

        let _guard = self.locks.lock(owner).await;
        let mut tx = self.pools.writer.begin().await?;

        let mut p = db::proof_by_hash(&mut *tx, hash)
            .await?
            .ok_or_else(|| proof_not_found(hash))?;
        let mut b = load_beneficiary(&mut tx, p.beneficiary_id).await?;
        let now = db::now();
        let event = proof::verify(&mut p, &mut b, now)?;

        db::update_proof_status(&mut *tx, &p).await?;
        db::append_entry(&mut *tx, &event, Some(now)).await?;
        db::update_beneficiary(&mut *tx, &b).await?;
        let released = self.run_release(&mut tx, &mut b).await?;

        tx.commit().await?;
        info!("Proof {hash} verified for beneficiary {}", b.id);
        self.announce(&released);
        Ok(p)
    }

    /// `Reviewing → Rejected`. The beneficiary may submit again.
    pub async fn reject_proof(&self, hash: &str) -> Result<Proof> {
        let owner = self.get_proof(hash).await?.beneficiary_id;

        let _guard = self.locks.lock(owner).await;
        let mut tx = self.pools.writer.begin().await?;

        let mut p = db::proof_by_hash(&mut *tx, hash)
            .await?
            .ok_or_else(|| proof_not_found(hash))?;
        let b = load_beneficiary(&mut tx, p.beneficiary_id).await?;
        let now = db::now();
        let event = proof::reject(&mut p, &b, now)?;

        db::update_proof_status(&mut *tx, &p).await?;
        db::append_entry(&mut *tx, &event, Some(now)).await?;

        tx.commit().await?;
        warn!("Proof {hash} rejected for beneficiary {}", b.id);
        Ok(p)
    }

    pub async fn get_proof(&self, hash: &str) -> Result<Proof> {
        db::proof_by_hash(&self.pools.reader, hash)
            .await?
            .ok_or_else(|| proof_not_found(hash))
    }

    pub async fn list_proofs(&self) -> Result<Vec<Proof>> {
        db::list_proofs(&self.pools.reader).await
    }

    /// Recompute the SHA-256 of the stored bytes for `hash`.
    pub async fn verify_blob(&self, hash: &str) -> Result<bool> {
        let p = self.get_proof(hash).await?;
        self.blobs.verify(&p.hash).await
    }

    // ─────────────────────────────────────────────────────────
    // Release engine
    // ─────────────────────────────────────────────────────────

    /// Re-run release evaluation for `id`. Returns the entries appended,
    /// empty when nothing changed.
    pub async fn evaluate_release(&self, id: BeneficiaryId) -> Result<Vec<LedgerEntry>> {
        let _guard = self.locks.lock(id).await;
        let mut tx = self.pools.writer.begin().await?;

        let mut b = load_beneficiary(&mut tx, id).await?;
        let released = self.run_release(&mut tx, &mut b).await?;

        tx.commit().await?;
        self.announce(&released);
        Ok(released)
    }

    /// Evaluate release on `b` inside the caller's transaction.
    async fn run_release(
        &self,
        conn: &mut SqliteConnection,
        b: &mut Beneficiary,
    ) -> Result<Vec<LedgerEntry>> {
        let verified = db::has_verified_proof(&mut *conn, b.id).await?;
        let outcome = release::evaluate(b, verified, self.fee_rate);
        if outcome.is_noop() {
            debug!("Beneficiary {} not eligible for release", b.id);
            return Ok(Vec::new());
        }

        let mut entries = Vec::with_capacity(outcome.events.len());
        for event in &outcome.events {
            entries.push(db::append_entry(&mut *conn, event, None).await?);
        }
        db::update_beneficiary(&mut *conn, b).await?;
        Ok(entries)
    }

    fn announce(&self, released: &[LedgerEntry]) {
        let fee = released.iter().find_map(|e| match &e.event {
            LedgerEvent::AdminFee { admin_fee, .. } => Some(*admin_fee),
            _ => None,
        });
        for entry in released {
            if let LedgerEvent::Release {
                beneficiary_id,
                beneficiary_name,
                amount_released,
            } = &entry.event
            {
                info!("Funds released to {beneficiary_name}: {amount_released}");
                // No subscribers is fine.
                let _ = self.notices.send(ReleaseNotice {
                    beneficiary_id: *beneficiary_id,
                    beneficiary_name: beneficiary_name.clone(),
                    amount_released: *amount_released,
                    admin_fee: fee,
                    seq: entry.seq,
                });
            }
        }
    }

    // ─────────────────────────────────────────────────────────
    // Ledger reads
    // ─────────────────────────────────────────────────────────

    /// All entries in append order.
    pub async fn list_ledger(&self) -> Result<Vec<LedgerEntry>> {
        db::list_entries(&self.pools.reader).await
    }

    pub async fn beneficiary_ledger(&self, id: BeneficiaryId) -> Result<Vec<LedgerEntry>> {
        self.get_beneficiary(id).await?;
        db::entries_for_beneficiary(&self.pools.reader, id).await
    }

    pub async fn export_ledger_csv(&self) -> Result<Vec<u8>> {
        let entries = self.list_ledger().await?;
        Ok(export::ledger_csv(&entries))
    }

    pub async fn summary(&self) -> Result<Summary> {
        let beneficiaries = self.list_beneficiaries().await?;
        let ledger = self.list_ledger().await?;
        Summary::compute(&beneficiaries, &ledger)
    }
}
