//! # Proof lifecycle
//!
//! `Submitted → Reviewing → Verified | Rejected`.
//!
//! Verification is always an explicit transition. Nothing in this module
//! verifies a proof as a side effect of submitting it; whoever drives review
//! (a timer, a human, an external service) calls [`verify`] separately.

use crate::{Beneficiary, Error, LedgerEvent, Proof, ProofStatus, Result, Timestamp};

/// Check the submission rules that do not depend on the content.
///
/// The beneficiary must be fully funded and must not already have an active
/// (non-rejected) proof.
pub fn ensure_can_submit(beneficiary: &Beneficiary, active: Option<&Proof>) -> Result<()> {
    if !beneficiary.is_fully_funded() {
        return Err(Error::PreconditionFailed(format!(
            "beneficiary {} is not fully funded ({} of {})",
            beneficiary.id, beneficiary.received, beneficiary.need
        )));
    }
    if let Some(existing) = active.filter(|p| p.is_active()) {
        return Err(Error::PreconditionFailed(format!(
            "beneficiary {} already has a proof ({}, {})",
            beneficiary.id, existing.hash, existing.status
        )));
    }
    Ok(())
}

pub fn validate_submission(filename: &str, content: &[u8]) -> Result<()> {
    if filename.trim().is_empty() {
        return Err(Error::Validation("filename must not be empty".to_string()));
    }
    if content.is_empty() {
        return Err(Error::Validation("proof content must not be empty".to_string()));
    }
    Ok(())
}

/// Create the proof for an accepted submission and queue it for review.
///
/// `hash` must be the SHA-256 of the stored bytes and `storage_path` where
/// they were written. Returns the proof in `Reviewing` and the
/// `proof_upload` event.
pub fn submit(
    beneficiary: &Beneficiary,
    active: Option<&Proof>,
    filename: &str,
    hash: &str,
    storage_path: &str,
    now: Timestamp,
) -> Result<(Proof, LedgerEvent)> {
    ensure_can_submit(beneficiary, active)?;

    let mut proof = Proof {
        id: 0,
        beneficiary_id: beneficiary.id,
        filename: filename.trim().to_string(),
        hash: hash.to_string(),
        status: ProofStatus::Submitted,
        storage_path: storage_path.to_string(),
        submitted_at: now,
        decided_at: None,
    };
    transition(&mut proof, ProofStatus::Reviewing, now)?;

    let event = LedgerEvent::ProofUpload {
        beneficiary_id: beneficiary.id,
        beneficiary_name: beneficiary.name.clone(),
        filename: proof.filename.clone(),
        file_hash: proof.hash.clone(),
    };
    Ok((proof, event))
}

/// Move `proof` to `to` if the edge is legal.
pub fn transition(proof: &mut Proof, to: ProofStatus, now: Timestamp) -> Result<()> {
    if !proof.status.can_transition_to(to) {
        return Err(Error::InvalidState {
            hash: proof.hash.clone(),
            from: proof.status,
            to,
        });
    }
    proof.status = to;
    if to.is_terminal() {
        proof.decided_at = Some(now);
    }
    Ok(())
}

/// `Reviewing → Verified`. Records the proof hash on the beneficiary.
pub fn verify(
    proof: &mut Proof,
    beneficiary: &mut Beneficiary,
    now: Timestamp,
) -> Result<LedgerEvent> {
    ensure_owner(proof, beneficiary)?;
    transition(proof, ProofStatus::Verified, now)?;
    beneficiary.doc_hash = Some(proof.hash.clone());

    Ok(LedgerEvent::ProofVerified {
        beneficiary_id: beneficiary.id,
        beneficiary_name: beneficiary.name.clone(),
        filename: proof.filename.clone(),
        file_hash: proof.hash.clone(),
    })
}

/// `Reviewing → Rejected`. The beneficiary may submit a new proof afterwards.
pub fn reject(proof: &mut Proof, beneficiary: &Beneficiary, now: Timestamp) -> Result<LedgerEvent> {
    ensure_owner(proof, beneficiary)?;
    transition(proof, ProofStatus::Rejected, now)?;

    Ok(LedgerEvent::ProofRejected {
        beneficiary_id: beneficiary.id,
        beneficiary_name: beneficiary.name.clone(),
        filename: proof.filename.clone(),
        file_hash: proof.hash.clone(),
    })
}

fn ensure_owner(proof: &Proof, beneficiary: &Beneficiary) -> Result<()> {
    if proof.beneficiary_id != beneficiary.id {
        return Err(Error::PreconditionFailed(format!(
            "proof {} belongs to beneficiary {}, not {}",
            proof.hash, proof.beneficiary_id, beneficiary.id
        )));
    }
    Ok(())
}
