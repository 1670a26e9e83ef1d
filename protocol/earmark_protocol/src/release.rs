//! # Release engine
//!
//! Eligibility: `received >= need`, a verified proof exists, and the
//! beneficiary is not yet released. On eligibility:
//!
//! 1. Charge the service fee unless `admin_charged` is already set.
//! 2. Release `need`.
//! 3. Mark the beneficiary released.
//!
//! Evaluation is idempotent. Once `released` is set every further call is a
//! no-op, and the fee step is gated by `admin_charged` alone so it can never
//! run twice even if a release was interrupted between the two steps.

use rust_decimal::Decimal;

use crate::fee::{self, FeeRate, FeeSplit};
use crate::{Beneficiary, LedgerEvent};

/// What one evaluation changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReleaseOutcome {
    /// Events to append, in order.
    pub events: Vec<LedgerEvent>,
    /// Fee charged during this evaluation, if any.
    pub fee: Option<FeeSplit>,
    /// Amount released during this evaluation, if any.
    pub released: Option<Decimal>,
}

impl ReleaseOutcome {
    pub fn is_noop(&self) -> bool {
        self.events.is_empty()
    }
}

pub fn is_eligible(beneficiary: &Beneficiary, has_verified_proof: bool) -> bool {
    beneficiary.is_fully_funded() && has_verified_proof && !beneficiary.released
}

/// Evaluate and apply release for `beneficiary`.
pub fn evaluate(
    beneficiary: &mut Beneficiary,
    has_verified_proof: bool,
    rate: FeeRate,
) -> ReleaseOutcome {
    let mut outcome = ReleaseOutcome::default();
    if !is_eligible(beneficiary, has_verified_proof) {
        return outcome;
    }

    if !beneficiary.admin_charged {
        let split = fee::split(beneficiary.need, rate);
        outcome.events.push(LedgerEvent::AdminFee {
            beneficiary_id: beneficiary.id,
            beneficiary_name: beneficiary.name.clone(),
            admin_fee: split.admin_fee,
            student_amount: split.student_amount,
        });
        beneficiary.admin_charged = true;
        outcome.fee = Some(split);
    }

    outcome.events.push(LedgerEvent::Release {
        beneficiary_id: beneficiary.id,
        beneficiary_name: beneficiary.name.clone(),
        amount_released: beneficiary.need,
    });
    beneficiary.released = true;
    outcome.released = Some(beneficiary.need);

    outcome
}
