//! Donation intake rule.

use rust_decimal::Decimal;

use crate::{validate_amount, Beneficiary, Error, LedgerEvent, Result};

/// Apply a settled donation of `amount` to `beneficiary`.
///
/// Donations are refused once `received >= need`. The last donation that
/// crosses the target is applied in full, so `received` may exceed `need`.
/// On error the snapshot is left untouched.
pub fn apply_donation(beneficiary: &mut Beneficiary, amount: Decimal) -> Result<LedgerEvent> {
    validate_amount("amount", amount)?;

    if beneficiary.is_fully_funded() {
        return Err(Error::PreconditionFailed(format!(
            "beneficiary {} is fully funded; no further donations accepted",
            beneficiary.id
        )));
    }

    beneficiary.received = beneficiary.received.checked_add(amount).ok_or_else(|| {
        Error::Validation(format!(
            "donation of {amount} overflows beneficiary {}'s total",
            beneficiary.id
        ))
    })?;

    Ok(LedgerEvent::Donation {
        beneficiary_id: beneficiary.id,
        beneficiary_name: beneficiary.name.clone(),
        gross: amount,
    })
}
