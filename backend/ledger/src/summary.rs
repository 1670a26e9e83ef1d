//! Dashboard totals over the registry and ledger.

use earmark_protocol::{Beneficiary, LedgerEntry, LedgerEvent};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::errors::{LedgerError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub beneficiaries: usize,
    pub fully_funded: usize,
    pub released: usize,
    pub total_need: Decimal,
    /// Raw sum of donations, including any overfunding.
    pub total_received: Decimal,
    /// Sum of `min(received, need)`.
    pub received_capped: Decimal,
    /// Sum of `need` over released beneficiaries.
    pub released_total: Decimal,
    pub funded_not_released: Decimal,
    pub remaining: Decimal,
    pub admin_fee_collected: Decimal,
}

fn add(total: &mut Decimal, amount: Decimal, what: &str) -> Result<()> {
    *total = total
        .checked_add(amount)
        .ok_or_else(|| LedgerError::Corrupt(format!("{what} total overflows")))?;
    Ok(())
}

impl Summary {
    /// Totals over `beneficiaries` and `ledger`. Fails instead of
    /// overflowing when stored amounts are out of range.
    pub fn compute(beneficiaries: &[Beneficiary], ledger: &[LedgerEntry]) -> Result<Self> {
        let mut s = Summary {
            beneficiaries: beneficiaries.len(),
            ..Summary::default()
        };

        for b in beneficiaries {
            add(&mut s.total_need, b.need, "need")?;
            add(&mut s.total_received, b.received, "received")?;
            add(&mut s.received_capped, b.received_capped(), "received")?;
            if b.is_fully_funded() {
                s.fully_funded += 1;
            }
            if b.released {
                s.released += 1;
                add(&mut s.released_total, b.need, "released")?;
            }
        }

        for entry in ledger {
            if let LedgerEvent::AdminFee { admin_fee, .. } = &entry.event {
                add(&mut s.admin_fee_collected, *admin_fee, "admin fee")?;
            }
        }
        s.funded_not_released = (s.received_capped - s.released_total).max(Decimal::ZERO);
        s.remaining = (s.total_need - s.received_capped).max(Decimal::ZERO);
        Ok(s)
    }
}
