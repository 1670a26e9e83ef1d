//! # Fee
//!
//! The one-time service fee charged at release.
//!
//! The fee is computed from `need`, never from `received`: overfunded
//! excess is retained on the beneficiary and does not change the fee.
//! Both halves of the split are rounded to cents with midpoint-away-from-zero
//! rounding.

use std::fmt;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::Error;

/// Number of decimal places amounts are kept to.
pub const MONEY_SCALE: u32 = 2;

/// Process-wide service fee rate, `0 <= rate < 1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct FeeRate(Decimal);

impl FeeRate {
    pub fn new(rate: Decimal) -> Result<Self, Error> {
        if rate.is_sign_negative() || rate >= Decimal::ONE {
            return Err(Error::Validation(format!(
                "fee rate must be in [0, 1), got {rate}"
            )));
        }
        Ok(Self(rate))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl Default for FeeRate {
    /// 5%.
    fn default() -> Self {
        Self(Decimal::new(5, 2))
    }
}

impl TryFrom<Decimal> for FeeRate {
    type Error = Error;

    fn try_from(rate: Decimal) -> Result<Self, Self::Error> {
        Self::new(rate)
    }
}

impl From<FeeRate> for Decimal {
    fn from(rate: FeeRate) -> Self {
        rate.0
    }
}

impl FromStr for FeeRate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rate = Decimal::from_str(s.trim())
            .map_err(|e| Error::Validation(format!("invalid fee rate `{s}`: {e}")))?;
        Self::new(rate)
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of splitting `need` into the service fee and the disbursed remainder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeeSplit {
    pub admin_fee: Decimal,
    pub student_amount: Decimal,
}

/// Round to cents, midpoint away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// `admin_fee = round(need * rate, 2)`, `student_amount = round(need - admin_fee, 2)`.
pub fn split(need: Decimal, rate: FeeRate) -> FeeSplit {
    let admin_fee = round_money(need * rate.value());
    let student_amount = round_money(need - admin_fee);
    FeeSplit {
        admin_fee,
        student_amount,
    }
}
