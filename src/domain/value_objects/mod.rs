//! Value Objects for the return workflow

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Parses a document reference, rejecting anything that is not a UUID.
pub fn parse_id(raw: &str, what: &str) -> Result<Uuid, IdError> {
    Uuid::parse_str(raw.trim()).map_err(|_| IdError { what: what.to_string(), raw: raw.to_string() })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdError { pub what: String, pub raw: String }
impl std::error::Error for IdError {}
impl fmt::Display for IdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "Invalid {} id: {}", self.what, self.raw) }
}

/// How long after delivery a customer may still ask for a return.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReturnWindow { days: i64 }

impl ReturnWindow {
    pub fn days(days: i64) -> Self { Self { days } }
    pub fn length(&self) -> i64 { self.days }
    pub fn contains(&self, anchor: DateTime<Utc>, now: DateTime<Utc>) -> bool { now - anchor <= Duration::days(self.days) }
}

impl Default for ReturnWindow { fn default() -> Self { Self::days(7) } }

/// Face value and redemption floor of a refund voucher.
///
/// The voucher is worth 10% more than the cash refund it replaces, and can only be
/// redeemed on orders of at least 60% of that face value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoucherTerms { pub value: i64, pub condition: i64 }

impl VoucherTerms {
    const BONUS: Decimal = Decimal::from_parts(110, 0, 0, false, 2);
    const FLOOR: Decimal = Decimal::from_parts(60, 0, 0, false, 2);

    pub fn for_refund(refund_amount: i64, condition: Option<i64>) -> Result<Self, TermsError> {
        if refund_amount <= 0 { return Err(TermsError::NonPositiveAmount); }
        let value = round_whole(Decimal::from(refund_amount) * Self::BONUS)?;
        let condition = match condition {
            Some(c) if c < 0 => return Err(TermsError::NegativeCondition),
            Some(c) => c,
            None => round_whole(Decimal::from(value) * Self::FLOOR)?,
        };
        Ok(Self { value, condition })
    }
}

fn round_whole(d: Decimal) -> Result<i64, TermsError> {
    d.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero).to_i64().ok_or(TermsError::Overflow)
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum TermsError { NonPositiveAmount, NegativeCondition, Overflow }
impl std::error::Error for TermsError {}
impl fmt::Display for TermsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonPositiveAmount => write!(f, "Refund amount must be greater than 0"),
            Self::NegativeCondition => write!(f, "Voucher condition cannot be negative"),
            Self::Overflow => write!(f, "Refund amount is too large"),
        }
    }
}
