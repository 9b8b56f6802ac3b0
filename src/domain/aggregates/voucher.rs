//! Voucher Aggregate

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::string_enum;
use crate::domain::value_objects::VoucherTerms;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Voucher {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub voucher_type: VoucherType,
    /// Percentage taken off the order subtotal, capped by `limit`.
    pub dis_count: i32,
    /// Minimum order subtotal the voucher applies to.
    pub condition: i64,
    pub limit: i64,
    pub stock: i64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub user_id: Vec<Uuid>,
    pub is_disable: bool,
    pub description: Option<String>,
    pub order_id: Option<Uuid>,
    pub return_order_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoucherType { #[default] Item, Ship }

string_enum!(VoucherType { Item => "item", Ship => "ship" });

impl Voucher {
    /// Single-user, full-value voucher standing in for a cash refund.
    ///
    /// Stock stays at zero: it counts a shared pool and refund vouchers are not pooled.
    pub fn refund(user_id: Uuid, terms: VoucherTerms, voucher_type: VoucherType, valid_days: i64, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(), voucher_type, dis_count: 100, condition: terms.condition, limit: terms.value, stock: 0,
            start: now, end: now + Duration::days(valid_days), user_id: vec![user_id], is_disable: false,
            description: None, order_id: None, return_order_id: None, created_at: now,
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool { !self.is_disable && self.start <= now && now <= self.end }

    pub fn check_usable(&self, user_id: Uuid, order_amount: i64, now: DateTime<Utc>) -> Result<(), VoucherRejection> {
        if !self.user_id.contains(&user_id) { return Err(VoucherRejection::NotEligible); }
        if self.is_disable { return Err(VoucherRejection::Disabled); }
        if now < self.start { return Err(VoucherRejection::NotStarted(self.start)); }
        if now > self.end { return Err(VoucherRejection::Expired(self.end)); }
        if order_amount < self.condition { return Err(VoucherRejection::BelowCondition { condition: self.condition }); }
        Ok(())
    }

    /// Saturates on huge amounts; the limit caps the result anyway.
    pub fn discount_for(&self, order_amount: i64) -> i64 {
        (order_amount.max(0).saturating_mul(i64::from(self.dis_count)) / 100).min(self.limit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoucherRejection {
    NotEligible,
    Disabled,
    NotStarted(DateTime<Utc>),
    Expired(DateTime<Utc>),
    BelowCondition { condition: i64 },
}

impl std::error::Error for VoucherRejection {}
impl fmt::Display for VoucherRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotEligible => write!(f, "This voucher is not issued to you"),
            Self::Disabled => write!(f, "This voucher has been disabled"),
            Self::NotStarted(at) => write!(f, "This voucher is not valid until {}", at.format("%Y-%m-%d")),
            Self::Expired(at) => write!(f, "This voucher expired on {}", at.format("%Y-%m-%d")),
            Self::BelowCondition { condition } => write!(f, "Order amount must be at least {} to use this voucher", condition),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voucher(now: DateTime<Utc>) -> (Uuid, Voucher) {
        let user = Uuid::new_v4();
        let terms = VoucherTerms::for_refund(100_000, None).unwrap();
        (user, Voucher::refund(user, terms, VoucherType::Item, 30, now))
    }

    #[test]
    fn test_refund_voucher_shape() {
        let now = Utc::now();
        let (user, v) = voucher(now);
        assert_eq!(v.dis_count, 100);
        assert_eq!(v.limit, 110_000);
        assert_eq!(v.condition, 66_000);
        assert_eq!(v.stock, 0);
        assert_eq!(v.user_id, vec![user]);
        assert_eq!(v.end - v.start, Duration::days(30));
        assert!(v.is_active(now));
    }

    #[test]
    fn test_check_usable_verdicts() {
        let now = Utc::now();
        let (user, mut v) = voucher(now);
        assert_eq!(v.check_usable(user, 66_000, now), Ok(()));
        assert_eq!(v.check_usable(Uuid::new_v4(), 66_000, now), Err(VoucherRejection::NotEligible));
        assert_eq!(v.check_usable(user, 65_999, now), Err(VoucherRejection::BelowCondition { condition: 66_000 }));
        assert!(matches!(v.check_usable(user, 70_000, now + Duration::days(31)), Err(VoucherRejection::Expired(_))));
        assert!(matches!(v.check_usable(user, 70_000, now - Duration::days(1)), Err(VoucherRejection::NotStarted(_))));
        v.is_disable = true;
        assert_eq!(v.check_usable(user, 70_000, now), Err(VoucherRejection::Disabled));
    }

    #[test]
    fn test_discount_is_capped_by_limit() {
        let (_, v) = voucher(Utc::now());
        assert_eq!(v.discount_for(80_000), 80_000);
        assert_eq!(v.discount_for(500_000), 110_000);
    }

    #[test]
    fn test_discount_on_huge_amount_stays_at_limit() {
        let now = Utc::now();
        let (user, v) = voucher(now);
        let amount = i64::MAX / 50;
        assert_eq!(v.check_usable(user, amount, now), Ok(()));
        assert_eq!(v.discount_for(amount), 110_000);
        assert_eq!(v.discount_for(i64::MAX), 110_000);
    }

    #[test]
    fn test_wire_names() {
        let (_, v) = voucher(Utc::now());
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["type"], "item");
        assert_eq!(json["disCount"], 100);
        assert_eq!(json["isDisable"], false);
    }
}
