//! Refund vouchers: store credit issued in place of a cash refund.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::aggregates::{Voucher, VoucherRejection, VoucherType};
use crate::domain::value_objects::{parse_id, VoucherTerms};
use crate::notify::{fan_out, Notification, NotificationGateway};
use crate::store::Repository;
use crate::{Result, ReturnsError};

#[derive(Clone, Debug, Default)]
pub struct RefundVoucherRequest {
    pub user_id: Uuid,
    pub refund_amount: i64,
    pub order_id: Option<Uuid>,
    pub return_order_id: Option<Uuid>,
    pub reason: Option<String>,
    pub voucher_type: VoucherType,
    /// Overrides the default redemption floor of 60% of the voucher value.
    pub condition: Option<i64>,
    pub valid_days: Option<i64>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedVoucher { pub voucher: Voucher, pub message: String, pub refund_amount: i64, pub voucher_value: i64 }

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoucherVerdict { pub valid: bool, pub message: String, #[serde(skip_serializing_if = "Option::is_none")] pub voucher: Option<Voucher> }

impl VoucherVerdict {
    fn invalid(message: impl Into<String>) -> Self { Self { valid: false, message: message.into(), voucher: None } }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoucherUse { pub voucher: Voucher, pub discount: i64 }

pub struct RefundVoucherService {
    repo: Arc<dyn Repository>,
    notifier: Arc<dyn NotificationGateway>,
    default_valid_days: i64,
}

impl RefundVoucherService {
    pub fn new(repo: Arc<dyn Repository>, notifier: Arc<dyn NotificationGateway>, default_valid_days: i64) -> Self {
        Self { repo, notifier, default_valid_days }
    }

    pub async fn create_refund_voucher(&self, req: RefundVoucherRequest) -> Result<IssuedVoucher> {
        let user = self.repo.find_user(req.user_id).await?
            .ok_or_else(|| ReturnsError::NotFound(format!("User {} not found", req.user_id)))?;
        let terms = VoucherTerms::for_refund(req.refund_amount, req.condition)?;
        let valid_days = req.valid_days.unwrap_or(self.default_valid_days);
        if valid_days <= 0 { return Err(ReturnsError::BadRequest("Voucher validity must be at least 1 day".into())); }

        let now = Utc::now();
        let mut voucher = Voucher::refund(user.id, terms, req.voucher_type, valid_days, now);
        voucher.order_id = req.order_id;
        voucher.return_order_id = req.return_order_id;
        voucher.description = req.description.or_else(|| Some(match &req.reason {
            Some(reason) => format!("Refund voucher: {}", reason),
            None => "Refund voucher".to_string(),
        }));
        self.repo.insert_voucher(&voucher).await?;

        let message = format!(
            "A voucher worth {} has been issued for your refund of {}. It applies to orders from {} and is valid for {} days.",
            terms.value, req.refund_amount, terms.condition, valid_days,
        );
        tracing::info!(voucher_id = %voucher.id, user_id = %user.id, refund_amount = req.refund_amount,
            voucher_value = terms.value, return_order_id = ?req.return_order_id, "refund voucher issued");

        let payload = serde_json::json!({
            "type": "refund-voucher", "voucherId": voucher.id, "orderId": req.order_id, "returnOrderId": req.return_order_id,
            "refundAmount": req.refund_amount, "voucherValue": terms.value, "condition": terms.condition,
        });
        let to_user = Notification { title: "Refund voucher issued".into(), message: message.clone(), payload: payload.clone() };
        let to_admins = Notification {
            title: "Refund voucher issued".into(),
            message: format!("Voucher worth {} issued to user {} for a refund of {}", terms.value, user.id, req.refund_amount),
            payload,
        };
        fan_out(self.notifier.as_ref(), user.id, &to_user, &to_admins).await;

        Ok(IssuedVoucher { voucher, message, refund_amount: req.refund_amount, voucher_value: terms.value })
    }

    /// Tells whether `user_id` could spend the voucher on an order of `order_amount`.
    /// Every business rejection is a verdict; only a missing voucher is an error.
    pub async fn validate_voucher_for_user(&self, voucher_id: &str, user_id: Uuid, order_amount: i64) -> Result<VoucherVerdict> {
        let id = match parse_id(voucher_id, "voucher") {
            Ok(id) => id,
            Err(e) => return Ok(VoucherVerdict::invalid(e.to_string())),
        };
        let voucher = self.find(id).await?;
        Ok(match voucher.check_usable(user_id, order_amount, Utc::now()) {
            Ok(()) => VoucherVerdict { valid: true, message: "Voucher is valid".into(), voucher: Some(voucher) },
            Err(rejection) => VoucherVerdict::invalid(rejection.to_string()),
        })
    }

    /// Vouchers the user can spend right now. Stock is not checked: refund vouchers
    /// are issued with zero stock and stay usable.
    pub async fn get_user_refund_vouchers(&self, user_id: Uuid) -> Result<Vec<Voucher>> {
        self.repo.active_vouchers_for_user(user_id, Utc::now()).await
    }

    /// Redeems a voucher against an order, which disables it.
    pub async fn use_refund_voucher(&self, voucher_id: &str, user_id: Uuid, order_amount: i64) -> Result<VoucherUse> {
        let mut voucher = self.find(parse_id(voucher_id, "voucher")?).await?;
        voucher.check_usable(user_id, order_amount, Utc::now()).map_err(|r| ReturnsError::BadRequest(r.to_string()))?;
        let discount = voucher.discount_for(order_amount);
        if !self.repo.disable_voucher(voucher.id).await? {
            return Err(ReturnsError::BadRequest(VoucherRejection::Disabled.to_string()));
        }
        voucher.is_disable = true;
        tracing::info!(voucher_id = %voucher.id, %user_id, discount, "refund voucher redeemed");
        Ok(VoucherUse { voucher, discount })
    }

    async fn find(&self, id: Uuid) -> Result<Voucher> {
        self.repo.find_voucher(id).await?.ok_or_else(|| ReturnsError::NotFound("Voucher not found".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::testing::{RecordingNotifier, Sent};
    use crate::services::fixtures::World;

    fn service(world: &World) -> RefundVoucherService {
        RefundVoucherService::new(world.store.clone(), world.notifier.clone(), 30)
    }

    fn request(user_id: Uuid, refund_amount: i64) -> RefundVoucherRequest {
        RefundVoucherRequest { user_id, refund_amount, reason: Some("defect".into()), ..Default::default() }
    }

    #[tokio::test]
    async fn test_create_refund_voucher() {
        let world = World::new(1).await;
        let issued = service(&world).create_refund_voucher(request(world.customer, 100_000)).await.unwrap();
        assert_eq!(issued.voucher_value, 110_000);
        assert_eq!(issued.refund_amount, 100_000);
        assert_eq!(issued.voucher.limit, 110_000);
        assert_eq!(issued.voucher.condition, 66_000);
        assert_eq!(issued.voucher.user_id, vec![world.customer]);
        assert_eq!(issued.voucher.description.as_deref(), Some("Refund voucher: defect"));
        assert_eq!(world.store.vouchers().await.len(), 1);

        let sent = world.notifier.take();
        assert_eq!(sent.len(), 2);
        assert!(matches!(&sent[0], Sent::User(u, n) if *u == world.customer && n.payload["voucherValue"] == 110_000));
    }

    #[tokio::test]
    async fn test_create_refund_voucher_errors() {
        let world = World::new(1).await;
        let svc = service(&world);
        assert!(matches!(svc.create_refund_voucher(request(Uuid::new_v4(), 10)).await, Err(ReturnsError::NotFound(_))));
        assert!(matches!(svc.create_refund_voucher(request(world.customer, 0)).await, Err(ReturnsError::BadRequest(_))));
        let mut bad_days = request(world.customer, 10);
        bad_days.valid_days = Some(0);
        assert!(matches!(svc.create_refund_voucher(bad_days).await, Err(ReturnsError::BadRequest(_))));
        assert!(world.store.vouchers().await.is_empty());
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_fail_issuance() {
        let world = World::with_notifier(1, RecordingNotifier::failing()).await;
        assert!(service(&world).create_refund_voucher(request(world.customer, 500)).await.is_ok());
    }

    #[tokio::test]
    async fn test_validate_and_use() {
        let world = World::new(1).await;
        let svc = service(&world);
        let issued = svc.create_refund_voucher(request(world.customer, 100_000)).await.unwrap();
        let id = issued.voucher.id.to_string();

        let bad = svc.validate_voucher_for_user("not-an-id", world.customer, 100_000).await.unwrap();
        assert!(!bad.valid);
        assert!(bad.message.contains("Invalid voucher id"));
        assert!(!svc.validate_voucher_for_user(&id, world.admin, 100_000).await.unwrap().valid);
        let low = svc.validate_voucher_for_user(&id, world.customer, 1_000).await.unwrap();
        assert!(!low.valid);
        assert!(low.message.contains("66000"));
        assert!(svc.validate_voucher_for_user(&id, world.customer, 66_000).await.unwrap().valid);
        assert!(matches!(
            svc.validate_voucher_for_user(&Uuid::new_v4().to_string(), world.customer, 1).await,
            Err(ReturnsError::NotFound(_))
        ));

        assert_eq!(svc.get_user_refund_vouchers(world.customer).await.unwrap().len(), 1);
        let used = svc.use_refund_voucher(&id, world.customer, 300_000).await.unwrap();
        assert_eq!(used.discount, 110_000);
        assert!(used.voucher.is_disable);
        assert!(svc.get_user_refund_vouchers(world.customer).await.unwrap().is_empty());
        assert!(matches!(svc.use_refund_voucher(&id, world.customer, 300_000).await, Err(ReturnsError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_voucher_is_spent_once_under_concurrent_use() {
        let world = World::new(1).await;
        let svc = service(&world);
        let id = svc.create_refund_voucher(request(world.customer, 100_000)).await.unwrap().voucher.id.to_string();
        let (a, b) = tokio::join!(
            svc.use_refund_voucher(&id, world.customer, 200_000),
            svc.use_refund_voucher(&id, world.customer, 200_000),
        );
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        assert!(matches!(a.and(b), Err(ReturnsError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_huge_order_amount_is_capped() {
        let world = World::new(1).await;
        let svc = service(&world);
        let id = svc.create_refund_voucher(request(world.customer, 100_000)).await.unwrap().voucher.id.to_string();
        let used = svc.use_refund_voucher(&id, world.customer, i64::MAX / 50).await.unwrap();
        assert_eq!(used.discount, 110_000);
    }
}
