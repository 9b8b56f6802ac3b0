//! Refund voucher endpoints.
//!
//! POST /voucher-refund/create               - issue a refund voucher directly (admin)
//! GET  /voucher-refund/my-vouchers          - caller's usable vouchers
//! GET  /voucher-refund/validate/:voucher_id - can the caller use it on `orderAmount`?
//! POST /voucher-refund/use/:voucher_id      - redeem against `orderAmount`

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use validator::Validate;

use super::AppState;
use crate::domain::aggregates::{Voucher, VoucherType};
use crate::domain::value_objects::parse_id;
use crate::services::{Caller, IssuedVoucher, RefundVoucherRequest, VoucherUse, VoucherVerdict};
use crate::Result;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/voucher-refund/create", post(create))
        .route("/voucher-refund/my-vouchers", get(my_vouchers))
        .route("/voucher-refund/validate/:voucher_id", get(validate))
        .route("/voucher-refund/use/:voucher_id", post(redeem))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateRefundVoucherBody {
    pub user_id: String,
    pub refund_amount: i64,
    pub order_id: Option<String>,
    pub return_order_id: Option<String>,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
    #[serde(default)]
    pub voucher_type: VoucherType,
    #[validate(range(min = 0))]
    pub condition: Option<i64>,
    #[validate(range(min = 1, max = 3650))]
    pub valid_days: Option<i64>,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
}

impl CreateRefundVoucherBody {
    fn into_request(self) -> Result<RefundVoucherRequest> {
        self.validate()?;
        Ok(RefundVoucherRequest {
            user_id: parse_id(&self.user_id, "user")?,
            refund_amount: self.refund_amount,
            order_id: self.order_id.as_deref().map(|id| parse_id(id, "order")).transpose()?,
            return_order_id: self.return_order_id.as_deref().map(|id| parse_id(id, "return order")).transpose()?,
            reason: self.reason,
            voucher_type: self.voucher_type,
            condition: self.condition,
            valid_days: self.valid_days,
            description: self.description,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAmount { pub order_amount: i64 }

async fn create(State(s): State<AppState>, caller: Caller, Json(body): Json<CreateRefundVoucherBody>) -> Result<(StatusCode, Json<IssuedVoucher>)> {
    caller.require_admin()?;
    let issued = s.vouchers.create_refund_voucher(body.into_request()?).await?;
    Ok((StatusCode::CREATED, Json(issued)))
}

async fn my_vouchers(State(s): State<AppState>, caller: Caller) -> Result<Json<Vec<Voucher>>> {
    Ok(Json(s.vouchers.get_user_refund_vouchers(caller.user_id).await?))
}

async fn validate(State(s): State<AppState>, caller: Caller, Path(voucher_id): Path<String>, Query(q): Query<OrderAmount>) -> Result<Json<VoucherVerdict>> {
    Ok(Json(s.vouchers.validate_voucher_for_user(&voucher_id, caller.user_id, q.order_amount).await?))
}

async fn redeem(State(s): State<AppState>, caller: Caller, Path(voucher_id): Path<String>, Json(body): Json<OrderAmount>) -> Result<Json<VoucherUse>> {
    Ok(Json(s.vouchers.use_refund_voucher(&voucher_id, caller.user_id, body.order_amount).await?))
}
