//! Application services: the return workflow and refund voucher issuance.

use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::Role;
use crate::store::Page;
use crate::{Result, ReturnsError};

pub mod refund_vouchers;
pub mod refund_worker;
pub mod returns;

pub use refund_vouchers::{IssuedVoucher, RefundVoucherRequest, RefundVoucherService, VoucherUse, VoucherVerdict};
pub use refund_worker::{RefundQueue, RefundWorker};
pub use returns::ReturnService;

/// Who is making the request, as vouched for by the upstream gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Caller { pub user_id: Uuid, pub role: Role }

impl Caller {
    pub fn customer(user_id: Uuid) -> Self { Self { user_id, role: Role::Customer } }
    pub fn admin(user_id: Uuid) -> Self { Self { user_id, role: Role::Admin } }
    pub fn is_admin(&self) -> bool { self.role == Role::Admin }

    pub fn require_admin(&self) -> Result<()> {
        if self.is_admin() { Ok(()) } else { Err(ReturnsError::Forbidden("Admin access required".into())) }
    }

    /// Owners see their own documents, admins see everything.
    pub fn require_owner_or_admin(&self, owner: Uuid) -> Result<()> {
        if self.is_admin() || self.user_id == owner { Ok(()) } else { Err(ReturnsError::Forbidden("Access denied".into())) }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedResponse<T> { pub data: Vec<T>, pub total: i64, pub page: u32, pub per_page: u32 }

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, total: i64, page: Page) -> Self { Self { data, total, page: page.page, per_page: page.per_page } }
}
