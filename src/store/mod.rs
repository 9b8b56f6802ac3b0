//! Document stores behind the return workflow.
//!
//! Each store is a narrow async trait. `PgStore` backs them with PostgreSQL and
//! `MemoryStore` keeps everything in process; both implement all of them, and the
//! services only ever see `dyn Repository`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::aggregates::{Order, Product, ReturnItem, ReturnOrder, ReturnStatus, User, Voucher};
use crate::domain::events::RefundDue;
use crate::{Result, ReturnsError};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub(crate) const DUPLICATE_RETURN: &str = "A return request already exists for this order";
pub(crate) const DUPLICATE_REFUND_VOUCHER: &str = "A refund voucher was already issued for this return";

/// A conditional write found the row in another state than the one it was read in.
pub(crate) fn stale_return(expected: ReturnStatus) -> ReturnsError {
    ReturnsError::BadRequest(format!("Return order is no longer {}, reload it and try again", expected))
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn find_order(&self, id: Uuid) -> Result<Option<Order>>;
}

#[async_trait]
pub trait ReturnStore: Send + Sync {
    async fn find_return(&self, id: Uuid) -> Result<Option<ReturnOrder>>;
    async fn find_return_by_order(&self, order_id: Uuid) -> Result<Option<ReturnOrder>>;
    async fn list_returns(&self, filter: &ReturnFilter, page: Page) -> Result<(Vec<ReturnOrder>, i64)>;
    async fn return_stats(&self) -> Result<Vec<StatusStat>>;

    /// Inserts the return order and saves the order it flags, all or nothing.
    /// A second return for the same order fails with `BadRequest`.
    async fn create_return(&self, ret: &ReturnOrder, order: &Order) -> Result<()>;
    /// Applies one status change, all or nothing. See [`StatusChange`].
    async fn update_return(&self, change: StatusChange<'_>) -> Result<Vec<Restock>>;
    /// Deletes a still pending return order and saves the restored order, all or nothing.
    async fn delete_return(&self, id: Uuid, order: &Order) -> Result<()>;
}

#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn find_product(&self, id: Uuid) -> Result<Option<Product>>;
}

#[async_trait]
pub trait VoucherStore: Send + Sync {
    /// A voucher tied to a return order settles that return's pending refund in the
    /// same write. A second voucher for the same return fails with `BadRequest`.
    async fn insert_voucher(&self, voucher: &Voucher) -> Result<()>;
    async fn find_voucher(&self, id: Uuid) -> Result<Option<Voucher>>;
    /// Disables the voucher unless it already is. Returns whether this call did it.
    async fn disable_voucher(&self, id: Uuid) -> Result<bool>;
    /// Enabled vouchers issued to `user_id` whose validity window contains `now`.
    async fn active_vouchers_for_user(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Voucher>>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, id: Uuid) -> Result<Option<User>>;
}

/// Refunds owed for completed returns, kept until their voucher is issued.
#[async_trait]
pub trait RefundOutbox: Send + Sync {
    /// Oldest first.
    async fn pending_refunds(&self) -> Result<Vec<RefundDue>>;
    /// Counts a failed issuance; the refund stays pending.
    async fn record_refund_failure(&self, return_order_id: Uuid, error: &str) -> Result<()>;
}

pub trait Repository: OrderStore + ReturnStore + ProductStore + VoucherStore + UserDirectory + RefundOutbox {}
impl<T: OrderStore + ReturnStore + ProductStore + VoucherStore + UserDirectory + RefundOutbox> Repository for T {}

/// One admin decision on a return order.
///
/// The write only lands while the stored status is still `from`; otherwise it fails
/// with `BadRequest` and nothing changes. Moving to completed also puts the returned
/// units back in stock, and a `refund` is recorded in the outbox, in the same write.
#[derive(Clone, Copy, Debug)]
pub struct StatusChange<'a> {
    pub ret: &'a ReturnOrder,
    pub from: ReturnStatus,
    pub order: &'a Order,
    pub refund: Option<&'a RefundDue>,
}

/// What happened to one returned line when its stock was put back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Restock {
    Restored { product_id: Uuid, quantity: u32, size_matched: bool },
    MissingProduct { product_id: Uuid },
}

/// Stock side of a completion, shared by both stores.
pub(crate) fn restock(product: Option<&mut Product>, item: &ReturnItem) -> Restock {
    match product {
        Some(product) => Restock::Restored { product_id: product.id, quantity: item.quantity, size_matched: product.restore_stock(item) },
        None => Restock::MissingProduct { product_id: item.product_id },
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReturnFilter { pub customer_id: Option<Uuid>, pub status: Option<ReturnStatus> }

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page { pub page: u32, pub per_page: u32 }

impl Page {
    pub fn new(page: Option<u32>, per_page: Option<u32>) -> Self {
        Self { page: page.unwrap_or(1).max(1), per_page: per_page.unwrap_or(20).clamp(1, 100) }
    }
    pub fn offset(&self) -> i64 { i64::from(self.page - 1) * i64::from(self.per_page) }
    pub fn limit(&self) -> i64 { i64::from(self.per_page) }
}

impl Default for Page { fn default() -> Self { Self::new(None, None) } }

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusStat { pub status: ReturnStatus, pub count: i64, pub total_refund_amount: i64 }
