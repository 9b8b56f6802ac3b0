//! In-process store, used when no database is configured and by the tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    restock, stale_return, OrderStore, Page, ProductStore, RefundOutbox, Restock, ReturnFilter, ReturnStore, StatusChange,
    StatusStat, UserDirectory, VoucherStore, DUPLICATE_REFUND_VOUCHER, DUPLICATE_RETURN,
};
use crate::domain::aggregates::{Order, Product, ReturnOrder, ReturnStatus, User, Voucher};
use crate::domain::events::RefundDue;
use crate::{Result, ReturnsError};

#[derive(Default)]
pub struct MemoryStore { tables: RwLock<Tables> }

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    orders: HashMap<Uuid, Order>,
    products: HashMap<Uuid, Product>,
    returns: HashMap<Uuid, ReturnOrder>,
    vouchers: HashMap<Uuid, Voucher>,
    refunds: Vec<PendingRefund>,
}

struct PendingRefund { job: RefundDue, attempts: u32, last_error: Option<String> }

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub async fn put_user(&self, user: User) { self.tables.write().await.users.insert(user.id, user); }
    pub async fn put_order(&self, order: Order) { self.tables.write().await.orders.insert(order.id, order); }
    pub async fn put_product(&self, product: Product) { self.tables.write().await.products.insert(product.id, product); }
    pub async fn vouchers(&self) -> Vec<Voucher> { self.tables.read().await.vouchers.values().cloned().collect() }

    #[cfg(test)]
    pub(crate) async fn refund_failures(&self, return_order_id: Uuid) -> Option<(u32, Option<String>)> {
        self.tables.read().await.refunds.iter()
            .find(|p| p.job.return_order_id == return_order_id)
            .map(|p| (p.attempts, p.last_error.clone()))
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn find_order(&self, id: Uuid) -> Result<Option<Order>> { Ok(self.tables.read().await.orders.get(&id).cloned()) }
}

#[async_trait]
impl ReturnStore for MemoryStore {
    async fn find_return(&self, id: Uuid) -> Result<Option<ReturnOrder>> { Ok(self.tables.read().await.returns.get(&id).cloned()) }

    async fn find_return_by_order(&self, order_id: Uuid) -> Result<Option<ReturnOrder>> {
        Ok(self.tables.read().await.returns.values().find(|r| r.order_id == order_id).cloned())
    }

    async fn list_returns(&self, filter: &ReturnFilter, page: Page) -> Result<(Vec<ReturnOrder>, i64)> {
        let tables = self.tables.read().await;
        let mut hits: Vec<&ReturnOrder> = tables.returns.values()
            .filter(|r| filter.customer_id.map_or(true, |c| r.customer_id == c))
            .filter(|r| filter.status.map_or(true, |s| r.status == s))
            .collect();
        hits.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        let total = hits.len() as i64;
        let data = hits.into_iter().skip(page.offset() as usize).take(page.limit() as usize).cloned().collect();
        Ok((data, total))
    }

    async fn return_stats(&self) -> Result<Vec<StatusStat>> {
        let tables = self.tables.read().await;
        Ok(ReturnStatus::ALL.iter().filter_map(|&status| {
            let matching: Vec<&ReturnOrder> = tables.returns.values().filter(|r| r.status == status).collect();
            (!matching.is_empty()).then(|| StatusStat {
                status, count: matching.len() as i64, total_refund_amount: matching.iter().map(|r| r.total_refund_amount).sum(),
            })
        }).collect())
    }

    async fn create_return(&self, ret: &ReturnOrder, order: &Order) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.returns.values().any(|r| r.order_id == ret.order_id) {
            return Err(ReturnsError::BadRequest(DUPLICATE_RETURN.into()));
        }
        tables.returns.insert(ret.id, ret.clone());
        tables.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn update_return(&self, change: StatusChange<'_>) -> Result<Vec<Restock>> {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;
        match tables.returns.get(&change.ret.id) {
            Some(stored) if stored.status == change.from => {}
            _ => return Err(stale_return(change.from)),
        }
        let restocked = if change.ret.status == ReturnStatus::Completed {
            change.ret.items.iter().map(|item| restock(tables.products.get_mut(&item.product_id), item)).collect()
        } else {
            vec![]
        };
        tables.returns.insert(change.ret.id, change.ret.clone());
        tables.orders.insert(change.order.id, change.order.clone());
        if let Some(due) = change.refund {
            tables.refunds.push(PendingRefund { job: due.clone(), attempts: 0, last_error: None });
        }
        Ok(restocked)
    }

    async fn delete_return(&self, id: Uuid, order: &Order) -> Result<()> {
        let mut tables = self.tables.write().await;
        match tables.returns.get(&id) {
            Some(stored) if stored.status == ReturnStatus::Pending => {}
            _ => return Err(stale_return(ReturnStatus::Pending)),
        }
        tables.returns.remove(&id);
        tables.orders.insert(order.id, order.clone());
        Ok(())
    }
}

#[async_trait]
impl ProductStore for MemoryStore {
    async fn find_product(&self, id: Uuid) -> Result<Option<Product>> { Ok(self.tables.read().await.products.get(&id).cloned()) }
}

#[async_trait]
impl VoucherStore for MemoryStore {
    async fn insert_voucher(&self, voucher: &Voucher) -> Result<()> {
        let mut tables = self.tables.write().await;
        if let Some(return_order_id) = voucher.return_order_id {
            if tables.vouchers.values().any(|v| v.return_order_id == Some(return_order_id)) {
                return Err(ReturnsError::BadRequest(DUPLICATE_REFUND_VOUCHER.into()));
            }
            tables.refunds.retain(|p| p.job.return_order_id != return_order_id);
        }
        tables.vouchers.insert(voucher.id, voucher.clone());
        Ok(())
    }

    async fn find_voucher(&self, id: Uuid) -> Result<Option<Voucher>> { Ok(self.tables.read().await.vouchers.get(&id).cloned()) }

    async fn disable_voucher(&self, id: Uuid) -> Result<bool> {
        match self.tables.write().await.vouchers.get_mut(&id) {
            Some(v) if !v.is_disable => {
                v.is_disable = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn active_vouchers_for_user(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Voucher>> {
        let mut found: Vec<Voucher> = self.tables.read().await.vouchers.values()
            .filter(|v| v.user_id.contains(&user_id) && v.is_active(now))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn find_user(&self, id: Uuid) -> Result<Option<User>> { Ok(self.tables.read().await.users.get(&id).cloned()) }
}

#[async_trait]
impl RefundOutbox for MemoryStore {
    async fn pending_refunds(&self) -> Result<Vec<RefundDue>> {
        Ok(self.tables.read().await.refunds.iter().map(|p| p.job.clone()).collect())
    }

    async fn record_refund_failure(&self, return_order_id: Uuid, error: &str) -> Result<()> {
        if let Some(p) = self.tables.write().await.refunds.iter_mut().find(|p| p.job.return_order_id == return_order_id) {
            p.attempts += 1;
            p.last_error = Some(error.to_string());
        }
        Ok(())
    }
}
