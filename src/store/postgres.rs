//! PostgreSQL store. Embedded lists (order lines, returned items, product variants)
//! live in JSONB columns so each entity stays a single document.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, Transaction};
use std::str::FromStr;
use uuid::Uuid;

use super::{
    restock, stale_return, OrderStore, Page, ProductStore, RefundOutbox, Restock, ReturnFilter, ReturnStore, StatusChange,
    StatusStat, UserDirectory, VoucherStore, DUPLICATE_REFUND_VOUCHER, DUPLICATE_RETURN,
};
use crate::domain::aggregates::return_order::hydrate;
use crate::domain::aggregates::{
    ColorVariant, LineItem, Order, Product, ReturnItem, ReturnOrder, ReturnStatus, UnknownVariant, User, Voucher,
};
use crate::domain::events::RefundDue;
use crate::{Result, ReturnsError};

#[derive(Clone)]
pub struct PgStore { pool: PgPool }

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    /// Connects and brings the schema up to date.
    pub async fn connect(url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(url).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    async fn write_order(tx: &mut Transaction<'_, Postgres>, order: &Order) -> Result<()> {
        sqlx::query("UPDATE orders SET status = $2, items = $3, updated_at = $4 WHERE id = $1")
            .bind(order.id).bind(order.status.as_str()).bind(Json(&order.items)).bind(order.updated_at)
            .execute(&mut **tx).await?;
        Ok(())
    }
}

fn decode<T: FromStr<Err = UnknownVariant>>(raw: &str) -> std::result::Result<T, sqlx::Error> {
    raw.parse().map_err(|e: UnknownVariant| sqlx::Error::Decode(Box::new(e)))
}

fn unique_violation_as(message: &'static str) -> impl FnOnce(sqlx::Error) -> ReturnsError {
    move |e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => ReturnsError::BadRequest(message.into()),
        _ => ReturnsError::Storage(e),
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow { id: Uuid, user_id: Uuid, status: String, items: Json<Vec<LineItem>>, created_at: DateTime<Utc>, updated_at: Option<DateTime<Utc>> }

impl TryFrom<OrderRow> for Order {
    type Error = sqlx::Error;
    fn try_from(r: OrderRow) -> std::result::Result<Self, Self::Error> {
        Ok(Order { id: r.id, user_id: r.user_id, status: decode(&r.status)?, items: r.items.0, created_at: r.created_at, updated_at: r.updated_at })
    }
}

#[derive(sqlx::FromRow)]
struct ReturnRow {
    id: Uuid, order_id: Uuid, customer_id: Uuid, reason: String, description: Option<String>, images: Vec<String>,
    video_url: Option<String>, items: Json<Vec<ReturnItem>>, total_refund_amount: i64, status: String, return_type: String,
    admin_note: Option<String>, processed_at: Option<DateTime<Utc>>, created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

impl TryFrom<ReturnRow> for ReturnOrder {
    type Error = sqlx::Error;
    fn try_from(r: ReturnRow) -> std::result::Result<Self, Self::Error> {
        Ok(hydrate(
            r.id, r.order_id, r.customer_id, r.reason, r.description, r.images, r.video_url, r.items.0, r.total_refund_amount,
            decode(&r.status)?, decode(&r.return_type)?, r.admin_note, r.processed_at, r.created_at, r.updated_at,
        ))
    }
}

#[derive(sqlx::FromRow)]
struct ProductRow { id: Uuid, name: String, count_in_stock: i64, variants: Json<Vec<ColorVariant>> }

impl From<ProductRow> for Product {
    fn from(r: ProductRow) -> Self { Product { id: r.id, name: r.name, count_in_stock: r.count_in_stock, variants: r.variants.0 } }
}

#[derive(sqlx::FromRow)]
struct RefundRow { return_order_id: Uuid, order_id: Uuid, customer_id: Uuid, refund_amount: i64, reason: String, completed_at: DateTime<Utc> }

impl From<RefundRow> for RefundDue {
    fn from(r: RefundRow) -> Self {
        RefundDue {
            return_order_id: r.return_order_id, order_id: r.order_id, customer_id: r.customer_id,
            refund_amount: r.refund_amount, reason: r.reason, completed_at: r.completed_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct VoucherRow {
    id: Uuid, voucher_type: String, dis_count: i32, condition: i64, limit_amount: i64, stock: i64,
    start_at: DateTime<Utc>, end_at: DateTime<Utc>, user_ids: Vec<Uuid>, is_disable: bool, description: Option<String>,
    order_id: Option<Uuid>, return_order_id: Option<Uuid>, created_at: DateTime<Utc>,
}

impl TryFrom<VoucherRow> for Voucher {
    type Error = sqlx::Error;
    fn try_from(r: VoucherRow) -> std::result::Result<Self, Self::Error> {
        Ok(Voucher {
            id: r.id, voucher_type: decode(&r.voucher_type)?, dis_count: r.dis_count, condition: r.condition, limit: r.limit_amount,
            stock: r.stock, start: r.start_at, end: r.end_at, user_id: r.user_ids, is_disable: r.is_disable,
            description: r.description, order_id: r.order_id, return_order_id: r.return_order_id, created_at: r.created_at,
        })
    }
}

const RETURN_COLUMNS: &str = "id, order_id, customer_id, reason, description, images, video_url, items, total_refund_amount, \
    status, return_type, admin_note, processed_at, created_at, updated_at";

#[async_trait]
impl OrderStore for PgStore {
    async fn find_order(&self, id: Uuid) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>("SELECT id, user_id, status, items, created_at, updated_at FROM orders WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(Order::try_from).transpose()?)
    }
}

#[async_trait]
impl ReturnStore for PgStore {
    async fn find_return(&self, id: Uuid) -> Result<Option<ReturnOrder>> {
        let row = sqlx::query_as::<_, ReturnRow>(&format!("SELECT {} FROM return_orders WHERE id = $1", RETURN_COLUMNS))
            .bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(ReturnOrder::try_from).transpose()?)
    }

    async fn find_return_by_order(&self, order_id: Uuid) -> Result<Option<ReturnOrder>> {
        let row = sqlx::query_as::<_, ReturnRow>(&format!("SELECT {} FROM return_orders WHERE order_id = $1", RETURN_COLUMNS))
            .bind(order_id).fetch_optional(&self.pool).await?;
        Ok(row.map(ReturnOrder::try_from).transpose()?)
    }

    async fn list_returns(&self, filter: &ReturnFilter, page: Page) -> Result<(Vec<ReturnOrder>, i64)> {
        const WHERE: &str = "($1::uuid IS NULL OR customer_id = $1) AND ($2::text IS NULL OR status = $2)";
        let status = filter.status.map(|s| s.as_str());
        let rows = sqlx::query_as::<_, ReturnRow>(&format!(
            "SELECT {} FROM return_orders WHERE {} ORDER BY created_at DESC, id DESC LIMIT $3 OFFSET $4", RETURN_COLUMNS, WHERE))
            .bind(filter.customer_id).bind(status).bind(page.limit()).bind(page.offset())
            .fetch_all(&self.pool).await?;
        let total: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM return_orders WHERE {}", WHERE))
            .bind(filter.customer_id).bind(status).fetch_one(&self.pool).await?;
        let data = rows.into_iter().map(ReturnOrder::try_from).collect::<std::result::Result<Vec<_>, _>>()?;
        Ok((data, total.0))
    }

    async fn return_stats(&self) -> Result<Vec<StatusStat>> {
        let rows: Vec<(String, i64, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*), COALESCE(SUM(total_refund_amount), 0)::BIGINT FROM return_orders GROUP BY status ORDER BY status")
            .fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|(status, count, total_refund_amount)| -> Result<StatusStat> { Ok(StatusStat { status: decode(&status)?, count, total_refund_amount }) })
            .collect()
    }

    async fn create_return(&self, ret: &ReturnOrder, order: &Order) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("INSERT INTO return_orders ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)", RETURN_COLUMNS))
            .bind(ret.id).bind(ret.order_id).bind(ret.customer_id).bind(&ret.reason).bind(&ret.description).bind(&ret.images)
            .bind(&ret.video_url).bind(Json(&ret.items)).bind(ret.total_refund_amount).bind(ret.status.as_str())
            .bind(ret.return_type.as_str()).bind(&ret.admin_note).bind(ret.processed_at).bind(ret.created_at).bind(ret.updated_at)
            .execute(&mut *tx).await.map_err(unique_violation_as(DUPLICATE_RETURN))?;
        Self::write_order(&mut tx, order).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_return(&self, change: StatusChange<'_>) -> Result<Vec<Restock>> {
        let StatusChange { ret, from, order, refund } = change;
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE return_orders SET status = $2, admin_note = $3, processed_at = $4, updated_at = $5 WHERE id = $1 AND status = $6")
            .bind(ret.id).bind(ret.status.as_str()).bind(&ret.admin_note).bind(ret.processed_at).bind(ret.updated_at)
            .bind(from.as_str())
            .execute(&mut *tx).await?;
        if updated.rows_affected() != 1 {
            return Err(stale_return(from));
        }
        Self::write_order(&mut tx, order).await?;

        let mut restocked = Vec::new();
        if ret.status == ReturnStatus::Completed {
            for item in &ret.items {
                let mut product = sqlx::query_as::<_, ProductRow>(
                    "SELECT id, name, count_in_stock, variants FROM products WHERE id = $1 FOR UPDATE")
                    .bind(item.product_id).fetch_optional(&mut *tx).await?
                    .map(Product::from);
                let outcome = restock(product.as_mut(), item);
                if let Some(product) = &product {
                    sqlx::query("UPDATE products SET count_in_stock = $2, variants = $3, updated_at = NOW() WHERE id = $1")
                        .bind(product.id).bind(product.count_in_stock).bind(Json(&product.variants))
                        .execute(&mut *tx).await?;
                }
                restocked.push(outcome);
            }
        }

        if let Some(due) = refund {
            sqlx::query(
                "INSERT INTO refund_outbox (return_order_id, order_id, customer_id, refund_amount, reason, completed_at) \
                 VALUES ($1, $2, $3, $4, $5, $6)")
                .bind(due.return_order_id).bind(due.order_id).bind(due.customer_id).bind(due.refund_amount)
                .bind(&due.reason).bind(due.completed_at)
                .execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(restocked)
    }

    async fn delete_return(&self, id: Uuid, order: &Order) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query("DELETE FROM return_orders WHERE id = $1 AND status = $2")
            .bind(id).bind(ReturnStatus::Pending.as_str())
            .execute(&mut *tx).await?;
        if deleted.rows_affected() != 1 {
            return Err(stale_return(ReturnStatus::Pending));
        }
        Self::write_order(&mut tx, order).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl ProductStore for PgStore {
    async fn find_product(&self, id: Uuid) -> Result<Option<Product>> {
        let row = sqlx::query_as::<_, ProductRow>("SELECT id, name, count_in_stock, variants FROM products WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(Product::from))
    }
}

const VOUCHER_COLUMNS: &str = "id, voucher_type, dis_count, condition, limit_amount, stock, start_at, end_at, user_ids, \
    is_disable, description, order_id, return_order_id, created_at";

#[async_trait]
impl VoucherStore for PgStore {
    async fn insert_voucher(&self, v: &Voucher) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("INSERT INTO vouchers ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)", VOUCHER_COLUMNS))
            .bind(v.id).bind(v.voucher_type.as_str()).bind(v.dis_count).bind(v.condition).bind(v.limit).bind(v.stock)
            .bind(v.start).bind(v.end).bind(&v.user_id).bind(v.is_disable).bind(&v.description).bind(v.order_id)
            .bind(v.return_order_id).bind(v.created_at)
            .execute(&mut *tx).await.map_err(unique_violation_as(DUPLICATE_REFUND_VOUCHER))?;
        if let Some(return_order_id) = v.return_order_id {
            sqlx::query("DELETE FROM refund_outbox WHERE return_order_id = $1").bind(return_order_id).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn find_voucher(&self, id: Uuid) -> Result<Option<Voucher>> {
        let row = sqlx::query_as::<_, VoucherRow>(&format!("SELECT {} FROM vouchers WHERE id = $1", VOUCHER_COLUMNS))
            .bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(Voucher::try_from).transpose()?)
    }

    async fn disable_voucher(&self, id: Uuid) -> Result<bool> {
        let done = sqlx::query("UPDATE vouchers SET is_disable = TRUE WHERE id = $1 AND NOT is_disable")
            .bind(id).execute(&self.pool).await?;
        Ok(done.rows_affected() == 1)
    }

    async fn active_vouchers_for_user(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Voucher>> {
        let rows = sqlx::query_as::<_, VoucherRow>(&format!(
            "SELECT {} FROM vouchers WHERE $1 = ANY(user_ids) AND NOT is_disable AND start_at <= $2 AND end_at >= $2 ORDER BY created_at DESC",
            VOUCHER_COLUMNS))
            .bind(user_id).bind(now).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Voucher::try_from).collect::<std::result::Result<Vec<_>, _>>()?)
    }
}

#[async_trait]
impl UserDirectory for PgStore {
    async fn find_user(&self, id: Uuid) -> Result<Option<User>> {
        let row: Option<(Uuid, String)> = sqlx::query_as("SELECT id, role FROM users WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(|(id, role)| Ok::<_, sqlx::Error>(User { id, role: decode(&role)? })).transpose()?)
    }
}

#[async_trait]
impl RefundOutbox for PgStore {
    async fn pending_refunds(&self) -> Result<Vec<RefundDue>> {
        let rows = sqlx::query_as::<_, RefundRow>(
            "SELECT return_order_id, order_id, customer_id, refund_amount, reason, completed_at FROM refund_outbox ORDER BY completed_at")
            .fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(RefundDue::from).collect())
    }

    async fn record_refund_failure(&self, return_order_id: Uuid, error: &str) -> Result<()> {
        sqlx::query("UPDATE refund_outbox SET attempts = attempts + 1, last_error = $2, last_attempt_at = NOW() WHERE return_order_id = $1")
            .bind(return_order_id).bind(error).execute(&self.pool).await?;
        Ok(())
    }
}
