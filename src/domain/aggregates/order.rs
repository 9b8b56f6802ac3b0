//! Order Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::string_enum;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub items: Vec<LineItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub name: String,
    pub quantity: u32,
    pub price: i64,
    #[serde(default)]
    pub variant: String,
    pub status: ItemStatus,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus { #[default] Pending, Confirmed, Shipping, Delivered, Cancelled, Return }

string_enum!(OrderStatus {
    Pending => "pending", Confirmed => "confirmed", Shipping => "shipping",
    Delivered => "delivered", Cancelled => "cancelled", Return => "return",
});

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus { #[default] Pending, Confirmed, Shipping, Delivered, Cancelled, Return }

string_enum!(ItemStatus {
    Pending => "pending", Confirmed => "confirmed", Shipping => "shipping",
    Delivered => "delivered", Cancelled => "cancelled", Return => "return",
});

impl Order {
    /// Start of the return window: the last update, or creation if never updated.
    pub fn return_anchor(&self) -> DateTime<Utc> { self.updated_at.unwrap_or(self.created_at) }

    /// Delivered orders, and orders that already carry a return, may receive a return request.
    pub fn accepts_returns(&self) -> bool { matches!(self.status, OrderStatus::Delivered | OrderStatus::Return) }

    pub fn line_item(&self, item_id: Uuid) -> Option<&LineItem> { self.items.iter().find(|i| i.id == item_id) }

    pub fn mark_returned(&mut self, item_ids: &[Uuid]) {
        self.set_item_status(item_ids, ItemStatus::Return);
        self.status = OrderStatus::Return;
    }

    pub fn restore_delivered(&mut self, item_ids: &[Uuid]) {
        self.set_item_status(item_ids, ItemStatus::Delivered);
        self.status = OrderStatus::Delivered;
    }

    pub fn touch(&mut self, now: DateTime<Utc>) { self.updated_at = Some(now); }

    fn set_item_status(&mut self, item_ids: &[Uuid], status: ItemStatus) {
        for item in self.items.iter_mut().filter(|i| item_ids.contains(&i.id)) {
            item.status = status;
        }
    }
}
