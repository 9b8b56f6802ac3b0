//! Return Order Aggregate
//!
//! A customer's request to send back part of a delivered order. The request snapshots
//! the returned lines at creation time and then moves through
//! `pending -> approved -> processing -> completed`, or ends in `rejected`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use super::{string_enum, Order, OrderStatus};
use crate::domain::events::{DomainEvent, RefundDue, ReturnEvent};
use crate::domain::value_objects::ReturnWindow;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnOrder {
    pub id: Uuid,
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub reason: String,
    pub description: Option<String>,
    pub images: Vec<String>,
    pub video_url: Option<String>,
    pub items: Vec<ReturnItem>,
    pub total_refund_amount: i64,
    pub status: ReturnStatus,
    pub return_type: ReturnType,
    pub admin_note: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnItem {
    pub product_id: Uuid,
    pub item_id: Uuid,
    pub quantity: u32,
    pub unit_price: i64,
    pub total_price: i64,
    pub variant: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnStatus { #[default] Pending, Approved, Rejected, Processing, Completed }

string_enum!(ReturnStatus {
    Pending => "pending", Approved => "approved", Rejected => "rejected",
    Processing => "processing", Completed => "completed",
});

impl ReturnStatus {
    pub const ALL: [ReturnStatus; 5] = [Self::Pending, Self::Approved, Self::Rejected, Self::Processing, Self::Completed];
    pub fn is_terminal(&self) -> bool { matches!(self, Self::Completed | Self::Rejected) }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnType { Refund, #[default] Exchange }

string_enum!(ReturnType { Refund => "refund", Exchange => "exchange" });

/// What the customer asks for, before it is checked against the order.
#[derive(Clone, Debug, Default)]
pub struct ReturnDraft {
    pub reason: String,
    pub description: Option<String>,
    pub items: Vec<RequestedItem>,
    pub images: Vec<String>,
    pub video_url: Option<String>,
    pub return_type: ReturnType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestedItem { pub product_id: Uuid, pub item_id: Uuid, pub quantity: u32 }

impl ReturnOrder {
    /// Checks a draft against the order and snapshots the returned lines.
    ///
    /// Nothing is mutated here; the caller marks the order only once every line passed.
    pub fn open(order: &Order, customer_id: Uuid, draft: ReturnDraft, window: ReturnWindow, now: DateTime<Utc>) -> Result<Self, ReturnError> {
        if order.user_id != customer_id { return Err(ReturnError::NotOwner); }
        if !order.accepts_returns() { return Err(ReturnError::NotReturnable(order.status)); }
        if !window.contains(order.return_anchor(), now) { return Err(ReturnError::WindowClosed { days: window.length() }); }
        if draft.items.is_empty() { return Err(ReturnError::NoItems); }

        let mut seen = HashSet::new();
        let mut items = Vec::with_capacity(draft.items.len());
        for req in &draft.items {
            if !seen.insert(req.item_id) { return Err(ReturnError::DuplicateItem(req.item_id)); }
            let line = order.line_item(req.item_id).ok_or(ReturnError::UnknownItem(req.item_id))?;
            if line.product_id != req.product_id { return Err(ReturnError::ProductMismatch { item_id: req.item_id }); }
            if req.quantity == 0 { return Err(ReturnError::InvalidQuantity(req.item_id)); }
            if req.quantity > line.quantity {
                return Err(ReturnError::QuantityExceeded { item_id: req.item_id, requested: req.quantity, ordered: line.quantity });
            }
            let total_price = line.price.checked_mul(i64::from(req.quantity)).ok_or(ReturnError::AmountOverflow)?;
            items.push(ReturnItem {
                product_id: line.product_id, item_id: line.id, quantity: req.quantity,
                unit_price: line.price, total_price, variant: line.variant.clone(),
            });
        }
        let total_refund_amount = items.iter()
            .try_fold(0i64, |acc, i| acc.checked_add(i.total_price))
            .ok_or(ReturnError::AmountOverflow)?;

        let mut ret = Self {
            id: Uuid::now_v7(), order_id: order.id, customer_id, reason: draft.reason, description: draft.description,
            images: draft.images, video_url: draft.video_url, items, total_refund_amount,
            status: ReturnStatus::Pending, return_type: draft.return_type, admin_note: None, processed_at: None,
            created_at: now, updated_at: now, events: vec![],
        };
        ret.raise_event(DomainEvent::Return(ReturnEvent::Requested {
            return_order_id: ret.id, order_id: ret.order_id, customer_id, return_type: ret.return_type,
        }));
        Ok(ret)
    }

    pub fn item_ids(&self) -> Vec<Uuid> { self.items.iter().map(|i| i.item_id).collect() }

    /// Admin decision on the request. Completed and rejected requests are frozen.
    pub fn transition(&mut self, to: ReturnStatus, admin_note: Option<String>, now: DateTime<Utc>) -> Result<ReturnStatus, ReturnError> {
        let from = self.status;
        if from.is_terminal() { return Err(ReturnError::Finalized(from)); }
        if to == ReturnStatus::Pending || to == from { return Err(ReturnError::InvalidTransition { from, to }); }

        self.status = to;
        self.processed_at = Some(now);
        self.updated_at = now;
        if admin_note.is_some() { self.admin_note = admin_note; }

        self.raise_event(DomainEvent::Return(ReturnEvent::StatusChanged {
            return_order_id: self.id, order_id: self.order_id, customer_id: self.customer_id, from, to,
        }));
        if to == ReturnStatus::Completed && self.return_type == ReturnType::Refund {
            self.raise_event(DomainEvent::Return(ReturnEvent::RefundDue(RefundDue {
                return_order_id: self.id, order_id: self.order_id, customer_id: self.customer_id,
                refund_amount: self.total_refund_amount, reason: self.reason.clone(), completed_at: now,
            })));
        }
        Ok(from)
    }

    /// Only untouched requests can be withdrawn.
    pub fn withdraw(&mut self) -> Result<(), ReturnError> {
        if self.status != ReturnStatus::Pending { return Err(ReturnError::NotPending(self.status)); }
        self.raise_event(DomainEvent::Return(ReturnEvent::Withdrawn { return_order_id: self.id, order_id: self.order_id }));
        Ok(())
    }

    /// Order-side effect of the request's current status.
    ///
    /// Rejection still leaves the lines flagged as returned; only withdrawal restores them.
    pub fn apply_to_order(&self, order: &mut Order) {
        match self.status {
            ReturnStatus::Pending | ReturnStatus::Approved | ReturnStatus::Processing => order.mark_returned(&self.item_ids()),
            ReturnStatus::Completed | ReturnStatus::Rejected => order.status = OrderStatus::Return,
        }
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
}

/// Rebuilds a persisted return order. No events are raised.
#[allow(clippy::too_many_arguments)]
pub(crate) fn hydrate(
    id: Uuid, order_id: Uuid, customer_id: Uuid, reason: String, description: Option<String>, images: Vec<String>,
    video_url: Option<String>, items: Vec<ReturnItem>, total_refund_amount: i64, status: ReturnStatus,
    return_type: ReturnType, admin_note: Option<String>, processed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
) -> ReturnOrder {
    ReturnOrder {
        id, order_id, customer_id, reason, description, images, video_url, items, total_refund_amount, status,
        return_type, admin_note, processed_at, created_at, updated_at, events: vec![],
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnError {
    NotOwner,
    NotReturnable(OrderStatus),
    WindowClosed { days: i64 },
    NoItems,
    DuplicateItem(Uuid),
    UnknownItem(Uuid),
    ProductMismatch { item_id: Uuid },
    InvalidQuantity(Uuid),
    QuantityExceeded { item_id: Uuid, requested: u32, ordered: u32 },
    AmountOverflow,
    Finalized(ReturnStatus),
    InvalidTransition { from: ReturnStatus, to: ReturnStatus },
    NotPending(ReturnStatus),
}

impl std::error::Error for ReturnError {}
impl fmt::Display for ReturnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotOwner => write!(f, "You can only return your own orders"),
            Self::NotReturnable(s) => write!(f, "Only delivered orders can be returned (order is {})", s),
            Self::WindowClosed { days } => write!(f, "Return period of {} days has expired", days),
            Self::NoItems => write!(f, "At least one item must be returned"),
            Self::DuplicateItem(id) => write!(f, "Item {} is listed more than once", id),
            Self::UnknownItem(id) => write!(f, "Item {} not found in order", id),
            Self::ProductMismatch { item_id } => write!(f, "Product does not match order item {}", item_id),
            Self::InvalidQuantity(id) => write!(f, "Return quantity for item {} must be at least 1", id),
            Self::QuantityExceeded { item_id, requested, ordered } =>
                write!(f, "Return quantity {} for item {} exceeds ordered quantity {}", requested, item_id, ordered),
            Self::AmountOverflow => write!(f, "Refund amount is too large"),
            Self::Finalized(s) => write!(f, "Cannot update a return order that is already {}", s),
            Self::InvalidTransition { from, to } => write!(f, "Cannot move return order from {} to {}", from, to),
            Self::NotPending(s) => write!(f, "Only pending return orders can be deleted (status is {})", s),
        }
    }
}
