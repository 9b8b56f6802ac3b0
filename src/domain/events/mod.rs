//! Domain events
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::aggregates::{ReturnStatus, ReturnType};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DomainEvent {
    Return(ReturnEvent),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReturnEvent {
    Requested { return_order_id: Uuid, order_id: Uuid, customer_id: Uuid, return_type: ReturnType },
    StatusChanged { return_order_id: Uuid, order_id: Uuid, customer_id: Uuid, from: ReturnStatus, to: ReturnStatus },
    RefundDue(RefundDue),
    Withdrawn { return_order_id: Uuid, order_id: Uuid },
}

/// A completed refund-type return that still needs its compensating voucher.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefundDue {
    pub return_order_id: Uuid,
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub refund_amount: i64,
    pub reason: String,
    pub completed_at: DateTime<Utc>,
}
