//! Background issuance of refund vouchers for completed returns.
//!
//! Completing a refund-type return records a [`RefundDue`] in the store's refund outbox
//! and enqueues it; the worker turns it into a voucher, which settles the outbox row.
//! Storage failures are retried with a linear backoff, anything else fails the job at
//! once. Failed jobs stay in the outbox with their error and are replayed when the
//! worker next starts.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::refund_vouchers::{IssuedVoucher, RefundVoucherRequest, RefundVoucherService};
use crate::domain::aggregates::VoucherType;
use crate::domain::events::RefundDue;
use crate::store::{Repository, DUPLICATE_REFUND_VOUCHER};
use crate::{Result, ReturnsError};

#[derive(Clone)]
pub struct RefundQueue { tx: mpsc::UnboundedSender<RefundDue> }

impl RefundQueue {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RefundDue>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn enqueue(&self, job: RefundDue) {
        let return_order_id = job.return_order_id;
        if self.tx.send(job).is_err() {
            tracing::error!(%return_order_id, "refund queue closed, voucher not issued");
        }
    }
}

pub struct RefundWorker {
    vouchers: Arc<RefundVoucherService>,
    outbox: Arc<dyn Repository>,
    max_attempts: u32,
    backoff: Duration,
}

impl RefundWorker {
    pub fn new(vouchers: Arc<RefundVoucherService>, outbox: Arc<dyn Repository>, max_attempts: u32, backoff: Duration) -> Self {
        Self { vouchers, outbox, max_attempts: max_attempts.max(1), backoff }
    }

    pub fn spawn(self, rx: mpsc::UnboundedReceiver<RefundDue>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(rx))
    }

    /// Replays the outbox, then serves the queue until every sender is gone.
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<RefundDue>) {
        match self.replay().await {
            Ok(0) => {}
            Ok(replayed) => tracing::info!(replayed, "pending refunds replayed"),
            Err(e) => tracing::error!(error = %e, "could not read pending refunds"),
        }
        while let Some(job) = rx.recv().await {
            // Failures are already logged inside handle.
            let _ = self.handle(&job).await;
        }
        tracing::info!("refund worker stopped");
    }

    /// Handles every refund still owed from earlier runs. Returns how many there were.
    pub async fn replay(&self) -> Result<usize> {
        let pending = self.outbox.pending_refunds().await?;
        for job in &pending {
            // Failures are already logged and recorded inside handle.
            let _ = self.handle(job).await;
        }
        Ok(pending.len())
    }

    pub async fn handle(&self, job: &RefundDue) -> Result<IssuedVoucher> {
        let mut attempt = 1;
        loop {
            match self.vouchers.create_refund_voucher(request_for(job)).await {
                Ok(issued) => return Ok(issued),
                Err(e @ ReturnsError::Storage(_)) if attempt < self.max_attempts => {
                    tracing::warn!(return_order_id = %job.return_order_id, attempt, error = %e, "refund voucher attempt failed, retrying");
                    tokio::time::sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
                Err(ReturnsError::BadRequest(ref m)) if m == DUPLICATE_REFUND_VOUCHER => {
                    tracing::info!(return_order_id = %job.return_order_id, "refund voucher already issued");
                    return Err(ReturnsError::BadRequest(DUPLICATE_REFUND_VOUCHER.into()));
                }
                Err(e) => {
                    tracing::error!(return_order_id = %job.return_order_id, order_id = %job.order_id, customer_id = %job.customer_id,
                        refund_amount = job.refund_amount, attempt, error = %e, "refund voucher could not be issued");
                    if let Err(record) = self.outbox.record_refund_failure(job.return_order_id, &e.to_string()).await {
                        tracing::warn!(return_order_id = %job.return_order_id, error = %record, "refund failure not recorded");
                    }
                    return Err(e);
                }
            }
        }
    }
}

fn request_for(job: &RefundDue) -> RefundVoucherRequest {
    RefundVoucherRequest {
        user_id: job.customer_id,
        refund_amount: job.refund_amount,
        order_id: Some(job.order_id),
        return_order_id: Some(job.return_order_id),
        reason: Some(job.reason.clone()),
        voucher_type: VoucherType::Item,
        condition: None,
        valid_days: None,
        description: None,
    }
}
