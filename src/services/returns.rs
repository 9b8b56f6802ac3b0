//! Return request workflow.
//!
//! Customers open a return against a delivered order; admins then move it through
//! its statuses. Each step writes the return order and the order it flags in one
//! store call, then notifies the customer and the admins. Completion puts the
//! returned units back in stock and, for refunds, queues a refund voucher.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use super::refund_worker::RefundQueue;
use super::{Caller, PaginatedResponse};
use crate::domain::aggregates::{Order, ReturnDraft, ReturnOrder, ReturnStatus, ReturnType};
use crate::domain::events::{DomainEvent, ReturnEvent};
use crate::domain::value_objects::ReturnWindow;
use crate::notify::{fan_out, Notification, NotificationGateway};
use crate::store::{Page, Restock, ReturnFilter, Repository, StatusChange, StatusStat, DUPLICATE_RETURN};
use crate::{Result, ReturnsError};

pub struct ReturnService {
    repo: Arc<dyn Repository>,
    notifier: Arc<dyn NotificationGateway>,
    refunds: RefundQueue,
    window: ReturnWindow,
}

impl ReturnService {
    pub fn new(repo: Arc<dyn Repository>, notifier: Arc<dyn NotificationGateway>, refunds: RefundQueue, window: ReturnWindow) -> Self {
        Self { repo, notifier, refunds, window }
    }

    pub async fn create_return(&self, order_id: Uuid, customer_id: Uuid, draft: ReturnDraft) -> Result<ReturnOrder> {
        let mut order = self.order(order_id).await?;
        let now = Utc::now();
        let mut ret = ReturnOrder::open(&order, customer_id, draft, self.window, now)?;
        if self.repo.find_return_by_order(order_id).await?.is_some() {
            return Err(ReturnsError::BadRequest(DUPLICATE_RETURN.into()));
        }

        ret.apply_to_order(&mut order);
        order.touch(now);
        let events = ret.take_events();
        self.repo.create_return(&ret, &order).await?;

        tracing::info!(return_order_id = %ret.id, %order_id, %customer_id, return_type = %ret.return_type,
            total_refund_amount = ret.total_refund_amount, items = ret.items.len(), "return request created");
        self.dispatch(&ret, events).await;
        Ok(ret)
    }

    /// The store applies the change only if nobody moved the return since it was read,
    /// so a completion restocks and owes a refund once.
    pub async fn update_status(&self, id: Uuid, to: ReturnStatus, admin_note: Option<String>) -> Result<ReturnOrder> {
        let mut ret = self.find(id).await?;
        let mut order = self.order(ret.order_id).await?;
        let now = Utc::now();
        let from = ret.transition(to, admin_note, now)?;
        ret.apply_to_order(&mut order);
        order.touch(now);
        let events = ret.take_events();
        let refund = events.iter().find_map(|e| match e {
            DomainEvent::Return(ReturnEvent::RefundDue(due)) => Some(due),
            _ => None,
        });
        let restocked = self.repo.update_return(StatusChange { ret: &ret, from, order: &order, refund }).await?;

        for outcome in &restocked {
            match outcome {
                Restock::Restored { product_id, quantity, size_matched } =>
                    tracing::debug!(return_order_id = %ret.id, %product_id, quantity, size_matched, "stock restored"),
                Restock::MissingProduct { product_id } =>
                    tracing::warn!(return_order_id = %ret.id, %product_id, "returned product no longer exists, stock not restored"),
            }
        }
        tracing::info!(return_order_id = %ret.id, order_id = %ret.order_id, %from, %to, "return status updated");
        self.dispatch(&ret, events).await;
        Ok(ret)
    }

    /// Withdraws a pending request and puts the order back to delivered.
    pub async fn delete_return(&self, id: Uuid) -> Result<()> {
        let mut ret = self.find(id).await?;
        ret.withdraw()?;
        let mut order = self.order(ret.order_id).await?;
        order.restore_delivered(&ret.item_ids());
        order.touch(Utc::now());
        self.repo.delete_return(id, &order).await?;
        tracing::info!(return_order_id = %id, order_id = %order.id, "pending return deleted, order restored");
        Ok(())
    }

    pub async fn get_return(&self, id: Uuid, caller: Caller) -> Result<ReturnOrder> {
        let ret = self.find(id).await?;
        caller.require_owner_or_admin(ret.customer_id)?;
        Ok(ret)
    }

    pub async fn get_return_by_order(&self, order_id: Uuid, caller: Caller) -> Result<ReturnOrder> {
        let order = self.order(order_id).await?;
        caller.require_owner_or_admin(order.user_id)?;
        self.repo.find_return_by_order(order_id).await?
            .ok_or_else(|| ReturnsError::NotFound("No return request for this order".into()))
    }

    pub async fn list_my_returns(&self, caller: Caller, page: Page) -> Result<PaginatedResponse<ReturnOrder>> {
        let filter = ReturnFilter { customer_id: Some(caller.user_id), status: None };
        let (data, total) = self.repo.list_returns(&filter, page).await?;
        Ok(PaginatedResponse::new(data, total, page))
    }

    pub async fn list_returns(&self, status: Option<ReturnStatus>, page: Page) -> Result<PaginatedResponse<ReturnOrder>> {
        let (data, total) = self.repo.list_returns(&ReturnFilter { customer_id: None, status }, page).await?;
        Ok(PaginatedResponse::new(data, total, page))
    }

    pub async fn stats(&self) -> Result<Vec<StatusStat>> { self.repo.return_stats().await }

    async fn dispatch(&self, ret: &ReturnOrder, events: Vec<DomainEvent>) {
        for event in events {
            match event {
                DomainEvent::Return(ReturnEvent::Requested { .. }) => self.notify(ret, "created").await,
                DomainEvent::Return(ReturnEvent::StatusChanged { .. }) => self.notify(ret, "status_updated").await,
                DomainEvent::Return(ReturnEvent::RefundDue(due)) => self.refunds.enqueue(due),
                DomainEvent::Return(ReturnEvent::Withdrawn { .. }) => {}
            }
        }
    }

    async fn notify(&self, ret: &ReturnOrder, action: &str) {
        let payload = serde_json::json!({
            "type": "return-order", "returnOrderId": ret.id, "orderId": ret.order_id, "action": action, "status": ret.status,
        });
        let to_user = Notification { title: customer_title(ret).into(), message: customer_message(ret), payload: payload.clone() };
        let to_admins = Notification {
            title: if action == "created" { "New return request".into() } else { "Return request updated".into() },
            message: format!("Return request {} for order {} is {}", ret.id, ret.order_id, ret.status),
            payload,
        };
        fan_out(self.notifier.as_ref(), ret.customer_id, &to_user, &to_admins).await;
    }

    async fn find(&self, id: Uuid) -> Result<ReturnOrder> {
        self.repo.find_return(id).await?.ok_or_else(|| ReturnsError::NotFound("Return order not found".into()))
    }

    async fn order(&self, id: Uuid) -> Result<Order> {
        self.repo.find_order(id).await?.ok_or_else(|| ReturnsError::NotFound("Order not found".into()))
    }
}

fn customer_title(ret: &ReturnOrder) -> &'static str {
    match ret.status {
        ReturnStatus::Pending => "Return request received",
        ReturnStatus::Approved => "Return request approved",
        ReturnStatus::Rejected => "Return request rejected",
        ReturnStatus::Processing => "Return in progress",
        ReturnStatus::Completed => "Return completed",
    }
}

fn customer_message(ret: &ReturnOrder) -> String {
    let base = match (ret.status, ret.return_type) {
        (ReturnStatus::Pending, _) => "We received your return request and will review it shortly.".to_string(),
        (ReturnStatus::Approved, _) => "Your return request was approved. Please send the items back.".to_string(),
        (ReturnStatus::Rejected, _) => "Your return request was rejected.".to_string(),
        (ReturnStatus::Processing, _) => "We are processing your returned items.".to_string(),
        (ReturnStatus::Completed, ReturnType::Refund) =>
            format!("Your return is complete. A refund voucher for {} is on its way.", ret.total_refund_amount),
        (ReturnStatus::Completed, ReturnType::Exchange) => "Your return is complete and your exchange is on its way.".to_string(),
    };
    match &ret.admin_note {
        Some(note) if ret.status != ReturnStatus::Pending => format!("{} Note: {}", base, note),
        _ => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{ItemStatus, OrderStatus};
    use crate::domain::events::RefundDue;
    use crate::notify::testing::{RecordingNotifier, Sent};
    use crate::services::fixtures::World;
    use crate::services::{RefundVoucherService, RefundWorker};
    use crate::store::{OrderStore, ProductStore, RefundOutbox, ReturnStore};
    use tokio::sync::mpsc;

    struct Harness { world: World, svc: ReturnService, jobs: mpsc::UnboundedReceiver<RefundDue> }

    async fn harness(days_ago: i64) -> Harness { with_world(World::new(days_ago).await) }

    fn with_world(world: World) -> Harness {
        let (queue, jobs) = RefundQueue::channel();
        let svc = ReturnService::new(world.store.clone(), world.notifier.clone(), queue, ReturnWindow::default());
        Harness { world, svc, jobs }
    }

    impl Harness {
        async fn open(&self, quantity: u32, return_type: ReturnType) -> Result<ReturnOrder> {
            self.svc.create_return(self.world.order.id, self.world.customer, self.world.draft(quantity, return_type)).await
        }

        async fn stored_order(&self) -> Order { self.world.store.find_order(self.world.order.id).await.unwrap().unwrap() }

        /// Runs queued refund jobs the way the background worker would.
        async fn drain_refunds(&mut self) -> usize {
            let worker = refund_worker(&self.world);
            let mut n = 0;
            while let Ok(job) = self.jobs.try_recv() {
                worker.handle(&job).await.unwrap();
                n += 1;
            }
            n
        }
    }

    fn refund_worker(world: &World) -> RefundWorker {
        let vouchers = Arc::new(RefundVoucherService::new(world.store.clone(), world.notifier.clone(), 30));
        RefundWorker::new(vouchers, world.store.clone(), 1, std::time::Duration::ZERO)
    }

    #[tokio::test]
    async fn test_refund_return_end_to_end() {
        let mut h = harness(1).await;
        let ret = h.open(1, ReturnType::Refund).await.unwrap();
        assert_eq!(ret.status, ReturnStatus::Pending);
        assert_eq!(ret.total_refund_amount, 100_000);

        let order = h.stored_order().await;
        assert_eq!(order.status, OrderStatus::Return);
        assert_eq!(order.items[0].status, ItemStatus::Return);

        let sent = h.world.notifier.take();
        assert_eq!(sent.len(), 2);
        match &sent[0] {
            Sent::User(user, n) => {
                assert_eq!(*user, h.world.customer);
                assert_eq!(n.payload["type"], "return-order");
                assert_eq!(n.payload["action"], "created");
                assert_eq!(n.payload["status"], "pending");
                assert_eq!(n.payload["returnOrderId"], ret.id.to_string());
            }
            other => panic!("expected customer notification, got {:?}", other),
        }

        let done = h.svc.update_status(ret.id, ReturnStatus::Completed, None).await.unwrap();
        assert_eq!(done.status, ReturnStatus::Completed);
        assert!(done.processed_at.is_some());

        let product = h.world.store.find_product(h.world.product.id).await.unwrap().unwrap();
        assert_eq!(product.count_in_stock, 6);
        assert_eq!(product.variants[0].sizes[0].count_in_stock, 3);

        assert_eq!(h.drain_refunds().await, 1);
        let vouchers = h.world.store.vouchers().await;
        assert_eq!(vouchers.len(), 1);
        assert_eq!(vouchers[0].limit, 110_000);
        assert_eq!(vouchers[0].condition, 66_000);
        assert_eq!(vouchers[0].user_id, vec![h.world.customer]);
        assert_eq!(vouchers[0].return_order_id, Some(ret.id));
        assert!(h.world.store.pending_refunds().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refund_owed_when_queue_is_gone_is_replayed() {
        let h = harness(1).await;
        let ret = h.open(1, ReturnType::Refund).await.unwrap();
        drop(h.jobs);
        h.svc.update_status(ret.id, ReturnStatus::Completed, None).await.unwrap();
        assert!(h.world.store.vouchers().await.is_empty());

        let owed = h.world.store.pending_refunds().await.unwrap();
        assert_eq!(owed.len(), 1);
        assert_eq!(owed[0].return_order_id, ret.id);
        assert_eq!(owed[0].refund_amount, 100_000);

        let worker = refund_worker(&h.world);
        assert_eq!(worker.replay().await.unwrap(), 1);
        let vouchers = h.world.store.vouchers().await;
        assert_eq!(vouchers.len(), 1);
        assert_eq!(vouchers[0].return_order_id, Some(ret.id));
        assert_eq!(worker.replay().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_completions_apply_once() {
        let mut h = harness(1).await;
        let ret = h.open(1, ReturnType::Refund).await.unwrap();
        let (a, b) = tokio::join!(
            h.svc.update_status(ret.id, ReturnStatus::Completed, None),
            h.svc.update_status(ret.id, ReturnStatus::Completed, None),
        );
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        assert!(matches!(a.and(b), Err(ReturnsError::BadRequest(_))));

        let product = h.world.store.find_product(h.world.product.id).await.unwrap().unwrap();
        assert_eq!(product.count_in_stock, 6);
        assert_eq!(product.variants[0].sizes[0].count_in_stock, 3);
        assert_eq!(h.world.store.pending_refunds().await.unwrap().len(), 1);
        assert_eq!(h.drain_refunds().await, 1);
        assert_eq!(h.world.store.vouchers().await.len(), 1);
    }

    #[tokio::test]
    async fn test_change_from_a_stale_read_is_refused() {
        let h = harness(1).await;
        let pending = h.open(1, ReturnType::Refund).await.unwrap();
        h.svc.update_status(pending.id, ReturnStatus::Completed, None).await.unwrap();

        let mut stale = pending.clone();
        stale.transition(ReturnStatus::Completed, None, Utc::now()).unwrap();
        let due = match stale.take_events().pop() {
            Some(DomainEvent::Return(ReturnEvent::RefundDue(due))) => due,
            other => panic!("expected a refund, got {:?}", other),
        };
        let order = h.stored_order().await;
        let change = StatusChange { ret: &stale, from: ReturnStatus::Pending, order: &order, refund: Some(&due) };
        assert!(matches!(h.world.store.update_return(change).await, Err(ReturnsError::BadRequest(_))));

        let product = h.world.store.find_product(h.world.product.id).await.unwrap().unwrap();
        assert_eq!(product.count_in_stock, 6);
        assert_eq!(h.world.store.pending_refunds().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_exchange_completion_issues_no_voucher() {
        let mut h = harness(1).await;
        let ret = h.open(2, ReturnType::Exchange).await.unwrap();
        h.svc.update_status(ret.id, ReturnStatus::Approved, None).await.unwrap();
        h.svc.update_status(ret.id, ReturnStatus::Processing, None).await.unwrap();
        h.svc.update_status(ret.id, ReturnStatus::Completed, Some("swapped".into())).await.unwrap();
        assert_eq!(h.drain_refunds().await, 0);
        assert!(h.world.store.vouchers().await.is_empty());
        assert_eq!(h.stored_order().await.status, OrderStatus::Return);
    }

    #[tokio::test]
    async fn test_second_return_on_same_order_is_rejected() {
        let h = harness(1).await;
        h.open(1, ReturnType::Refund).await.unwrap();
        let err = h.open(1, ReturnType::Refund).await.unwrap_err();
        assert!(matches!(err, ReturnsError::BadRequest(ref m) if m == DUPLICATE_RETURN));
    }

    #[tokio::test]
    async fn test_create_preconditions() {
        let h = harness(1).await;
        let err = h.svc.create_return(Uuid::new_v4(), h.world.customer, h.world.draft(1, ReturnType::Refund)).await.unwrap_err();
        assert!(matches!(err, ReturnsError::NotFound(_)));
        let err = h.svc.create_return(h.world.order.id, h.world.admin, h.world.draft(1, ReturnType::Refund)).await.unwrap_err();
        assert!(matches!(err, ReturnsError::Forbidden(_)));

        let expired = harness(8).await;
        assert!(matches!(expired.open(1, ReturnType::Refund).await, Err(ReturnsError::BadRequest(_))));

        let mut world = World::new(1).await;
        world.order.status = OrderStatus::Shipping;
        world.store.put_order(world.order.clone()).await;
        let shipping = with_world(world);
        assert!(matches!(shipping.open(1, ReturnType::Refund).await, Err(ReturnsError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_failed_validation_leaves_order_untouched() {
        let h = harness(1).await;
        assert!(matches!(h.open(5, ReturnType::Refund).await, Err(ReturnsError::BadRequest(_))));
        let order = h.stored_order().await;
        assert_eq!(order.status, OrderStatus::Delivered);
        assert_eq!(order.items[0].status, ItemStatus::Delivered);
        assert!(h.world.store.find_return_by_order(order.id).await.unwrap().is_none());
        assert!(h.world.notifier.take().is_empty());
    }

    #[tokio::test]
    async fn test_refund_total_is_a_snapshot() {
        let mut h = harness(1).await;
        let ret = h.open(2, ReturnType::Refund).await.unwrap();
        let mut order = h.stored_order().await;
        order.items[0].price = 1;
        h.world.store.put_order(order).await;

        let done = h.svc.update_status(ret.id, ReturnStatus::Completed, None).await.unwrap();
        assert_eq!(done.total_refund_amount, 200_000);
        h.drain_refunds().await;
        assert_eq!(h.world.store.vouchers().await[0].limit, 220_000);
    }

    #[tokio::test]
    async fn test_terminal_states_reject_updates() {
        let h = harness(1).await;
        let ret = h.open(1, ReturnType::Refund).await.unwrap();
        h.svc.update_status(ret.id, ReturnStatus::Rejected, Some("worn".into())).await.unwrap();
        for next in [ReturnStatus::Approved, ReturnStatus::Processing, ReturnStatus::Completed] {
            assert!(matches!(h.svc.update_status(ret.id, next, None).await, Err(ReturnsError::BadRequest(_))));
        }
        let order = h.stored_order().await;
        assert_eq!(order.status, OrderStatus::Return);
        assert_eq!(order.items[0].status, ItemStatus::Return);
        let stored = h.world.store.find_return(ret.id).await.unwrap().unwrap();
        assert_eq!(stored.admin_note.as_deref(), Some("worn"));
    }

    #[tokio::test]
    async fn test_delete_pending_restores_order() {
        let h = harness(1).await;
        let ret = h.open(1, ReturnType::Refund).await.unwrap();
        h.svc.delete_return(ret.id).await.unwrap();
        let order = h.stored_order().await;
        assert_eq!(order.status, OrderStatus::Delivered);
        assert_eq!(order.items[0].status, ItemStatus::Delivered);
        assert!(matches!(h.svc.delete_return(ret.id).await, Err(ReturnsError::NotFound(_))));
        // The order can be returned again once the request is gone.
        assert!(h.open(1, ReturnType::Refund).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_non_pending_fails() {
        let h = harness(1).await;
        let ret = h.open(1, ReturnType::Refund).await.unwrap();
        h.svc.update_status(ret.id, ReturnStatus::Approved, None).await.unwrap();
        assert!(matches!(h.svc.delete_return(ret.id).await, Err(ReturnsError::BadRequest(_))));
        assert!(h.world.store.find_return(ret.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_missing_product_does_not_block_completion() {
        let mut world = World::new(1).await;
        world.order.items[0].product_id = uuid::Uuid::new_v4();
        world.store.put_order(world.order.clone()).await;
        let h = with_world(world);
        let ret = h.open(1, ReturnType::Exchange).await.unwrap();
        assert!(h.svc.update_status(ret.id, ReturnStatus::Completed, None).await.is_ok());
        let product = h.world.store.find_product(h.world.product.id).await.unwrap().unwrap();
        assert_eq!(product.count_in_stock, 5);
    }

    #[tokio::test]
    async fn test_notification_outage_does_not_fail_workflow() {
        let h = with_world(World::with_notifier(1, RecordingNotifier::failing()).await);
        let ret = h.open(1, ReturnType::Refund).await.unwrap();
        assert!(h.svc.update_status(ret.id, ReturnStatus::Approved, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_reads_respect_ownership() {
        let h = harness(1).await;
        let ret = h.open(1, ReturnType::Refund).await.unwrap();
        let stranger = Caller::customer(Uuid::new_v4());
        assert!(h.svc.get_return(ret.id, Caller::customer(h.world.customer)).await.is_ok());
        assert!(h.svc.get_return(ret.id, Caller::admin(h.world.admin)).await.is_ok());
        assert!(matches!(h.svc.get_return(ret.id, stranger).await, Err(ReturnsError::Forbidden(_))));
        assert_eq!(h.svc.get_return_by_order(h.world.order.id, Caller::customer(h.world.customer)).await.unwrap().id, ret.id);

        let mine = h.svc.list_my_returns(Caller::customer(h.world.customer), Page::default()).await.unwrap();
        assert_eq!(mine.total, 1);
        assert!(h.svc.list_my_returns(stranger, Page::default()).await.unwrap().data.is_empty());

        assert_eq!(h.svc.list_returns(Some(ReturnStatus::Pending), Page::default()).await.unwrap().total, 1);
        assert_eq!(h.svc.list_returns(Some(ReturnStatus::Completed), Page::default()).await.unwrap().total, 0);

        let stats = h.svc.stats().await.unwrap();
        assert_eq!(stats, vec![StatusStat { status: ReturnStatus::Pending, count: 1, total_refund_amount: 100_000 }]);
    }
}
