//! HTTP surface under `/api/v1`.

use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::WorkflowConfig;
use crate::domain::events::RefundDue;
use crate::notify::NotificationGateway;
use crate::services::{RefundQueue, RefundVoucherService, RefundWorker, ReturnService};
use crate::store::Repository;

pub mod auth;
pub mod returns;
pub mod vouchers;

#[derive(Clone)]
pub struct AppState { pub returns: Arc<ReturnService>, pub vouchers: Arc<RefundVoucherService> }

impl AppState {
    /// Wires the services together. The returned worker must be started on the
    /// returned receiver, or refund vouchers are never issued.
    pub fn build(repo: Arc<dyn Repository>, notifier: Arc<dyn NotificationGateway>, cfg: &WorkflowConfig)
        -> (Self, RefundWorker, mpsc::UnboundedReceiver<RefundDue>)
    {
        let vouchers = Arc::new(RefundVoucherService::new(repo.clone(), notifier.clone(), cfg.refund_voucher_valid_days));
        let (queue, jobs) = RefundQueue::channel();
        let worker = RefundWorker::new(vouchers.clone(), repo.clone(), cfg.refund_max_attempts, Duration::from_secs(2));
        let returns = Arc::new(ReturnService::new(repo, notifier, queue, cfg.return_window));
        (Self { returns, vouchers }, worker, jobs)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "opensase-returns"})) }))
        .nest("/api/v1", returns::router().merge(vouchers::router()))
        .layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()).with_state(state)
}
