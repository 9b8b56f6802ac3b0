//! Return request endpoints.
//!
//! POST   /orders/:order_id/return    - open a return (owner)
//! GET    /orders/:order_id/return    - the order's return (owner or admin)
//! GET    /return-orders/get/:id      - one return (owner or admin)
//! GET    /return-orders/my-returns   - caller's returns
//! GET    /return-orders              - all returns, optional status filter (admin)
//! GET    /return-orders/stats        - count and refund total per status (admin)
//! PUT    /return-orders/:id/status   - admin decision
//! DELETE /return-orders/:id          - withdraw a pending return (admin)

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use validator::Validate;

use super::AppState;
use crate::domain::aggregates::{ReturnDraft, ReturnOrder, ReturnStatus, ReturnType, RequestedItem};
use crate::domain::value_objects::parse_id;
use crate::services::{Caller, PaginatedResponse};
use crate::store::{Page, StatusStat};
use crate::{Result, ReturnsError};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/orders/:order_id/return", post(create_return).get(get_order_return))
        .route("/return-orders", get(list_returns))
        .route("/return-orders/stats", get(stats))
        .route("/return-orders/my-returns", get(my_returns))
        .route("/return-orders/get/:id", get(get_return))
        .route("/return-orders/:id/status", put(update_status))
        .route("/return-orders/:id", delete(delete_return))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateReturnBody {
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    #[validate(length(min = 1))]
    pub items: Vec<ReturnItemBody>,
    #[serde(default)]
    #[validate(length(max = 10))]
    pub images: Vec<String>,
    #[validate(url)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub return_type: ReturnType,
}

#[derive(Debug, Deserialize, serde::Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReturnItemBody {
    pub product_id: String,
    pub item_id: String,
    #[validate(range(min = 1))]
    pub quantity: u32,
}

impl CreateReturnBody {
    fn into_draft(self) -> Result<ReturnDraft> {
        self.validate()?;
        let items = self.items.iter().map(|i| -> Result<RequestedItem> {
            i.validate()?;
            Ok(RequestedItem { product_id: parse_id(&i.product_id, "product")?, item_id: parse_id(&i.item_id, "item")?, quantity: i.quantity })
        }).collect::<Result<Vec<_>>>()?;
        Ok(ReturnDraft {
            reason: self.reason.trim().to_string(), description: self.description, items, images: self.images,
            video_url: self.video_url, return_type: self.return_type,
        })
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusBody {
    pub status: String,
    #[validate(length(max = 1000))]
    pub admin_note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams { pub page: Option<u32>, pub per_page: Option<u32>, pub status: Option<String> }

impl ListParams {
    fn page(&self) -> Page { Page::new(self.page, self.per_page) }
}

fn parse_status(raw: &str) -> Result<ReturnStatus> {
    raw.parse().map_err(|_| ReturnsError::BadRequest(format!("Invalid return status: {}", raw)))
}

async fn create_return(State(s): State<AppState>, caller: Caller, Path(order_id): Path<String>, Json(body): Json<CreateReturnBody>) -> Result<(StatusCode, Json<ReturnOrder>)> {
    let order_id = parse_id(&order_id, "order")?;
    let ret = s.returns.create_return(order_id, caller.user_id, body.into_draft()?).await?;
    Ok((StatusCode::CREATED, Json(ret)))
}

async fn get_order_return(State(s): State<AppState>, caller: Caller, Path(order_id): Path<String>) -> Result<Json<ReturnOrder>> {
    Ok(Json(s.returns.get_return_by_order(parse_id(&order_id, "order")?, caller).await?))
}

async fn get_return(State(s): State<AppState>, caller: Caller, Path(id): Path<String>) -> Result<Json<ReturnOrder>> {
    Ok(Json(s.returns.get_return(parse_id(&id, "return order")?, caller).await?))
}

async fn my_returns(State(s): State<AppState>, caller: Caller, Query(p): Query<ListParams>) -> Result<Json<PaginatedResponse<ReturnOrder>>> {
    Ok(Json(s.returns.list_my_returns(caller, p.page()).await?))
}

async fn list_returns(State(s): State<AppState>, caller: Caller, Query(p): Query<ListParams>) -> Result<Json<PaginatedResponse<ReturnOrder>>> {
    caller.require_admin()?;
    let status = p.status.as_deref().filter(|v| !v.is_empty()).map(parse_status).transpose()?;
    Ok(Json(s.returns.list_returns(status, p.page()).await?))
}

async fn stats(State(s): State<AppState>, caller: Caller) -> Result<Json<Vec<StatusStat>>> {
    caller.require_admin()?;
    Ok(Json(s.returns.stats().await?))
}

async fn update_status(State(s): State<AppState>, caller: Caller, Path(id): Path<String>, Json(body): Json<UpdateStatusBody>) -> Result<Json<ReturnOrder>> {
    caller.require_admin()?;
    body.validate()?;
    let status = parse_status(&body.status)?;
    Ok(Json(s.returns.update_status(parse_id(&id, "return order")?, status, body.admin_note).await?))
}

async fn delete_return(State(s): State<AppState>, caller: Caller, Path(id): Path<String>) -> Result<Json<serde_json::Value>> {
    caller.require_admin()?;
    s.returns.delete_return(parse_id(&id, "return order")?).await?;
    Ok(Json(serde_json::json!({ "message": "Return order deleted" })))
}
