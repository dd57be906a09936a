use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use tracing::info;

use ledgerly_core::approvals::ApprovalWorkflow;
use ledgerly_core::domain::sales_return::{NewSalesReturn, SalesReturn};
use ledgerly_core::domain::DocumentId;
use ledgerly_core::query::ListParams;
use ledgerly_db::{SqlPermissionGate, SqlSalesReturnStore};

use crate::http::{caller, respond, ApiError, ApiState, Caller};

pub const RESOURCE_PATH: &str = "/api/v1/sales/return";

type SalesReturnWorkflow = ApprovalWorkflow<SalesReturn, SqlSalesReturnStore, SqlPermissionGate>;

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route(RESOURCE_PATH, post(create))
        .route(&format!("{RESOURCE_PATH}/approval"), get(list_pending))
        .route(&format!("{RESOURCE_PATH}/approval/send"), post(send_approval))
        .route(&format!("{RESOURCE_PATH}/{{id}}"), get(show))
        .route(&format!("{RESOURCE_PATH}/{{id}}/approve"), post(approve))
        .route(&format!("{RESOURCE_PATH}/{{id}}/reject"), post(reject))
        .with_state(state)
}

fn workflow(state: &ApiState, caller: &Caller) -> SalesReturnWorkflow {
    ApprovalWorkflow::new(
        SqlSalesReturnStore::new(caller.pool.clone(), state.decimal_scale),
        SqlPermissionGate::new(caller.pool.clone()),
        state.guard.clone(),
    )
}

fn document_id(
    path: Result<Path<i64>, PathRejection>,
    caller: &Caller,
) -> Result<DocumentId, ApiError> {
    match path {
        Ok(Path(id)) => Ok(DocumentId(id)),
        Err(rejection) => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("sales return not found: {rejection}"),
            &caller.ctx.correlation_id,
        )),
    }
}

/// Runs before any extractor result is inspected.
async fn permitted(
    workflow: &SalesReturnWorkflow,
    action: &str,
    caller: &Caller,
) -> Result<(), ApiError> {
    workflow
        .authorize(&caller.ctx, action, None)
        .await
        .map_err(|error| ApiError::application(error, caller))
}

fn unprocessable(field: &str, message: impl Into<String>, caller: &Caller) -> ApiError {
    ApiError {
        status: StatusCode::UNPROCESSABLE_ENTITY,
        message: message.into(),
        field: Some(field.to_string()),
        correlation_id: caller.ctx.correlation_id.clone(),
    }
}

async fn create(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Result<Json<NewSalesReturn>, JsonRejection>,
) -> Result<Response, ApiError> {
    let caller = caller(&state, &headers)?;
    let workflow = workflow(&state, &caller);
    permitted(&workflow, "create", &caller).await?;
    let Json(draft) =
        body.map_err(|rejection| unprocessable("body", rejection.body_text(), &caller))?;

    let created = workflow
        .create(&caller.ctx, draft)
        .await
        .map_err(|error| ApiError::application(error, &caller))?;
    Ok(respond(StatusCode::CREATED, &caller.ctx.correlation_id, created))
}

async fn show(
    State(state): State<ApiState>,
    headers: HeaderMap,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Response, ApiError> {
    let caller = caller(&state, &headers)?;
    let id = document_id(path, &caller)?;

    let document = workflow(&state, &caller)
        .show(&caller.ctx, id)
        .await
        .map_err(|error| ApiError::application(error, &caller))?;
    Ok(respond(StatusCode::OK, &caller.ctx.correlation_id, document))
}

async fn approve(
    State(state): State<ApiState>,
    headers: HeaderMap,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Response, ApiError> {
    let caller = caller(&state, &headers)?;
    let id = document_id(path, &caller)?;

    let document = workflow(&state, &caller)
        .approve(&caller.ctx, id)
        .await
        .map_err(|error| ApiError::application(error, &caller))?;
    Ok(respond(StatusCode::OK, &caller.ctx.correlation_id, document))
}

#[derive(Debug, Default, Deserialize)]
struct RejectRequest {
    reason: Option<String>,
}

/// A missing or unreadable body is treated as a missing reason, which the
/// workflow reports after the permission check.
async fn reject(
    State(state): State<ApiState>,
    headers: HeaderMap,
    path: Result<Path<i64>, PathRejection>,
    body: Result<Json<RejectRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let caller = caller(&state, &headers)?;
    let id = document_id(path, &caller)?;
    let request = body.map(|Json(request)| request).unwrap_or_default();

    let document = workflow(&state, &caller)
        .reject(&caller.ctx, id, request.reason.as_deref())
        .await
        .map_err(|error| ApiError::application(error, &caller))?;
    Ok(respond(StatusCode::OK, &caller.ctx.correlation_id, document))
}

async fn list_pending(
    State(state): State<ApiState>,
    headers: HeaderMap,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let caller = caller(&state, &headers)?;
    let workflow = workflow(&state, &caller);
    permitted(&workflow, "approve", &caller).await?;
    let Query(params) =
        params.map_err(|rejection| unprocessable("query", rejection.body_text(), &caller))?;

    let page = workflow
        .list_pending(&caller.ctx, params)
        .await
        .map_err(|error| ApiError::application(error, &caller))?;
    Ok(respond(StatusCode::OK, &caller.ctx.correlation_id, page))
}

/// Accepts both `{"id": 7}` and bare `7` entries.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IdEntry {
    Object { id: i64 },
    Bare(i64),
}

impl IdEntry {
    fn id(&self) -> DocumentId {
        match self {
            Self::Object { id } | Self::Bare(id) => DocumentId(*id),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SendApprovalRequest {
    ids: Vec<IdEntry>,
}

async fn send_approval(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Result<Json<SendApprovalRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let caller = caller(&state, &headers)?;
    let workflow = workflow(&state, &caller);
    permitted(&workflow, "create", &caller).await?;
    let Json(request) =
        body.map_err(|rejection| unprocessable("ids", rejection.body_text(), &caller))?;
    let ids: Vec<DocumentId> = request.ids.iter().map(IdEntry::id).collect();

    let outcome = workflow
        .send_approval(&caller.ctx, &ids)
        .await
        .map_err(|error| ApiError::application(error, &caller))?;

    info!(
        event_name = "http.sales_return.approval_sent",
        correlation_id = %caller.ctx.correlation_id,
        tenant = %caller.tenant,
        actor_id = caller.ctx.actor.0,
        sent = outcome.sent,
        failed = outcome.failed,
        "bulk send approval handled"
    );
    Ok(respond(StatusCode::OK, &caller.ctx.correlation_id, outcome))
}
