//! Shared HTTP plumbing: response envelopes, error-to-status mapping and the
//! per-request caller (tenant pool, actor, correlation id).

use std::collections::BTreeMap;

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use ledgerly_core::approvals::RequestContext;
use ledgerly_core::domain::ActorId;
use ledgerly_core::errors::{ApplicationError, InterfaceError};
use ledgerly_db::{DbPool, TenantPools};

pub const TENANT_HEADER: &str = "tenant";
pub const ACTOR_HEADER: &str = "x-user-id";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct ApiState {
    pub tenants: TenantPools,
    pub guard: String,
    pub decimal_scale: u32,
    pub legacy_unauthorized_status: bool,
}

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub code: u16,
    pub message: String,
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub code: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<BTreeMap<String, Vec<String>>>,
}

pub fn respond<T: Serialize>(
    status: StatusCode,
    correlation_id: &str,
    data: T,
) -> Response {
    let message = status.canonical_reason().unwrap_or("OK").to_string();
    let mut response =
        (status, Json(Envelope { code: status.as_u16(), message, data })).into_response();
    tag(&mut response, correlation_id);
    response
}

fn tag(response: &mut Response, correlation_id: &str) {
    if let Ok(value) = HeaderValue::from_str(correlation_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub field: Option<String>,
    pub correlation_id: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>, correlation_id: &str) -> Self {
        Self {
            status,
            message: message.into(),
            field: None,
            correlation_id: correlation_id.to_string(),
        }
    }

    pub fn from_interface(error: InterfaceError, legacy_unauthorized_status: bool) -> Self {
        let status = status_code(&error, legacy_unauthorized_status);
        let field = match &error {
            InterfaceError::Unprocessable { field, .. } => Some(field.clone()),
            _ => None,
        };
        Self {
            status,
            message: error.message().to_string(),
            field,
            correlation_id: error.correlation_id().to_string(),
        }
    }

    pub fn application(error: ApplicationError, caller: &Caller) -> Self {
        Self::from_interface(
            error.into_interface(caller.ctx.correlation_id.clone()),
            caller.legacy_unauthorized_status,
        )
    }
}

/// Unauthorized is reported as 500 while `legacy` is set, matching what
/// existing clients were built against.
pub fn status_code(error: &InterfaceError, legacy: bool) -> StatusCode {
    match error {
        InterfaceError::Unauthorized { .. } if legacy => StatusCode::INTERNAL_SERVER_ERROR,
        InterfaceError::Unauthorized { .. } => StatusCode::FORBIDDEN,
        InterfaceError::Unprocessable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        InterfaceError::Conflict { .. } => StatusCode::CONFLICT,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let errors = self
            .field
            .map(|field| BTreeMap::from([(field, vec![self.message.clone()])]));
        let mut response =
            (self.status, Json(ErrorEnvelope { code: 0, message: self.message, errors }))
                .into_response();
        tag(&mut response, &self.correlation_id);
        response
    }
}

/// Resolved caller of one request.
pub struct Caller {
    pub ctx: RequestContext,
    pub pool: DbPool,
    pub tenant: String,
    pub legacy_unauthorized_status: bool,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

pub fn correlation_id(headers: &HeaderMap) -> String {
    header(headers, REQUEST_ID_HEADER)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub fn caller(state: &ApiState, headers: &HeaderMap) -> Result<Caller, ApiError> {
    let correlation_id = correlation_id(headers);

    let requested_tenant = header(headers, TENANT_HEADER);
    let tenant = requested_tenant.unwrap_or(state.tenants.default_tenant()).to_string();
    let Some(pool) = state.tenants.resolve(requested_tenant) else {
        warn!(
            event_name = "http.tenant.unknown",
            correlation_id = %correlation_id,
            tenant = %tenant,
            "request addressed an unknown tenant"
        );
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("tenant `{tenant}` is not configured"),
            &correlation_id,
        ));
    };

    let actor = header(headers, ACTOR_HEADER).and_then(|raw| raw.parse::<i64>().ok());
    let Some(actor) = actor else {
        return Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            "Unauthenticated.",
            &correlation_id,
        ));
    };

    Ok(Caller {
        ctx: RequestContext::new(ActorId(actor), correlation_id),
        pool: pool.clone(),
        tenant,
        legacy_unauthorized_status: state.legacy_unauthorized_status,
    })
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, HeaderValue, StatusCode};
    use ledgerly_core::errors::InterfaceError;

    use super::{status_code, ACTOR_HEADER, REQUEST_ID_HEADER};

    #[test]
    fn unauthorized_status_follows_legacy_flag() {
        let error = InterfaceError::Unauthorized {
            message: "There is no permission named `approve sales return` for guard `api`."
                .to_string(),
            correlation_id: "req-1".to_string(),
        };

        assert_eq!(status_code(&error, true), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(status_code(&error, false), StatusCode::FORBIDDEN);
    }

    #[test]
    fn request_id_header_is_reused() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("req-42"));
        headers.insert(ACTOR_HEADER, HeaderValue::from_static("1"));

        assert_eq!(super::correlation_id(&headers), "req-42");
        assert!(!super::correlation_id(&HeaderMap::new()).is_empty());
    }
}
