//! Audit ledger handlers

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use guardian_ledger::{
    EventKind, LedgerPage, LedgerQuery, LedgerSummary, LedgerVerification, Severity,
};
use guardian_types::{parse_utc_timestamp, AssertionId};
use serde::Deserialize;

/// Audit query params
#[derive(Debug, Default, Deserialize)]
pub struct AuditQueryParams {
    pub kind: Option<String>,
    /// Exact severity
    pub severity: Option<String>,
    /// Minimum severity; ignored when `severity` is set
    pub min_severity: Option<String>,
    pub assertion_id: Option<String>,
    pub session_id: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// `asc` for oldest first
    pub order: Option<String>,
}

fn default_limit() -> usize {
    50
}

fn parse_time(field: &str, raw: &str) -> ApiResult<DateTime<Utc>> {
    parse_utc_timestamp(raw)
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid {} timestamp: {}", field, raw)))
}

fn parse_severity(raw: &str) -> ApiResult<Severity> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid severity: {}", raw)))
}

impl AuditQueryParams {
    /// Translate query-string params into a ledger query
    pub fn into_query(self) -> ApiResult<LedgerQuery> {
        let mut builder = LedgerQuery::builder().offset(self.offset).limit(self.limit);

        if let Some(kind) = &self.kind {
            let kind: EventKind = kind
                .parse()
                .map_err(|_| ApiError::BadRequest(format!("Invalid event kind: {}", kind)))?;
            builder = builder.kind(kind);
        }
        if let Some(severity) = &self.severity {
            builder = builder.severity(parse_severity(severity)?);
        } else if let Some(severity) = &self.min_severity {
            builder = builder.min_severity(parse_severity(severity)?);
        }
        if let Some(id) = self.assertion_id {
            builder = builder.assertion(AssertionId::new(id));
        }
        if let Some(session) = self.session_id {
            builder = builder.session(session);
        }
        if let Some(since) = &self.since {
            builder = builder.from(parse_time("since", since)?);
        }
        if let Some(until) = &self.until {
            builder = builder.to(parse_time("until", until)?);
        }
        match self.order.as_deref() {
            None | Some("desc") => {}
            Some("asc") => builder = builder.ascending(),
            Some(other) => return Err(ApiError::BadRequest(format!("Invalid order: {}", other))),
        }

        Ok(builder.build())
    }
}

/// Query the audit ledger
pub async fn query_audit(
    State(state): State<AppState>,
    Query(params): Query<AuditQueryParams>,
) -> ApiResult<Json<LedgerPage>> {
    let query = params.into_query()?;
    Ok(Json(state.engine.query_ledger(&query).await?))
}

/// Aggregate ledger counts
pub async fn audit_summary(State(state): State<AppState>) -> ApiResult<Json<LedgerSummary>> {
    Ok(Json(state.engine.ledger_summary().await?))
}

/// Verify the hash chain and every accepted override's content hash
pub async fn verify_audit(State(state): State<AppState>) -> ApiResult<Json<LedgerVerification>> {
    Ok(Json(state.engine.verify_ledger().await?))
}
