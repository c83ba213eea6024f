use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::application::{
    validate_limit, AlertDistribution, AnalyticsError, AnomalyReport, SeasonalityProfile,
    StockAlert, TopMover, TopSeller,
};
use crate::domain::{Granularity, RollupBucket, StockSnapshot};
use crate::io::parse_timestamp;
use crate::storage::ReloadReport;

use super::errors::ApiError;
use super::AppState;

const DEFAULT_SELLERS_LIMIT: i64 = 10;
const DEFAULT_SEASONALITY_LIMIT: i64 = 5;
const DEFAULT_ANOMALY_THRESHOLD: f64 = 3.0;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/reload", post(reload))
        .route("/items", get(list_items))
        .route("/stock/current", get(current_stock))
        .route("/stock/at", get(stock_at))
        .route("/stock/alerts", get(stock_alerts))
        .route("/stock/alerts/distribution", get(alert_distribution))
        .route("/trend", get(trend))
        .route("/movers/top", get(top_movers))
        .route("/anomalies", get(anomalies))
        .route("/sales/top", get(top_sellers))
        .route("/sales/seasonality", get(seasonality))
}

/// Raw query-string parameters. Everything arrives as text so that malformed
/// values surface as `invalid_query` errors instead of extractor rejections.
#[derive(Debug, Default, Deserialize)]
pub struct QueryParams {
    item_id: Option<String>,
    as_of: Option<String>,
    start: Option<String>,
    end: Option<String>,
    granularity: Option<String>,
    limit: Option<String>,
    threshold: Option<String>,
}

impl QueryParams {
    fn item_id(&self) -> Result<&str, AnalyticsError> {
        self.item_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| missing("item_id"))
    }

    fn timestamp(value: &Option<String>, name: &str) -> Result<DateTime<Utc>, AnalyticsError> {
        let raw = value.as_deref().ok_or_else(|| missing(name))?;
        parse_timestamp(raw).map_err(|e| AnalyticsError::InvalidQuery(format!("{}: {}", name, e)))
    }

    fn granularity(&self) -> Result<Granularity, AnalyticsError> {
        match self.granularity.as_deref() {
            None => Ok(Granularity::Day),
            Some(raw) => Granularity::from_str(raw).ok_or_else(|| {
                AnalyticsError::InvalidQuery(format!(
                    "granularity must be one of day, week, month (got '{}')",
                    raw
                ))
            }),
        }
    }

    fn limit(&self, default: Option<i64>) -> Result<usize, AnalyticsError> {
        let limit = match (self.limit.as_deref(), default) {
            (Some(raw), _) => raw.trim().parse::<i64>().map_err(|_| {
                AnalyticsError::InvalidQuery(format!("limit must be an integer (got '{}')", raw))
            })?,
            (None, Some(default)) => default,
            (None, None) => return Err(missing("limit")),
        };
        validate_limit(limit)
    }

    fn threshold(&self) -> Result<f64, AnalyticsError> {
        match self.threshold.as_deref() {
            None => Ok(DEFAULT_ANOMALY_THRESHOLD),
            Some(raw) => raw.trim().parse::<f64>().map_err(|_| {
                AnalyticsError::InvalidQuery(format!("threshold must be a number (got '{}')", raw))
            }),
        }
    }
}

fn missing(name: &str) -> AnalyticsError {
    AnalyticsError::InvalidQuery(format!("missing required parameter '{}'", name))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let ledger = state.service.store().current();
    Json(json!({
        "status": "ok",
        "ledger_version": ledger.version(),
        "records": ledger.len(),
        "items": ledger.item_count(),
        "cache": state.service.cache_stats(),
    }))
}

async fn reload(State(state): State<Arc<AppState>>) -> Result<Json<ReloadReport>, ApiError> {
    let worker = Arc::clone(&state);
    let report = tokio::task::spawn_blocking(move || worker.service.reload(&worker.source))
        .await
        .map_err(|e| ApiError::Internal(format!("reload task failed: {}", e)))??;
    Ok(Json(report))
}

async fn list_items(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "items": state.service.item_ids() }))
}

async fn current_stock(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
) -> Result<Json<StockSnapshot>, ApiError> {
    Ok(Json(state.service.current_stock(params.item_id()?)?))
}

async fn stock_at(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
) -> Result<Json<StockSnapshot>, ApiError> {
    let as_of = QueryParams::timestamp(&params.as_of, "as_of")?;
    Ok(Json(state.service.stock_at(params.item_id()?, as_of)?))
}

async fn stock_alerts(State(state): State<Arc<AppState>>) -> Result<Json<Vec<StockAlert>>, ApiError> {
    Ok(Json(state.service.stock_alerts()?))
}

async fn alert_distribution(
    State(state): State<Arc<AppState>>,
) -> Result<Json<AlertDistribution>, ApiError> {
    Ok(Json(state.service.alert_distribution()?))
}

async fn trend(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
) -> Result<Json<Vec<RollupBucket>>, ApiError> {
    let start = QueryParams::timestamp(&params.start, "start")?;
    let end = QueryParams::timestamp(&params.end, "end")?;
    Ok(Json(state.service.trend(
        params.item_id()?,
        params.granularity()?,
        start,
        end,
    )?))
}

async fn top_movers(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
) -> Result<Json<Vec<TopMover>>, ApiError> {
    let start = QueryParams::timestamp(&params.start, "start")?;
    let end = QueryParams::timestamp(&params.end, "end")?;
    Ok(Json(state.service.top_movers(
        params.granularity()?,
        start,
        end,
        params.limit(None)?,
    )?))
}

async fn anomalies(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
) -> Result<Json<AnomalyReport>, ApiError> {
    Ok(Json(state.service.anomaly_report(
        params.item_id()?,
        params.granularity()?,
        params.threshold()?,
    )?))
}

async fn top_sellers(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
) -> Result<Json<Vec<TopSeller>>, ApiError> {
    let limit = params.limit(Some(DEFAULT_SELLERS_LIMIT))?;
    Ok(Json(state.service.top_sellers(limit)?))
}

async fn seasonality(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
) -> Result<Json<Vec<SeasonalityProfile>>, ApiError> {
    let limit = params.limit(Some(DEFAULT_SEASONALITY_LIMIT))?;
    Ok(Json(state.service.seasonality(limit)?))
}
