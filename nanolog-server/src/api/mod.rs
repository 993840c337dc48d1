//! HTTP API endpoints
//!
//! Boundary adapters that translate inbound requests into engine or
//! aggregator calls. Engine nodes (standalone/ingester) get the full router;
//! console nodes serve the query routes backed by the scatter-gather
//! aggregator.

use crate::cluster::{Aggregator, QueryParams};
use axum::{
    extract::{ConnectInfo, Query, RawQuery, State},
    http::{header, HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use nanolog_core::engine::QueryEngine;
use nanolog_core::{Filter, HistogramPoint, Level, LogContext, LogRow, SystemStats};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

const DEFAULT_SEARCH_LIMIT: usize = 100;
const DEFAULT_CONTEXT_LIMIT: usize = 10;

/// Router for nodes hosting the storage engine.
pub fn engine_router(engine: Arc<QueryEngine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/ingest", post(ingest))
        .route("/api/search", get(search))
        .route("/api/histogram", get(histogram))
        .route("/api/stats", get(stats))
        .route("/api/context", get(context))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

/// Router for console nodes, which fan queries out to data nodes.
pub fn console_router(aggregator: Arc<Aggregator>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/search", get(console_search))
        .route("/api/histogram", get(console_histogram))
        .route("/api/stats", get(console_stats))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(aggregator)
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn engine_error(e: nanolog_core::NanoError) -> ApiError {
    let status = if e.is_syntax() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(ErrorResponse { error: e.to_string() }))
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    min_ts: Option<i64>,
    /// Alias for min_ts
    start: Option<i64>,
    max_ts: Option<i64>,
    /// Alias for max_ts
    end: Option<i64>,
    level: Option<u8>,
    service: Option<String>,
    host: Option<String>,
    q: Option<String>,
    limit: Option<usize>,
}

impl SearchParams {
    fn filter(&self) -> Filter {
        Filter {
            min_time: self.min_ts.or(self.start).unwrap_or(0),
            max_time: self.max_ts.or(self.end).unwrap_or(0),
            // 0 means "no level filter" on the wire
            level: self.level.filter(|&l| l != 0),
            service: self.service.clone().filter(|s| !s.is_empty()),
            host: self.host.clone().filter(|h| !h.is_empty()),
            query: self.q.clone().unwrap_or_default(),
        }
    }

    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_SEARCH_LIMIT)
    }
}

#[derive(Debug, Deserialize)]
struct HistogramParams {
    start: i64,
    end: i64,
    interval: i64,
    level: Option<u8>,
    service: Option<String>,
    host: Option<String>,
    q: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContextParams {
    ts: i64,
    service: String,
    limit: Option<usize>,
}

// ============================================================================
// Engine handlers
// ============================================================================

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: nanolog_core::VERSION.to_string(),
    })
}

/// Ingest a single log object or an array of them. Field defaults:
/// timestamp=now, service="default", host=peer address, message from
/// `message` or `msg`. The WAL is fsynced once per request, not per row.
async fn ingest(
    State(engine): State<Arc<QueryEngine>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<serde_json::Value>,
) -> Result<StatusCode, ApiError> {
    match &body {
        serde_json::Value::Array(items) => {
            for item in items {
                ingest_one(&engine, addr, item);
            }
        }
        _ => ingest_one(&engine, addr, &body),
    }

    engine.sync_wal();
    Ok(StatusCode::OK)
}

fn ingest_one(engine: &Arc<QueryEngine>, addr: SocketAddr, value: &serde_json::Value) {
    let mut ts = value.get("timestamp").and_then(|v| v.as_i64()).unwrap_or(0);
    if ts == 0 {
        ts = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
    }

    let level = Level::from_name(value.get("level").and_then(|v| v.as_str()).unwrap_or(""));

    let service = value
        .get("service")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("default");

    let host = value
        .get("host")
        .and_then(|v| v.as_str())
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| addr.ip().to_string());

    let message = value
        .get("message")
        .and_then(|v| v.as_str())
        .or_else(|| value.get("msg").and_then(|v| v.as_str()))
        .unwrap_or("");

    let trace_id = value.get("trace_id").and_then(|v| v.as_str()).unwrap_or("");

    engine.ingest(ts, level.code(), service, &host, message, trace_id);
}

async fn search(
    State(engine): State<Arc<QueryEngine>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<LogRow>>, ApiError> {
    let rows = engine
        .execute_scan(&params.filter(), params.limit())
        .map_err(engine_error)?;
    Ok(Json(rows))
}

async fn histogram(
    State(engine): State<Arc<QueryEngine>>,
    Query(params): Query<HistogramParams>,
) -> Result<Json<Vec<HistogramPoint>>, ApiError> {
    let filter = Filter {
        level: params.level.filter(|&l| l != 0),
        service: params.service.clone().filter(|s| !s.is_empty()),
        host: params.host.clone().filter(|h| !h.is_empty()),
        query: params.q.clone().unwrap_or_default(),
        ..Default::default()
    };

    let points = engine
        .compute_histogram(params.start, params.end, params.interval, &filter)
        .map_err(engine_error)?;
    Ok(Json(points))
}

async fn stats(State(engine): State<Arc<QueryEngine>>) -> Json<SystemStats> {
    Json(engine.get_stats())
}

async fn context(
    State(engine): State<Arc<QueryEngine>>,
    Query(params): Query<ContextParams>,
) -> Result<Json<LogContext>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_CONTEXT_LIMIT);
    let ctx = engine
        .get_context(params.ts, &params.service, limit)
        .map_err(engine_error)?;
    Ok(Json(ctx))
}

// ============================================================================
// Console handlers (scatter-gather)
// ============================================================================

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn console_search(
    State(aggregator): State<Arc<Aggregator>>,
    Query(params): Query<SearchParams>,
    RawQuery(raw): RawQuery,
    headers: HeaderMap,
) -> Json<Vec<LogRow>> {
    let rows = aggregator
        .search(&QueryParams {
            raw_query: raw.unwrap_or_default(),
            limit: params.limit(),
            auth: bearer(&headers),
        })
        .await;
    Json(rows)
}

async fn console_histogram(
    State(aggregator): State<Arc<Aggregator>>,
    RawQuery(raw): RawQuery,
    headers: HeaderMap,
) -> Json<Vec<HistogramPoint>> {
    let points = aggregator
        .histogram(&QueryParams {
            raw_query: raw.unwrap_or_default(),
            limit: 0,
            auth: bearer(&headers),
        })
        .await;
    Json(points)
}

async fn console_stats(
    State(aggregator): State<Arc<Aggregator>>,
    headers: HeaderMap,
) -> Json<SystemStats> {
    Json(aggregator.stats(bearer(&headers).as_deref()).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_params_filter() {
        let params = SearchParams {
            min_ts: None,
            start: Some(100),
            max_ts: Some(200),
            end: None,
            level: Some(0),
            service: Some(String::new()),
            host: Some("web-1".into()),
            q: Some("level:ERROR".into()),
            limit: None,
        };

        let filter = params.filter();
        assert_eq!(filter.min_time, 100);
        assert_eq!(filter.max_time, 200);
        assert_eq!(filter.level, None); // 0 means unset
        assert_eq!(filter.service, None); // empty string means unset
        assert_eq!(filter.host.as_deref(), Some("web-1"));
        assert_eq!(filter.query, "level:ERROR");
        assert_eq!(params.limit(), DEFAULT_SEARCH_LIMIT);
    }

    #[test]
    fn test_min_ts_wins_over_start_alias() {
        let params = SearchParams {
            min_ts: Some(5),
            start: Some(100),
            max_ts: None,
            end: Some(300),
            level: None,
            service: None,
            host: None,
            q: None,
            limit: Some(7),
        };

        let filter = params.filter();
        assert_eq!(filter.min_time, 5);
        assert_eq!(filter.max_time, 300);
        assert_eq!(params.limit(), 7);
    }

    mod live {
        use super::*;
        use nanolog_core::engine::{EngineConfig, QueryEngine};
        use nanolog_core::segment::{SegmentReader, SegmentWriter};
        use std::time::Duration;
        use tempfile::TempDir;

        async fn serve_engine(dir: &std::path::Path) -> SocketAddr {
            let engine = QueryEngine::open(
                EngineConfig {
                    data_dir: dir.to_path_buf(),
                    retention: Duration::from_secs(168 * 3600),
                    max_table_size: 64 * 1024 * 1024,
                },
                Arc::new(SegmentReader::new()),
                Arc::new(SegmentWriter::new()),
            )
            .unwrap();

            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let app = engine_router(engine);
            tokio::spawn(async move {
                axum::serve(
                    listener,
                    app.into_make_service_with_connect_info::<SocketAddr>(),
                )
                .await
                .unwrap();
            });
            addr
        }

        #[tokio::test]
        async fn test_http_ingest_and_search_roundtrip() {
            let dir = TempDir::new().unwrap();
            let addr = serve_engine(dir.path()).await;
            let client = reqwest::Client::new();

            // Batch ingest: one fully-specified row, one relying on defaults
            let body = serde_json::json!([
                {"timestamp": 1_000, "level": "INFO", "service": "svc", "host": "h1", "message": "hello"},
                {"level": "error", "msg": "fallback fields"}
            ]);
            let resp = client
                .post(format!("http://{addr}/api/ingest"))
                .json(&body)
                .send()
                .await
                .unwrap();
            assert!(resp.status().is_success());

            let rows: Vec<LogRow> = client
                .get(format!("http://{addr}/api/search?limit=10"))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            assert_eq!(rows.len(), 2);

            let defaulted = rows.iter().find(|r| r.message == "fallback fields").unwrap();
            assert_eq!(defaulted.level, Level::Error.code());
            assert_eq!(defaulted.service, "default");
            assert_eq!(defaulted.host, "127.0.0.1");
            assert!(defaulted.timestamp > 0);

            // QL through the boundary
            let rows: Vec<LogRow> = client
                .get(format!("http://{addr}/api/search?q=service:svc&limit=10"))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].timestamp, 1_000);

            // Syntax errors map to 400, not an empty result
            let resp = client
                .get(format!("http://{addr}/api/search?q=%28"))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status().as_u16(), 400);
        }
    }
}
