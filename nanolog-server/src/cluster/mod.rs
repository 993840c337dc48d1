//! Query aggregator for console nodes
//!
//! Fans a query out to every data node in parallel, then merges the partial
//! results deterministically: rows sort by timestamp descending (ties broken
//! by service, then message) and truncate to the limit; histogram buckets
//! sum where times collide; stats sum per key. A failing peer is logged and
//! simply contributes nothing, so a degraded cluster still answers.

use nanolog_core::{HistogramPoint, LogRow, SystemStats};
use reqwest::header::AUTHORIZATION;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

const PEER_TIMEOUT: Duration = Duration::from_secs(10);

/// Parameters forwarded to each data node.
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    /// The caller's raw query string, passed through verbatim
    pub raw_query: String,
    /// Result cap applied after the merge
    pub limit: usize,
    /// Caller's Authorization header, forwarded as-is
    pub auth: Option<String>,
}

/// Stateless scatter-gather over a fixed set of peer engines.
pub struct Aggregator {
    nodes: Vec<String>,
    client: reqwest::Client,
}

impl Aggregator {
    pub fn new(nodes: Vec<String>) -> Self {
        Self {
            nodes,
            client: reqwest::Client::new(),
        }
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// Scatter-gather search: merged rows, timestamp-descending, truncated.
    pub async fn search(&self, params: &QueryParams) -> Vec<LogRow> {
        let parts: Vec<Vec<LogRow>> = self.fan_out("/api/search", params).await;
        merge_rows(parts.into_iter().flatten().collect(), params.limit)
    }

    /// Scatter-gather histogram: bucket counts summed, ascending by time.
    pub async fn histogram(&self, params: &QueryParams) -> Vec<HistogramPoint> {
        let parts: Vec<Vec<HistogramPoint>> = self.fan_out("/api/histogram", params).await;
        merge_histograms(parts)
    }

    /// Scatter-gather stats: scalar sums and per-key map merges.
    pub async fn stats(&self, auth: Option<&str>) -> SystemStats {
        let params = QueryParams {
            auth: auth.map(str::to_string),
            ..Default::default()
        };
        let parts: Vec<SystemStats> = self.fan_out("/api/stats", &params).await;
        merge_stats(parts)
    }

    /// Issue `GET {node}{path}?{raw_query}` to every node concurrently and
    /// collect the successful responses.
    async fn fan_out<T>(&self, path: &str, params: &QueryParams) -> Vec<T>
    where
        T: serde::de::DeserializeOwned + Send + 'static,
    {
        let mut tasks = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let client = self.client.clone();
            let url = peer_url(node, path, &params.raw_query);
            let auth = params.auth.clone();
            tasks.push(tokio::spawn(fetch::<T>(client, url, auth)));
        }

        let mut results = Vec::new();
        for task in tasks {
            match task.await {
                Ok(Ok(part)) => results.push(part),
                Ok(Err((url, e))) => warn!(node = %url, error = %e, "peer query failed"),
                Err(e) => warn!(error = %e, "peer task panicked"),
            }
        }
        results
    }
}

fn peer_url(node: &str, path: &str, raw_query: &str) -> String {
    let base = node.trim_end_matches('/');
    if raw_query.is_empty() {
        format!("{base}{path}")
    } else {
        format!("{base}{path}?{raw_query}")
    }
}

async fn fetch<T: serde::de::DeserializeOwned>(
    client: reqwest::Client,
    url: String,
    auth: Option<String>,
) -> Result<T, (String, reqwest::Error)> {
    let mut request = client.get(&url).timeout(PEER_TIMEOUT);
    if let Some(auth) = auth {
        request = request.header(AUTHORIZATION, auth);
    }

    let response = async {
        request
            .send()
            .await?
            .error_for_status()?
            .json::<T>()
            .await
    }
    .await;
    response.map_err(|e| (url, e))
}

/// Global sort by timestamp descending with deterministic tie-breaks
/// (service, then message), truncated to `limit` (0 = unbounded).
pub fn merge_rows(mut rows: Vec<LogRow>, limit: usize) -> Vec<LogRow> {
    rows.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| a.service.cmp(&b.service))
            .then_with(|| a.message.cmp(&b.message))
    });
    if limit > 0 && rows.len() > limit {
        rows.truncate(limit);
    }
    rows
}

/// Sum bucket counts where bucket times collide; ascending by time.
pub fn merge_histograms(parts: Vec<Vec<HistogramPoint>>) -> Vec<HistogramPoint> {
    let mut combined: HashMap<i64, i64> = HashMap::new();
    for part in parts {
        for point in part {
            *combined.entry(point.time).or_insert(0) += point.count;
        }
    }

    let mut result: Vec<HistogramPoint> = combined
        .into_iter()
        .map(|(time, count)| HistogramPoint { time, count })
        .collect();
    result.sort_by_key(|p| p.time);
    result
}

/// Sum scalar fields and merge the distribution maps per key.
pub fn merge_stats(parts: Vec<SystemStats>) -> SystemStats {
    let mut total = SystemStats::default();
    for part in parts {
        total.ingestion_rate += part.ingestion_rate;
        total.total_logs += part.total_logs;
        total.disk_usage += part.disk_usage;
        for (level, count) in part.level_dist {
            *total.level_dist.entry(level).or_insert(0) += count;
        }
        for (service, count) in part.top_services {
            *total.top_services.entry(service).or_insert(0) += count;
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(ts: i64, service: &str, message: &str) -> LogRow {
        LogRow {
            timestamp: ts,
            level: 1,
            service: service.into(),
            host: "h".into(),
            message: message.into(),
            trace_id: String::new(),
        }
    }

    #[test]
    fn test_merge_rows_sorts_and_truncates() {
        // Two peers: 60 and 80 rows with interleaved timestamps
        let peer_a: Vec<LogRow> = (0..60).map(|i| row(i * 2, "a", "m")).collect();
        let peer_b: Vec<LogRow> = (0..80).map(|i| row(i * 2 + 1, "b", "m")).collect();

        let all: Vec<LogRow> = peer_a.into_iter().chain(peer_b).collect();
        let merged = merge_rows(all, 100);

        assert_eq!(merged.len(), 100);
        for pair in merged.windows(2) {
            assert!(pair[0].timestamp > pair[1].timestamp);
        }
        // Drawn from both peers
        assert!(merged.iter().any(|r| r.service == "a"));
        assert!(merged.iter().any(|r| r.service == "b"));
    }

    #[test]
    fn test_merge_rows_deterministic_ties() {
        let rows = vec![
            row(5, "zeta", "2"),
            row(5, "alpha", "1"),
            row(5, "alpha", "0"),
            row(9, "any", "x"),
        ];
        let merged = merge_rows(rows, 0);

        assert_eq!(merged[0].timestamp, 9);
        assert_eq!(merged[1].service, "alpha");
        assert_eq!(merged[1].message, "0");
        assert_eq!(merged[2].message, "1");
        assert_eq!(merged[3].service, "zeta");
    }

    #[test]
    fn test_merge_histograms_sums_colliding_buckets() {
        let merged = merge_histograms(vec![
            vec![
                HistogramPoint { time: 0, count: 2 },
                HistogramPoint { time: 10, count: 1 },
            ],
            vec![
                HistogramPoint { time: 10, count: 3 },
                HistogramPoint { time: 20, count: 4 },
            ],
        ]);

        assert_eq!(
            merged,
            vec![
                HistogramPoint { time: 0, count: 2 },
                HistogramPoint { time: 10, count: 4 },
                HistogramPoint { time: 20, count: 4 },
            ]
        );
    }

    #[test]
    fn test_merge_stats_sums_fields_and_maps() {
        let mut a = SystemStats {
            ingestion_rate: 1.5,
            total_logs: 10,
            disk_usage: 100,
            ..Default::default()
        };
        a.level_dist.insert("ERROR".into(), 4);
        a.top_services.insert("order".into(), 10);

        let mut b = SystemStats {
            ingestion_rate: 0.5,
            total_logs: 5,
            disk_usage: 50,
            ..Default::default()
        };
        b.level_dist.insert("ERROR".into(), 1);
        b.level_dist.insert("INFO".into(), 4);
        b.top_services.insert("order".into(), 2);
        b.top_services.insert("billing".into(), 3);

        let merged = merge_stats(vec![a, b]);
        assert_eq!(merged.ingestion_rate, 2.0);
        assert_eq!(merged.total_logs, 15);
        assert_eq!(merged.disk_usage, 150);
        assert_eq!(merged.level_dist["ERROR"], 5);
        assert_eq!(merged.level_dist["INFO"], 4);
        assert_eq!(merged.top_services["order"], 12);
        assert_eq!(merged.top_services["billing"], 3);
    }

    #[test]
    fn test_peer_url() {
        assert_eq!(
            peer_url("http://n1:8088/", "/api/search", "limit=10"),
            "http://n1:8088/api/search?limit=10"
        );
        assert_eq!(
            peer_url("http://n1:8088", "/api/stats", ""),
            "http://n1:8088/api/stats"
        );
    }

    mod live {
        use super::*;
        use crate::api;
        use nanolog_core::engine::{EngineConfig, QueryEngine};
        use nanolog_core::segment::{SegmentReader, SegmentWriter};
        use nanolog_core::Level;
        use std::net::SocketAddr;
        use std::sync::Arc;
        use std::time::Duration;
        use tempfile::TempDir;

        fn open_engine(dir: &std::path::Path) -> Arc<QueryEngine> {
            QueryEngine::open(
                EngineConfig {
                    data_dir: dir.to_path_buf(),
                    retention: Duration::from_secs(168 * 3600),
                    max_table_size: 64 * 1024 * 1024,
                },
                Arc::new(SegmentReader::new()),
                Arc::new(SegmentWriter::new()),
            )
            .unwrap()
        }

        async fn serve(app: axum::Router) -> SocketAddr {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
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
        async fn test_scatter_gather_over_live_peers() {
            let dir_a = TempDir::new().unwrap();
            let dir_b = TempDir::new().unwrap();
            let engine_a = open_engine(dir_a.path());
            let engine_b = open_engine(dir_b.path());

            // Peer A: 60 rows on even timestamps; peer B: 80 on odd
            for i in 0..60i64 {
                engine_a.ingest(i * 2, Level::Info.code(), "node-a", "h", "m", "");
            }
            for i in 0..80i64 {
                engine_b.ingest(i * 2 + 1, Level::Info.code(), "node-b", "h", "m", "");
            }

            let addr_a = serve(api::engine_router(engine_a)).await;
            let addr_b = serve(api::engine_router(engine_b)).await;

            let aggregator = Aggregator::new(vec![
                format!("http://{addr_a}"),
                format!("http://{addr_b}"),
                // A dead peer degrades gracefully
                "http://127.0.0.1:1".to_string(),
            ]);

            let rows = aggregator
                .search(&QueryParams {
                    raw_query: "limit=100".to_string(),
                    limit: 100,
                    auth: None,
                })
                .await;

            assert_eq!(rows.len(), 100);
            for pair in rows.windows(2) {
                assert!(pair[0].timestamp > pair[1].timestamp);
            }
            assert!(rows.iter().any(|r| r.service == "node-a"));
            assert!(rows.iter().any(|r| r.service == "node-b"));

            let stats = aggregator.stats(None).await;
            assert_eq!(stats.total_logs, 140);
            assert_eq!(stats.top_services["node-a"], 60);
            assert_eq!(stats.top_services["node-b"], 80);
        }
    }
}
