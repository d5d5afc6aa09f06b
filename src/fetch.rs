use anyhow::{Result, bail};
use chrono::DateTime;
use csv::WriterBuilder;
use reqwest::Client;
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    config::{MetricSpec, StockConfig},
    output::write_atomic,
    series::Row,
};

/// What a refresh left on disk for one metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Fresh(PathBuf),
    Cached(PathBuf),
    Missing,
}

impl FetchOutcome {
    pub fn path(&self) -> Option<&Path> {
        match self {
            FetchOutcome::Fresh(p) | FetchOutcome::Cached(p) => Some(p),
            FetchOutcome::Missing => None,
        }
    }
}

/// Make an HTTP client with a fixed per-request timeout
pub fn mk_client(timeout: Duration) -> Result<Client> {
    let client = Client::builder()
        .user_agent("cycle_support/0.1 (rust)")
        .gzip(true)
        .brotli(true)
        .deflate(true)
        .timeout(timeout)
        .build()?;
    Ok(client)
}

/// Single GET decoded as JSON. Non-2xx is an error.
pub async fn get_json<T: for<'de> serde::Deserialize<'de>>(
    client: &Client,
    url: &str,
    timeout: Option<Duration>,
) -> Result<T> {
    let mut req = client.get(url);
    if let Some(t) = timeout {
        req = req.timeout(t);
    }
    let resp = req.send().await?;
    let status = resp.status();
    if !status.is_success() {
        let txt = resp.text().await.unwrap_or_default();
        bail!("HTTP {}; body: {}", status, txt.chars().take(200).collect::<String>());
    }
    Ok(resp.json::<T>().await?)
}

/// Refresh every metric that has an endpoint, one after another.
///
/// A failed request leaves the previous cache file in place; the run never aborts here.
pub async fn fetch_metrics(
    client: &Client,
    specs: &[MetricSpec],
    data_dir: &Path,
    delay: Duration,
) -> Vec<(String, FetchOutcome)> {
    let mut out = Vec::with_capacity(specs.len());
    for (i, spec) in specs.iter().enumerate() {
        let path = data_dir.join(&spec.file);
        let outcome = match &spec.url {
            Some(url) => {
                if i > 0 {
                    sleep(delay).await;
                }
                match fetch_one(client, url, &path).await {
                    Ok(()) => {
                        info!("fetched {}", spec.file);
                        FetchOutcome::Fresh(path)
                    }
                    Err(e) => {
                        warn!("{}: {:#} (using existing file if available)", spec.file, e);
                        cached(path)
                    }
                }
            }
            None => cached(path),
        };
        out.push((spec.key.clone(), outcome));
    }
    out
}

fn cached(path: PathBuf) -> FetchOutcome {
    if path.exists() {
        FetchOutcome::Cached(path)
    } else {
        FetchOutcome::Missing
    }
}

async fn fetch_one(client: &Client, url: &str, path: &Path) -> Result<()> {
    let body = get_json::<serde_json::Value>(client, url, None).await?;
    if !body.is_array() {
        bail!("expected a JSON array");
    }
    write_atomic(path, serde_json::to_string(&body)?.as_bytes())
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<Quote>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Quote {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
}

/// Daily rows of a chart payload; sessions without a close are skipped.
fn history_rows(resp: ChartResponse) -> Result<Vec<Row>> {
    if let Some(err) = resp.chart.error {
        bail!("{}: {}", err.code, err.description);
    }
    let Some(result) = resp.chart.result.and_then(|r| r.into_iter().next()) else {
        bail!("empty chart result");
    };
    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();
    let at = |v: &[Option<f64>], i: usize| v.get(i).copied().flatten();
    let rows = result
        .timestamp
        .unwrap_or_default()
        .iter()
        .enumerate()
        .filter_map(|(i, ts)| {
            Some(Row {
                date: DateTime::from_timestamp(*ts, 0)?.date_naive(),
                open: at(&quote.open, i),
                high: at(&quote.high, i),
                low: at(&quote.low, i),
                close: at(&quote.close, i)?,
            })
        })
        .collect();
    Ok(rows)
}

async fn fetch_history(client: &Client, url: &str, path: &Path) -> Result<usize> {
    let rows = history_rows(get_json::<ChartResponse>(client, url, None).await?)?;
    if rows.is_empty() {
        bail!("no daily closes in response");
    }
    let mut buf: Vec<u8> = Vec::new();
    {
        let mut wtr = WriterBuilder::new().from_writer(&mut buf);
        for r in &rows {
            wtr.serialize(r)?;
        }
        wtr.flush()?;
    }
    write_atomic(path, &buf)?;
    Ok(rows.len())
}

/// Refresh `<TICKER>.csv` for every stock from the daily chart endpoint.
///
/// `url_template` carries a `{ticker}` placeholder. Like [`fetch_metrics`], a
/// failed download keeps whatever file was there before.
pub async fn fetch_stock_histories(
    client: &Client,
    stocks: &[StockConfig],
    url_template: &str,
    data_dir: &Path,
    delay: Duration,
) -> Vec<(String, FetchOutcome)> {
    let mut out = Vec::with_capacity(stocks.len());
    for (i, stock) in stocks.iter().enumerate() {
        if i > 0 {
            sleep(delay).await;
        }
        let path = data_dir.join(format!("{}.csv", stock.ticker));
        let url = url_template.replace("{ticker}", &stock.ticker);
        let outcome = match fetch_history(client, &url, &path).await {
            Ok(n) => {
                info!("{}: fetched {} daily closes", stock.ticker, n);
                FetchOutcome::Fresh(path)
            }
            Err(e) => {
                warn!("{}: {:#} (using existing file if available)", stock.ticker, e);
                cached(path)
            }
        };
        out.push((stock.ticker.clone(), outcome));
    }
    out
}

/// Current BTC/USD from the simple-price endpoint; None on any failure.
pub async fn fetch_spot_price(client: &Client, url: &str, timeout: Duration) -> Option<f64> {
    match get_json::<serde_json::Value>(client, url, Some(timeout)).await {
        Ok(v) => {
            let price = v
                .get("bitcoin")
                .and_then(|b| b.get("usd"))
                .and_then(|p| p.as_f64());
            match price {
                Some(p) => info!("spot price: ${:.0}", p),
                None => warn!("spot price: unexpected payload"),
            }
            price
        }
        Err(e) => {
            warn!("spot price: {:#}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn spec(key: &str, url: Option<&str>) -> MetricSpec {
        MetricSpec {
            key: key.into(),
            url: url.map(str::to_string),
            file: format!("{key}.json"),
            date_field: "d".into(),
            value_field: "v".into(),
            positive_only: false,
        }
    }

    #[tokio::test]
    async fn test_failed_fetch_falls_back_to_cache() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("cached.json"), "[]").unwrap();
        let client = mk_client(Duration::from_millis(500)).unwrap();
        // port 9 on loopback refuses connections
        let specs = vec![
            spec("cached", Some("http://127.0.0.1:9/cached")),
            spec("absent", Some("http://127.0.0.1:9/absent")),
            spec("snapshot", None),
        ];
        let out = fetch_metrics(&client, &specs, dir.path(), Duration::ZERO).await;
        assert_eq!(out[0].1, FetchOutcome::Cached(dir.path().join("cached.json")));
        assert_eq!(out[1].1, FetchOutcome::Missing);
        assert_eq!(out[2].1, FetchOutcome::Missing);
        assert_eq!(fs::read_to_string(dir.path().join("cached.json")).unwrap(), "[]");
    }

    fn stock(ticker: &str) -> StockConfig {
        StockConfig {
            ticker: ticker.into(),
            name: ticker.into(),
            color: "#ffffff".into(),
            bottoms: Vec::new(),
        }
    }

    #[test]
    fn test_history_rows_skip_missing_closes() {
        let resp: ChartResponse = serde_json::from_str(
            r#"{"chart": {"result": [{
                "timestamp": [1672756200, 1672842600, 1672929000],
                "indicators": {"quote": [{
                    "open": [130.28, 126.89, null],
                    "high": [130.9, 128.66, null],
                    "low": [124.17, 125.08, null],
                    "close": [125.07, 126.36, null],
                    "volume": [112117500, 89113600, null]
                }]}
            }], "error": null}}"#,
        )
        .unwrap();
        let rows = history_rows(resp).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date.to_string(), "2023-01-03");
        assert_eq!(rows[0].close, 125.07);
        assert_eq!(rows[1].open, Some(126.89));
    }

    #[test]
    fn test_history_error_payload_is_an_error() {
        let resp: ChartResponse = serde_json::from_str(
            r#"{"chart": {"result": null, "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}}}"#,
        )
        .unwrap();
        let err = history_rows(resp).unwrap_err();
        assert!(err.to_string().starts_with("Not Found"));
    }

    #[tokio::test]
    async fn test_failed_history_fetch_falls_back_to_cache() {
        let dir = tempdir().unwrap();
        let cached_csv = "date,open,high,low,close\n2023-01-03,1,1,1,125.07\n";
        fs::write(dir.path().join("AAPL.csv"), cached_csv).unwrap();
        let client = mk_client(Duration::from_millis(500)).unwrap();
        let out = fetch_stock_histories(
            &client,
            &[stock("AAPL"), stock("TSLA")],
            "http://127.0.0.1:9/chart/{ticker}",
            dir.path(),
            Duration::ZERO,
        )
        .await;
        assert_eq!(out[0], ("AAPL".to_string(), FetchOutcome::Cached(dir.path().join("AAPL.csv"))));
        assert_eq!(out[1], ("TSLA".to_string(), FetchOutcome::Missing));
        assert_eq!(fs::read_to_string(dir.path().join("AAPL.csv")).unwrap(), cached_csv);
    }

    #[tokio::test]
    async fn test_spot_price_failure_is_none() {
        let client = mk_client(Duration::from_millis(500)).unwrap();
        let p = fetch_spot_price(&client, "http://127.0.0.1:9/price", Duration::from_millis(500)).await;
        assert!(p.is_none());
    }
}
