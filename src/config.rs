use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// One halving cycle: anchor, top and whether the top is historically closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleConfig {
    pub name: String,
    pub halving: NaiveDate,
    pub top: NaiveDate,
    pub top_price: f64,
    /// false while the bear market after the top is still unfolding
    pub confirmed: bool,
    /// kept on the chart but left out of the pattern (e.g. Mt. Gox)
    pub exclude: bool,
    pub color: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BottomConfig {
    pub label: String,
    pub bottom: NaiveDate,
    pub color: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockConfig {
    pub ticker: String,
    pub name: String,
    pub color: String,
    pub bottoms: Vec<BottomConfig>,
}

/// Where an on-chain metric comes from and how its JSON rows are shaped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSpec {
    pub key: String,
    /// None for snapshot-only files that are never refreshed
    pub url: Option<String>,
    pub file: String,
    pub date_field: String,
    pub value_field: String,
    #[serde(default)]
    pub positive_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Windows {
    pub accumulation_days: i64,
    pub btc_plot_days: i64,
    pub stock_plot_days: i64,
    pub stock_min_points: usize,
    pub netflow_smoothing: usize,
}

impl Default for Windows {
    fn default() -> Self {
        Self {
            accumulation_days: 200,
            btc_plot_days: 1100,
            // ~2.75 trading years
            stock_plot_days: 700,
            stock_min_points: 10,
            netflow_smoothing: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub delay_ms: u64,
    pub timeout_secs: u64,
    pub spot_timeout_secs: u64,
    pub spot_price_url: String,
    /// Daily chart endpoint; `{ticker}` is replaced per stock.
    pub stock_history_url: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            delay_ms: 1000,
            timeout_secs: 30,
            spot_timeout_secs: 10,
            spot_price_url:
                "https://api.coingecko.com/api/v3/simple/price?ids=bitcoin&vs_currencies=usd"
                    .to_string(),
            stock_history_url:
                "https://query1.finance.yahoo.com/v8/finance/chart/{ticker}?period1=0&period2=9999999999&interval=1d"
                    .to_string(),
        }
    }
}

/// Everything the pipelines used to hard-code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub price_csv: String,
    pub cycles: Vec<CycleConfig>,
    pub cycle_tops: Vec<NaiveDate>,
    pub cycle_bottoms: Vec<NaiveDate>,
    pub stocks: Vec<StockConfig>,
    pub metrics: Vec<MetricSpec>,
    pub outflow: MetricSpec,
    pub windows: Windows,
    pub fetch: FetchConfig,
    pub dashboard_start: NaiveDate,
    pub onchain_start: NaiveDate,
}

impl AppConfig {
    /// Built-in defaults, optionally overridden field by field from a JSON file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => {
                let raw = fs::read_to_string(p)
                    .with_context(|| format!("read config {}", p.display()))?;
                serde_json::from_str(&raw).with_context(|| format!("parse config {}", p.display()))
            }
            None => Ok(Self::default()),
        }
    }

    /// Cycles that have no confirmed top yet.
    pub fn open_cycle(&self) -> Option<&CycleConfig> {
        self.cycles.iter().rev().find(|c| !c.confirmed)
    }

    pub fn metric(&self, key: &str) -> Option<&MetricSpec> {
        self.metrics.iter().find(|m| m.key == key)
    }
}

fn date(s: &str) -> NaiveDate {
    // only called on the literals below
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap_or_default()
}

fn cycle(
    name: &str,
    halving: &str,
    top: &str,
    top_price: f64,
    confirmed: bool,
    exclude: bool,
    color: &str,
) -> CycleConfig {
    CycleConfig {
        name: name.to_string(),
        halving: date(halving),
        top: date(top),
        top_price,
        confirmed,
        exclude,
        color: color.to_string(),
    }
}

fn bottom(label: &str, bottom: &str, color: &str) -> BottomConfig {
    BottomConfig {
        label: label.to_string(),
        bottom: date(bottom),
        color: color.to_string(),
    }
}

fn metric(key: &str, url: Option<&str>, file: &str, date_field: &str, value_field: &str) -> MetricSpec {
    MetricSpec {
        key: key.to_string(),
        url: url.map(str::to_string),
        file: file.to_string(),
        date_field: date_field.to_string(),
        value_field: value_field.to_string(),
        positive_only: false,
    }
}

pub const MVRV: &str = "mvrv_zscore";
pub const REALIZED_PRICE: &str = "realized_price";
pub const LTH_SUPPLY: &str = "lth_supply";
pub const NETFLOW: &str = "netflow";

impl Default for AppConfig {
    fn default() -> Self {
        let mut lth = metric(
            LTH_SUPPLY,
            Some("https://bitcoin-data.com/v1/long-term-hodler-supply-btc"),
            "lth_supply.json",
            "d",
            "longTermHodlerSupplyBtc",
        );
        lth.positive_only = true;

        Self {
            price_csv: "btc-usd-max.csv".to_string(),
            cycles: vec![
                cycle("Cycle 1  (Halving Nov 2012)", "2012-11-28", "2013-12-04", 1150.0, true, true, "#888888"),
                cycle("Cycle 2  (Halving Jul 2016)", "2016-07-09", "2017-12-17", 20000.0, true, false, "#f39c12"),
                cycle("Cycle 3  (Halving May 2020)", "2020-05-11", "2021-11-10", 69000.0, true, false, "#2ecc71"),
                cycle("Cycle 4  (Halving Apr 2024)", "2024-04-19", "2025-10-06", 124774.0, false, false, "#3498db"),
            ],
            cycle_tops: ["2013-12-04", "2017-12-17", "2021-11-10", "2025-10-06"]
                .iter()
                .map(|s| date(s))
                .collect(),
            cycle_bottoms: ["2015-01-14", "2018-12-15", "2022-11-21"]
                .iter()
                .map(|s| date(s))
                .collect(),
            stocks: vec![
                StockConfig {
                    ticker: "AAPL".into(),
                    name: "Apple".into(),
                    color: "#a8d8ea".into(),
                    bottoms: vec![
                        bottom("Post dot-com", "2003-04-14", "#e74c3c"),
                        bottom("Post GFC", "2009-01-20", "#f39c12"),
                        bottom("Post 2022", "2023-01-03", "#2ecc71"),
                    ],
                },
                StockConfig {
                    ticker: "AMZN".into(),
                    name: "Amazon".into(),
                    color: "#f39c12".into(),
                    bottoms: vec![
                        bottom("Post dot-com", "2001-09-28", "#e74c3c"),
                        bottom("Post GFC", "2008-11-21", "#f39c12"),
                        bottom("Post 2022", "2022-12-28", "#2ecc71"),
                    ],
                },
                StockConfig {
                    ticker: "TSLA".into(),
                    name: "Tesla".into(),
                    color: "#e74c3c".into(),
                    bottoms: vec![bottom("Post 2022", "2022-12-27", "#e74c3c")],
                },
            ],
            metrics: vec![
                metric(
                    MVRV,
                    Some("https://bitcoin-data.com/api/v1/mvrv-zscore"),
                    "mvrv_zscore.json",
                    "d",
                    "mvrvZscore",
                ),
                metric(
                    REALIZED_PRICE,
                    Some("https://bitcoin-data.com/api/v1/realized-price"),
                    "realized_price.json",
                    "theDay",
                    "realizedPrice",
                ),
                lth,
                metric(
                    NETFLOW,
                    Some("https://bitcoin-data.com/v1/exchange-netflow-btc"),
                    "exchange_netflow_btc.json",
                    "d",
                    "exchangeNetflowBtc",
                ),
            ],
            outflow: metric(
                "exchange_outflow_usd",
                None,
                "exchange_outflow_usd.json",
                "d",
                "exchangeOutflowUsd",
            ),
            windows: Windows::default(),
            fetch: FetchConfig::default(),
            dashboard_start: date("2017-01-01"),
            onchain_start: date("2012-01-01"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.cycles.len(), 4);
        assert!(cfg.cycles[0].exclude);
        assert_eq!(cfg.open_cycle().unwrap().top_price, 124774.0);
        assert_eq!(cfg.metric(REALIZED_PRICE).unwrap().date_field, "theDay");
        assert!(cfg.metric(LTH_SUPPLY).unwrap().positive_only);
        assert_eq!(cfg.windows.accumulation_days, 200);
        assert_eq!(cfg.cycle_bottoms.len(), 3);
    }

    #[test]
    fn test_partial_override_keeps_other_defaults() {
        let mut f = NamedTempFile::new().unwrap();
        write!(
            f,
            r#"{{"windows": {{"accumulation_days": 150}}, "price_csv": "prices.csv"}}"#
        )
        .unwrap();
        let cfg = AppConfig::load(Some(f.path())).unwrap();
        assert_eq!(cfg.windows.accumulation_days, 150);
        assert_eq!(cfg.windows.btc_plot_days, 1100);
        assert_eq!(cfg.price_csv, "prices.csv");
        assert_eq!(cfg.cycles.len(), 4);
    }

    #[test]
    fn test_default_dates_parse() {
        let cfg = AppConfig::default();
        let floor = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
        let mut dates = vec![cfg.dashboard_start, cfg.onchain_start];
        dates.extend(cfg.cycles.iter().flat_map(|c| [c.halving, c.top]));
        dates.extend(&cfg.cycle_tops);
        dates.extend(&cfg.cycle_bottoms);
        dates.extend(cfg.stocks.iter().flat_map(|s| s.bottoms.iter().map(|b| b.bottom)));
        assert_eq!(dates.len(), 2 + 8 + 4 + 3 + 7);
        for d in dates {
            assert!(d > floor, "default date {d} fell back to the epoch");
        }
        for c in &cfg.cycles {
            assert!(c.top > c.halving, "{}", c.name);
        }
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        assert!(AppConfig::load(Some(Path::new("/nonexistent/cfg.json"))).is_err());
    }
}
