use chrono::{NaiveDate, TimeDelta};
use cycle_support::{
    AccumulationArgs, CommonArgs, DashboardArgs, OnchainArgs, StocksArgs, accumulation,
    config::{AppConfig, BottomConfig, CycleConfig, StockConfig},
    cycle::{CycleAnchor, DetectParams, normalize_and_detect, value_from_percent},
    dashboard, onchain,
    series::load_price_csv,
    stocks,
};
use std::{fs, path::Path};
use tempfile::{TempDir, tempdir};

fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

/// Halving on day 0, accumulation low of 300 on day 120, top of 1000 on day 366,
/// bear low of 350 on day 700.
fn btc_price(n: i64) -> f64 {
    match n {
        120 => 300.0,
        366 => 1000.0,
        700 => 350.0,
        n if n < 366 => 400.0 + n as f64,
        _ => 800.0,
    }
}

fn write_fixture() -> (TempDir, CommonArgs) {
    let dir = tempdir().unwrap();
    let start = d("2020-01-01");

    let mut csv = String::from("snapped_at,price,market_cap,total_volume\n");
    for n in 0..1100 {
        csv.push_str(&format!(
            "{} 00:00:00 UTC,{},0,0\n",
            start + TimeDelta::days(n),
            btc_price(n)
        ));
    }
    fs::write(dir.path().join("btc-usd-max.csv"), csv).unwrap();

    let mut aapl = String::from("Date,Open,High,Low,Close,Adj Close,Volume\n");
    for n in 0..400 {
        let close = if n == 30 { 90.0 } else { 100.0 + n as f64 * 0.1 };
        aapl.push_str(&format!("{},1,1,1,{},{},1000\n", start + TimeDelta::days(n), close, close));
    }
    fs::write(dir.path().join("AAPL.csv"), aapl).unwrap();

    let mut cfg = AppConfig::default();
    cfg.cycles = vec![CycleConfig {
        name: "Cycle X".into(),
        halving: start,
        top: d("2021-01-01"),
        top_price: 1000.0,
        confirmed: true,
        exclude: false,
        color: "#2ecc71".into(),
    }];
    cfg.stocks = vec![StockConfig {
        ticker: "AAPL".into(),
        name: "Apple".into(),
        color: "#a8d8ea".into(),
        bottoms: vec![BottomConfig {
            label: "Post test".into(),
            bottom: start,
            color: "#e74c3c".into(),
        }],
    }];
    cfg.dashboard_start = start;
    cfg.onchain_start = start;

    for spec in &cfg.metrics {
        let rows: Vec<serde_json::Value> = (0..400)
            .map(|n| {
                let mut row = serde_json::Map::new();
                row.insert(spec.date_field.clone(), (start + TimeDelta::days(n)).to_string().into());
                row.insert(spec.value_field.clone(), format!("{}", 1.0 + n as f64).into());
                serde_json::Value::Object(row)
            })
            .collect();
        fs::write(dir.path().join(&spec.file), serde_json::to_string(&rows).unwrap()).unwrap();
    }

    let config_path = dir.path().join("config.json");
    fs::write(&config_path, serde_json::to_string_pretty(&cfg).unwrap()).unwrap();

    let common = CommonArgs {
        data_dir: Some(dir.path().to_path_buf()),
        out: Some(dir.path().join("out")),
        config: Some(config_path),
        as_of: Some(d("2026-01-01")),
    };
    (dir, common)
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

fn assert_png(path: &Path) {
    let bytes = fs::read(path).unwrap();
    assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n", "{} is not a PNG", path.display());
}

fn edit_config(common: &CommonArgs, f: impl FnOnce(&mut AppConfig)) {
    let path = common.config.as_deref().unwrap();
    let mut cfg = AppConfig::load(Some(path)).unwrap();
    f(&mut cfg);
    fs::write(path, serde_json::to_string_pretty(&cfg).unwrap()).unwrap();
}

#[test]
fn test_loaded_csv_reproduces_cycle_verdict() {
    let (dir, _) = write_fixture();
    let price = load_price_csv(&dir.path().join("btc-usd-max.csv")).unwrap();
    assert_eq!(price.len(), 1100);
    let r = normalize_and_detect(
        &price,
        CycleAnchor::new(d("2020-01-01"), 1000.0).unwrap(),
        &DetectParams::calendar(200, 366, 1100),
    )
    .unwrap();
    assert_eq!(r.early.offset, 120);
    assert_eq!(r.early.percent, -70.0);
    assert_eq!(r.late.as_ref().unwrap().offset, 700);
    assert_eq!(r.support_held, Some(true));
    assert!((value_from_percent(r.early.percent, 1000.0) - 300.0).abs() < 1e-9);
}

#[test]
fn test_accumulation_writes_chart() {
    let (_dir, common) = write_fixture();
    let out = common.out.clone().unwrap();
    accumulation::execute(&AccumulationArgs { common }).unwrap();
    assert_png(&out.join("btc_accumulation_support.png"));
}

#[test]
fn test_accumulation_skips_open_cycle_not_started() {
    let (_dir, mut common) = write_fixture();
    edit_config(&common, |cfg| {
        cfg.cycles.push(CycleConfig {
            name: "Cycle Y".into(),
            halving: d("2024-04-19"),
            top: d("2025-10-06"),
            top_price: 2000.0,
            confirmed: false,
            exclude: false,
            color: "#3498db".into(),
        });
    });
    // before the open halving
    common.as_of = Some(d("2023-06-01"));
    let out = common.out.clone().unwrap();
    accumulation::execute(&AccumulationArgs { common }).unwrap();
    assert_png(&out.join("btc_accumulation_support.png"));
}

#[tokio::test]
async fn test_stocks_writes_chart() {
    let (_dir, common) = write_fixture();
    let out = common.out.clone().unwrap();
    let args = StocksArgs {
        common,
        offline: Some(true),
    };
    stocks::execute(&args).await.unwrap();
    assert_png(&out.join("stocks_accumulation.png"));
}

#[tokio::test]
async fn test_stocks_without_any_history_is_fatal() {
    let (dir, common) = write_fixture();
    fs::remove_file(dir.path().join("AAPL.csv")).unwrap();
    let out = common.out.clone().unwrap();
    let args = StocksArgs {
        common,
        offline: Some(true),
    };
    let err = stocks::execute(&args).await.unwrap_err();
    assert!(format!("{:#}", err).contains("no price history"));
    assert!(!out.join("stocks_accumulation.png").exists());
}

#[tokio::test]
async fn test_stocks_download_failure_uses_cached_csv() {
    let (_dir, common) = write_fixture();
    edit_config(&common, |cfg| {
        // loopback port 9 refuses connections
        cfg.fetch.stock_history_url = "http://127.0.0.1:9/chart/{ticker}".into();
        cfg.fetch.timeout_secs = 1;
    });
    let out = common.out.clone().unwrap();
    let args = StocksArgs {
        common,
        offline: Some(false),
    };
    stocks::execute(&args).await.unwrap();
    assert_png(&out.join("stocks_accumulation.png"));
}

#[test]
fn test_onchain_writes_chart() {
    let (_dir, common) = write_fixture();
    let out = common.out.clone().unwrap();
    onchain::execute(&OnchainArgs { common }).unwrap();
    assert_png(&out.join("btc_onchain_dashboard.png"));
}

#[test]
fn test_missing_price_csv_is_fatal() {
    let (dir, common) = write_fixture();
    fs::remove_file(dir.path().join("btc-usd-max.csv")).unwrap();
    let err = accumulation::execute(&AccumulationArgs { common }).unwrap_err();
    assert!(format!("{:#}", err).contains("btc-usd-max.csv"));
}

#[tokio::test]
async fn test_offline_dashboard_writes_html() {
    let (_dir, common) = write_fixture();
    let out = common.out.clone().unwrap();
    let args = DashboardArgs {
        common,
        offline: Some(true),
        ..Default::default()
    };
    dashboard::execute(&args).await.unwrap();
    let html = read(&out.join("btc_dashboard.html"));
    assert!(html.contains("Bitcoin On-Chain Dashboard"));
    assert!(html.contains("Plotly.newPlot"));
    // last metric row is 2021-02-03 with value 400
    assert!(html.contains(">400.00<"));
    assert!(html.contains("SELL ZONE"));
}
