//! Self-contained HTML dashboard: stat cards over a four-panel Plotly chart.
//!
//! The figure is plain Plotly JSON assembled with `serde_json::json!` and
//! rendered client-side from the CDN build, so the page needs no server.

use anyhow::{Result, bail};
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde_json::{Value, json};
use std::{ops::Range, path::Path, time::Duration};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    DashboardArgs,
    config::AppConfig,
    fetch::{FetchOutcome, fetch_metrics, fetch_spot_price, mk_client},
    onchain::{DashboardStats, MetricSet, MetricTable, MvrvZone},
    output::{dollars, thousands, write_atomic},
    schedule::{acquire_lock, duration_until_next_local, parse_hhmm, print_cron_hint},
    series::{TimeSeries, load_price_csv},
};

const PLOTLY_CDN: &str = "https://cdn.plot.ly/plotly-2.35.2.min.js";
const ROW_HEIGHTS: [f64; 4] = [1.0, 1.2, 1.0, 1.0];
const ROW_GAP: f64 = 0.03;

pub async fn execute(args: &DashboardArgs) -> Result<()> {
    let cfg = AppConfig::load(args.common.config.as_deref())?;
    let data_dir = args.common.data_dir.clone().unwrap_or_else(|| ".".into());
    let out_dir = args.common.out.clone().unwrap_or_else(|| ".".into());

    // Optional single-instance lock (covers daemon & cron)
    let _lock_guard = match &args.lock_file {
        Some(p) => Some(acquire_lock(p)?),
        None => None,
    };

    let client = mk_client(Duration::from_secs(cfg.fetch.timeout_secs))?;

    if let Some(hhmm) = &args.daily_at {
        let at = parse_hhmm(hhmm)?;
        // each daemon run is dated by the wall clock, not --as-of
        loop {
            let now = Utc::now();
            if let Err(e) = run_once(&client, &cfg, args, &data_dir, &out_dir, now.date_naive(), now).await {
                warn!("dashboard run failed: {:#}", e);
            }
            let dur = duration_until_next_local(at)?;
            info!("sleeping until next daily run: {}s", dur.as_secs());
            sleep(dur).await;
        }
    }

    let now = Utc::now();
    let as_of = args.common.as_of.unwrap_or_else(|| now.date_naive());
    run_once(&client, &cfg, args, &data_dir, &out_dir, as_of, now).await?;
    if let Ok(exe) = std::env::current_exe() {
        print_cron_hint(&exe, &data_dir, &out_dir);
    }
    Ok(())
}

/// Fetch, merge, render and write `btc_dashboard.html` once.
pub async fn run_once(
    client: &Client,
    cfg: &AppConfig,
    args: &DashboardArgs,
    data_dir: &Path,
    out_dir: &Path,
    as_of: NaiveDate,
    now: DateTime<Utc>,
) -> Result<()> {
    let spot = if args.offline.unwrap_or(false) {
        info!("offline: using cached metric files");
        None
    } else {
        println!("Fetching data…");
        let outcomes = fetch_metrics(
            client,
            &cfg.metrics,
            data_dir,
            Duration::from_millis(cfg.fetch.delay_ms),
        )
        .await;
        for (key, outcome) in &outcomes {
            match outcome {
                FetchOutcome::Fresh(_) => println!("  ✓ {key}"),
                FetchOutcome::Cached(_) => println!("  ✗ {key} (using existing file)"),
                FetchOutcome::Missing => println!("  ✗ {key} (no data)"),
            }
        }
        fetch_spot_price(
            client,
            &cfg.fetch.spot_price_url,
            Duration::from_secs(cfg.fetch.spot_timeout_secs),
        )
        .await
    };

    println!("Loading and merging data…");
    let metrics = MetricSet::load(data_dir, cfg);
    let price_path = data_dir.join(&cfg.price_csv);
    let price = if price_path.exists() {
        load_price_csv(&price_path)?
    } else {
        warn!("{} not found; market price limited to the live quote", price_path.display());
        TimeSeries::default()
    };
    let table = MetricTable::build(
        &metrics,
        &price,
        spot.map(|p| (as_of, p)),
        cfg.dashboard_start,
        cfg.windows.netflow_smoothing,
    );
    let (Some(first), Some(last)) = (table.rows().first(), table.rows().last()) else {
        bail!("no metric data on or after {}", cfg.dashboard_start);
    };
    println!("  {} rows, {} → {}", table.rows().len(), first.date, last.date);

    println!("Building dashboard…");
    let stats = DashboardStats::from_table(&table);
    let html = build_html(&stats, &table, cfg, now)?;
    let path = out_dir.join("btc_dashboard.html");
    write_atomic(&path, html.as_bytes())?;
    println!("  Dashboard saved → {}", path.display());
    Ok(())
}

/// Vertical domains of the stacked panels, top panel first.
pub fn row_domains() -> [(f64, f64); 4] {
    let total: f64 = ROW_HEIGHTS.iter().sum();
    let unit = (1.0 - ROW_GAP * (ROW_HEIGHTS.len() - 1) as f64) / total;
    let mut top = 1.0;
    let mut out = [(0.0, 0.0); 4];
    for (slot, h) in out.iter_mut().zip(ROW_HEIGHTS) {
        let bottom = (top - h * unit).max(0.0);
        *slot = (bottom, top);
        top = bottom - ROW_GAP;
    }
    out
}

/// Runs of consecutive rows on the same side of the realized price.
pub fn crossover_segments(above: &[bool]) -> Vec<(bool, Range<usize>)> {
    let mut out = Vec::new();
    let mut start = 0;
    for i in 1..=above.len() {
        if i == above.len() || above[i] != above[start] {
            out.push((above[start], start..i));
            start = i;
        }
    }
    out
}

fn day(d: NaiveDate) -> String {
    d.to_string()
}

fn hline(yref: &str, y: f64, color: &str, width: f64, dash: &str, opacity: f64) -> Value {
    json!({
        "type": "line", "xref": "x domain", "x0": 0, "x1": 1,
        "yref": yref, "y0": y, "y1": y,
        "line": {"color": color, "width": width, "dash": dash},
        "opacity": opacity,
    })
}

fn vline(yref: &str, x: NaiveDate, color: &str) -> Value {
    json!({
        "type": "line", "xref": "x", "x0": day(x), "x1": day(x),
        "yref": format!("{yref} domain"), "y0": 0, "y1": 1,
        "line": {"color": color, "width": 1, "dash": "dash"},
    })
}

fn callout(yref: &str, x: NaiveDate, y: f64, text: String, color: &str) -> Value {
    json!({
        "x": day(x), "y": y, "xref": "x", "yref": yref,
        "text": text,
        "showarrow": true, "arrowhead": 2, "arrowwidth": 1.5, "arrowcolor": color,
        "ax": 70, "ay": -35,
        "font": {"color": color, "size": 11},
        "bgcolor": "rgba(0,0,0,0.75)", "bordercolor": color, "borderwidth": 1,
    })
}

fn signed_thousands(v: f64) -> String {
    if v >= 0.0 {
        format!("+{}", thousands(v))
    } else {
        thousands(v)
    }
}

/// Plotly figure (`data` + `layout`) for the four panels.
pub fn build_figure(stats: &DashboardStats, table: &MetricTable, cfg: &AppConfig) -> Value {
    let mut data: Vec<Value> = Vec::new();
    let mut shapes: Vec<Value> = Vec::new();
    let mut annotations: Vec<Value> = Vec::new();
    let domains = row_domains();
    let titles = [
        "MVRV Z-Score",
        "Market Price vs Realized Price (Log Scale)",
        "Long-Term Holder Supply (millions BTC)",
        "Exchange Netflow — 30-Day Moving Average (BTC/day)",
    ];
    for (title, (_, top)) in titles.iter().zip(domains) {
        annotations.push(json!({
            "text": title, "showarrow": false,
            "xref": "paper", "yref": "paper", "x": 0.5, "y": top,
            "xanchor": "center", "yanchor": "bottom",
            "font": {"size": 13},
        }));
    }

    // panel 1: MVRV, one trace per zone so each stretch takes the zone colour
    for (y0, y1, fill) in [
        (-10.0, 0.0, "rgba(0,255,136,0.06)"),
        (0.0, 3.7, "rgba(255,215,0,0.04)"),
        (3.7, 7.0, "rgba(255,140,0,0.07)"),
        (7.0, 20.0, "rgba(255,68,68,0.09)"),
    ] {
        shapes.push(json!({
            "type": "rect", "xref": "x domain", "x0": 0, "x1": 1,
            "yref": "y", "y0": y0, "y1": y1,
            "fillcolor": fill, "line": {"width": 0}, "layer": "below",
        }));
    }
    for (y, color) in [(0.0, "#00ff88"), (3.7, "#ffd700"), (7.0, "#ff4444")] {
        shapes.push(hline("y", y, color, 1.0, "dot", 0.5));
    }
    let mvrv = table.column(|r| r.mvrv_zscore);
    let mvrv_x: Vec<String> = mvrv.iter().map(|(d, _)| day(*d)).collect();
    for zone in MvrvZone::ALL {
        let ys: Vec<Option<f64>> = mvrv
            .iter()
            .map(|(_, z)| (MvrvZone::classify(*z) == zone).then_some(*z))
            .collect();
        data.push(json!({
            "type": "scatter", "mode": "lines", "xaxis": "x", "yaxis": "y",
            "x": mvrv_x, "y": ys,
            "line": {"color": zone.color(), "width": 1.5},
            "connectgaps": false, "showlegend": false,
            "hovertemplate": "%{x|%Y-%m-%d}: %{y:.2f}<extra>MVRV Z-Score</extra>",
        }));
    }
    for d in &cfg.cycle_tops {
        shapes.push(vline("y", *d, "rgba(255,80,80,0.45)"));
    }
    for d in &cfg.cycle_bottoms {
        shapes.push(vline("y", *d, "rgba(0,255,136,0.45)"));
    }
    if let (Some((d, z)), Some(zone)) = (stats.mvrv, stats.zone) {
        annotations.push(callout("y", d, z, format!("  YOU ARE HERE: {:.2}", z), zone.color()));
    }

    // panel 2: price vs realized price, filled green above and red below
    let pairs: Vec<(NaiveDate, f64, f64)> = table
        .rows()
        .iter()
        .filter_map(|r| Some((r.date, r.price?, r.realized_price?)))
        .collect();
    let above: Vec<bool> = pairs.iter().map(|(_, p, rp)| p >= rp).collect();
    for (is_above, range) in crossover_segments(&above) {
        if range.len() < 2 {
            continue;
        }
        let seg = &pairs[range];
        let xs: Vec<String> = seg.iter().map(|(d, _, _)| day(*d)).collect();
        let (lower, upper): (Vec<f64>, Vec<f64>) = seg
            .iter()
            .map(|(_, p, rp)| if is_above { (*rp, *p) } else { (*p, *rp) })
            .unzip();
        let fill = if is_above { "rgba(0,220,100,0.12)" } else { "rgba(255,80,80,0.12)" };
        data.push(json!({
            "type": "scatter", "mode": "lines", "xaxis": "x", "yaxis": "y2",
            "x": xs, "y": lower,
            "line": {"color": "rgba(0,0,0,0)", "width": 0},
            "showlegend": false, "hoverinfo": "skip",
        }));
        data.push(json!({
            "type": "scatter", "mode": "lines", "xaxis": "x", "yaxis": "y2",
            "x": xs, "y": upper,
            "line": {"color": "rgba(0,0,0,0)", "width": 0},
            "fill": "tonexty", "fillcolor": fill,
            "showlegend": false, "hoverinfo": "skip",
        }));
    }
    let pair_x: Vec<String> = pairs.iter().map(|(d, _, _)| day(*d)).collect();
    data.push(json!({
        "type": "scatter", "mode": "lines", "name": "BTC Price", "xaxis": "x", "yaxis": "y2",
        "x": pair_x, "y": pairs.iter().map(|p| p.1).collect::<Vec<_>>(),
        "line": {"color": "#f7931a", "width": 2},
        "hovertemplate": "%{x|%Y-%m-%d}: $%{y:,.0f}<extra>BTC Price</extra>",
    }));
    data.push(json!({
        "type": "scatter", "mode": "lines", "name": "Realized Price", "xaxis": "x", "yaxis": "y2",
        "x": pair_x, "y": pairs.iter().map(|p| p.2).collect::<Vec<_>>(),
        "line": {"color": "#00e5ff", "width": 1.5, "dash": "dash"},
        "hovertemplate": "%{x|%Y-%m-%d}: $%{y:,.0f}<extra>Realized Price</extra>",
    }));
    for d in &cfg.cycle_bottoms {
        shapes.push(vline("y2", *d, "rgba(0,255,136,0.45)"));
    }
    if let (Some(p), Some(rp), Some(gap)) = (stats.price, stats.realized, stats.gap_pct) {
        annotations.push(json!({
            "x": 0.99, "y": 0.97, "xref": "x domain", "yref": "y2 domain",
            "xanchor": "right", "yanchor": "top",
            "text": format!("BTC: <b>{}</b><br>Realized: {}<br>Gap: <b>{:+.1}%</b>", dollars(p), dollars(rp), gap),
            "showarrow": false,
            "font": {"color": "white", "size": 11},
            "bgcolor": "rgba(0,0,0,0.75)", "bordercolor": "rgba(255,255,255,0.25)", "borderwidth": 1,
            "align": "right",
        }));
    }

    // panel 3: LTH supply
    let lth = table.column(|r| r.lth_supply_m());
    data.push(json!({
        "type": "scatter", "mode": "lines", "name": "LTH Supply", "xaxis": "x", "yaxis": "y3",
        "x": lth.iter().map(|(d, _)| day(*d)).collect::<Vec<_>>(),
        "y": lth.iter().map(|(_, v)| *v).collect::<Vec<_>>(),
        "line": {"color": "#9b59b6", "width": 1.5},
        "fill": "tozeroy", "fillcolor": "rgba(155,89,182,0.18)",
        "hovertemplate": "%{x|%Y-%m-%d}: %{y:.2f}M BTC<extra>LTH Supply</extra>",
    }));
    for d in &cfg.cycle_tops {
        shapes.push(vline("y3", *d, "rgba(255,80,80,0.4)"));
    }
    for d in &cfg.cycle_bottoms {
        shapes.push(vline("y3", *d, "rgba(0,255,136,0.4)"));
    }

    // panel 4: netflow bars, red while coins flow onto exchanges
    let nf = table.column(|r| r.netflow_ma);
    let bar_colors: Vec<&str> = nf
        .iter()
        .map(|(_, v)| if *v >= 0.0 { "rgba(255,80,80,0.65)" } else { "rgba(0,220,100,0.65)" })
        .collect();
    data.push(json!({
        "type": "bar", "name": "Netflow 30d MA", "xaxis": "x", "yaxis": "y4",
        "x": nf.iter().map(|(d, _)| day(*d)).collect::<Vec<_>>(),
        "y": nf.iter().map(|(_, v)| *v).collect::<Vec<_>>(),
        "marker": {"color": bar_colors},
        "hovertemplate": "%{x|%Y-%m-%d}: %{y:+,.0f} BTC/day<extra>Netflow 30d MA</extra>",
    }));
    shapes.push(hline("y4", 0.0, "rgba(255,255,255,0.25)", 1.0, "solid", 1.0));
    if let Some((d, v)) = stats.netflow_ma {
        let color = if v >= 0.0 { "#ff5050" } else { "#00dc64" };
        annotations.push(callout("y4", d, v, format!("  {} BTC/day", signed_thousands(v)), color));
    }

    let axis = |domain: (f64, f64), log: bool| {
        let kind = if log { "log" } else { "linear" };
        json!({
            "domain": [domain.0, domain.1],
            "type": kind,
            "gridcolor": "rgba(255,255,255,0.05)",
            "zerolinecolor": "rgba(255,255,255,0.1)",
            "linecolor": "rgba(255,255,255,0.15)",
            "tickfont": {"size": 10},
        })
    };
    json!({
        "data": data,
        "layout": {
            "height": 1600,
            "paper_bgcolor": "#0d0d0d",
            "plot_bgcolor": "#111111",
            "font": {"color": "#cccccc", "family": "Courier New, monospace", "size": 11},
            "showlegend": true,
            "legend": {
                "bgcolor": "rgba(20,20,20,0.8)", "bordercolor": "rgba(255,255,255,0.2)",
                "borderwidth": 1, "font": {"size": 10}, "x": 0.01, "y": 0.99,
            },
            "hovermode": "x unified",
            "margin": {"l": 70, "r": 60, "t": 70, "b": 40},
            "hoverlabel": {"bgcolor": "rgba(0,0,0,0.85)", "font": {"size": 11}},
            "xaxis": {
                "anchor": "y4",
                "type": "date",
                "gridcolor": "rgba(255,255,255,0.05)",
                "linecolor": "rgba(255,255,255,0.15)",
                "tickfont": {"size": 10},
            },
            "yaxis": axis(domains[0], false),
            "yaxis2": axis(domains[1], true),
            "yaxis3": axis(domains[2], false),
            "yaxis4": axis(domains[3], false),
            "shapes": shapes,
            "annotations": annotations,
        },
    })
}

fn or_na(v: Option<String>) -> String {
    v.unwrap_or_else(|| "n/a".to_string())
}

const STYLE: &str = r#"
  *, *::before, *::after { box-sizing: border-box; margin: 0; padding: 0; }
  body {
    background: #0d0d0d;
    color: #e0e0e0;
    font-family: 'Courier New', Courier, monospace;
    padding: 20px 24px;
    max-width: 1600px;
    margin: 0 auto;
  }
  h1 {
    color: #f7931a;
    font-size: 1.7em;
    letter-spacing: 1px;
    margin-bottom: 4px;
  }
  .updated {
    color: #555;
    font-size: 0.78em;
    margin-bottom: 18px;
  }
  .stats {
    display: flex;
    gap: 12px;
    flex-wrap: wrap;
    margin-bottom: 20px;
  }
  .card {
    background: #161616;
    border: 1px solid #252525;
    border-radius: 8px;
    padding: 12px 18px;
    flex: 1;
    min-width: 150px;
  }
  .card-label {
    font-size: 0.65em;
    color: #666;
    text-transform: uppercase;
    letter-spacing: 1.5px;
    margin-bottom: 5px;
  }
  .card-value {
    font-size: 1.35em;
    font-weight: bold;
    line-height: 1.1;
  }
  .card-sub {
    font-size: 0.73em;
    color: #777;
    margin-top: 3px;
  }
  .chart-wrapper {
    width: 100%;
    border: 1px solid #1e1e1e;
    border-radius: 8px;
    overflow: hidden;
  }
  footer {
    text-align: center;
    color: #3a3a3a;
    font-size: 0.72em;
    margin-top: 18px;
    padding-top: 12px;
    border-top: 1px solid #1a1a1a;
  }
  footer a { color: #555; text-decoration: none; }
  footer a:hover { color: #888; }
"#;

fn card(label: &str, value: &str, color: &str, sub: Option<(&str, Option<&str>)>) -> String {
    let sub = match sub {
        Some((text, Some(c))) => format!("\n      <div class=\"card-sub\" style=\"color:{c}\">{text}</div>"),
        Some((text, None)) => format!("\n      <div class=\"card-sub\">{text}</div>"),
        None => String::new(),
    };
    format!(
        "    <div class=\"card\">\n      <div class=\"card-label\">{label}</div>\n      <div class=\"card-value\" style=\"color:{color}\">{value}</div>{sub}\n    </div>\n"
    )
}

/// The complete page; `updated` is stamped into the header.
pub fn build_html(
    stats: &DashboardStats,
    table: &MetricTable,
    cfg: &AppConfig,
    updated: DateTime<Utc>,
) -> Result<String> {
    let figure = build_figure(stats, table, cfg);
    // keep the JSON from closing the script element early
    let figure_json = serde_json::to_string(&figure)?.replace("</", "<\\/");

    let zone_color = stats.zone.map(|z| z.color()).unwrap_or("#888888");
    let zone_label = stats.zone.map(|z| z.label()).unwrap_or("n/a");
    let gap_color = match stats.gap_pct {
        Some(g) if g < 0.0 => "#ff5050",
        _ => "#00dc64",
    };
    let nf = stats.netflow_ma.map(|(_, v)| v);
    let nf_color = match nf {
        Some(v) if v < 0.0 => "#00dc64",
        _ => "#ff5050",
    };
    let nf_sub = match nf {
        Some(v) if v < 0.0 => "Accumulation ↓",
        Some(_) => "Sell pressure ↑",
        None => "",
    };
    let realized_sub = format!("Realized: {}", or_na(stats.realized.map(dollars)));
    let lth_sub = format!(
        "{} of 21M supply",
        or_na(stats.lth_share_pct().map(|p| format!("{:.1}%", p)))
    );

    let mut cards = String::new();
    cards += &card("BTC Price", &or_na(stats.price.map(dollars)), "#f7931a", None);
    cards += &card(
        "MVRV Z-Score",
        &or_na(stats.mvrv.map(|(_, z)| format!("{:.2}", z))),
        zone_color,
        Some((zone_label, Some(zone_color))),
    );
    cards += &card(
        "vs Realized Price",
        &or_na(stats.gap_pct.map(|g| format!("{:+.1}%", g))),
        gap_color,
        Some((realized_sub.as_str(), None)),
    );
    cards += &card(
        "LTH Supply",
        &or_na(stats.lth_supply_m().map(|m| format!("{:.2}M BTC", m))),
        "#9b59b6",
        Some((lth_sub.as_str(), None)),
    );
    cards += &card(
        "Netflow 30d MA",
        &or_na(nf.map(signed_thousands)),
        nf_color,
        Some((nf_sub, None)),
    );

    Ok(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Bitcoin On-Chain Dashboard</title>
<style>{STYLE}</style>
<script src="{PLOTLY_CDN}" charset="utf-8"></script>
</head>
<body>

<header>
  <h1>&#8383; Bitcoin On-Chain Dashboard</h1>
  <p class="updated">Last updated: {updated}</p>
  <div class="stats">
{cards}  </div>
</header>

<div class="chart-wrapper">
<div id="chart"></div>
<script>
  var fig = {figure_json};
  Plotly.newPlot("chart", fig.data, fig.layout, {{"responsive": true, "displayModeBar": true}});
</script>
</div>

<footer>
  Auto-updated daily &nbsp;&bull;&nbsp;
  On-chain data: <a href="https://bitcoin-data.com" target="_blank">bitcoin-data.com</a>
  &nbsp;&bull;&nbsp;
  Price: <a href="https://coingecko.com" target="_blank">CoinGecko</a>
</footer>

</body>
</html>
"#,
        updated = updated.format("%Y-%m-%d %H:%M UTC"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::Point;
    use chrono::TimeZone;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn series(points: &[(&str, f64)]) -> TimeSeries {
        TimeSeries::from_unsorted(points.iter().map(|(s, v)| Point::new(d(s), *v)).collect())
    }

    fn table() -> MetricTable {
        let metrics = MetricSet {
            mvrv: series(&[("2024-01-01", 1.5), ("2024-01-02", 4.0), ("2024-01-03", 2.5)]),
            realized: series(&[("2024-01-01", 40000.0), ("2024-01-02", 40000.0), ("2024-01-03", 40000.0)]),
            lth: series(&[("2024-01-01", 14_700_000.0), ("2024-01-03", 14_910_000.0)]),
            netflow: series(&[("2024-01-01", -3000.0), ("2024-01-02", -1000.0)]),
        };
        let price = series(&[("2024-01-01", 42000.0), ("2024-01-02", 38000.0), ("2024-01-03", 45000.0)]);
        MetricTable::build(&metrics, &price, Some((d("2024-01-04"), 46000.0)), d("2017-01-01"), 30)
    }

    #[test]
    fn test_row_domains_stack_top_down() {
        let doms = row_domains();
        assert!((doms[0].1 - 1.0).abs() < 1e-12);
        assert!(doms[3].0.abs() < 1e-9);
        for w in doms.windows(2) {
            assert!((w[0].0 - w[1].1 - ROW_GAP).abs() < 1e-9);
        }
        // the price panel is the tallest
        assert!(doms[1].1 - doms[1].0 > doms[0].1 - doms[0].0);
    }

    #[test]
    fn test_crossover_segments() {
        assert!(crossover_segments(&[]).is_empty());
        assert_eq!(
            crossover_segments(&[true, true, false, false, false, true]),
            vec![(true, 0..2), (false, 2..5), (true, 5..6)]
        );
    }

    #[test]
    fn test_stats_follow_latest_rows() {
        let stats = DashboardStats::from_table(&table());
        assert_eq!(stats.price, Some(46000.0));
        assert_eq!(stats.mvrv, Some((d("2024-01-03"), 2.5)));
        assert_eq!(stats.zone, Some(MvrvZone::FairValue));
        assert_eq!(stats.gap_pct, Some((46000.0 / 40000.0 - 1.0) * 100.0));
        assert_eq!(stats.netflow_ma, Some((d("2024-01-04"), -2000.0)));
    }

    #[test]
    fn test_figure_layout() {
        let t = table();
        let fig = build_figure(&DashboardStats::from_table(&t), &t, &AppConfig::default());
        let layout = &fig["layout"];
        assert_eq!(layout["yaxis2"]["type"], "log");
        assert_eq!(layout["yaxis"]["type"], "linear");
        assert_eq!(layout["xaxis"]["anchor"], "y4");
        let data = fig["data"].as_array().unwrap();
        // 4 zone traces, one fill pair per run of >= 2 rows, price, realized, lth, netflow
        assert_eq!(data.len(), 4 + 4);
        assert_eq!(data[4]["name"], "BTC Price");
        assert_eq!(data[7]["type"], "bar");
        let zone_y = data[2]["y"].as_array().unwrap();
        assert_eq!(zone_y[1], 4.0);
        assert!(zone_y[0].is_null());
        let texts: Vec<&str> = layout["annotations"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|a| a["text"].as_str())
            .collect();
        assert!(texts.contains(&"  YOU ARE HERE: 2.50"));
        assert!(texts.contains(&"  -2,000 BTC/day"));
    }

    #[test]
    fn test_html_has_cards_and_stamp() {
        let t = table();
        let stats = DashboardStats::from_table(&t);
        let updated = Utc.with_ymd_and_hms(2026, 1, 2, 8, 0, 0).unwrap();
        let html = build_html(&stats, &t, &AppConfig::default(), updated).unwrap();
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("Last updated: 2026-01-02 08:00 UTC"));
        assert!(html.contains(PLOTLY_CDN));
        assert!(html.contains(">$46,000<"));
        assert!(html.contains(">2.50<"));
        assert!(html.contains("FAIR VALUE"));
        assert!(html.contains(">+15.0%<"));
        assert!(html.contains("Realized: $40,000"));
        assert!(html.contains("14.91M BTC"));
        assert!(html.contains("71.0% of 21M supply"));
        assert!(html.contains(">-2,000<"));
        assert!(html.contains("Accumulation ↓"));
        assert!(html.contains("bitcoin-data.com"));
        assert_eq!(html.matches("class=\"card\"").count(), 5);
    }

    #[test]
    fn test_html_with_missing_metrics() {
        let t = MetricTable::build(
            &MetricSet::default(),
            &TimeSeries::default(),
            Some((d("2026-01-02"), 90000.0)),
            d("2017-01-01"),
            30,
        );
        let stats = DashboardStats::from_table(&t);
        let updated = Utc.with_ymd_and_hms(2026, 1, 2, 8, 0, 0).unwrap();
        let html = build_html(&stats, &t, &AppConfig::default(), updated).unwrap();
        assert!(html.contains(">$90,000<"));
        // MVRV value and zone, gap, LTH and netflow
        assert_eq!(html.matches(">n/a<").count(), 5);
    }
}
