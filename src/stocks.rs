use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use std::{path::Path, time::Duration};
use tracing::{info, warn};

use crate::{
    StocksArgs,
    chart::{self, Element, Figure, Panel, Shape, Stroke, YFormat},
    config::{AppConfig, BottomConfig, StockConfig, Windows},
    cycle::{CycleAnchor, CycleError, CycleReport, DetectParams, normalize_and_detect},
    fetch::{FetchOutcome, fetch_stock_histories, mk_client},
    output::dollars_cents,
    series::{TimeSeries, load_close_csv},
};

/// A post-bottom accumulation phase for one ticker.
#[derive(Debug, Clone)]
pub struct PhaseOutcome {
    pub bottom: BottomConfig,
    pub bottom_price: f64,
    pub report: CycleReport,
}

/// Anchors on the bottom date and measures against the first close on or after it.
///
/// Returns `Ok(None)` for phases too short to say anything about.
pub fn analyze_phase(
    bottom: &BottomConfig,
    windows: &Windows,
    prices: &TimeSeries,
    as_of: NaiveDate,
) -> Result<Option<PhaseOutcome>, CycleError> {
    let Some(first) = prices.between(bottom.bottom, as_of).first() else {
        return Ok(None);
    };
    let anchor = CycleAnchor::new(bottom.bottom, first.value)?;
    let params = DetectParams::trading(
        windows.accumulation_days,
        windows.accumulation_days,
        windows.stock_plot_days,
    )
    .open_until(as_of);
    let report = normalize_and_detect(prices, anchor, &params)?;
    if report.normalized.len() < windows.stock_min_points {
        return Ok(None);
    }
    Ok(Some(PhaseOutcome {
        bottom: bottom.clone(),
        bottom_price: first.value,
        report,
    }))
}

pub fn print_phase(p: &PhaseOutcome) {
    let r = &p.report;
    println!();
    println!("  {}", p.bottom.label);
    println!(
        "    Bottom date:      {}  {}",
        p.bottom.bottom,
        dollars_cents(p.bottom_price)
    );
    println!(
        "    200d accum low:   {:+.1}%  day {}  {}",
        r.early.percent,
        r.early.offset,
        dollars_cents(r.early.value)
    );
    match (&r.late, r.support_held) {
        (Some(late), Some(held)) => {
            println!(
                "    Post-200d low:    {:+.1}%  day {}  {}",
                late.percent,
                late.offset,
                dollars_cents(late.value)
            );
            println!("    Support held:     {}", if held { "✅ YES" } else { "❌ NO" });
        }
        _ => println!("    Support held:     undefined (no post-200d data yet)"),
    }
}

/// All phases for one ticker; `None` when its CSV is absent.
pub fn analyze_stock(
    stock: &StockConfig,
    windows: &Windows,
    data_dir: &Path,
    as_of: NaiveDate,
) -> Result<Option<Vec<PhaseOutcome>>> {
    let path = data_dir.join(format!("{}.csv", stock.ticker));
    if !path.exists() {
        warn!("{}: {} not found, skipping", stock.ticker, path.display());
        return Ok(None);
    }
    let prices = load_close_csv(&path)?;
    info!("{}: {} trading days", stock.ticker, prices.len());

    let mut phases = Vec::with_capacity(stock.bottoms.len());
    for b in &stock.bottoms {
        match analyze_phase(b, windows, &prices, as_of)
            .with_context(|| format!("{} {}", stock.ticker, b.label))?
        {
            Some(p) => phases.push(p),
            None => warn!("{} {}: too few points after {}, skipped", stock.ticker, b.label, b.bottom),
        }
    }
    Ok(Some(phases))
}

pub async fn execute(args: &StocksArgs) -> Result<()> {
    let cfg = AppConfig::load(args.common.config.as_deref())?;
    let data_dir = args.common.data_dir.clone().unwrap_or_else(|| ".".into());
    let out_dir = args.common.out.clone().unwrap_or_else(|| ".".into());
    let as_of = args.common.as_of.context("as-of date not set")?;

    if args.offline.unwrap_or(false) {
        info!("offline: using cached price history");
    } else {
        println!("Downloading price history…");
        let client = mk_client(Duration::from_secs(cfg.fetch.timeout_secs))?;
        let outcomes = fetch_stock_histories(
            &client,
            &cfg.stocks,
            &cfg.fetch.stock_history_url,
            &data_dir,
            Duration::from_millis(cfg.fetch.delay_ms),
        )
        .await;
        for (ticker, outcome) in &outcomes {
            match outcome {
                FetchOutcome::Fresh(_) => println!("  ✓ {ticker}"),
                FetchOutcome::Cached(_) => println!("  ✗ {ticker} (using existing file)"),
                FetchOutcome::Missing => println!("  ✗ {ticker} (no data)"),
            }
        }
    }

    println!("ACCUMULATION SUPPORT ANALYSIS");
    println!("{}", "=".repeat(60));

    let mut analyzed = Vec::new();
    for stock in &cfg.stocks {
        let Some(phases) = analyze_stock(stock, &cfg.windows, &data_dir, as_of)? else {
            continue;
        };
        println!();
        println!("{} ({})", stock.name, stock.ticker);
        for p in &phases {
            print_phase(p);
        }
        analyzed.push((stock, phases));
    }

    if analyzed.is_empty() {
        bail!("no price history for any configured ticker in {}", data_dir.display());
    }

    let fig = build_figure(&analyzed, &cfg.windows);
    let path = out_dir.join("stocks_accumulation.png");
    fig.save(&path)?;
    println!();
    println!("Saved: {}", path.display());
    Ok(())
}

fn stock_panel(stock: &StockConfig, phases: &[PhaseOutcome], windows: &Windows) -> Panel {
    let accum = windows.accumulation_days as f64;
    let mut p = Panel::new(
        &format!("{} ({}) — Accumulation Zone Support", stock.name, stock.ticker),
        &stock.color,
    );
    p.x_label = "Trading Days from Cycle Bottom".into();
    p.y_label = "% from Cycle Bottom Price".into();
    p.y_format = YFormat::SignedPercent;
    p.x_range = Some((0.0, windows.stock_plot_days as f64));

    p.push(Element::VSpan {
        x0: 0.0,
        x1: accum,
        color: "white".into(),
        opacity: 0.06,
    });

    let mut floor = 0.0_f64;
    for ph in phases {
        let r = &ph.report;
        let color = ph.bottom.color.as_str();
        let line: Vec<(f64, f64)> = r
            .normalized
            .points()
            .iter()
            .map(|pt| (pt.offset as f64, pt.percent))
            .collect();
        floor = line.iter().map(|(_, y)| *y).fold(floor, f64::min);

        p.push(Element::Line {
            points: line,
            stroke: Stroke::solid(color, 1.8).opacity(0.9),
        });
        p.legend(color, ph.bottom.label.clone());

        p.push(Element::HLine {
            y: r.early.percent,
            stroke: Stroke::dashed(chart::GOLD, 1.5).opacity(0.7),
        });
        p.push(Element::Marker {
            x: r.early.offset as f64,
            y: r.early.percent,
            shape: Shape::Circle,
            color: chart::GOLD.into(),
            size: 6.0,
        });
        p.push(Element::Text {
            x: r.early.offset as f64 + 30.0,
            y: r.early.percent - 15.0,
            text: format!(
                "{}\n200d low: {:+.1}%\nDay {}  {}",
                ph.bottom.label,
                r.early.percent,
                r.early.offset,
                dollars_cents(r.early.value)
            ),
            color: chart::GOLD.into(),
            size: 8.0,
            bold: false,
        });
        if let Some(held) = r.support_held {
            let (status, c) = if held { ("Held", "#00ff88") } else { ("Broken", "#ff4d4d") };
            p.push(Element::Text {
                x: r.early.offset as f64 + 30.0,
                y: r.early.percent + 8.0,
                text: status.into(),
                color: c.into(),
                size: 8.0,
                bold: true,
            });
        }
    }

    p.push(Element::VLine {
        x: accum,
        stroke: Stroke::dotted("white", 1.0).opacity(0.35),
    });
    p.push(Element::Text {
        x: accum + 2.0,
        y: if floor < 0.0 { floor * 0.85 } else { 5.0 },
        text: "200d\nmark".into(),
        color: chart::TEXT.into(),
        size: 8.0,
        bold: false,
    });
    p.push(Element::HLine {
        y: 0.0,
        stroke: Stroke::dashed(chart::TEXT, 0.8).opacity(0.2),
    });
    p
}

pub fn build_figure(analyzed: &[(&StockConfig, Vec<PhaseOutcome>)], windows: &Windows) -> Figure {
    let names = analyzed
        .iter()
        .map(|(s, _)| s.name.as_str())
        .collect::<Vec<_>>()
        .join("  |  ");
    let question = format!(
        "Does the First {}-Day Accumulation Low Hold as Support?",
        windows.accumulation_days
    );
    let mut fig = Figure::new(&[names.as_str(), question.as_str()], 1);
    fig.panels = analyzed
        .iter()
        .map(|(s, phases)| stock_panel(s, phases, windows))
        .collect();
    fig
}
