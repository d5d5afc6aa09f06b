use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::{collections::BTreeMap, path::Path};
use tracing::{info, warn};

use crate::{
    OnchainArgs, accumulation,
    chart::{self, Element, Figure, Panel, Shape, Stroke, XAxis, YFormat, YScale, date_x},
    config::{AppConfig, LTH_SUPPLY, MVRV, MetricSpec, NETFLOW, REALIZED_PRICE},
    output::dollars,
    series::{Point, TimeSeries, load_metric_json, load_price_csv, rolling_mean},
};

pub const SUPPLY_CAP: f64 = 21_000_000.0;

/// Valuation band of an MVRV Z-Score reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MvrvZone {
    ExtremeFear,
    FairValue,
    Caution,
    SellZone,
}

impl MvrvZone {
    pub fn classify(z: f64) -> Self {
        if z < 0.0 {
            MvrvZone::ExtremeFear
        } else if z < 3.7 {
            MvrvZone::FairValue
        } else if z < 7.0 {
            MvrvZone::Caution
        } else {
            MvrvZone::SellZone
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MvrvZone::ExtremeFear => "EXTREME FEAR",
            MvrvZone::FairValue => "FAIR VALUE",
            MvrvZone::Caution => "CAUTION",
            MvrvZone::SellZone => "SELL ZONE",
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            MvrvZone::ExtremeFear => "#00ff88",
            MvrvZone::FairValue => "#ffd700",
            MvrvZone::Caution => "#ff8c00",
            MvrvZone::SellZone => "#ff4444",
        }
    }

    pub const ALL: [MvrvZone; 4] = [
        MvrvZone::ExtremeFear,
        MvrvZone::FairValue,
        MvrvZone::Caution,
        MvrvZone::SellZone,
    ];
}

/// The four on-chain series; a missing cache file leaves its slot empty.
#[derive(Debug, Clone, Default)]
pub struct MetricSet {
    pub mvrv: TimeSeries,
    pub realized: TimeSeries,
    pub lth: TimeSeries,
    pub netflow: TimeSeries,
}

impl MetricSet {
    pub fn load(data_dir: &Path, cfg: &AppConfig) -> Self {
        let get = |key: &str| {
            cfg.metric(key)
                .map(|spec| load_optional(data_dir, spec))
                .unwrap_or_default()
        };
        Self {
            mvrv: get(MVRV),
            realized: get(REALIZED_PRICE),
            lth: get(LTH_SUPPLY),
            netflow: get(NETFLOW),
        }
    }
}

/// Loads a metric file, or an empty series (with a warning) when it is absent or unreadable.
pub fn load_optional(data_dir: &Path, spec: &MetricSpec) -> TimeSeries {
    let path = data_dir.join(&spec.file);
    if !path.exists() {
        warn!("{} not found; {} will be empty", path.display(), spec.key);
        return TimeSeries::default();
    }
    match load_metric_json(&path, spec) {
        Ok(s) => {
            info!("{}: {} rows", spec.key, s.len());
            s
        }
        Err(e) => {
            warn!("{:#}; {} will be empty", e, spec.key);
            TimeSeries::default()
        }
    }
}

/// One date of the merged metric table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricRow {
    pub date: NaiveDate,
    pub mvrv_zscore: Option<f64>,
    pub realized_price: Option<f64>,
    pub lth_supply: Option<f64>,
    pub netflow: Option<f64>,
    pub price: Option<f64>,
    pub realized_gap_pct: Option<f64>,
    pub netflow_ma: Option<f64>,
}

impl MetricRow {
    fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            mvrv_zscore: None,
            realized_price: None,
            lth_supply: None,
            netflow: None,
            price: None,
            realized_gap_pct: None,
            netflow_ma: None,
        }
    }

    pub fn lth_supply_m(&self) -> Option<f64> {
        self.lth_supply.map(|v| v / 1e6)
    }
}

/// Outer join of the metrics on date, with market price left-joined.
#[derive(Debug, Clone)]
pub struct MetricTable {
    rows: Vec<MetricRow>,
    smoothing: usize,
}

impl MetricTable {
    pub fn build(
        metrics: &MetricSet,
        price: &TimeSeries,
        spot: Option<(NaiveDate, f64)>,
        start: NaiveDate,
        smoothing: usize,
    ) -> Self {
        let mut by_date: BTreeMap<NaiveDate, MetricRow> = BTreeMap::new();
        let columns: [(&TimeSeries, fn(&mut MetricRow, f64)); 4] = [
            (&metrics.mvrv, |r, v| r.mvrv_zscore = Some(v)),
            (&metrics.realized, |r, v| r.realized_price = Some(v)),
            (&metrics.lth, |r, v| r.lth_supply = Some(v)),
            (&metrics.netflow, |r, v| r.netflow = Some(v)),
        ];
        for (series, set) in columns {
            for p in series.iter() {
                set(
                    by_date.entry(p.date).or_insert_with(|| MetricRow::empty(p.date)),
                    p.value,
                );
            }
        }
        for p in price.iter() {
            if let Some(row) = by_date.get_mut(&p.date) {
                row.price = Some(p.value);
            }
        }
        if let Some((date, value)) = spot {
            by_date.entry(date).or_insert_with(|| MetricRow::empty(date)).price = Some(value);
        }

        let mut table = Self {
            rows: by_date.into_values().filter(|r| r.date >= start).collect(),
            smoothing,
        };
        table.derive();
        table
    }

    /// Overwrites (or appends) the market price for `date`.
    pub fn inject_spot_price(&mut self, date: NaiveDate, price: f64) {
        match self.rows.binary_search_by_key(&date, |r| r.date) {
            Ok(i) => self.rows[i].price = Some(price),
            Err(i) => {
                let mut row = MetricRow::empty(date);
                row.price = Some(price);
                self.rows.insert(i, row);
            }
        }
        self.derive();
    }

    fn derive(&mut self) {
        let netflow: Vec<Option<f64>> = self.rows.iter().map(|r| r.netflow).collect();
        let ma = rolling_mean(&netflow, self.smoothing, 1, false);
        for (row, ma) in self.rows.iter_mut().zip(ma) {
            row.netflow_ma = ma;
            row.realized_gap_pct = match (row.price, row.realized_price) {
                (Some(p), Some(rp)) if rp > 0.0 => Some((p / rp - 1.0) * 100.0),
                _ => None,
            };
        }
    }

    pub fn rows(&self) -> &[MetricRow] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Latest row where `column` is present.
    pub fn latest(&self, column: impl Fn(&MetricRow) -> Option<f64>) -> Option<(NaiveDate, f64)> {
        self.rows
            .iter()
            .rev()
            .find_map(|r| column(r).map(|v| (r.date, v)))
    }

    pub fn column(&self, column: impl Fn(&MetricRow) -> Option<f64>) -> Vec<(NaiveDate, f64)> {
        self.rows
            .iter()
            .filter_map(|r| column(r).map(|v| (r.date, v)))
            .collect()
    }
}

/// Headline numbers for the dashboard cards.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardStats {
    pub mvrv: Option<(NaiveDate, f64)>,
    pub zone: Option<MvrvZone>,
    pub price: Option<f64>,
    pub realized: Option<f64>,
    pub gap_pct: Option<f64>,
    pub lth_supply: Option<f64>,
    pub netflow_ma: Option<(NaiveDate, f64)>,
}

impl DashboardStats {
    pub fn from_table(t: &MetricTable) -> Self {
        let mvrv = t.latest(|r| r.mvrv_zscore);
        let price = t.latest(|r| r.price).map(|x| x.1);
        let realized = t.latest(|r| r.realized_price).map(|x| x.1);
        let gap_pct = match (price, realized) {
            (Some(p), Some(rp)) if rp > 0.0 => Some((p / rp - 1.0) * 100.0),
            _ => None,
        };
        Self {
            mvrv,
            zone: mvrv.map(|(_, z)| MvrvZone::classify(z)),
            price,
            realized,
            gap_pct,
            lth_supply: t.latest(|r| r.lth_supply).map(|x| x.1),
            netflow_ma: t.latest(|r| r.netflow_ma),
        }
    }

    pub fn lth_supply_m(&self) -> Option<f64> {
        self.lth_supply.map(|v| v / 1e6)
    }

    pub fn lth_share_pct(&self) -> Option<f64> {
        self.lth_supply.map(|v| v / SUPPLY_CAP * 100.0)
    }
}

/// Latest readings over the full history, as printed by the `onchain` command.
#[derive(Debug, Clone, PartialEq)]
pub struct OnchainReadings {
    pub mvrv: Option<f64>,
    pub realized_price: Option<f64>,
    pub market_price: Option<f64>,
    pub premium_pct: Option<f64>,
    pub lth_supply: Option<f64>,
    pub netflow_smoothed: Option<f64>,
    pub outflow_usd: Option<f64>,
}

impl OnchainReadings {
    pub fn compute(
        metrics: &MetricSet,
        price: &TimeSeries,
        outflow: &TimeSeries,
        smoothing: usize,
    ) -> Self {
        let last = |s: &TimeSeries| s.last().map(|p| p.value);
        let realized_price = last(&metrics.realized);
        let market_price = last(price);
        let premium_pct = match (market_price, realized_price) {
            (Some(p), Some(rp)) if rp > 0.0 => Some((p - rp) / rp * 100.0),
            _ => None,
        };
        Self {
            mvrv: last(&metrics.mvrv),
            realized_price,
            market_price,
            premium_pct,
            lth_supply: last(&metrics.lth),
            netflow_smoothed: centered_smooth(&metrics.netflow, smoothing)
                .iter()
                .rev()
                .find_map(|p| p.1),
            outflow_usd: last(outflow),
        }
    }
}

/// Centered rolling mean that needs a full window, per date.
pub fn centered_smooth(s: &TimeSeries, window: usize) -> Vec<(NaiveDate, Option<f64>)> {
    let values: Vec<Option<f64>> = s.iter().map(|p| Some(p.value)).collect();
    s.iter()
        .map(|p| p.date)
        .zip(rolling_mean(&values, window, window, true))
        .collect()
}

/// Metric value in force at each date (last observation on or before it).
pub fn values_at(s: &TimeSeries, dates: &[NaiveDate]) -> Vec<(NaiveDate, Option<f64>)> {
    dates
        .iter()
        .map(|d| (*d, s.value_at_or_before(*d).map(|p| p.value)))
        .collect()
}

fn opt(v: Option<f64>, f: impl Fn(f64) -> String) -> String {
    v.map(f).unwrap_or_else(|| "n/a".to_string())
}

pub fn print_readings(r: &OnchainReadings) {
    println!("{}", "=".repeat(58));
    println!("ON-CHAIN DASHBOARD — CURRENT READINGS");
    println!("{}", "=".repeat(58));
    println!();
    println!("  MVRV Z-Score:        {}", opt(r.mvrv, |v| format!("{:.2}", v)));
    println!("  Realized Price:      {}", opt(r.realized_price, dollars));
    println!("  BTC Market Price:    {}", opt(r.market_price, dollars));
    println!("  Premium over RP:     {}", opt(r.premium_pct, |v| format!("{:.1}%", v)));
    println!();
    println!("  LTH Supply:          {}", opt(r.lth_supply, |v| format!("{:.3}M BTC", v / 1e6)));
    println!(
        "  Exchange Netflow     (30d avg): {}",
        opt(r.netflow_smoothed, |v| format!("{:+.0} BTC/day", v))
    );
    println!(
        "  Exchange Outflow     (latest): {}",
        opt(r.outflow_usd, |v| format!("${:.2}B/day", v / 1e9))
    );
}

pub fn execute(args: &OnchainArgs) -> Result<()> {
    let cfg = AppConfig::load(args.common.config.as_deref())?;
    let data_dir = args.common.data_dir.clone().unwrap_or_else(|| ".".into());
    let out_dir = args.common.out.clone().unwrap_or_else(|| ".".into());
    let as_of = args.common.as_of.context("as-of date not set")?;

    let metrics = MetricSet::load(&data_dir, &cfg);
    let outflow = load_optional(&data_dir, &cfg.outflow);
    let price_path = data_dir.join(&cfg.price_csv);
    let price = load_price_csv(&price_path)?;
    let smoothing = cfg.windows.netflow_smoothing;

    let readings = OnchainReadings::compute(&metrics, &price, &outflow, smoothing);
    print_readings(&readings);

    let fmt_list = |vals: &[(NaiveDate, Option<f64>)], prec: usize| {
        vals.iter()
            .map(|(_, v)| opt(*v, |x| format!("{:.*}", prec, x)))
            .collect::<Vec<_>>()
            .join(", ")
    };
    println!();
    println!("  MVRV at cycle tops:    [{}]", fmt_list(&values_at(&metrics.mvrv, &cfg.cycle_tops), 1));
    println!("  MVRV at cycle bottoms: [{}]", fmt_list(&values_at(&metrics.mvrv, &cfg.cycle_bottoms), 2));
    println!("  MVRV today:            {}", opt(readings.mvrv, |v| format!("{:.2}", v)));

    // support is the open cycle's accumulation low
    let support = accumulation::current_support(&cfg, &price, as_of);
    println!();
    println!("  Accumulation support:  {}", opt(support, dollars));
    println!("  Realized price:        {}", opt(readings.realized_price, dollars));
    if let (Some(s), Some(rp)) = (support, readings.realized_price) {
        println!("  Gap between them:      {}", dollars((rp - s).abs()));
    }
    println!("{}", "=".repeat(58));

    println!();
    println!("LTH Supply at cycle events:");
    for (label, dates) in [("Tops", &cfg.cycle_tops), ("Bottoms", &cfg.cycle_bottoms)] {
        for (d, v) in values_at(&metrics.lth, dates) {
            if let Some(v) = v {
                println!("  {} {}: {:.3}M BTC", label, d, v / 1e6);
            }
        }
    }

    let fig = build_figure(&cfg, &metrics, &price, &outflow, support, &readings, as_of);
    let path = out_dir.join("btc_onchain_dashboard.png");
    fig.save(&path)?;
    println!();
    println!("Saved: {}", path.display());
    Ok(())
}

fn xy(s: &TimeSeries, from: NaiveDate, scale: f64) -> Vec<(f64, f64)> {
    s.since(from).iter().map(|p| (date_x(p.date), p.value * scale)).collect()
}

fn price_overlay(panel: &mut Panel, price: &TimeSeries, from: NaiveDate, lo: f64, hi: f64) {
    // BTC price rescaled into the panel's y range (log) as a faint backdrop
    let pts: Vec<&Point> = price.since(from).iter().filter(|p| p.value > 0.0).collect();
    let (pmin, pmax) = pts.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(a, b), p| {
        (a.min(p.value.ln()), b.max(p.value.ln()))
    });
    if !(pmax > pmin) {
        return;
    }
    let points = pts
        .iter()
        .map(|p| (date_x(p.date), lo + (p.value.ln() - pmin) / (pmax - pmin) * (hi - lo)))
        .collect();
    panel.push(Element::Line {
        points,
        stroke: Stroke::solid("white", 0.8).opacity(0.25),
    });
}

fn cycle_markers(panel: &mut Panel, cfg: &AppConfig, as_of: NaiveDate) {
    for c in &cfg.cycles {
        panel.push(Element::VLine {
            x: date_x(c.halving),
            stroke: Stroke::dotted("#888888", 0.8).opacity(0.5),
        });
    }
    for t in &cfg.cycle_tops {
        panel.push(Element::VLine {
            x: date_x(*t),
            stroke: Stroke::dashed(chart::GOLD, 0.8).opacity(0.4),
        });
    }
    for b in &cfg.cycle_bottoms {
        panel.push(Element::VLine {
            x: date_x(*b),
            stroke: Stroke::dashed("#ff4d4d", 0.8).opacity(0.4),
        });
    }
    panel.push(Element::VLine {
        x: date_x(as_of),
        stroke: Stroke::solid("white", 1.2).opacity(0.5),
    });
}

fn date_panel(title: &str, color: &str, y_label: &str, cfg: &AppConfig, as_of: NaiveDate) -> Panel {
    let mut p = Panel::new(title, color);
    p.x_axis = XAxis::Dates;
    p.y_label = y_label.to_string();
    p.x_range = Some((date_x(cfg.onchain_start), date_x(as_of) + 60.0));
    p
}

fn star(x: NaiveDate, y: f64) -> Element {
    Element::Marker {
        x: date_x(x),
        y,
        shape: Shape::Star,
        color: "white".into(),
        size: 8.0,
    }
}

fn label(x: NaiveDate, y: f64, text: String) -> Element {
    Element::Text {
        x: date_x(x),
        y,
        text,
        color: "white".into(),
        size: 10.0,
        bold: true,
    }
}

#[allow(clippy::too_many_arguments)]
fn build_figure(
    cfg: &AppConfig,
    metrics: &MetricSet,
    price: &TimeSeries,
    outflow: &TimeSeries,
    support: Option<f64>,
    r: &OnchainReadings,
    as_of: NaiveDate,
) -> Figure {
    let start = cfg.onchain_start;
    let mut fig = Figure::new(
        &[
            "Bitcoin On-Chain Dashboard — Testing the Accumulation Thesis",
            "MVRV Z-Score  |  Realized Price  |  LTH Supply  |  Exchange Netflow",
        ],
        1,
    );
    fig.panel_width = 1500;
    fig.panel_height = 440;
    fig.footer = Some(
        "Grey dotted = halving  |  Gold dashed = cycle top  |  Red dashed = cycle bottom  |  White = today"
            .to_string(),
    );

    // MVRV Z-Score with valuation bands
    let mut p1 = date_panel(
        "MVRV Z-Score — Are Holders Overextended or Accumulating?",
        "#00d4ff",
        "Z-Score",
        cfg,
        as_of,
    );
    p1.y_range = Some((-3.0, 12.0));
    p1.y_format = YFormat::Plain(0);
    for (y0, y1, color, op, name) in [
        (7.0, 12.0, "#8b0000", 0.15, "Extreme overvalue (top zone)"),
        (3.5, 7.0, "#ff4500", 0.10, "Overvalued"),
        (1.0, 3.5, "#ffd700", 0.07, "Fair to elevated"),
        (-1.0, 1.0, "#2ecc71", 0.08, "Accumulation zone"),
        (-3.0, -1.0, "#1a6b3c", 0.12, "Extreme undervalue (bottom zone)"),
    ] {
        p1.push(Element::HSpan {
            y0,
            y1,
            color: color.into(),
            opacity: op,
        });
        p1.legend(color, name);
    }
    price_overlay(&mut p1, price, start, -3.0, 12.0);
    p1.push(Element::Line {
        points: xy(&metrics.mvrv, start, 1.0),
        stroke: Stroke::solid("#00d4ff", 1.5),
    });
    p1.push(Element::HLine {
        y: 0.0,
        stroke: Stroke::dashed("#2ecc71", 1.0).opacity(0.7),
    });
    if let Some(z) = r.mvrv {
        p1.push(Element::HLine {
            y: z,
            stroke: Stroke::dotted("white", 1.0).opacity(0.5),
        });
        p1.push(star(as_of, z));
        p1.push(label(as_of, z + 0.8, format!(" Today: {:.2}", z)));
    }
    cycle_markers(&mut p1, cfg, as_of);

    // market price vs realized price, log scale
    let mut p2 = date_panel(
        "Realized Price vs Market Price — How Close Are We to Aggregate Cost Basis?",
        "#F7931A",
        "Price (USD)",
        cfg,
        as_of,
    );
    p2.y_scale = YScale::Log;
    p2.y_format = YFormat::Dollars;
    let realized: BTreeMap<NaiveDate, f64> =
        metrics.realized.iter().map(|p| (p.date, p.value)).collect();
    let merged: Vec<(NaiveDate, f64, f64)> = price
        .since(start)
        .iter()
        .filter_map(|p| realized.get(&p.date).map(|rp| (p.date, p.value, *rp)))
        .collect();
    p2.push(Element::Between {
        xs: merged.iter().map(|m| date_x(m.0)).collect(),
        upper: merged.iter().map(|m| m.1).collect(),
        lower: merged.iter().map(|m| m.2).collect(),
        above: "#2ecc71".into(),
        below: "#ff4d4d".into(),
        opacity: 0.15,
    });
    p2.push(Element::Line {
        points: merged.iter().map(|m| (date_x(m.0), m.1)).collect(),
        stroke: Stroke::solid("#F7931A", 1.5),
    });
    p2.push(Element::Line {
        points: merged.iter().map(|m| (date_x(m.0), m.2)).collect(),
        stroke: Stroke::dashed("#2ecc71", 1.5),
    });
    p2.legend("#F7931A", "BTC Market Price");
    p2.legend("#2ecc71", "Realized Price (avg cost basis)");
    if let Some(s) = support {
        p2.push(Element::HLine {
            y: s,
            stroke: Stroke::dotted(chart::GOLD, 1.2).opacity(0.8),
        });
        p2.legend(chart::GOLD, format!("Accum. support {}", dollars(s)));
    }
    if let Some(px) = r.market_price {
        p2.push(star(as_of, px));
        p2.push(label(as_of, px * 1.05, format!(" {}", dollars(px))));
    }
    if let Some(rp) = r.realized_price {
        p2.push(Element::Marker {
            x: date_x(as_of),
            y: rp,
            shape: Shape::Diamond,
            color: "#2ecc71".into(),
            size: 6.0,
        });
        p2.push(label(as_of, rp * 0.88, format!(" RP: {}", dollars(rp))));
    }
    cycle_markers(&mut p2, cfg, as_of);

    // LTH supply in millions
    let mut p3 = date_panel(
        "Long-Term Holder Supply — Are Accumulators Absorbing Supply?",
        "#9b59b6",
        "LTH Supply (Million BTC)",
        cfg,
        as_of,
    );
    p3.y_format = YFormat::Plain(1);
    let lth = xy(&metrics.lth, start, 1e-6);
    let lth_range = lth
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(a, b), p| (a.min(p.1), b.max(p.1)));
    if lth_range.0.is_finite() {
        let pad = (lth_range.1 - lth_range.0).max(0.1) * 0.05;
        p3.y_range = Some((lth_range.0 - pad, lth_range.1 + pad));
        price_overlay(&mut p3, price, start, lth_range.0, lth_range.1);
    }
    p3.push(Element::Area {
        points: lth.clone(),
        baseline: f64::NEG_INFINITY,
        color: "#9b59b6".into(),
        opacity: 0.10,
    });
    p3.push(Element::Line {
        points: lth,
        stroke: Stroke::solid("#9b59b6", 1.5),
    });
    if let Some(v) = metrics.lth.since(start).last().map(|p| p.value / 1e6) {
        p3.push(star(as_of, v));
        p3.push(label(as_of, v, format!(" {:.2}M BTC", v)));
    }
    cycle_markers(&mut p3, cfg, as_of);

    // smoothed exchange netflow
    let mut p4 = date_panel(
        "Exchange Netflow (30d avg) — Are Coins Leaving or Entering Exchanges?",
        "#2ecc71",
        "BTC/day",
        cfg,
        as_of,
    );
    p4.y_format = YFormat::Plain(0);
    let smooth: Vec<(f64, f64)> = centered_smooth(&metrics.netflow, cfg.windows.netflow_smoothing)
        .into_iter()
        .filter(|(d, _)| *d >= start)
        .map(|(d, v)| (date_x(d), v.unwrap_or(f64::NAN)))
        .collect();
    let split = |keep: fn(f64) -> bool| -> Vec<(f64, f64)> {
        smooth
            .iter()
            .map(|&(x, y)| (x, if keep(y) { y } else { 0.0 }))
            .collect()
    };
    p4.push(Element::Area {
        points: split(|y| y >= 0.0),
        baseline: 0.0,
        color: "#ff4d4d".into(),
        opacity: 0.6,
    });
    p4.push(Element::Area {
        points: split(|y| y < 0.0),
        baseline: 0.0,
        color: "#2ecc71".into(),
        opacity: 0.6,
    });
    p4.legend("#ff4d4d", "Inflow > Outflow (sell pressure)");
    p4.legend("#2ecc71", "Outflow > Inflow (accumulation)");
    p4.push(Element::Line {
        points: smooth,
        stroke: Stroke::solid(chart::TEXT, 0.8).opacity(0.5),
    });
    p4.push(Element::HLine {
        y: 0.0,
        stroke: Stroke::dashed(chart::TEXT, 0.8).opacity(0.4),
    });
    if let Some(nf) = r.netflow_smoothed {
        p4.push(star(as_of, nf));
        p4.push(label(as_of, nf, format!("  {:+.0} BTC/day", nf)));
    }
    if let (Some(first), Some(last)) = (outflow.first(), outflow.last()) {
        let total: f64 = outflow.iter().map(|p| p.value).sum();
        p4.push(Element::Badge {
            corner: chart::Corner::BottomLeft,
            text: format!(
                "Outflow USD {} – {}\n{} days, total ${:.1}B\nlatest ${:.2}B/day",
                first.date.format("%m/%d"),
                last.date.format("%m/%d"),
                outflow.len(),
                total / 1e9,
                last.value / 1e9
            ),
            color: "#2ecc71".into(),
        });
    }
    cycle_markers(&mut p4, cfg, as_of);

    fig.panels = vec![p1, p2, p3, p4];
    fig
}
