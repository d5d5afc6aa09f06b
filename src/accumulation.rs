use anyhow::{Context, Result};
use chrono::NaiveDate;
use statrs::statistics::Statistics;
use tracing::{info, warn};

use crate::{
    AccumulationArgs,
    chart::{self, Corner, Element, Figure, Panel, Shape, Stroke, YFormat},
    config::{AppConfig, CycleConfig, Windows},
    cycle::{CycleAnchor, CycleError, CycleReport, DetectParams, NormalizedPoint, normalize_and_detect},
    output::dollars,
    series::{TimeSeries, load_price_csv},
};

/// One halving cycle run through the detector.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub cycle: CycleConfig,
    pub top_day: i64,
    pub report: CycleReport,
}

impl CycleOutcome {
    /// Latest point of a cycle that is still open.
    pub fn today(&self) -> Option<&NormalizedPoint> {
        if self.cycle.confirmed {
            None
        } else {
            self.report.normalized.last()
        }
    }

    /// Percent the latest price sits above the accumulation low.
    pub fn gap_above_support(&self) -> Option<f64> {
        self.report.normalized.gap_above(self.report.early.value)
    }
}

/// Anchors on the halving, measures against the top price, looks for the bear low after the top.
pub fn analyze_cycle(
    cycle: &CycleConfig,
    windows: &Windows,
    price: &TimeSeries,
    as_of: NaiveDate,
) -> Result<CycleOutcome, CycleError> {
    let anchor = CycleAnchor::new(cycle.halving, cycle.top_price)?;
    let top_day = (cycle.top - cycle.halving).num_days();
    let mut params = DetectParams::calendar(windows.accumulation_days, top_day, windows.btc_plot_days);
    if !cycle.confirmed {
        params = params.open_until(as_of);
    }
    let report = normalize_and_detect(price, anchor, &params)?;
    Ok(CycleOutcome {
        cycle: cycle.clone(),
        top_day,
        report,
    })
}

/// Runs every configured cycle. An open cycle with nothing to measure yet
/// is left out; any other failure is an error.
pub fn analyze_cycles(cfg: &AppConfig, price: &TimeSeries, as_of: NaiveDate) -> Result<Vec<CycleOutcome>> {
    let mut outcomes = Vec::with_capacity(cfg.cycles.len());
    for c in &cfg.cycles {
        match analyze_cycle(c, &cfg.windows, price, as_of) {
            Ok(o) => outcomes.push(o),
            Err(e @ (CycleError::NoDataAfterAnchor(_) | CycleError::NoDataInWindow { .. }))
                if !c.confirmed =>
            {
                warn!("{}: {}, skipped", c.name.trim(), e);
            }
            Err(e) => return Err(e).with_context(|| format!("analyze {}", c.name.trim())),
        }
    }
    Ok(outcomes)
}

/// Accumulation-low price of the most recent open cycle.
pub fn current_support(cfg: &AppConfig, price: &TimeSeries, as_of: NaiveDate) -> Option<f64> {
    let cycle = cfg.open_cycle()?;
    match analyze_cycle(cycle, &cfg.windows, price, as_of) {
        Ok(o) => Some(o.report.early.value),
        Err(e) => {
            warn!("{}: {}", cycle.name, e);
            None
        }
    }
}

/// How the pattern fared across the cycles that count.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternSummary {
    pub judged: usize,
    pub held: usize,
    pub mean_accumulation_pct: Option<f64>,
}

impl PatternSummary {
    pub fn from_outcomes(outcomes: &[CycleOutcome]) -> Self {
        let counted: Vec<&CycleOutcome> = outcomes
            .iter()
            .filter(|o| !o.cycle.exclude && o.cycle.confirmed)
            .collect();
        let verdicts: Vec<bool> = counted.iter().filter_map(|o| o.report.support_held).collect();
        let lows: Vec<f64> = counted.iter().map(|o| o.report.early.percent).collect();
        Self {
            judged: verdicts.len(),
            held: verdicts.iter().filter(|h| **h).count(),
            mean_accumulation_pct: if lows.is_empty() { None } else { Some(lows.mean()) },
        }
    }
}

pub fn print_outcome(o: &CycleOutcome) {
    let r = &o.report;
    println!("{}", o.cycle.name);
    println!(
        "  Accumulation low:  {:+.1}%  day {}  {}",
        r.early.percent,
        r.early.offset,
        dollars(r.early.value)
    );
    match (&r.late, r.support_held) {
        (Some(late), Some(held)) => {
            let label = if o.cycle.confirmed { "Bear market low:" } else { "Current low:    " };
            println!(
                "  {}   {:+.1}%  day {}  {}",
                label,
                late.percent,
                late.offset,
                dollars(late.value)
            );
            println!("  Support held:      {}", if held { "✅ YES" } else { "❌ NO" });
        }
        _ => println!("  Support held:      undefined (no post-top data yet)"),
    }
    if o.cycle.exclude {
        println!("  Note: Excluded from pattern — Mt. Gox black swan");
    }
    if let (Some(today), Some(gap)) = (o.today(), o.gap_above_support()) {
        println!(
            "  Today:             {:+.1}%  day {}  {}  ({:+.1}% vs support)",
            today.percent,
            today.offset,
            dollars(today.value),
            gap
        );
    }
    println!();
}

pub fn execute(args: &AccumulationArgs) -> Result<()> {
    let cfg = AppConfig::load(args.common.config.as_deref())?;
    let data_dir = args.common.data_dir.clone().unwrap_or_else(|| ".".into());
    let out_dir = args.common.out.clone().unwrap_or_else(|| ".".into());
    let as_of = args.common.as_of.context("as-of date not set")?;

    let price_path = data_dir.join(&cfg.price_csv);
    let price = load_price_csv(&price_path)?;
    info!("{}: {} daily prices", price_path.display(), price.len());

    let outcomes = analyze_cycles(&cfg, &price, as_of)?;
    for o in &outcomes {
        print_outcome(o);
    }

    let summary = PatternSummary::from_outcomes(&outcomes);
    println!(
        "Pattern: support held in {}/{} mature cycles{}",
        summary.held,
        summary.judged,
        summary
            .mean_accumulation_pct
            .map(|m| format!(" (mean accumulation low {:+.1}% from top)", m))
            .unwrap_or_default()
    );

    let fig = build_figure(&outcomes, &cfg.windows, as_of);
    let path = out_dir.join("btc_accumulation_support.png");
    fig.save(&path)?;
    println!("Saved: {}", path.display());

    if let Some(open) = outcomes.iter().find(|o| !o.cycle.confirmed)
        && let Some(today) = open.today()
    {
        let support = open.report.early.value;
        println!();
        println!("Key level to watch for {}:", open.cycle.name.trim());
        println!("  Accumulation support: {}", dollars(support));
        println!("  Current price:        {}", dollars(today.value));
        println!(
            "  Buffer above support: {} ({:.1}%)",
            dollars(today.value - support),
            open.gap_above_support().unwrap_or(f64::NAN)
        );
    }
    Ok(())
}

fn text(x: f64, y: f64, s: String, color: &str, size: f64, bold: bool) -> Element {
    Element::Text {
        x,
        y,
        text: s,
        color: color.to_string(),
        size,
        bold,
    }
}

fn cycle_panel(o: &CycleOutcome, windows: &Windows, as_of: NaiveDate) -> Panel {
    let c = &o.cycle;
    let r = &o.report;
    let plot_days = windows.btc_plot_days as f64;
    let accum = windows.accumulation_days as f64;
    let top_day = o.top_day as f64;

    let mut p = Panel::new(c.name.trim(), &c.color);
    p.x_label = "Days from Halving".into();
    p.y_label = "% from Cycle Top".into();
    p.y_format = YFormat::SignedPercent;
    p.x_range = Some((-20.0, plot_days));
    p.y_range = Some((-115.0, 20.0));

    p.push(Element::VSpan {
        x0: 0.0,
        x1: accum,
        color: "white".into(),
        opacity: 0.12,
    });
    if top_day < plot_days {
        let end = if c.confirmed {
            plot_days
        } else {
            plot_days.min((as_of - c.halving).num_days() as f64)
        };
        p.push(Element::VSpan {
            x0: top_day,
            x1: end,
            color: "red".into(),
            opacity: 0.06,
        });
    }

    let line: Vec<(f64, f64)> = r
        .normalized
        .points()
        .iter()
        .map(|pt| (pt.offset as f64, pt.percent))
        .collect();
    let (width, alpha) = if c.exclude { (1.5, 0.5) } else { (2.5, 0.9) };
    p.push(Element::Area {
        points: line.clone(),
        baseline: -115.0,
        color: c.color.clone(),
        opacity: 0.05,
    });
    p.push(Element::Line {
        points: line,
        stroke: Stroke::solid(&c.color, width).opacity(alpha),
    });
    p.push(text(
        accum / 2.0 - 45.0,
        r.early.percent + 12.0,
        "Accumulation\nZone".into(),
        "white",
        9.0,
        false,
    ));

    // accumulation low extended right as the support line
    let (support_color, support_label) = if c.exclude {
        (chart::GOLD, format!("Accum. low: {:.1}%  (excluded)", r.early.percent))
    } else {
        (
            "yellow",
            format!(
                "Accum. low: {:.1}%  (day {}, {})",
                r.early.percent,
                r.early.offset,
                dollars(r.early.value)
            ),
        )
    };
    p.push(Element::HLine {
        y: r.early.percent,
        stroke: Stroke::dashed(support_color, if c.exclude { 1.2 } else { 2.0 })
            .opacity(if c.exclude { 0.5 } else { 0.95 }),
    });
    p.legend(support_color, support_label);
    let marker_color = if c.exclude { "#888888" } else { "yellow" };
    p.push(Element::Marker {
        x: r.early.offset as f64,
        y: r.early.percent,
        shape: Shape::Circle,
        color: marker_color.into(),
        size: 7.0,
    });
    p.push(text(
        r.early.offset as f64 + 80.0,
        r.early.percent + 12.0,
        format!(
            "Accum. low\nDay {}\n{}\n({:.1}%)",
            r.early.offset,
            dollars(r.early.value),
            r.early.percent
        ),
        if c.exclude { "#aaaaaa" } else { "yellow" },
        9.0,
        false,
    ));

    p.push(Element::VLine {
        x: top_day,
        stroke: Stroke::dotted(&c.color, 1.0).opacity(0.5),
    });
    p.push(Element::Marker {
        x: top_day,
        y: 0.0,
        shape: Shape::TriangleUp,
        color: "white".into(),
        size: 7.0,
    });
    p.push(text(top_day + 12.0, 8.0, format!("▲ Top\nDay {}", o.top_day), "white", 9.0, false));

    if let Some(late) = &r.late {
        let color = if c.confirmed { "white" } else { c.color.as_str() };
        p.push(Element::Marker {
            x: late.offset as f64,
            y: late.percent,
            shape: Shape::TriangleDown,
            color: color.into(),
            size: 7.0,
        });
        let label = if c.confirmed { "▼ Bottom" } else { "▼ Current low" };
        p.push(text(
            late.offset as f64 + 12.0,
            late.percent - 4.0,
            format!(
                "{}\nDay {}\n{}\n({:.1}%)",
                label,
                late.offset,
                dollars(late.value),
                late.percent
            ),
            &c.color,
            9.0,
            false,
        ));
    }

    if let Some(today) = o.today() {
        p.push(Element::Marker {
            x: today.offset as f64,
            y: today.percent,
            shape: Shape::Star,
            color: c.color.clone(),
            size: 11.0,
        });
        p.push(text(
            today.offset as f64 + 15.0,
            today.percent + 5.0,
            format!(
                "★ Today  Day {}\n{}  ({:.1}%)",
                today.offset,
                dollars(today.value),
                today.percent
            ),
            &c.color,
            10.0,
            true,
        ));
        if let Some(gap) = o.gap_above_support() {
            p.push(Element::Badge {
                corner: Corner::BottomLeft,
                text: format!(
                    "Support: {}\nCurrent: {}\nGap: {:+.1}% vs support",
                    dollars(r.early.value),
                    dollars(today.value),
                    gap
                ),
                color: "yellow".into(),
            });
        }
    }

    if let Some(held) = r.support_held {
        let (badge, color) = if c.exclude {
            ("Excluded: Mt. Gox black swan", "#888888")
        } else if held {
            ("Accumulation low held as support", "#00ff88")
        } else {
            ("Accumulation low broken", "#ff4444")
        };
        p.push(Element::Badge {
            corner: Corner::BottomRight,
            text: badge.into(),
            color: color.into(),
        });
    }

    for (pct, col, lbl) in [(-25.0, "#cccccc", "−25%"), (-50.0, "#ff8c00", "−50%"), (-75.0, "#e74c3c", "−75%")] {
        p.push(Element::HLine {
            y: pct,
            stroke: Stroke::dotted(col, 0.6).opacity(0.35),
        });
        p.push(text(plot_days - 60.0, pct + 1.5, lbl.into(), col, 8.0, false));
    }
    p.push(Element::HLine {
        y: 0.0,
        stroke: Stroke::dashed("white", 0.8).opacity(0.25),
    });
    p
}

pub fn build_figure(outcomes: &[CycleOutcome], windows: &Windows, as_of: NaiveDate) -> Figure {
    let subtitle = format!(
        "The lowest price in the first {} days after halving has held as support through the full bear market in every mature cycle",
        windows.accumulation_days
    );
    let mut fig = Figure::new(
        &["Bitcoin — Early Accumulation Low as Bear Market Support", subtitle.as_str()],
        2,
    );
    fig.footer = Some(format!(
        "White shading = accumulation zone (first {} days after halving)  |  Red shading = post-top bear market  |  Yellow dashed = accumulation low support line  |  Past patterns do not guarantee future results",
        windows.accumulation_days
    ));
    fig.panels = outcomes.iter().map(|o| cycle_panel(o, windows, as_of)).collect();
    fig
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::Point;
    use chrono::TimeDelta;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn cycle(confirmed: bool, exclude: bool) -> CycleConfig {
        CycleConfig {
            name: "Test cycle".into(),
            halving: d("2020-01-01"),
            top: d("2021-01-01"),
            top_price: 1000.0,
            confirmed,
            exclude,
            color: "#2ecc71".into(),
        }
    }

    /// Daily prices: 400 in the accumulation window (low 300 on day 120),
    /// 1000 at the top (day 366), then `bear_low` on day 700.
    fn prices(bear_low: f64) -> TimeSeries {
        let start = d("2020-01-01");
        TimeSeries::from_unsorted(
            (0..1100)
                .map(|n| {
                    let v = match n {
                        120 => 300.0,
                        366 => 1000.0,
                        700 => bear_low,
                        n if n < 366 => 400.0 + n as f64,
                        _ => 800.0,
                    };
                    Point::new(start + TimeDelta::days(n), v)
                })
                .collect(),
        )
    }

    #[test]
    fn test_closed_cycle_held() {
        let o = analyze_cycle(&cycle(true, false), &Windows::default(), &prices(350.0), d("2026-01-01"))
            .unwrap();
        assert_eq!(o.top_day, 366);
        assert_eq!(o.report.early.offset, 120);
        assert_eq!(o.report.early.percent, -70.0);
        assert_eq!(o.report.late.as_ref().unwrap().offset, 700);
        assert_eq!(o.report.support_held, Some(true));
        assert!(o.today().is_none());
    }

    #[test]
    fn test_closed_cycle_broken() {
        let o = analyze_cycle(&cycle(true, false), &Windows::default(), &prices(250.0), d("2026-01-01"))
            .unwrap();
        assert_eq!(o.report.support_held, Some(false));
    }

    #[test]
    fn test_open_cycle_is_capped_at_as_of() {
        let o = analyze_cycle(&cycle(false, false), &Windows::default(), &prices(250.0), d("2020-12-01"))
            .unwrap();
        // as-of lands before the top: nothing after the top yet
        assert!(o.report.late.is_none());
        assert_eq!(o.report.support_held, None);
        let today = o.today().unwrap();
        assert_eq!(today.date, d("2020-12-01"));
        assert_eq!(o.gap_above_support(), Some((today.value - 300.0) / 300.0 * 100.0));
    }

    #[test]
    fn test_current_support_uses_open_cycle() {
        let mut cfg = AppConfig::default();
        cfg.cycles = vec![cycle(true, false), cycle(false, false)];
        assert_eq!(current_support(&cfg, &prices(350.0), d("2022-01-01")), Some(300.0));
        cfg.cycles = vec![cycle(true, false)];
        assert_eq!(current_support(&cfg, &prices(350.0), d("2022-01-01")), None);
    }

    #[test]
    fn test_open_cycle_without_data_is_skipped() {
        let mut cfg = AppConfig::default();
        let mut open = cycle(false, false);
        open.name = "Open cycle".into();
        open.halving = d("2022-06-01");
        open.top = d("2023-06-01");
        cfg.cycles = vec![cycle(true, false), open];
        // as-of lands before the open halving
        let outcomes = analyze_cycles(&cfg, &prices(350.0), d("2021-06-01")).unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].cycle.name, "Test cycle");
        assert_eq!(outcomes[0].report.support_held, Some(true));
    }

    #[test]
    fn test_confirmed_cycle_without_data_is_an_error() {
        let mut cfg = AppConfig::default();
        let mut late = cycle(true, false);
        late.halving = d("2030-01-01");
        late.top = d("2031-01-01");
        cfg.cycles = vec![late];
        let err = analyze_cycles(&cfg, &prices(350.0), d("2031-06-01")).unwrap_err();
        assert!(format!("{:#}", err).contains("analyze Test cycle"));
    }

    #[test]
    fn test_pattern_summary_skips_excluded_and_open() {
        let w = Windows::default();
        let as_of = d("2026-01-01");
        let outcomes = vec![
            analyze_cycle(&cycle(true, true), &w, &prices(100.0), as_of).unwrap(),
            analyze_cycle(&cycle(true, false), &w, &prices(350.0), as_of).unwrap(),
            analyze_cycle(&cycle(true, false), &w, &prices(250.0), as_of).unwrap(),
            analyze_cycle(&cycle(false, false), &w, &prices(350.0), as_of).unwrap(),
        ];
        let s = PatternSummary::from_outcomes(&outcomes);
        assert_eq!(s.judged, 2);
        assert_eq!(s.held, 1);
        assert_eq!(s.mean_accumulation_pct, Some(-70.0));
    }

    #[test]
    fn test_figure_has_one_panel_per_cycle() {
        let w = Windows::default();
        let as_of = d("2021-06-01");
        let outcomes = vec![
            analyze_cycle(&cycle(true, false), &w, &prices(350.0), as_of).unwrap(),
            analyze_cycle(&cycle(false, false), &w, &prices(350.0), as_of).unwrap(),
        ];
        let fig = build_figure(&outcomes, &w, as_of);
        assert_eq!(fig.panels.len(), 2);
        let closed: Vec<&str> = fig.panels[0].texts().collect();
        assert!(closed.contains(&"Accumulation low held as support"));
        let open: Vec<&str> = fig.panels[1].texts().collect();
        assert!(open.iter().any(|t| t.starts_with("★ Today")));
        assert!(open.iter().any(|t| t.starts_with("Support: $300")));
    }
}
