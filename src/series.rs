use anyhow::{Context, Result};
use chrono::NaiveDate;
use csv::ReaderBuilder;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::{fs::File, io::BufReader, path::Path};
use thiserror::Error;
use tracing::debug;

use crate::config::MetricSpec;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SeriesError {
    #[error("dates must be strictly ascending: {next} follows {prev}")]
    Unordered { prev: NaiveDate, next: NaiveDate },
}

/// One observation of a daily series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub date: NaiveDate,
    pub value: f64,
}

impl Point {
    pub fn new(date: NaiveDate, value: f64) -> Self {
        Self { date, value }
    }
}

/// Ascending, date-unique sequence of observations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeries {
    points: Vec<Point>,
}

impl TimeSeries {
    pub fn new(points: Vec<Point>) -> Result<Self, SeriesError> {
        if let Some((prev, next)) = points
            .iter()
            .tuple_windows()
            .find(|(a, b)| a.date >= b.date)
        {
            return Err(SeriesError::Unordered {
                prev: prev.date,
                next: next.date,
            });
        }
        Ok(Self { points })
    }

    /// Sorts by date and keeps the last observation of each day.
    pub fn from_unsorted(mut points: Vec<Point>) -> Self {
        points.sort_by_key(|p| p.date);
        let mut out = Vec::with_capacity(points.len());
        for (_date, group) in &points.into_iter().chunk_by(|p| p.date) {
            if let Some(last) = group.last() {
                out.push(last);
            }
        }
        Self { points: out }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn iter(&self) -> impl Iterator<Item = &Point> {
        self.points.iter()
    }

    pub fn first(&self) -> Option<&Point> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&Point> {
        self.points.last()
    }

    /// Latest observation dated on or before `date`.
    pub fn value_at_or_before(&self, date: NaiveDate) -> Option<&Point> {
        let idx = self.points.partition_point(|p| p.date <= date);
        idx.checked_sub(1).map(|i| &self.points[i])
    }

    /// Points dated on or after `date`.
    pub fn since(&self, date: NaiveDate) -> &[Point] {
        let idx = self.points.partition_point(|p| p.date < date);
        &self.points[idx..]
    }

    /// Points dated within `[from, to]`.
    pub fn between(&self, from: NaiveDate, to: NaiveDate) -> &[Point] {
        let start = self.points.partition_point(|p| p.date < from);
        let end = self.points.partition_point(|p| p.date <= to);
        if start >= end {
            &[]
        } else {
            &self.points[start..end]
        }
    }

    pub fn retain(&mut self, f: impl FnMut(&Point) -> bool) {
        self.points.retain(f);
    }
}

/// Parses a numeric field; anything unparseable or non-finite is missing.
pub fn coerce_f64(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Same coercion for JSON values that may arrive as strings or numbers.
pub fn coerce_json(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        serde_json::Value::String(s) => coerce_f64(s),
        _ => None,
    }
}

/// Reads the calendar day from `2024-04-19`, `2024-04-19 00:00:00 UTC`,
/// `2024-04-19T00:00:00Z` and similar.
pub fn parse_day(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    raw.get(..10)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
}

#[derive(Debug, Deserialize)]
struct SnapshotRow {
    snapped_at: String,
    #[serde(default)]
    price: Option<String>,
}

/// Loads a price-snapshot CSV (`snapped_at`, `price`, ...).
pub fn load_price_csv(path: &Path) -> Result<TimeSeries> {
    let mut rdr = ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("open price csv {}", path.display()))?;
    let mut points = Vec::new();
    let mut dropped = 0usize;
    for rec in rdr.deserialize::<SnapshotRow>() {
        let r = rec.with_context(|| format!("read {}", path.display()))?;
        let date = parse_day(&r.snapped_at);
        let price = r.price.as_deref().and_then(coerce_f64);
        match (date, price) {
            (Some(date), Some(value)) => points.push(Point { date, value }),
            _ => dropped += 1,
        }
    }
    debug!("{}: {} rows, {} dropped", path.display(), points.len(), dropped);
    Ok(TimeSeries::from_unsorted(points))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    #[serde(alias = "Date")]
    pub date: NaiveDate,
    #[serde(default, alias = "Open")]
    pub open: Option<f64>,
    #[serde(default, alias = "High")]
    pub high: Option<f64>,
    #[serde(default, alias = "Low")]
    pub low: Option<f64>,
    #[serde(alias = "Close")]
    pub close: f64,
}

/// Loads a daily `date,open,high,low,close` CSV as a close-price series.
pub fn load_close_csv(path: &Path) -> Result<TimeSeries> {
    let mut rdr = ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("open close csv {}", path.display()))?;
    let mut points = Vec::new();
    for rec in rdr.deserialize::<Row>() {
        let r = rec.with_context(|| format!("read {}", path.display()))?;
        if r.close.is_finite() {
            points.push(Point::new(r.date, r.close));
        }
    }
    Ok(TimeSeries::from_unsorted(points))
}

/// Loads one on-chain metric from its cached JSON array.
pub fn load_metric_json(path: &Path, spec: &MetricSpec) -> Result<TimeSeries> {
    let file = File::open(path).with_context(|| format!("open metric {}", path.display()))?;
    let rows: Vec<serde_json::Value> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parse metric {}", path.display()))?;
    let points = rows
        .iter()
        .filter_map(|row| {
            let date = row.get(&spec.date_field)?.as_str().and_then(parse_day)?;
            let value = row.get(&spec.value_field).and_then(coerce_json)?;
            Some(Point { date, value })
        })
        .filter(|p| !spec.positive_only || p.value > 0.0)
        .collect();
    Ok(TimeSeries::from_unsorted(points))
}

/// Rolling mean over a column with gaps.
///
/// A window yields a value once it holds at least `min_periods` present
/// observations. Centered windows place the label at `(window - 1) / 2`.
pub fn rolling_mean(
    values: &[Option<f64>],
    window: usize,
    min_periods: usize,
    centered: bool,
) -> Vec<Option<f64>> {
    let n = values.len();
    if window == 0 {
        return vec![None; n];
    }
    let offset = if centered { (window - 1) / 2 } else { 0 };
    (0..n)
        .map(|i| {
            let end = (i + 1 + offset).min(n);
            let start = (i + 1 + offset).saturating_sub(window);
            let present: Vec<f64> = values[start..end].iter().flatten().copied().collect();
            if present.is_empty() || present.len() < min_periods.max(1) {
                None
            } else {
                Some(present.iter().mean())
            }
        })
        .collect()
}
