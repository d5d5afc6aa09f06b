//! Cycle-relative normalization and support detection.
//!
//! A price series is viewed relative to an anchor (a halving or a cycle
//! bottom): every point gets an offset from the anchor and a percent distance
//! from one reference price. The lowest point of an early window is the
//! "accumulation low"; the lowest point after a second offset (the cycle top,
//! or the end of the early window) is compared against it to decide whether
//! the accumulation low held as support.
//!
//! Everything here is pure: the only notion of "now" is the `open_until`
//! date callers pass in.

use chrono::{NaiveDate, TimeDelta};
use serde::Serialize;
use thiserror::Error;

use crate::series::TimeSeries;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CycleError {
    #[error("series is empty")]
    EmptySeries,

    #[error("reference price must be positive and finite, got {0}")]
    InvalidReferencePrice(f64),

    #[error("no data at or after anchor {0}")]
    NoDataAfterAnchor(NaiveDate),

    #[error("no data in window [0, {upper}]")]
    NoDataInWindow { upper: i64 },

    #[error("cannot compare {left:?} offsets with {right:?} offsets")]
    BasisMismatch {
        left: OffsetBasis,
        right: OffsetBasis,
    },
}

/// How offsets from the anchor are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OffsetBasis {
    /// Calendar days since the anchor date (continuous markets).
    CalendarDays,
    /// Ordinal position of the observation after the anchor (exchange sessions).
    TradingDays,
}

impl OffsetBasis {
    pub fn label(&self) -> &'static str {
        match self {
            OffsetBasis::CalendarDays => "day",
            OffsetBasis::TradingDays => "trading day",
        }
    }
}

/// Reference date and the price every percent is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CycleAnchor {
    pub date: NaiveDate,
    pub reference_price: f64,
}

impl CycleAnchor {
    pub fn new(date: NaiveDate, reference_price: f64) -> Result<Self, CycleError> {
        check_reference(reference_price)?;
        Ok(Self {
            date,
            reference_price,
        })
    }
}

fn check_reference(reference: f64) -> Result<(), CycleError> {
    if reference.is_finite() && reference > 0.0 {
        Ok(())
    } else {
        Err(CycleError::InvalidReferencePrice(reference))
    }
}

/// Percent distance of `value` from `reference`.
pub fn percent_from(value: f64, reference: f64) -> f64 {
    (value - reference) / reference * 100.0
}

/// Inverse of [`percent_from`].
pub fn value_from_percent(percent: f64, reference: f64) -> f64 {
    reference * (1.0 + percent / 100.0)
}

/// Window bounds and offset semantics for one detection run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectParams {
    pub basis: OffsetBasis,
    /// Inclusive upper bound W of the early window `[0, W]`.
    pub early_window: i64,
    /// The late window starts strictly after this offset.
    pub late_after: i64,
    /// Nothing beyond this offset is considered.
    pub plot_horizon: i64,
    /// Set for cycles that are still open; caps the slice at that date.
    pub open_until: Option<NaiveDate>,
}

impl DetectParams {
    pub fn calendar(early_window: i64, late_after: i64, plot_horizon: i64) -> Self {
        Self {
            basis: OffsetBasis::CalendarDays,
            early_window,
            late_after,
            plot_horizon,
            open_until: None,
        }
    }

    pub fn trading(early_window: i64, late_after: i64, plot_horizon: i64) -> Self {
        Self {
            basis: OffsetBasis::TradingDays,
            early_window,
            late_after,
            plot_horizon,
            open_until: None,
        }
    }

    pub fn open_until(mut self, now: NaiveDate) -> Self {
        self.open_until = Some(now);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NormalizedPoint {
    pub offset: i64,
    pub date: NaiveDate,
    pub value: f64,
    pub percent: f64,
}

/// Lowest point (by percent) of a window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Extremum {
    pub basis: OffsetBasis,
    pub offset: i64,
    pub date: NaiveDate,
    pub value: f64,
    pub percent: f64,
}

impl Extremum {
    fn from_point(basis: OffsetBasis, p: &NormalizedPoint) -> Self {
        Self {
            basis,
            offset: p.offset,
            date: p.date,
            value: p.value,
            percent: p.percent,
        }
    }

    /// True when this extremum sits strictly above `other`. Equality does not count.
    pub fn holds_above(&self, other: &Extremum) -> Result<bool, CycleError> {
        if self.basis != other.basis {
            return Err(CycleError::BasisMismatch {
                left: self.basis,
                right: other.basis,
            });
        }
        Ok(self.percent > other.percent)
    }
}

/// A series expressed as offsets from one anchor and percents from one reference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedSeries {
    basis: OffsetBasis,
    anchor: CycleAnchor,
    points: Vec<NormalizedPoint>,
}

impl NormalizedSeries {
    pub fn basis(&self) -> OffsetBasis {
        self.basis
    }

    pub fn anchor(&self) -> &CycleAnchor {
        &self.anchor
    }

    pub fn points(&self) -> &[NormalizedPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last(&self) -> Option<&NormalizedPoint> {
        self.points.last()
    }

    /// Original values, recomputed from the percents.
    pub fn denormalize(&self) -> Vec<f64> {
        self.points
            .iter()
            .map(|p| value_from_percent(p.percent, self.anchor.reference_price))
            .collect()
    }

    /// Stable minimum by percent over the offsets accepted by `in_window`.
    pub fn min_where(&self, in_window: impl Fn(i64) -> bool) -> Option<Extremum> {
        let mut best: Option<&NormalizedPoint> = None;
        for p in self.points.iter().filter(|p| in_window(p.offset)) {
            if p.percent.is_nan() {
                continue;
            }
            match best {
                Some(b) if p.percent >= b.percent => {}
                _ => best = Some(p),
            }
        }
        best.map(|p| Extremum::from_point(self.basis, p))
    }

    /// Percent the latest value sits above `support` (negative when below).
    pub fn gap_above(&self, support: f64) -> Option<f64> {
        if support <= 0.0 || !support.is_finite() {
            return None;
        }
        self.last().map(|p| percent_from(p.value, support))
    }
}

/// Everything one detection run produces.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub normalized: NormalizedSeries,
    pub early: Extremum,
    pub late: Option<Extremum>,
    /// None when the late window is empty: the verdict is undefined, not false.
    pub support_held: Option<bool>,
}

/// Slices `series` around the anchor and computes offsets and percents.
pub fn normalize(
    series: &TimeSeries,
    anchor: CycleAnchor,
    params: &DetectParams,
) -> Result<NormalizedSeries, CycleError> {
    check_reference(anchor.reference_price)?;
    if series.is_empty() {
        return Err(CycleError::EmptySeries);
    }

    let cap = params.open_until.unwrap_or(NaiveDate::MAX);
    let points: Vec<NormalizedPoint> = match params.basis {
        OffsetBasis::CalendarDays => {
            let horizon_end = anchor
                .date
                .checked_add_signed(TimeDelta::days(params.plot_horizon))
                .unwrap_or(NaiveDate::MAX);
            series
                .between(anchor.date, horizon_end.min(cap))
                .iter()
                .map(|p| NormalizedPoint {
                    offset: (p.date - anchor.date).num_days(),
                    date: p.date,
                    value: p.value,
                    percent: percent_from(p.value, anchor.reference_price),
                })
                .collect()
        }
        OffsetBasis::TradingDays => series
            .between(anchor.date, cap)
            .iter()
            .zip(0i64..)
            .take_while(|(_, ordinal)| *ordinal <= params.plot_horizon)
            .map(|(p, ordinal)| NormalizedPoint {
                offset: ordinal,
                date: p.date,
                value: p.value,
                percent: percent_from(p.value, anchor.reference_price),
            })
            .collect(),
    };

    if points.is_empty() {
        return Err(CycleError::NoDataAfterAnchor(anchor.date));
    }
    Ok(NormalizedSeries {
        basis: params.basis,
        anchor,
        points,
    })
}

/// Normalizes `series` and compares the early-window low with the late-window low.
pub fn normalize_and_detect(
    series: &TimeSeries,
    anchor: CycleAnchor,
    params: &DetectParams,
) -> Result<CycleReport, CycleError> {
    let normalized = normalize(series, anchor, params)?;

    let early = normalized
        .min_where(|o| (0..=params.early_window).contains(&o))
        .ok_or(CycleError::NoDataInWindow {
            upper: params.early_window,
        })?;
    let late = normalized.min_where(|o| o > params.late_after);
    let support_held = late.map(|l| l.holds_above(&early)).transpose()?;

    Ok(CycleReport {
        normalized,
        early,
        late,
        support_held,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::Point;

    fn d0() -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()
    }

    fn day(n: i64) -> NaiveDate {
        d0() + TimeDelta::days(n)
    }

    fn series(points: &[(i64, f64)]) -> TimeSeries {
        TimeSeries::new(points.iter().map(|&(n, v)| Point::new(day(n), v)).collect()).unwrap()
    }

    fn anchor(reference: f64) -> CycleAnchor {
        CycleAnchor::new(d0(), reference).unwrap()
    }

    #[test]
    fn test_support_broken_scenario() {
        let s = series(&[(0, 100.0), (50, 40.0), (200, 60.0), (400, 90.0), (800, 30.0)]);
        let r = normalize_and_detect(&s, anchor(100.0), &DetectParams::calendar(200, 200, 1100))
            .unwrap();
        assert_eq!(r.early.offset, 50);
        assert_eq!(r.early.percent, -60.0);
        let late = r.late.unwrap();
        assert_eq!(late.offset, 800);
        assert_eq!(late.percent, -70.0);
        assert_eq!(r.support_held, Some(false));
    }

    #[test]
    fn test_support_held_scenario() {
        let s = series(&[(0, 100.0), (50, 40.0), (200, 60.0), (400, 90.0), (800, 70.0)]);
        let r = normalize_and_detect(&s, anchor(100.0), &DetectParams::calendar(200, 200, 1100))
            .unwrap();
        assert_eq!(r.late.unwrap().percent, -30.0);
        assert_eq!(r.support_held, Some(true));
    }

    #[test]
    fn test_injected_minimum_is_found_exactly() {
        for target in [0i64, 1, 37, 199, 200] {
            let pts: Vec<(i64, f64)> = (0..=300)
                .map(|n| (n, if n == target { 10.0 } else { 50.0 + (n % 7) as f64 }))
                .collect();
            let r = normalize_and_detect(
                &series(&pts),
                anchor(100.0),
                &DetectParams::calendar(200, 250, 1100),
            )
            .unwrap();
            assert_eq!(r.early.offset, target);
        }
    }

    #[test]
    fn test_ties_keep_first_occurrence() {
        let s = series(&[(0, 80.0), (10, 50.0), (20, 50.0), (30, 70.0)]);
        let r = normalize_and_detect(&s, anchor(100.0), &DetectParams::calendar(200, 200, 1100))
            .unwrap();
        assert_eq!(r.early.offset, 10);
    }

    #[test]
    fn test_reference_point_is_zero_percent() {
        for reference in [0.01, 1.0, 123.456, 124774.0] {
            assert_eq!(percent_from(reference, reference), 0.0);
        }
    }

    #[test]
    fn test_equal_lows_are_not_held() {
        let s = series(&[(0, 100.0), (50, 40.0), (400, 40.0)]);
        let r = normalize_and_detect(&s, anchor(100.0), &DetectParams::calendar(200, 200, 1100))
            .unwrap();
        assert_eq!(r.support_held, Some(false));
    }

    #[test]
    fn test_empty_late_window_is_undefined() {
        let s = series(&[(0, 100.0), (50, 40.0), (150, 60.0)]);
        let r = normalize_and_detect(&s, anchor(100.0), &DetectParams::calendar(200, 200, 1100))
            .unwrap();
        assert!(r.late.is_none());
        assert_eq!(r.support_held, None);
    }

    #[test]
    fn test_invalid_reference_fails_fast() {
        let s = series(&[(0, 100.0)]);
        for bad in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            let a = CycleAnchor {
                date: d0(),
                reference_price: bad,
            };
            let err = normalize_and_detect(&s, a, &DetectParams::calendar(200, 200, 1100));
            assert!(matches!(err, Err(CycleError::InvalidReferencePrice(_))));
            assert!(CycleAnchor::new(d0(), bad).is_err());
        }
    }

    #[test]
    fn test_empty_series_and_empty_window() {
        let empty = TimeSeries::default();
        assert_eq!(
            normalize_and_detect(&empty, anchor(1.0), &DetectParams::calendar(200, 200, 1100)),
            Err(CycleError::EmptySeries)
        );

        let late_only = series(&[(300, 50.0), (400, 60.0)]);
        assert_eq!(
            normalize_and_detect(&late_only, anchor(100.0), &DetectParams::calendar(200, 200, 1100)),
            Err(CycleError::NoDataInWindow { upper: 200 })
        );

        let before = series(&[(-10, 50.0)]);
        assert_eq!(
            normalize_and_detect(&before, anchor(100.0), &DetectParams::calendar(200, 200, 1100)),
            Err(CycleError::NoDataAfterAnchor(d0()))
        );
    }

    #[test]
    fn test_horizon_and_open_cycle_cap() {
        let s = series(&[(0, 100.0), (100, 90.0), (500, 20.0), (1200, 5.0)]);
        let closed = normalize(&s, anchor(100.0), &DetectParams::calendar(200, 200, 1100)).unwrap();
        assert_eq!(closed.len(), 3);

        let open = normalize(
            &s,
            anchor(100.0),
            &DetectParams::calendar(200, 200, 1100).open_until(day(300)),
        )
        .unwrap();
        assert_eq!(open.len(), 2);
        assert_eq!(open.last().unwrap().offset, 100);
    }

    #[test]
    fn test_points_before_anchor_are_ignored() {
        let s = series(&[(-30, 1.0), (0, 100.0), (20, 80.0)]);
        let r = normalize_and_detect(&s, anchor(100.0), &DetectParams::calendar(200, 200, 1100))
            .unwrap();
        assert_eq!(r.normalized.points()[0].offset, 0);
        assert_eq!(r.early.offset, 20);
    }

    #[test]
    fn test_trading_days_use_ordinals() {
        // weekend gaps: calendar offsets 0,1,4,5 become ordinals 0,1,2,3
        let s = series(&[(0, 100.0), (1, 95.0), (4, 90.0), (5, 99.0), (8, 85.0)]);
        let r = normalize_and_detect(&s, anchor(100.0), &DetectParams::trading(2, 2, 10)).unwrap();
        let offsets: Vec<i64> = r.normalized.points().iter().map(|p| p.offset).collect();
        assert_eq!(offsets, vec![0, 1, 2, 3, 4]);
        assert_eq!(r.early.offset, 2);
        assert_eq!(r.early.date, day(4));
        assert_eq!(r.late.unwrap().offset, 4);
        assert_eq!(r.support_held, Some(false));
    }

    #[test]
    fn test_trading_horizon_counts_ordinals() {
        let pts: Vec<(i64, f64)> = (0..20).map(|n| (n * 2, 100.0)).collect();
        let n = normalize(&series(&pts), anchor(100.0), &DetectParams::trading(5, 5, 9)).unwrap();
        assert_eq!(n.len(), 10);
    }

    #[test]
    fn test_mixed_bases_refuse_comparison() {
        let s = series(&[(0, 100.0), (1, 90.0)]);
        let cal = normalize(&s, anchor(100.0), &DetectParams::calendar(5, 5, 10))
            .unwrap()
            .min_where(|_| true)
            .unwrap();
        let trd = normalize(&s, anchor(100.0), &DetectParams::trading(5, 5, 10))
            .unwrap()
            .min_where(|_| true)
            .unwrap();
        assert!(matches!(
            cal.holds_above(&trd),
            Err(CycleError::BasisMismatch { .. })
        ));
    }

    #[test]
    fn test_round_trip_recovers_values() {
        let values = [0.5, 13.37, 999.99, 64074.0, 124774.0, 3.3e-4];
        let pts: Vec<(i64, f64)> = values.iter().enumerate().map(|(i, v)| (i as i64, *v)).collect();
        let n = normalize(&series(&pts), anchor(124774.0), &DetectParams::calendar(200, 200, 1100))
            .unwrap();
        for (orig, back) in values.iter().zip(n.denormalize()) {
            assert!(((orig - back) / orig).abs() < 1e-9, "{orig} vs {back}");
        }
    }

    #[test]
    fn test_idempotent() {
        let s = series(&[(0, 100.0), (50, 40.0), (200, 60.0), (400, 90.0), (800, 30.0)]);
        let p = DetectParams::calendar(200, 200, 1100).open_until(day(900));
        let a = normalize_and_detect(&s, anchor(100.0), &p).unwrap();
        let b = normalize_and_detect(&s, anchor(100.0), &p).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_gap_above_support() {
        let s = series(&[(0, 100.0), (10, 120.0)]);
        let n = normalize(&s, anchor(100.0), &DetectParams::calendar(200, 200, 1100)).unwrap();
        assert_eq!(n.gap_above(100.0), Some(20.0));
        assert_eq!(n.gap_above(0.0), None);
    }
}
