//! Declarative chart panels in the dark dashboard theme, rendered to PNG
//! through `plotters`.
//!
//! A [`Figure`] is a grid of [`Panel`]s; each panel owns a list of
//! [`Element`]s in data coordinates. Panels describe what to draw, the
//! renderer maps them onto a `BitMapBackend`.

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use plotters::coord::Shift;
use plotters::coord::types::RangedCoordf64;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use std::path::Path;
use tempfile::Builder;

use crate::output::{ensure_parent_dir, thousands};

pub const BACKGROUND: &str = "#0d0d0d";
pub const GRID: &str = "#2a2a2a";
pub const TEXT: &str = "#e0e0e0";
pub const GOLD: &str = "#FFD700";

/// Date axis coordinate: days since the common era.
pub fn date_x(d: NaiveDate) -> f64 {
    d.num_days_from_ce() as f64
}

fn x_date(x: f64) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(x.round() as i32)
}

/// `#rrggbb`, `#rgb` or one of the named colours the panels use.
/// Anything unparseable renders white.
pub fn parse_color(s: &str) -> RGBColor {
    match s.to_ascii_lowercase().as_str() {
        "white" => WHITE,
        "black" => BLACK,
        "yellow" => YELLOW,
        "red" => RED,
        other => hex_color(other).unwrap_or(WHITE),
    }
}

fn hex_color(s: &str) -> Option<RGBColor> {
    let h = s.strip_prefix('#')?;
    let rgb: Vec<u8> = match h.len() {
        3 => h
            .chars()
            .map(|c| c.to_digit(16).map(|d| (d * 17) as u8))
            .collect::<Option<_>>()?,
        6 => (0..6)
            .step_by(2)
            .map(|i| h.get(i..i + 2).and_then(|b| u8::from_str_radix(b, 16).ok()))
            .collect::<Option<_>>()?,
        _ => return None,
    };
    Some(RGBColor(rgb[0], rgb[1], rgb[2]))
}

fn font<C: Color>(size: f64, bold: bool, color: &C) -> TextStyle<'static> {
    let style = if bold { FontStyle::Bold } else { FontStyle::Normal };
    FontDesc::new(FontFamily::SansSerif, size, style).color(color)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum XAxis {
    Numeric,
    Dates,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum YScale {
    Linear,
    Log,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum YFormat {
    SignedPercent,
    Dollars,
    Plain(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shape {
    Circle,
    TriangleUp,
    TriangleDown,
    Star,
    Diamond,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stroke {
    pub color: String,
    pub width: f64,
    /// Dash and gap length in pixels.
    pub dash: Option<(u32, u32)>,
    pub opacity: f64,
}

impl Stroke {
    pub fn solid(color: &str, width: f64) -> Self {
        Self {
            color: color.to_string(),
            width,
            dash: None,
            opacity: 1.0,
        }
    }

    pub fn dashed(color: &str, width: f64) -> Self {
        Self {
            dash: Some((6, 4)),
            ..Self::solid(color, width)
        }
    }

    pub fn dotted(color: &str, width: f64) -> Self {
        Self {
            dash: Some((2, 3)),
            ..Self::solid(color, width)
        }
    }

    pub fn opacity(mut self, opacity: f64) -> Self {
        self.opacity = opacity;
        self
    }

    fn style(&self) -> ShapeStyle {
        parse_color(&self.color)
            .mix(self.opacity)
            .stroke_width(self.width.round().max(1.0) as u32)
    }
}

fn fill(color: &str, opacity: f64) -> ShapeStyle {
    parse_color(color).mix(opacity).filled()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    /// Non-finite y values break the line into segments.
    Line {
        points: Vec<(f64, f64)>,
        stroke: Stroke,
    },
    Area {
        points: Vec<(f64, f64)>,
        baseline: f64,
        color: String,
        opacity: f64,
    },
    /// Fill between two aligned curves, coloured by which one is on top.
    Between {
        xs: Vec<f64>,
        upper: Vec<f64>,
        lower: Vec<f64>,
        above: String,
        below: String,
        opacity: f64,
    },
    HLine {
        y: f64,
        stroke: Stroke,
    },
    VLine {
        x: f64,
        stroke: Stroke,
    },
    HSpan {
        y0: f64,
        y1: f64,
        color: String,
        opacity: f64,
    },
    VSpan {
        x0: f64,
        x1: f64,
        color: String,
        opacity: f64,
    },
    Marker {
        x: f64,
        y: f64,
        shape: Shape,
        color: String,
        size: f64,
    },
    Text {
        x: f64,
        y: f64,
        text: String,
        color: String,
        size: f64,
        bold: bool,
    },
    Badge {
        corner: Corner,
        text: String,
        color: String,
    },
}

#[derive(Debug, Clone)]
pub struct Panel {
    pub title: String,
    pub title_color: String,
    pub x_label: String,
    pub y_label: String,
    pub x_axis: XAxis,
    pub y_scale: YScale,
    pub y_format: YFormat,
    pub x_range: Option<(f64, f64)>,
    pub y_range: Option<(f64, f64)>,
    pub legend: Vec<(String, String)>,
    pub elements: Vec<Element>,
}

impl Panel {
    pub fn new(title: &str, title_color: &str) -> Self {
        Self {
            title: title.to_string(),
            title_color: title_color.to_string(),
            x_label: String::new(),
            y_label: String::new(),
            x_axis: XAxis::Numeric,
            y_scale: YScale::Linear,
            y_format: YFormat::Plain(1),
            x_range: None,
            y_range: None,
            legend: Vec::new(),
            elements: Vec::new(),
        }
    }

    pub fn push(&mut self, e: Element) -> &mut Self {
        self.elements.push(e);
        self
    }

    pub fn legend(&mut self, color: &str, label: impl Into<String>) -> &mut Self {
        self.legend.push((color.to_string(), label.into()));
        self
    }

    /// Every label a reader sees on the panel: title, annotations, badges and legend.
    pub fn texts(&self) -> impl Iterator<Item = &str> + '_ {
        let annotations = self.elements.iter().filter_map(|e| match e {
            Element::Text { text, .. } | Element::Badge { text, .. } => Some(text.as_str()),
            _ => None,
        });
        std::iter::once(self.title.as_str())
            .chain(annotations)
            .chain(self.legend.iter().map(|(_, l)| l.as_str()))
    }

    fn data_points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.elements.iter().flat_map(|e| -> Vec<(f64, f64)> {
            match e {
                Element::Line { points, .. } | Element::Area { points, .. } => points.clone(),
                Element::Between {
                    xs, upper, lower, ..
                } => xs
                    .iter()
                    .zip(upper)
                    .chain(xs.iter().zip(lower))
                    .map(|(x, y)| (*x, *y))
                    .collect(),
                Element::Marker { x, y, .. } => vec![(*x, *y)],
                _ => Vec::new(),
            }
        })
    }

    fn ranges(&self) -> ((f64, f64), (f64, f64)) {
        let pts: Vec<(f64, f64)> = self
            .data_points()
            .filter(|(x, y)| x.is_finite() && y.is_finite())
            .filter(|(_, y)| self.y_scale == YScale::Linear || *y > 0.0)
            .collect();
        let fold = |f: fn(&(f64, f64)) -> f64| {
            pts.iter()
                .map(f)
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)))
        };
        let x = self.x_range.unwrap_or_else(|| widen(fold(|p| p.0), 0.0));
        let y = self.y_range.unwrap_or_else(|| match self.y_scale {
            YScale::Linear => widen(fold(|p| p.1), 0.05),
            YScale::Log => {
                let (lo, hi) = fold(|p| p.1);
                if lo.is_finite() { (lo * 0.8, hi * 1.25) } else { (1.0, 10.0) }
            }
        });
        (x, y)
    }
}

fn widen((lo, hi): (f64, f64), pad: f64) -> (f64, f64) {
    if !lo.is_finite() || !hi.is_finite() {
        return (0.0, 1.0);
    }
    if (hi - lo).abs() < f64::EPSILON {
        return (lo - 1.0, hi + 1.0);
    }
    let p = (hi - lo) * pad;
    (lo - p, hi + p)
}

fn fmt_y(v: f64, f: YFormat) -> String {
    match f {
        YFormat::SignedPercent => format!("{:+.0}%", v),
        YFormat::Dollars => format!("${}", thousands(v)),
        YFormat::Plain(p) => format!("{:.*}", p, v),
    }
}

/// Maps panel data into chart space: log10 on log panels, everything
/// clipped to the visible ranges.
struct Axes {
    x: (f64, f64),
    y: (f64, f64),
    log: bool,
}

impl Axes {
    fn new(p: &Panel) -> Self {
        let (x, y) = p.ranges();
        let log = p.y_scale == YScale::Log;
        let y = if log {
            (y.0.max(f64::MIN_POSITIVE).log10(), y.1.max(f64::MIN_POSITIVE).log10())
        } else {
            y
        };
        Self { x, y, log }
    }

    fn y(&self, v: f64) -> Option<f64> {
        if !v.is_finite() || (self.log && v <= 0.0) {
            return None;
        }
        let v = if self.log { v.log10() } else { v };
        Some(v.clamp(self.y.0.min(self.y.1), self.y.0.max(self.y.1)))
    }

    /// Like [`Axes::y`] but pins unusable values to the bottom edge.
    fn y_or_floor(&self, v: f64) -> f64 {
        self.y(v).unwrap_or(self.y.0)
    }

    fn clamp_x(&self, x: f64) -> f64 {
        x.clamp(self.x.0, self.x.1)
    }

    fn point(&self, (x, y): (f64, f64)) -> Option<(f64, f64)> {
        if !(x.is_finite() && x >= self.x.0 && x <= self.x.1) {
            return None;
        }
        Some((x, self.y(y)?))
    }

    fn segments(&self, pts: &[(f64, f64)]) -> Vec<Vec<(f64, f64)>> {
        let mut out = Vec::new();
        let mut cur = Vec::new();
        for p in pts {
            match self.point(*p) {
                Some(q) => cur.push(q),
                None if !cur.is_empty() => out.push(std::mem::take(&mut cur)),
                None => {}
            }
        }
        if !cur.is_empty() {
            out.push(cur);
        }
        out
    }
}

/// Marker outline around the origin, in pixels.
fn shape_points(shape: Shape, r: f64) -> Vec<(i32, i32)> {
    use std::f64::consts::PI;
    let pts = match shape {
        Shape::Circle => Vec::new(),
        Shape::TriangleUp => vec![(0.0, -r), (r, r * 0.8), (-r, r * 0.8)],
        Shape::TriangleDown => vec![(0.0, r), (r, -r * 0.8), (-r, -r * 0.8)],
        Shape::Diamond => vec![(0.0, -r), (r, 0.0), (0.0, r), (-r, 0.0)],
        Shape::Star => (0..10)
            .map(|i| {
                let rr = if i % 2 == 0 { r } else { r * 0.45 };
                let a = -PI / 2.0 + i as f64 * PI / 5.0;
                (rr * a.cos(), rr * a.sin())
            })
            .collect(),
    };
    pts.into_iter()
        .map(|(x, y)| (x.round() as i32, y.round() as i32))
        .collect()
}

/// Splits two aligned curves into runs where `upper >= lower` holds or not.
fn between_runs(xs: &[f64], upper: &[f64], lower: &[f64]) -> Vec<(bool, Vec<usize>)> {
    let mut runs: Vec<(bool, Vec<usize>)> = Vec::new();
    for i in 0..xs.len().min(upper.len()).min(lower.len()) {
        if !(upper[i].is_finite() && lower[i].is_finite()) {
            runs.push((false, Vec::new()));
            continue;
        }
        let above = upper[i] >= lower[i];
        match runs.last_mut() {
            Some((a, idx)) if *a == above && !idx.is_empty() => idx.push(i),
            _ => runs.push((above, vec![i])),
        }
    }
    runs.retain(|(_, idx)| idx.len() >= 2);
    runs
}

type Root<'a> = DrawingArea<BitMapBackend<'a>, Shift>;
type Chart<'a, 'b> = ChartContext<'a, BitMapBackend<'b>, Cartesian2d<RangedCoordf64, RangedCoordf64>>;

pub struct Figure {
    pub title: Vec<String>,
    pub footer: Option<String>,
    pub cols: usize,
    pub panel_width: u32,
    pub panel_height: u32,
    pub panels: Vec<Panel>,
}

impl Figure {
    pub fn new(title: &[&str], cols: usize) -> Self {
        Self {
            title: title.iter().map(|s| s.to_string()).collect(),
            footer: None,
            cols: cols.max(1),
            panel_width: 860,
            panel_height: 480,
            panels: Vec::new(),
        }
    }

    fn rows(&self) -> usize {
        self.panels.len().div_ceil(self.cols).max(1)
    }

    fn header_height(&self) -> u32 {
        20 + 26 * self.title.len() as u32
    }

    fn footer_height(&self) -> u32 {
        if self.footer.is_some() { 36 } else { 10 }
    }

    /// Pixel size of the rendered image.
    pub fn size(&self) -> (u32, u32) {
        let w = self.panel_width * self.cols as u32;
        let h = self.header_height() + self.panel_height * self.rows() as u32 + self.footer_height();
        (w, h)
    }

    /// Render as PNG next to `path`, then rename over it.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = ensure_parent_dir(path)?;
        let tmp = Builder::new().suffix(".png").tempfile_in(dir)?;
        {
            let root = BitMapBackend::new(tmp.path(), self.size()).into_drawing_area();
            self.draw(&root)?;
            root.present()
                .with_context(|| format!("encode {}", path.display()))?;
        }
        tmp.persist(path)
            .with_context(|| format!("persist {}", path.display()))?;
        Ok(())
    }

    /// Render into an in-memory RGB buffer, row-major.
    pub fn render_rgb(&self) -> Result<Vec<u8>> {
        let (w, h) = self.size();
        let mut buf = vec![0u8; (w * h * 3) as usize];
        {
            let root = BitMapBackend::with_buffer(&mut buf, (w, h)).into_drawing_area();
            self.draw(&root)?;
            root.present()?;
        }
        Ok(buf)
    }

    fn draw(&self, root: &Root<'_>) -> Result<()> {
        let text = parse_color(TEXT);
        let (w, _) = self.size();
        let center = Pos::new(HPos::Center, VPos::Top);
        root.fill(&parse_color(BACKGROUND))?;

        let (header, rest) = root.split_vertically(self.header_height());
        for (i, line) in self.title.iter().enumerate() {
            let style = if i == 0 { font(22.0, true, &text) } else { font(15.0, false, &text) };
            header.draw_text(line, &style.pos(center), (w as i32 / 2, 10 + 26 * i as i32))?;
        }

        let (body, foot) = rest.split_vertically(self.panel_height * self.rows() as u32);
        for (area, panel) in body.split_evenly((self.rows(), self.cols)).iter().zip(&self.panels) {
            draw_panel(area, panel)?;
        }
        if let Some(f) = &self.footer {
            let style = font(12.0, false, &text.mix(0.6)).pos(center);
            foot.draw_text(f, &style, (w as i32 / 2, 10))?;
        }
        Ok(())
    }
}

fn draw_panel(area: &Root<'_>, p: &Panel) -> Result<()> {
    let axes = Axes::new(p);
    let text = parse_color(TEXT);

    let mut chart = ChartBuilder::on(area)
        .caption(p.title.as_str(), font(15.0, true, &parse_color(&p.title_color)))
        .margin(12)
        .x_label_area_size(if p.x_label.is_empty() { 28 } else { 44 })
        .y_label_area_size(if p.y_label.is_empty() { 60 } else { 78 })
        .build_cartesian_2d(axes.x.0..axes.x.1, axes.y.0..axes.y.1)?;

    let x_fmt = |v: &f64| match p.x_axis {
        XAxis::Numeric => format!("{:.0}", v),
        XAxis::Dates => x_date(*v)
            .map(|d| d.format("%b %Y").to_string())
            .unwrap_or_default(),
    };
    let y_fmt = |v: &f64| {
        let v = if axes.log { 10f64.powf(*v) } else { *v };
        fmt_y(v, p.y_format)
    };
    {
        let mut mesh = chart.configure_mesh();
        mesh.bold_line_style(parse_color(GRID).stroke_width(1))
            .light_line_style(TRANSPARENT)
            .axis_style(text.mix(0.3).stroke_width(1))
            .label_style(font(11.0, false, &text))
            .axis_desc_style(font(12.0, false, &text))
            .x_labels(8)
            .y_labels(7)
            .x_label_formatter(&x_fmt)
            .y_label_formatter(&y_fmt);
        if !p.x_label.is_empty() {
            mesh.x_desc(p.x_label.as_str());
        }
        if !p.y_label.is_empty() {
            mesh.y_desc(p.y_label.as_str());
        }
        mesh.draw()?;
    }

    for e in &p.elements {
        draw_element(&mut chart, &axes, e)?;
    }

    if !p.legend.is_empty() {
        for (color, label) in &p.legend {
            let c = parse_color(color);
            chart
                .draw_series(std::iter::empty::<PathElement<(f64, f64)>>())?
                .label(label.as_str())
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], c.stroke_width(3)));
        }
        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperRight)
            .background_style(BLACK.mix(0.6))
            .border_style(parse_color(GRID))
            .label_font(font(11.0, false, &text))
            .draw()?;
    }
    Ok(())
}

fn draw_path(chart: &mut Chart<'_, '_>, pts: Vec<(f64, f64)>, stroke: &Stroke) -> Result<()> {
    let style = stroke.style();
    match stroke.dash {
        Some((on, off)) => {
            chart.draw_series(DashedLineSeries::new(pts, on, off, style))?;
        }
        None => {
            chart.draw_series(LineSeries::new(pts, style))?;
        }
    }
    Ok(())
}

fn draw_element(chart: &mut Chart<'_, '_>, axes: &Axes, e: &Element) -> Result<()> {
    match e {
        Element::Line { points, stroke } => {
            for seg in axes.segments(points) {
                draw_path(chart, seg, stroke)?;
            }
        }
        Element::Area {
            points,
            baseline,
            color,
            opacity,
        } => {
            let base = axes.y_or_floor(*baseline);
            for seg in axes.segments(points) {
                let (Some(first), Some(last)) = (seg.first().copied(), seg.last().copied()) else {
                    continue;
                };
                let mut poly = seg;
                poly.push((last.0, base));
                poly.push((first.0, base));
                chart.draw_series(std::iter::once(Polygon::new(poly, fill(color, *opacity))))?;
            }
        }
        Element::Between {
            xs,
            upper,
            lower,
            above,
            below,
            opacity,
        } => {
            for (is_above, idx) in between_runs(xs, upper, lower) {
                let top = idx.iter().map(|&i| (axes.clamp_x(xs[i]), axes.y_or_floor(upper[i])));
                let bottom = idx.iter().rev().map(|&i| (axes.clamp_x(xs[i]), axes.y_or_floor(lower[i])));
                let poly: Vec<(f64, f64)> = top.chain(bottom).collect();
                let color = if is_above { above } else { below };
                chart.draw_series(std::iter::once(Polygon::new(poly, fill(color, *opacity))))?;
            }
        }
        Element::HLine { y, stroke } => {
            if let Some(y) = axes.y(*y) {
                draw_path(chart, vec![(axes.x.0, y), (axes.x.1, y)], stroke)?;
            }
        }
        Element::VLine { x, stroke } => {
            if x.is_finite() && *x >= axes.x.0 && *x <= axes.x.1 {
                draw_path(chart, vec![(*x, axes.y.0), (*x, axes.y.1)], stroke)?;
            }
        }
        Element::HSpan {
            y0,
            y1,
            color,
            opacity,
        } => {
            let corners = [(axes.x.0, axes.y_or_floor(*y0)), (axes.x.1, axes.y_or_floor(*y1))];
            chart.draw_series(std::iter::once(Rectangle::new(corners, fill(color, *opacity))))?;
        }
        Element::VSpan {
            x0,
            x1,
            color,
            opacity,
        } => {
            let corners = [(axes.clamp_x(*x0), axes.y.0), (axes.clamp_x(*x1), axes.y.1)];
            chart.draw_series(std::iter::once(Rectangle::new(corners, fill(color, *opacity))))?;
        }
        Element::Marker {
            x,
            y,
            shape,
            color,
            size,
        } => {
            let Some(at) = axes.point((*x, *y)) else {
                return Ok(());
            };
            let c = parse_color(color);
            if *shape == Shape::Circle {
                let r = size.round() as u32;
                chart.draw_series([
                    Circle::new(at, r, c.filled()),
                    Circle::new(at, r, WHITE.stroke_width(1)),
                ])?;
            } else {
                let outline = shape_points(*shape, *size);
                chart.draw_series(std::iter::once(EmptyElement::at(at) + Polygon::new(outline, c.filled())))?;
            }
        }
        Element::Text {
            x,
            y,
            text,
            color,
            size,
            bold,
        } => {
            let (Some(y), true) = (axes.y(*y), x.is_finite()) else {
                return Ok(());
            };
            let mut t = MultiLineText::<(f64, f64), String>::new(
                (axes.clamp_x(*x), y),
                font(*size + 2.0, *bold, &parse_color(color)),
            );
            for line in text.lines() {
                t.push_line(line);
            }
            chart.draw_series(std::iter::once(t))?;
        }
        Element::Badge {
            corner,
            text,
            color,
        } => draw_badge(&chart.plotting_area().strip_coord_spec(), *corner, text, color)?,
    }
    Ok(())
}

fn draw_badge(area: &Root<'_>, corner: Corner, text: &str, color: &str) -> Result<()> {
    let (w, h) = area.dim_in_pixel();
    let (w, h) = (w as i32, h as i32);
    let lines: Vec<&str> = text.lines().collect();
    let longest = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0) as i32;
    let (bw, bh) = (longest * 7 + 16, lines.len() as i32 * 16 + 10);
    let (bx, by) = match corner {
        Corner::TopLeft => (10, 10),
        Corner::TopRight => (w - bw - 10, 10),
        Corner::BottomLeft => (10, h - bh - 10),
        Corner::BottomRight => (w - bw - 10, h - bh - 10),
    };
    area.draw(&Rectangle::new([(bx, by), (bx + bw, by + bh)], BLACK.mix(0.65).filled()))?;
    let style = font(12.0, true, &parse_color(color));
    for (i, line) in lines.iter().enumerate() {
        area.draw_text(line, &style, (bx + 8, by + 6 + 16 * i as i32))?;
    }
    Ok(())
}
