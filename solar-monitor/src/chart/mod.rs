//! PNG line chart of production and consumption, plus the channel that hands
//! the latest rendering to the web server.

mod canvas;
mod viewport;

pub use canvas::Canvas;
pub use viewport::{DataBounds, Padding, Viewport};

use std::{convert::Infallible, sync::Arc};

use axum::body::Bytes;
use embedded_graphics::{
    mono_font::{
        ascii::{FONT_6X10, FONT_9X15_BOLD},
        MonoTextStyle,
    },
    pixelcolor::Rgb888,
    prelude::*,
    primitives::{Circle, Line, Polyline, PrimitiveStyle, Rectangle},
    text::{Alignment, Text},
};
use solar_client::domain::Sample;
use time::{macros::format_description, OffsetDateTime, UtcOffset};
use tokio::sync::watch;

use crate::transform::DerivedRatePoint;

const TITLE: &str = "Solar Panel Production and Consumption";
const Y_MARGIN_FACTOR: f64 = 0.1;
const Y_GRID_LINES: i32 = 5;
const X_GRID_LINES: i32 = 6;
const MARKER_DIAMETER: u32 = 5;

const BACKGROUND: Rgb888 = Rgb888::new(255, 255, 255);
const AXIS: Rgb888 = Rgb888::new(40, 40, 40);
const GRID: Rgb888 = Rgb888::new(225, 225, 225);
const PRODUCTION: Rgb888 = Rgb888::new(31, 119, 180);
const NET: Rgb888 = Rgb888::new(255, 127, 14);
const TOTAL: Rgb888 = Rgb888::new(44, 160, 44);

#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("no data to plot")]
    NoData,
    #[error("chart size {width}x{height} is too small")]
    InvalidSize { width: u32, height: u32 },
    #[error("png encoding failed: {0}")]
    Encode(#[from] png::EncodingError),
}

impl From<Infallible> for RenderError {
    fn from(e: Infallible) -> Self {
        match e {}
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartSeries {
    pub label: &'static str,
    pub color: Rgb888,
    /// `(unix seconds, watts)`, in timestamp order.
    pub points: Vec<(i64, f64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartData {
    pub series: Vec<ChartSeries>,
}

impl ChartData {
    fn from_columns(timestamps: Vec<i64>, columns: [Vec<f64>; 3]) -> Self {
        let [production, net, total] = columns;
        let zip = |values: Vec<f64>| -> Vec<(i64, f64)> { timestamps.iter().copied().zip(values).collect() };

        Self {
            series: vec![
                ChartSeries {
                    label: "Production (W)",
                    color: PRODUCTION,
                    points: zip(production),
                },
                ChartSeries {
                    label: "Net Consumption (W)",
                    color: NET,
                    points: zip(net),
                },
                ChartSeries {
                    label: "Total Consumption (W)",
                    color: TOTAL,
                    points: zip(total),
                },
            ],
        }
    }

    /// Power reconstructed from cumulative counters.
    pub fn from_rates(points: &[DerivedRatePoint]) -> Self {
        Self::from_columns(
            points.iter().map(|p| p.timestamp).collect(),
            [
                points.iter().map(|p| p.production_watts).collect(),
                points.iter().map(|p| p.net_watts).collect(),
                points.iter().map(|p| p.total_watts).collect(),
            ],
        )
    }

    /// Power as reported by the gateway at each sample.
    pub fn from_samples(samples: &[Sample]) -> Self {
        Self::from_columns(
            samples.iter().map(|s| s.timestamp).collect(),
            [
                samples.iter().map(|s| s.production.watts as f64).collect(),
                samples.iter().map(|s| s.net_consumption.watts as f64).collect(),
                samples.iter().map(|s| s.total_consumption.watts as f64).collect(),
            ],
        )
    }

    pub fn is_empty(&self) -> bool {
        self.series.iter().all(|s| s.points.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct RenderedChart {
    pub png: Bytes,
    pub rendered_at: OffsetDateTime,
    pub points: usize,
}

pub struct ChartRenderer {
    width: u32,
    height: u32,
    offset: UtcOffset,
    padding: Padding,
}

impl ChartRenderer {
    pub fn new(width: u32, height: u32, offset: UtcOffset) -> Self {
        Self {
            width,
            height,
            offset,
            padding: Padding {
                top: 40,
                right: 24,
                bottom: 48,
                left: 72,
            },
        }
    }

    pub fn render(&self, data: &ChartData) -> Result<RenderedChart, RenderError> {
        let min_width = self.padding.left + self.padding.right + 10;
        let min_height = self.padding.top + self.padding.bottom + 10;
        if self.width < min_width || self.height < min_height {
            return Err(RenderError::InvalidSize {
                width: self.width,
                height: self.height,
            });
        }

        let bounds = DataBounds::from_points(
            data.series
                .iter()
                .flat_map(|s| s.points.iter().map(|&(t, w)| (t as f64, w))),
            Y_MARGIN_FACTOR,
        )
        .ok_or(RenderError::NoData)?;

        let mut canvas = Canvas::new(self.width, self.height);
        canvas.clear(BACKGROUND)?;
        let viewport = Viewport::new(bounds, canvas.size(), self.padding);

        self.draw_grid(&mut canvas, &viewport)?;
        for series in &data.series {
            draw_series(&mut canvas, &viewport, series)?;
        }
        draw_legend(&mut canvas, &viewport, &data.series)?;

        let title_style = MonoTextStyle::new(&FONT_9X15_BOLD, AXIS);
        Text::with_alignment(
            TITLE,
            Point::new(self.width as i32 / 2, 24),
            title_style,
            Alignment::Center,
        )
        .draw(&mut canvas)?;

        let png = canvas.encode_png()?;
        Ok(RenderedChart {
            png: Bytes::from(png),
            rendered_at: OffsetDateTime::now_utc(),
            points: data.series.iter().map(|s| s.points.len()).max().unwrap_or(0),
        })
    }

    fn draw_grid(&self, canvas: &mut Canvas, viewport: &Viewport) -> Result<(), RenderError> {
        let area = viewport.plot_area();
        let bounds = *viewport.bounds();
        let label_style = MonoTextStyle::new(&FONT_6X10, AXIS);
        let grid_style = PrimitiveStyle::with_stroke(GRID, 1);
        let left = area.top_left.x;
        let right = left + area.size.width as i32;
        let top = area.top_left.y;
        let bottom = top + area.size.height as i32;

        for i in 0..=Y_GRID_LINES {
            let watts = bounds.y_min + bounds.y_range() * i as f64 / Y_GRID_LINES as f64;
            let y = viewport.to_screen(bounds.x_min, watts).y;
            Line::new(Point::new(left, y), Point::new(right, y))
                .into_styled(grid_style)
                .draw(canvas)?;
            Text::with_alignment(
                &format!("{watts:.0} W"),
                Point::new(left - 6, y + 3),
                label_style,
                Alignment::Right,
            )
            .draw(canvas)?;
        }

        let time_format = format_description!("[hour repr:12]:[minute]:[second] [period]");
        for i in 0..=X_GRID_LINES {
            let t = bounds.x_min + bounds.x_range() * i as f64 / X_GRID_LINES as f64;
            let x = viewport.to_screen(t, bounds.y_min).x;
            Line::new(Point::new(x, top), Point::new(x, bottom))
                .into_styled(grid_style)
                .draw(canvas)?;

            let label = OffsetDateTime::from_unix_timestamp(t.round() as i64)
                .ok()
                .and_then(|dt| dt.to_offset(self.offset).format(time_format).ok())
                .unwrap_or_default();
            Text::with_alignment(&label, Point::new(x, bottom + 16), label_style, Alignment::Center)
                .draw(canvas)?;
        }

        Rectangle::new(area.top_left, area.size)
            .into_styled(PrimitiveStyle::with_stroke(AXIS, 1))
            .draw(canvas)?;
        Text::with_alignment(
            "Time",
            Point::new((left + right) / 2, bottom + 36),
            label_style,
            Alignment::Center,
        )
        .draw(canvas)?;

        Ok(())
    }
}

fn draw_series(canvas: &mut Canvas, viewport: &Viewport, series: &ChartSeries) -> Result<(), RenderError> {
    let screen: Vec<Point> = series
        .points
        .iter()
        .map(|&(t, w)| viewport.to_screen(t as f64, w))
        .collect();

    if screen.len() > 1 {
        Polyline::new(&screen)
            .into_styled(PrimitiveStyle::with_stroke(series.color, 2))
            .draw(canvas)?;
    }

    let marker = PrimitiveStyle::with_fill(series.color);
    for p in &screen {
        Circle::with_center(*p, MARKER_DIAMETER)
            .into_styled(marker)
            .draw(canvas)?;
    }

    Ok(())
}

fn draw_legend(canvas: &mut Canvas, viewport: &Viewport, series: &[ChartSeries]) -> Result<(), RenderError> {
    let area = viewport.plot_area();
    let x = area.top_left.x + 12;
    let mut y = area.top_left.y + 14;

    for s in series {
        Line::new(Point::new(x, y), Point::new(x + 20, y))
            .into_styled(PrimitiveStyle::with_stroke(s.color, 3))
            .draw(canvas)?;
        Text::new(s.label, Point::new(x + 26, y + 3), MonoTextStyle::new(&FONT_6X10, AXIS)).draw(canvas)?;
        y += 14;
    }

    Ok(())
}

/// Write side of the latest-chart slot. Publishing replaces the previous chart
/// atomically; readers never see a partial rendering.
pub struct ChartPublisher {
    tx: watch::Sender<Option<Arc<RenderedChart>>>,
}

impl ChartPublisher {
    pub fn publish(&self, chart: RenderedChart) {
        self.tx.send_replace(Some(Arc::new(chart)));
    }

    /// Whether any chart has been published yet.
    pub fn has_chart(&self) -> bool {
        self.tx.borrow().is_some()
    }
}

/// Read side of the latest-chart slot.
#[derive(Clone)]
pub struct ChartHandle {
    rx: watch::Receiver<Option<Arc<RenderedChart>>>,
}

impl ChartHandle {
    /// The most recent chart, or `None` before the first successful render.
    pub fn latest(&self) -> Option<Arc<RenderedChart>> {
        self.rx.borrow().clone()
    }
}

pub fn chart_channel() -> (ChartPublisher, ChartHandle) {
    let (tx, rx) = watch::channel(None);
    (ChartPublisher { tx }, ChartHandle { rx })
}
