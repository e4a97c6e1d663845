//! Mapping between data space (timestamps, watts) and pixel space.

use embedded_graphics::{prelude::*, primitives::Rectangle};

/// Smallest span used for a degenerate axis so a single point or a flat line
/// still gets a drawable range.
const MIN_X_RANGE: f64 = 60.0;
const MIN_Y_RANGE: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataBounds {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl DataBounds {
    /// Bounds covering every point, with the y axis always including zero and
    /// padded by `margin_factor` of its range.
    pub fn from_points<I>(points: I, margin_factor: f64) -> Option<Self>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let mut it = points.into_iter().filter(|(x, y)| x.is_finite() && y.is_finite());
        let (x0, y0) = it.next()?;
        let (mut x_min, mut x_max, mut y_min, mut y_max) = (x0, x0, y0.min(0.0), y0.max(0.0));

        for (x, y) in it {
            x_min = x_min.min(x);
            x_max = x_max.max(x);
            y_min = y_min.min(y);
            y_max = y_max.max(y);
        }

        if x_max - x_min < MIN_X_RANGE {
            let mid = (x_min + x_max) / 2.0;
            x_min = mid - MIN_X_RANGE / 2.0;
            x_max = mid + MIN_X_RANGE / 2.0;
        }
        if y_max - y_min < MIN_Y_RANGE {
            y_max = y_min + MIN_Y_RANGE;
        }

        let y_margin = (y_max - y_min) * margin_factor;
        Some(Self {
            x_min,
            x_max,
            y_min: if y_min < 0.0 { y_min - y_margin } else { y_min },
            y_max: y_max + y_margin,
        })
    }

    pub fn x_range(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn y_range(&self) -> f64 {
        self.y_max - self.y_min
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Padding {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

pub struct Viewport {
    bounds: DataBounds,
    plot_area: Rectangle,
}

impl Viewport {
    pub fn new(bounds: DataBounds, canvas: Size, padding: Padding) -> Self {
        let width = canvas.width.saturating_sub(padding.left + padding.right);
        let height = canvas.height.saturating_sub(padding.top + padding.bottom);
        let plot_area = Rectangle::new(
            Point::new(padding.left as i32, padding.top as i32),
            Size::new(width, height),
        );
        Self { bounds, plot_area }
    }

    pub fn plot_area(&self) -> Rectangle {
        self.plot_area
    }

    pub fn bounds(&self) -> &DataBounds {
        &self.bounds
    }

    /// Screen position of a data point; y grows downward on screen.
    pub fn to_screen(&self, x: f64, y: f64) -> Point {
        let area = self.plot_area;
        let x_norm = ((x - self.bounds.x_min) / self.bounds.x_range()).clamp(0.0, 1.0);
        let y_norm = ((y - self.bounds.y_min) / self.bounds.y_range()).clamp(0.0, 1.0);

        Point::new(
            area.top_left.x + (x_norm * area.size.width as f64).round() as i32,
            area.top_left.y + ((1.0 - y_norm) * area.size.height as f64).round() as i32,
        )
    }
}
