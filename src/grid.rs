//! Per-monitor snap grid.
//!
//! A monitor is divided into `x × y` equal cells. Windows snap to the cell
//! span closest to their current size and position. The grid dimensions are
//! edited interactively in grid build mode.

use crate::geometry::{Direction, Point, Rect};

/// Grid dimensions: number of columns and rows, never below one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridDims {
    x: u32,
    y: u32,
}

impl GridDims {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x: x.max(1), y: y.max(1) }
    }

    pub fn x(&self) -> u32 {
        self.x
    }

    pub fn y(&self) -> u32 {
        self.y
    }

    /// Apply a grid build mode key: Left/Right remove/add a column,
    /// Down/Up remove/add a row.
    pub fn adjust(&mut self, dir: Direction) {
        match dir {
            Direction::Left => self.x = self.x.saturating_sub(1).max(1),
            Direction::Right => self.x += 1,
            Direction::Down => self.y = self.y.saturating_sub(1).max(1),
            Direction::Up => self.y += 1,
        }
    }
}

impl Default for GridDims {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

/// Integer cell size, as used for stepping and line placement
pub fn cell_size(area: Rect, dims: GridDims) -> (i32, i32) {
    (area.width / dims.x as i32, area.height / dims.y as i32)
}

/// Snap one axis: returns the aligned center and pixel span.
fn snap_axis(origin: i32, extent: i32, cells: u32, center: i32, requested: i32) -> (i32, i32) {
    let cell = extent as f64 / cells as f64;
    let num = ((requested as f64 / cell).round() as i64).clamp(1, cells as i64) as u32;
    let span = (num as f64 * cell) as i32;

    let mut best = origin + (num as f64 * (cell / 2.0)) as i32;
    let mut best_dist = (center - best).abs();
    for k in (num..=(2 * cells - num)).step_by(2).skip(1) {
        let candidate = origin + (k as f64 * (cell / 2.0)) as i32;
        let dist = (center - candidate).abs();
        if dist < best_dist {
            best = candidate;
            best_dist = dist;
        }
    }

    (best, span)
}

/// Geometry for a window snapped onto the grid of `area`.
///
/// The span is the whole number of cells nearest the requested size, placed
/// at the cell-aligned position whose center is nearest the requested
/// center. The returned size excludes `border` on each edge, as X expects.
pub fn snap(area: Rect, dims: GridDims, requested: Rect, border: i32) -> Rect {
    let c = requested.center();
    let (cx, span_x) = snap_axis(area.x, area.width, dims.x, c.x, requested.width);
    let (cy, span_y) = snap_axis(area.y, area.height, dims.y, c.y, requested.height);

    Rect::new(
        cx - span_x / 2,
        cy - span_y / 2,
        span_x - 2 * border,
        span_y - 2 * border,
    )
}

/// Move `rect` one cell in `dir`, kept inside `area`. The result still
/// needs snapping.
pub fn step_move(area: Rect, dims: GridDims, rect: Rect, dir: Direction) -> Rect {
    let (cw, ch) = cell_size(area, dims);
    let mut r = rect;
    match dir {
        Direction::Left => r.x = (r.x - cw).max(area.x),
        Direction::Down => r.y = (r.y + ch).min(area.y + area.height - r.height),
        Direction::Up => r.y = (r.y - ch).max(area.y),
        Direction::Right => r.x = (r.x + cw).min(area.x + area.width - r.width),
    }
    r
}

/// Shrink (Left/Down) or grow (Right/Up) `rect` by one cell, between one
/// cell and the full `area`. The result still needs snapping.
pub fn step_resize(area: Rect, dims: GridDims, rect: Rect, dir: Direction) -> Rect {
    let (cw, ch) = cell_size(area, dims);
    let mut r = rect;
    match dir {
        Direction::Left => r.width = (r.width - cw).max(cw),
        Direction::Down => r.height = (r.height - ch).max(ch),
        Direction::Up => r.height = (r.height + ch).min(area.height),
        Direction::Right => r.width = (r.width + cw).min(area.width),
    }
    r
}

/// Interior grid lines for an overlay of the given size, in overlay-local
/// coordinates.
pub fn grid_lines(width: i32, height: i32, dims: GridDims) -> Vec<(Point, Point)> {
    let mut lines = Vec::new();
    let step_x = width / dims.x as i32;
    for i in 1..dims.x as i32 {
        lines.push((Point::new(i * step_x, 0), Point::new(i * step_x, height)));
    }
    let step_y = height / dims.y as i32;
    for i in 1..dims.y as i32 {
        lines.push((Point::new(0, i * step_y), Point::new(width, i * step_y)));
    }
    lines
}
