//! Minimal square tile cover of detected positions.
//!
//! Candidate tiles are anchored on a grid that starts one tile size below
//! the smallest coordinate of the points. Picking the fewest anchors such
//! that every point lies inside a picked tile is solved exactly as a binary
//! integer program.

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;

use good_lp::{
    Expression, ProblemVariables, Solution, SolverModel, Variable, constraint, microlp, variable,
};

use crate::error::{Error, Result};

/// Centre of one imaging tile in stage coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TilePlacement {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy)]
struct AnchorGrid {
    origin: (f64, f64),
    step: f64,
    tile_size: f64,
    cols: usize,
    rows: usize,
}

impl AnchorGrid {
    fn new(points: &[(f64, f64)], tile_size: f64, subdivisions: usize) -> Self {
        let (min_x, min_y, max_x, max_y) = points.iter().fold(
            (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
            |(x0, y0, x1, y1), &(x, y)| (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        );
        let origin = (min_x - tile_size, min_y - tile_size);
        let step = tile_size / subdivisions as f64;
        // One spare anchor past the last point absorbs rounding in the division.
        let count = |span: f64| (span / step).floor() as usize + 2;

        Self {
            origin,
            step,
            tile_size,
            cols: count(max_x - origin.0),
            rows: count(max_y - origin.1),
        }
    }

    fn anchor(&self, col: usize, row: usize) -> (f64, f64) {
        (
            self.origin.0 + col as f64 * self.step,
            self.origin.1 + row as f64 * self.step,
        )
    }

    /// Grid indices along one axis of the anchors whose half-open span
    /// `[anchor, anchor + tile_size)` contains `value`.
    ///
    /// The quotient only estimates the last anchor at or below `value`; the
    /// exact comparison on the anchor coordinates decides membership.
    fn covering(&self, value: f64, origin: f64, len: usize) -> Vec<usize> {
        let last = (((value - origin) / self.step).floor().max(0.0) as usize).min(len - 1);
        let reach = (self.tile_size / self.step).ceil() as usize + 1;
        (last.saturating_sub(reach)..=(last + 1).min(len - 1))
            .filter(|&i| {
                let anchor = origin + i as f64 * self.step;
                anchor <= value && value < anchor + self.tile_size
            })
            .collect()
    }

    fn covering_anchors(&self, (x, y): (f64, f64)) -> Vec<(usize, usize)> {
        let cols = self.covering(x, self.origin.0, self.cols);
        let rows = self.covering(y, self.origin.1, self.rows);
        cols.iter()
            .flat_map(|&c| rows.iter().map(move |&r| (c, r)))
            .collect()
    }
}

/// Exact tile cover solver.
#[derive(Debug, Clone, Copy)]
pub struct TileCoverSolver {
    /// Anchor grid steps per tile size.
    pub subdivisions: usize,
}

impl Default for TileCoverSolver {
    fn default() -> Self {
        Self { subdivisions: 1 }
    }
}

impl TileCoverSolver {
    pub fn new(subdivisions: usize) -> Self {
        Self { subdivisions }
    }

    /// Returns the centres of a minimum set of `tile_size` squares covering
    /// `points`, offset for tiles that are `padding` larger on every side.
    ///
    /// With no points a single tile at the origin is returned.
    pub fn solve(
        &self,
        points: &[(f64, f64)],
        tile_size: f64,
        padding: f64,
    ) -> Result<Vec<TilePlacement>> {
        if !tile_size.is_finite() || tile_size <= 0.0 {
            return Err(Error::Config(format!(
                "tile size must be positive, got {tile_size}"
            )));
        }
        if self.subdivisions == 0 {
            return Err(Error::Config("cover subdivisions must be at least 1".to_string()));
        }
        if points.is_empty() {
            tracing::info!("no positions to cover, using a single tile at the origin");
            return Ok(vec![TilePlacement { x: 0.0, y: 0.0 }]);
        }

        let grid = AnchorGrid::new(points, tile_size, self.subdivisions);

        let mut vars = ProblemVariables::new();
        let mut anchors: BTreeMap<(usize, usize), Variable> = BTreeMap::new();
        let mut cover_sets = Vec::with_capacity(points.len());
        for &point in points {
            let covering = grid.covering_anchors(point);
            if covering.is_empty() {
                return Err(Error::Infeasible {
                    x: point.0,
                    y: point.1,
                });
            }
            for &anchor in &covering {
                anchors
                    .entry(anchor)
                    .or_insert_with(|| vars.add(variable().binary()));
            }
            cover_sets.push(covering);
        }

        let objective: Expression = anchors.values().map(|&v| Expression::from(v)).sum();
        let mut model = vars.minimise(objective).using(microlp);
        for covering in &cover_sets {
            let covered: Expression = covering
                .iter()
                .map(|anchor| Expression::from(anchors[anchor]))
                .sum();
            model = model.with(constraint!(covered >= 1));
        }

        let solution = model
            .solve()
            .map_err(|err| Error::Solver(err.to_string()))?;

        let centre_offset = (tile_size + 2.0 * padding) / 2.0 - padding;
        let tiles: Vec<TilePlacement> = anchors
            .iter()
            .filter(|&(_, &var)| solution.value(var) > 0.5)
            .map(|(&(col, row), _)| {
                let (x, y) = grid.anchor(col, row);
                TilePlacement {
                    x: x + centre_offset,
                    y: y + centre_offset,
                }
            })
            .collect();

        tracing::info!(
            points = points.len(),
            candidates = anchors.len(),
            tiles = tiles.len(),
            "solved tile cover"
        );
        Ok(tiles)
    }
}
