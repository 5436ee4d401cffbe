//! Turns detections into the acquisition plan of the round.

use std::io::{BufWriter, Write};
use std::path::Path;

use crate::checkpoint::{self, RoundDir};
use crate::config::AcquisitionSettings;
use crate::cover::{TileCoverSolver, TilePlacement};
use crate::detection::{DetectedPosition, FrameDetections};
use crate::error::{Error, Result};
use crate::mapping;
use crate::plan::{AcquisitionPlan, StagePosition};

const CSV_HEADER: &str = "index,axis-0,axis-1";

fn write_csv(path: &Path, rows: impl Iterator<Item = (f64, f64)>) -> Result<()> {
    let write_error = |source| Error::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(write_error)?;
    }
    let file = std::fs::File::create(path).map_err(write_error)?;
    let mut out = BufWriter::new(file);
    writeln!(out, "{CSV_HEADER}").map_err(write_error)?;
    for (i, (x, y)) in rows.enumerate() {
        writeln!(out, "{i},{x},{y}").map_err(write_error)?;
    }
    out.flush().map_err(write_error)
}

/// Collects stage-space detections and derives the imaging plan from them.
#[derive(Debug)]
pub struct PositionInterpreter {
    settings: AcquisitionSettings,
    scan_pixel_size_um: f64,
    round: RoundDir,
    solver: TileCoverSolver,
    positions: Vec<DetectedPosition>,
}

impl PositionInterpreter {
    pub fn new(settings: &AcquisitionSettings, scan_pixel_size_um: f64, round: RoundDir) -> Self {
        Self {
            settings: settings.clone(),
            scan_pixel_size_um,
            round,
            solver: TileCoverSolver::new(settings.cover_subdivisions),
            positions: Vec::new(),
        }
    }

    /// Maps the detections of one projection to stage coordinates and keeps them.
    pub fn add(&mut self, frame: &FrameDetections) {
        self.positions.extend(frame.positions.iter().map(|position| {
            mapping::remap(
                position,
                self.scan_pixel_size_um,
                frame.image_width,
                frame.image_height,
            )
        }));
    }

    /// Detections collected so far, in stage microns.
    pub fn positions(&self) -> &[DetectedPosition] {
        &self.positions
    }

    /// Solves the tile cover for the collected positions and returns the
    /// acquisition plan imaging every tile at `current_z + z_offset`.
    ///
    /// `image_width` is the acquisition camera width in pixels.
    pub fn interpret(&self, current_z: f64, image_width: usize) -> Result<AcquisitionPlan> {
        let settings = &self.settings;
        write_csv(
            &self.round.positions_csv(),
            self.positions.iter().map(|p| (p.x, p.y)),
        )?;

        let fov = settings.pixel_size_um * image_width as f64;
        let tile_size = fov - 2.0 * settings.min_border_distance;
        let points: Vec<(f64, f64)> = self.positions.iter().map(|p| (p.x, p.y)).collect();
        let tiles = self
            .solver
            .solve(&points, tile_size, settings.min_border_distance)?;

        write_csv(
            &self.round.imaging_positions_csv(),
            tiles.iter().map(|t| (t.x, t.y)),
        )?;

        let z = current_z + settings.z_offset;
        let stage_positions = tiles
            .iter()
            .map(|&TilePlacement { x, y }| {
                StagePosition::xyz(x + settings.x_offset, y + settings.y_offset, z)
            })
            .collect();
        let plan = settings.plan.with_stage_positions(stage_positions);
        checkpoint::write_json(&self.round.imaging_sequence(), &plan)?;

        tracing::info!(
            positions = self.positions.len(),
            tiles = tiles.len(),
            fov_um = fov,
            z,
            "derived acquisition plan"
        );
        Ok(plan)
    }
}
