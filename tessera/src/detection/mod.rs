//! Object detection on the scan projections.
//!
//! Each queued projection is read back from the scan store, normalised,
//! cut into tiles, run through the model, stitched and post-processed into a
//! binary mask. Connected components of the mask become detections in pixel
//! coordinates. Raw model output is written to the network store.

pub mod labeling;
pub mod model;
pub mod postprocess;
pub mod tiling;


pub use labeling::LabelMap;
pub use model::{IdentityModel, InferenceModel, ModelOutput};
pub use tiling::TileGrid;

use std::sync::Arc;
use std::time::Duration;

use common::Buffer2;

use crate::assembler::{QueuedFrame, SharedQueue};
use crate::checkpoint::{self, RoundDir};
use crate::config::AnalyserSettings;
use crate::error::{Error, Result};
use crate::event::AcquisitionEvent;
use crate::metadata::SummaryMetadata;
use crate::plan::AcquisitionPlan;
use crate::store::{ArrayStore, ChunkStore, Dtype, StoreMode};
use crate::writer::{FrameData, FrameWriter, StoreWriter};

/// A detected object in pixel coordinates of its projection.
///
/// `x` is the row and `y` the column of the component centroid.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedPosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub score: f64,
    pub event: AcquisitionEvent,
}

/// Detections of one projection.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameDetections {
    pub event: AcquisitionEvent,
    pub image_width: usize,
    pub image_height: usize,
    pub positions: Vec<DetectedPosition>,
}

struct QueueSnapshot {
    plan: AcquisitionPlan,
    summary: Option<SummaryMetadata>,
    frames: Vec<QueuedFrame>,
}

pub struct DetectionEngine {
    settings: AnalyserSettings,
    round: RoundDir,
    model: Arc<dyn InferenceModel>,
    queue: SharedQueue,
}

impl DetectionEngine {
    pub fn new(
        settings: &AnalyserSettings,
        round: RoundDir,
        model: Arc<dyn InferenceModel>,
        queue: SharedQueue,
    ) -> Self {
        Self {
            settings: settings.clone(),
            round,
            model,
            queue,
        }
    }

    /// Detects objects in every queued projection.
    ///
    /// Reads the queue from the round checkpoint when nothing is held in
    /// memory. Running it twice yields the same detections.
    pub fn analyse(&self) -> Result<Vec<FrameDetections>> {
        let snapshot = self.snapshot()?;
        if snapshot.frames.is_empty() {
            tracing::info!("no projections queued for analysis");
            return Ok(Vec::new());
        }

        let scan = ChunkStore::open(&self.round.scan_store(), StoreMode::Read)?;
        let header = scan.header().clone();
        let summary = snapshot.summary.unwrap_or_else(|| SummaryMetadata {
            image_width: header.frame_width(),
            image_height: header.frame_height(),
            pixel_size_um: Some(self.settings.pixel_size_um),
            ..Default::default()
        });

        let mut network = StoreWriter::new(self.round.network_store(), Dtype::F32);
        network.start_with_header(header.clone(), &summary)?;

        let total = snapshot.frames.len();
        let mut detections = Vec::with_capacity(total);
        for (i, frame) in snapshot.frames.iter().enumerate() {
            let projection: Buffer2<u16> = scan.read_frame(&header.index_of(&frame.event.index()))?;

            let output = self.infer(&projection)?;
            network.frame_ready(FrameData::F32(&output), &frame.event, &frame.metadata)?;

            let positions = self.detect(&output, &frame.event);
            tracing::info!(
                frame = i + 1,
                total,
                p = frame.event.index().p,
                detections = positions.len(),
                "analysed projection"
            );

            detections.push(FrameDetections {
                event: frame.event.clone(),
                image_width: projection.width(),
                image_height: projection.height(),
                positions,
            });
        }

        network.sequence_finished(&snapshot.plan)?;
        network.finalize_metadata()?;
        Ok(detections)
    }

    fn snapshot(&self) -> Result<QueueSnapshot> {
        let (plan, summary, frames) = {
            let queue = self.queue.lock();
            (queue.plan.clone(), queue.summary.clone(), queue.frames.clone())
        };

        let frames = if frames.is_empty() {
            let retry = Duration::from_millis(self.settings.checkpoint_retry_ms);
            let frames = checkpoint::load_queue(&self.round, retry)?;
            tracing::info!(frames = frames.len(), "reloaded analysis queue from checkpoint");
            self.queue.lock().frames = frames.clone();
            frames
        } else {
            frames
        };

        let plan = match plan {
            Some(plan) => plan,
            None => {
                let plan: AcquisitionPlan = checkpoint::read_json(&self.round.scan_plan())?;
                self.queue.lock().plan = Some(plan.clone());
                plan
            }
        };

        Ok(QueueSnapshot {
            plan,
            summary,
            frames,
        })
    }

    /// Runs the model over `projection` and returns its full-size output.
    pub fn infer(&self, projection: &Buffer2<u16>) -> Result<Buffer2<f32>> {
        let normalized = tiling::normalize(projection);
        let (width, height) = normalized.dimensions();

        let grid = if self.model.expects_single_image() {
            None
        } else {
            Some(TileGrid::for_image(width, height, self.settings.tile_size)?)
        };
        let batch = match &grid {
            Some(grid) => grid.split(&normalized),
            None => vec![normalized],
        };

        let images = match self.model.predict(&batch)? {
            ModelOutput::Batch(images) => images,
            ModelOutput::Heads(heads) => heads
                .into_iter()
                .next()
                .ok_or_else(|| Error::Inference("model returned no outputs".to_string()))?
                .iter()
                .map(tiling::upsample2x)
                .collect(),
        };

        match grid {
            Some(grid) => grid.stitch(&images),
            None => {
                let [image]: [Buffer2<f32>; 1] =
                    images.try_into().map_err(|images: Vec<Buffer2<f32>>| Error::BatchSize {
                        expected: 1,
                        actual: images.len(),
                    })?;
                if image.dimensions() != (width, height) {
                    return Err(Error::FrameShape {
                        expected: (width, height),
                        actual: image.dimensions(),
                    });
                }
                Ok(image)
            }
        }
    }

    /// Binary mask of `output`, oriented to stage axes.
    pub fn mask(&self, output: &Buffer2<f32>) -> Buffer2<u8> {
        let settings = &self.settings;
        let mask = if settings.binary_mode {
            postprocess::threshold(output, settings.threshold)
        } else {
            let mut output = output.clone();
            postprocess::erase_seams(&mut output, settings.tile_size, settings.seam_width);
            let mask = postprocess::threshold(&output, settings.threshold);
            let mask = postprocess::opening(&mask, settings.closing_kernel);
            postprocess::closing(&mask, settings.closing_kernel)
        };
        postprocess::orient(&mask, &settings.orientation)
    }

    fn detect(&self, output: &Buffer2<f32>, event: &AcquisitionEvent) -> Vec<DetectedPosition> {
        LabelMap::from_mask(&self.mask(output))
            .centroids()
            .into_iter()
            .map(|(row, col)| DetectedPosition {
                x: row,
                y: col,
                z: 0.0,
                score: 1.0,
                event: event.clone(),
            })
            .collect()
    }
}
