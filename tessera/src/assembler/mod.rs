//! Streaming frame-to-projection reducer.
//!
//! Frames arrive one at a time from the hardware. Each is written into a
//! per-sequence `ChannelStack`; when the last z-slice of a channel lands, the
//! channel's maximum-intensity projection goes to the writer and, for the
//! analysis channel, the frame is queued for detection.


use std::borrow::Cow;
use std::sync::Arc;

use common::Buffer2;
use parking_lot::Mutex;

use crate::checkpoint::{self, RoundDir};
use crate::config::AnalyserSettings;
use crate::error::{Error, Result};
use crate::event::{AcquisitionEvent, Channel, EventIndex};
use crate::hardware::MdaListener;
use crate::metadata::{self, FrameMetadata, SummaryMetadata};
use crate::plan::{AcquisitionPlan, Axis};
use crate::writer::{FrameData, FrameWriter};

/// Marker in a channel config naming one channel per camera (`Dual-GFP-Cy5`).
pub const DUAL_CAMERA_MARKER: &str = "Dual";

/// A projection waiting for detection.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedFrame {
    pub event: AcquisitionEvent,
    pub metadata: FrameMetadata,
}

/// Hand-off between the scan and the analysis of one round.
#[derive(Debug, Default)]
pub struct AnalysisQueue {
    /// Scan plan as stored, after dual camera expansion.
    pub plan: Option<AcquisitionPlan>,
    pub summary: Option<SummaryMetadata>,
    pub frames: Vec<QueuedFrame>,
}

pub type SharedQueue = Arc<Mutex<AnalysisQueue>>;

/// Zeroed `channel x z x height x width` buffer of `u16` pixels.
#[derive(Debug, Clone)]
pub struct ChannelStack {
    channels: usize,
    z_slices: usize,
    width: usize,
    height: usize,
    slices: Vec<Buffer2<u16>>,
}

impl ChannelStack {
    pub fn new(channels: usize, z_slices: usize, width: usize, height: usize) -> Self {
        Self {
            channels,
            z_slices,
            width,
            height,
            slices: vec![Buffer2::new_default(width, height); channels * z_slices],
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn z_slices(&self) -> usize {
        self.z_slices
    }

    fn slot(&self, channel: usize, z: usize) -> Result<usize> {
        if channel >= self.channels || z >= self.z_slices {
            return Err(Error::StackIndex {
                channel,
                z,
                channels: self.channels,
                z_slices: self.z_slices,
            });
        }
        Ok(channel * self.z_slices + z)
    }

    /// Stores `frame` at `[channel, z]`. A repeated write replaces the slice.
    pub fn write(&mut self, channel: usize, z: usize, frame: &Buffer2<u16>) -> Result<()> {
        let slot = self.slot(channel, z)?;
        if frame.dimensions() != (self.width, self.height) {
            return Err(Error::FrameShape {
                expected: (self.width, self.height),
                actual: frame.dimensions(),
            });
        }
        self.slices[slot]
            .pixels_mut()
            .copy_from_slice(frame.pixels());
        Ok(())
    }

    pub fn slice(&self, channel: usize, z: usize) -> Result<&Buffer2<u16>> {
        Ok(&self.slices[self.slot(channel, z)?])
    }

    /// Per-pixel maximum over the z-slices of `channel`.
    pub fn mip(&self, channel: usize) -> Result<Buffer2<u16>> {
        let first = self.slot(channel, 0)?;
        let mut projection = self.slices[first].clone();
        for slice in &self.slices[first + 1..first + self.z_slices] {
            projection.max_assign(slice);
        }
        Ok(projection)
    }
}

#[derive(Debug)]
struct Sequence {
    plan: AcquisitionPlan,
    cameras: Vec<String>,
    stack: ChannelStack,
    last_z: usize,
}

impl Sequence {
    fn dual(&self) -> bool {
        self.cameras.len() > 1
    }
}

/// Splits every `Dual-A-B` channel into one channel per camera.
pub fn expand_dual_channels(channels: &[Channel], cameras: usize) -> Result<Vec<Channel>> {
    let mut expanded = Vec::with_capacity(channels.len() * cameras);
    for channel in channels {
        let parts: Vec<&str> = channel.config.split('-').collect();
        for camera in 0..cameras {
            let config = parts.get(camera + 1).ok_or_else(|| Error::DualChannel {
                config: channel.config.clone(),
                camera,
            })?;
            expanded.push(Channel::new(channel.group.clone(), *config));
        }
    }
    Ok(expanded)
}

/// Logical channel of a frame taken by camera `camera_index` for plan channel `channel`.
pub fn logical_channel(channel: usize, camera_index: usize, cameras: usize) -> usize {
    cameras * channel + camera_index
}

/// Listener that reduces the scan to projections.
pub struct FrameAssembler {
    analysis_channel: String,
    pixel_size_um: f64,
    image_width: usize,
    image_height: usize,
    round: RoundDir,
    writer: Box<dyn FrameWriter>,
    queue: SharedQueue,
    sequence: Option<Sequence>,
}

impl FrameAssembler {
    pub fn new(
        settings: &AnalyserSettings,
        round: RoundDir,
        image_size: (usize, usize),
        writer: Box<dyn FrameWriter>,
        queue: SharedQueue,
    ) -> Self {
        Self {
            analysis_channel: settings.channel.clone(),
            pixel_size_um: settings.pixel_size_um,
            image_width: image_size.0,
            image_height: image_size.1,
            round,
            writer,
            queue,
            sequence: None,
        }
    }

    pub fn queue(&self) -> &SharedQueue {
        &self.queue
    }

    /// Rewrites the event of a dual camera frame to its logical channel.
    fn remap(
        sequence: &Sequence,
        event: &AcquisitionEvent,
        metadata: &FrameMetadata,
    ) -> Result<(AcquisitionEvent, FrameMetadata)> {
        let camera = metadata
            .camera_device()
            .unwrap_or(metadata::DEFAULT_CAMERA);
        let camera_index = sequence
            .cameras
            .iter()
            .position(|label| label == camera)
            .ok_or_else(|| Error::UnknownCamera(camera.to_string()))?;

        let c = logical_channel(event.index().c, camera_index, sequence.cameras.len());
        let channel = sequence
            .plan
            .channels()
            .get(c)
            .cloned()
            .ok_or(Error::StackIndex {
                channel: c,
                z: event.index().z,
                channels: sequence.stack.channels(),
                z_slices: sequence.stack.z_slices(),
            })?;

        let new_index = EventIndex {
            c,
            ..event.index()
        };
        let event = event.with_index(new_index).with_channel(channel);

        let mut metadata = metadata.clone();
        metadata.insert_typed(metadata::MDA_EVENT, &event)?;
        metadata.insert_typed(metadata::NEW_INDEX, &new_index)?;
        Ok((event, metadata))
    }
}

impl MdaListener for FrameAssembler {
    fn sequence_started(
        &mut self,
        plan: &AcquisitionPlan,
        summary: &SummaryMetadata,
    ) -> Result<()> {
        let dual = plan
            .channels()
            .first()
            .is_some_and(|c| c.config.contains(DUAL_CAMERA_MARKER));
        let cameras = if dual {
            summary.camera_labels()
        } else {
            Vec::new()
        };

        let plan = if cameras.len() > 1 {
            plan.with_channels(expand_dual_channels(plan.channels(), cameras.len())?)
        } else {
            plan.clone()
        };

        let channels = plan.size(Axis::C).max(1);
        let z_slices = plan.size(Axis::Z).max(1);
        let stack = ChannelStack::new(channels, z_slices, self.image_width, self.image_height);

        let summary = SummaryMetadata {
            image_width: self.image_width,
            image_height: self.image_height,
            pixel_size_um: Some(self.pixel_size_um),
            ..summary.clone()
        };
        self.writer.sequence_started(&plan, &summary)?;

        {
            let mut queue = self.queue.lock();
            queue.plan = Some(plan.clone());
            queue.summary = Some(summary);
            queue.frames.clear();
        }

        tracing::info!(
            plan_id = %plan.id(),
            channels,
            z_slices,
            cameras = cameras.len(),
            "scan sequence started"
        );

        self.sequence = Some(Sequence {
            plan,
            cameras,
            stack,
            last_z: z_slices - 1,
        });
        Ok(())
    }

    fn frame_ready(
        &mut self,
        image: &Buffer2<u16>,
        event: &AcquisitionEvent,
        metadata: &FrameMetadata,
    ) -> Result<()> {
        let sequence = self.sequence.as_mut().ok_or(Error::SequenceNotStarted)?;

        let (event, metadata) = if sequence.dual() {
            Self::remap(sequence, event, metadata)?
        } else {
            (event.clone(), metadata.clone())
        };

        let index = event.index();
        let image = if sequence.dual() && index.c % 2 == 1 {
            Cow::Owned(image.flip_vertical())
        } else {
            Cow::Borrowed(image)
        };
        sequence.stack.write(index.c, index.z, &image)?;

        if index.z != sequence.last_z {
            return Ok(());
        }

        let projection = sequence.stack.mip(index.c)?;
        self.writer
            .frame_ready(FrameData::U16(&projection), &event, &metadata)?;
        tracing::debug!(p = index.p, c = index.c, "projection complete");

        if event.channel_config() == Some(self.analysis_channel.as_str()) {
            self.queue.lock().frames.push(QueuedFrame { event, metadata });
        }
        Ok(())
    }

    fn sequence_finished(&mut self, plan: &AcquisitionPlan) -> Result<()> {
        let sequence = self.sequence.take();
        let frames = self.queue.lock().frames.clone();
        checkpoint::save_queue(&self.round, &frames)?;

        let stored_plan = sequence.as_ref().map_or(plan, |s| &s.plan);
        checkpoint::write_json(&self.round.scan_plan(), stored_plan)?;
        self.writer.sequence_finished(stored_plan)?;

        tracing::info!(queued = frames.len(), "scan sequence finished");
        Ok(())
    }

    fn sequence_cancelled(&mut self) -> Result<()> {
        if self.sequence.take().is_some() {
            tracing::info!("scan sequence cancelled, stack discarded");
        }
        Ok(())
    }
}
