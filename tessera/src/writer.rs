//! Persistent frame writers.

use std::path::{Path, PathBuf};

use common::Buffer2;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::event::AcquisitionEvent;
use crate::hardware::MdaListener;
use crate::metadata::{FrameMetadata, SummaryMetadata};
use crate::plan::AcquisitionPlan;
use crate::store::{ArrayStore, ChunkStore, Dtype, StoreHeader};

pub const FRAME_METADATA_FILE: &str = "frame_metadata.json";

/// Borrowed frame in one of the supported pixel types.
#[derive(Debug, Clone, Copy)]
pub enum FrameData<'a> {
    U16(&'a Buffer2<u16>),
    F32(&'a Buffer2<f32>),
}

/// Sink for the frames of one sequence.
pub trait FrameWriter: Send {
    fn sequence_started(&mut self, plan: &AcquisitionPlan, summary: &SummaryMetadata)
    -> Result<()>;

    fn frame_ready(
        &mut self,
        frame: FrameData<'_>,
        event: &AcquisitionEvent,
        metadata: &FrameMetadata,
    ) -> Result<()>;

    fn sequence_finished(&mut self, plan: &AcquisitionPlan) -> Result<()>;

    /// Persists the per-frame metadata collected so far.
    fn finalize_metadata(&mut self) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct FrameRecord {
    index: Vec<usize>,
    event: AcquisitionEvent,
    metadata: FrameMetadata,
}

#[derive(Debug, Serialize)]
struct MetadataDocument<'a> {
    summary: &'a SummaryMetadata,
    frames: &'a [FrameRecord],
}

/// Writes every frame into a `ChunkStore` laid out after the sequence plan.
#[derive(Debug)]
pub struct StoreWriter {
    path: PathBuf,
    dtype: Dtype,
    store: Option<ChunkStore>,
    summary: SummaryMetadata,
    frames: Vec<FrameRecord>,
}

impl StoreWriter {
    pub fn new(path: impl Into<PathBuf>, dtype: Dtype) -> Self {
        Self {
            path: path.into(),
            dtype,
            store: None,
            summary: SummaryMetadata::default(),
            frames: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Starts a sequence whose store layout is given explicitly instead of
    /// derived from a plan.
    pub fn start_with_header(&mut self, header: StoreHeader, summary: &SummaryMetadata) -> Result<()> {
        let header = StoreHeader {
            dtype: self.dtype,
            ..header
        };
        self.store = Some(ChunkStore::create(&self.path, header)?);
        self.summary = summary.clone();
        self.frames.clear();
        Ok(())
    }

    fn store(&self) -> Result<&ChunkStore> {
        self.store.as_ref().ok_or(Error::SequenceNotStarted)
    }
}

impl FrameWriter for StoreWriter {
    fn sequence_started(
        &mut self,
        plan: &AcquisitionPlan,
        summary: &SummaryMetadata,
    ) -> Result<()> {
        let header =
            StoreHeader::for_plan(plan, summary.image_width, summary.image_height, self.dtype);
        self.start_with_header(header, summary)
    }

    fn frame_ready(
        &mut self,
        frame: FrameData<'_>,
        event: &AcquisitionEvent,
        metadata: &FrameMetadata,
    ) -> Result<()> {
        let store = self.store()?;
        let index = store.header().index_of(&event.index());
        match frame {
            FrameData::U16(frame) => store.write_frame(&index, frame)?,
            FrameData::F32(frame) => store.write_frame(&index, frame)?,
        }

        self.frames.push(FrameRecord {
            index,
            event: event.clone(),
            metadata: metadata.clone(),
        });
        Ok(())
    }

    fn sequence_finished(&mut self, plan: &AcquisitionPlan) -> Result<()> {
        tracing::debug!(
            path = %self.path.display(),
            plan_id = %plan.id(),
            frames = self.frames.len(),
            "store sequence finished"
        );
        Ok(())
    }

    fn finalize_metadata(&mut self) -> Result<()> {
        let path = self.path.join(FRAME_METADATA_FILE);
        let document = MetadataDocument {
            summary: &self.summary,
            frames: &self.frames,
        };
        let bytes = common::serde::serialize_for_path(&document, &path).map_err(|source| {
            Error::Encode {
                path: path.clone(),
                source,
            }
        })?;
        std::fs::write(&path, bytes).map_err(|source| Error::Write { path, source })
    }
}

impl MdaListener for StoreWriter {
    fn sequence_started(
        &mut self,
        plan: &AcquisitionPlan,
        summary: &SummaryMetadata,
    ) -> Result<()> {
        FrameWriter::sequence_started(self, plan, summary)
    }

    fn frame_ready(
        &mut self,
        image: &Buffer2<u16>,
        event: &AcquisitionEvent,
        metadata: &FrameMetadata,
    ) -> Result<()> {
        FrameWriter::frame_ready(self, FrameData::U16(image), event, metadata)
    }

    fn sequence_finished(&mut self, plan: &AcquisitionPlan) -> Result<()> {
        FrameWriter::sequence_finished(self, plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Channel, EventIndex};
    use crate::plan::StagePosition;
    use crate::store::StoreMode;

    fn plan() -> AcquisitionPlan {
        AcquisitionPlan::new(
            vec![StagePosition::xy(0.0, 0.0), StagePosition::xy(10.0, 0.0)],
            vec![Channel::new("Channel", "Cy5")],
            Vec::new(),
        )
    }

    fn summary() -> SummaryMetadata {
        SummaryMetadata {
            image_width: 3,
            image_height: 2,
            ..Default::default()
        }
    }

    #[test]
    fn frames_land_at_their_event_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acquisition.zarr");
        let mut writer = StoreWriter::new(&path, Dtype::U16);
        let plan = plan();

        FrameWriter::sequence_started(&mut writer, &plan, &summary()).unwrap();
        let frame = Buffer2::new_filled(3, 2, 9u16);
        let event = AcquisitionEvent::new(EventIndex { p: 1, ..Default::default() });
        FrameWriter::frame_ready(&mut writer, FrameData::U16(&frame), &event, &FrameMetadata::new())
            .unwrap();
        FrameWriter::sequence_finished(&mut writer, &plan).unwrap();

        let store = ChunkStore::open(&path, StoreMode::Read).unwrap();
        assert_eq!(store.read_frame::<u16>(&[1, 0]).unwrap(), frame);
        assert_eq!(writer.frame_count(), 1);
    }

    #[test]
    fn frames_before_start_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = StoreWriter::new(dir.path(), Dtype::U16);
        let frame = Buffer2::new_default(3, 2);
        let event = AcquisitionEvent::new(EventIndex::default());
        let err = MdaListener::frame_ready(&mut writer, &frame, &event, &FrameMetadata::new())
            .unwrap_err();
        assert!(matches!(err, Error::SequenceNotStarted));
    }

    #[test]
    fn finalize_writes_frame_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = StoreWriter::new(dir.path(), Dtype::F32);
        let plan = plan();

        FrameWriter::sequence_started(&mut writer, &plan, &summary()).unwrap();
        let frame = Buffer2::new_filled(3, 2, 0.5f32);
        let event = AcquisitionEvent::new(EventIndex::default());
        FrameWriter::frame_ready(
            &mut writer,
            FrameData::F32(&frame),
            &event,
            &FrameMetadata::with_camera("Camera"),
        )
        .unwrap();
        writer.finalize_metadata().unwrap();

        let text = std::fs::read_to_string(dir.path().join(FRAME_METADATA_FILE)).unwrap();
        let document: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(document["summary"]["image_width"], 3);
        assert_eq!(document["frames"][0]["metadata"]["camera_device"], "Camera");
        assert_eq!(document["frames"][0]["index"], serde_json::json!([0, 0]));
    }
}
