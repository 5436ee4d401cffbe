//! Tessera - event-driven microscopy acquisition.
//!
//! A round scans a sample at low resolution, projects every z-stack to a
//! maximum-intensity image as frames stream in, detects objects in the
//! projections, covers them with the fewest imaging tiles and acquires those
//! tiles at high resolution.
//!
//! ```rust,ignore
//! use tessera::{IdentityModel, ResumePoint, Round, Settings, SimulatedMicroscope};
//!
//! let settings = Settings::load("settings.yaml".as_ref())?;
//! let microscope = SimulatedMicroscope::new(Default::default());
//! let round = Round::new(settings, Arc::new(microscope), Arc::new(IdentityModel::default()))?;
//! let phase = round.run(ResumePoint::Scan).await?;
//! ```

pub mod assembler;
pub mod checkpoint;
pub mod config;
pub mod cover;
pub mod detection;
pub mod error;
pub mod event;
pub mod hardware;
pub mod interpreter;
pub mod mapping;
pub mod metadata;
pub mod plan;
pub mod round;
pub mod sequencer;
pub mod store;
pub mod writer;

// ============================================================================
// Data model
// ============================================================================

pub use event::{AcquisitionEvent, Channel, EventIndex};
pub use metadata::{FrameMetadata, SummaryMetadata};
pub use plan::{AcquisitionPlan, Axis, StagePosition};

// ============================================================================
// Configuration and errors
// ============================================================================

pub use config::{
    AcquisitionSettings, AnalyserSettings, MicroscopeSettings, Orientation, SaveSettings,
    ScanSettings, Settings,
};
pub use error::{Error, Result};

// ============================================================================
// Pipeline
// ============================================================================

pub use assembler::{ChannelStack, FrameAssembler};
pub use cover::{TileCoverSolver, TilePlacement};
pub use detection::{
    DetectedPosition, DetectionEngine, FrameDetections, IdentityModel, InferenceModel,
    ModelOutput,
};
pub use interpreter::PositionInterpreter;
pub use mapping::remap;

// ============================================================================
// Hardware and orchestration
// ============================================================================

pub use hardware::{
    HardwareEvents, MdaListener, Microscope, SimObject, SimulatedMicroscope, SimulationConfig,
    Subscription,
};
pub use round::{ResumePoint, Round};
pub use sequencer::{AcquisitionSequencer, CancelHandle, Phase, PhaseEvent};
pub use store::{ArrayStore, ChunkStore, Dtype, StoreMode};
pub use writer::{FrameWriter, StoreWriter};
