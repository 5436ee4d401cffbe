//! Two-phase acquisition state machine.
//!
//! A round scans the sample, analyses the projections, then acquires the
//! derived plan. Each phase method blocks the calling thread until the
//! hardware signals the end of its sequence; callers run one phase at a
//! time. Cancellation can arrive from any thread through a `CancelHandle`.

#[cfg(test)]
mod tests;

use std::sync::Arc;

use common::Buffer2;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedSender};

use crate::assembler::{DUAL_CAMERA_MARKER, FrameAssembler, SharedQueue};
use crate::checkpoint::{self, RoundDir};
use crate::config::Settings;
use crate::detection::{DetectionEngine, InferenceModel};
use crate::error::{Error, Result};
use crate::event::AcquisitionEvent;
use crate::hardware::{MdaListener, Microscope, SharedListener, Subscription};
use crate::interpreter::PositionInterpreter;
use crate::metadata::{FrameMetadata, SummaryMetadata};
use crate::plan::AcquisitionPlan;
use crate::store::Dtype;
use crate::writer::{FrameWriter, StoreWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Idle,
    Scanning,
    ScanDone,
    Analyzing,
    AnalysisDone,
    Acquiring,
    Done,
    Cancelled,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Cancelled)
    }
}

/// Announced when a phase completes.
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseEvent {
    ScanFinished,
    AnalysisFinished { plan: AcquisitionPlan },
    AcquisitionFinished,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SequenceEnd {
    Finished,
    Cancelled,
}

/// Forwards the end of a hardware sequence to the waiting phase.
struct CompletionListener {
    tx: UnboundedSender<SequenceEnd>,
}

impl MdaListener for CompletionListener {
    fn sequence_started(&mut self, _: &AcquisitionPlan, _: &SummaryMetadata) -> Result<()> {
        Ok(())
    }

    fn frame_ready(
        &mut self,
        _: &Buffer2<u16>,
        _: &AcquisitionEvent,
        _: &FrameMetadata,
    ) -> Result<()> {
        Ok(())
    }

    fn sequence_finished(&mut self, _: &AcquisitionPlan) -> Result<()> {
        let _ = self.tx.send(SequenceEnd::Finished);
        Ok(())
    }

    fn sequence_cancelled(&mut self) -> Result<()> {
        let _ = self.tx.send(SequenceEnd::Cancelled);
        Ok(())
    }
}

#[derive(Default)]
struct Attached {
    subscriptions: Vec<Subscription>,
    wake: Option<UnboundedSender<SequenceEnd>>,
}

impl Attached {
    /// Disconnects every listener. Already disconnected ones are fine.
    fn detach(&mut self) {
        for mut subscription in self.subscriptions.drain(..) {
            match subscription.disconnect() {
                Ok(()) | Err(Error::NotConnected) => {}
                Err(err) => tracing::warn!("failed to detach listener: {}", err),
            }
        }
        self.wake = None;
    }
}

struct Shared {
    microscope: Arc<dyn Microscope>,
    phase: Mutex<Phase>,
    attached: Mutex<Attached>,
    phase_events: Option<UnboundedSender<PhaseEvent>>,
}

impl Shared {
    fn notify(&self, event: PhaseEvent) {
        if let Some(tx) = &self.phase_events {
            let _ = tx.send(event);
        }
    }
}

/// Cancels the round from any thread. Cancelling twice is a no-op.
#[derive(Clone)]
pub struct CancelHandle {
    shared: Arc<Shared>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        {
            let mut phase = self.shared.phase.lock();
            if phase.is_terminal() {
                return;
            }
            tracing::info!(from = ?*phase, "cancelling round");
            *phase = Phase::Cancelled;
        }

        let mut attached = self.shared.attached.lock();
        let wake = attached.wake.take();
        attached.detach();
        drop(attached);

        self.shared.microscope.cancel();
        if let Some(wake) = wake {
            let _ = wake.send(SequenceEnd::Cancelled);
        }
        self.shared.notify(PhaseEvent::Cancelled);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.shared.phase.lock() == Phase::Cancelled
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct StageOrigin {
    x: f64,
    y: f64,
    z: f64,
}

/// Drives scan, analysis and acquisition of one round.
pub struct AcquisitionSequencer {
    settings: Settings,
    round: RoundDir,
    model: Arc<dyn InferenceModel>,
    queue: SharedQueue,
    shared: Arc<Shared>,
    origin: Mutex<Option<StageOrigin>>,
    acquisition_plan: Mutex<Option<AcquisitionPlan>>,
}

impl AcquisitionSequencer {
    pub fn new(
        settings: Settings,
        microscope: Arc<dyn Microscope>,
        model: Arc<dyn InferenceModel>,
        phase_events: Option<UnboundedSender<PhaseEvent>>,
    ) -> Result<Self> {
        settings.validate()?;
        let round = RoundDir::new(settings.round_dir());
        Ok(Self {
            settings,
            round,
            model,
            queue: SharedQueue::default(),
            shared: Arc::new(Shared {
                microscope,
                phase: Mutex::new(Phase::Idle),
                attached: Mutex::new(Attached::default()),
                phase_events,
            }),
            origin: Mutex::new(None),
            acquisition_plan: Mutex::new(None),
        })
    }

    pub fn phase(&self) -> Phase {
        *self.shared.phase.lock()
    }

    pub fn round(&self) -> &RoundDir {
        &self.round
    }

    pub fn queue(&self) -> &SharedQueue {
        &self.queue
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn acquisition_plan(&self) -> Option<AcquisitionPlan> {
        self.acquisition_plan.lock().clone()
    }

    fn microscope(&self) -> &dyn Microscope {
        self.shared.microscope.as_ref()
    }

    fn transition(&self, from: Phase, to: Phase) -> Result<()> {
        let mut phase = self.shared.phase.lock();
        if *phase != from {
            return Err(Error::InvalidTransition { from: *phase, to });
        }
        tracing::info!(from = ?from, to = ?to, "phase transition");
        *phase = to;
        Ok(())
    }

    fn record_origin(&self) {
        let microscope = self.microscope();
        let (x, y) = microscope.xy_position();
        let z = microscope.z_position();
        tracing::debug!(x, y, z, "recorded stage origin");
        *self.origin.lock() = Some(StageOrigin { x, y, z });
    }

    /// Switches a configuration preset. Failures are logged and the round continues.
    fn apply_config(&self, group: &str, preset: &str) {
        match self.microscope().set_config(group, preset) {
            Ok(()) => tracing::info!(group, preset, "applied configuration"),
            Err(err) => tracing::error!(group, preset, "failed to apply configuration: {}", err),
        }
    }

    fn apply_optics(&self, objective: &str, plan: &AcquisitionPlan) {
        let microscope = &self.settings.microscope;
        self.apply_config(&microscope.objective_group, objective);
        let dual = plan
            .channels()
            .first()
            .is_some_and(|c| c.config.contains(DUAL_CAMERA_MARKER));
        if dual {
            self.apply_config(&microscope.camera_mode_group, &microscope.dual_camera_preset);
        }
    }

    /// Runs `plan` with `listeners` attached and waits for its end.
    fn run_sequence(
        &self,
        plan: &AcquisitionPlan,
        listeners: Vec<SharedListener>,
    ) -> Result<SequenceEnd> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        {
            let mut attached = self.shared.attached.lock();
            if *self.shared.phase.lock() == Phase::Cancelled {
                return Ok(SequenceEnd::Cancelled);
            }
            let events = self.microscope().events();
            for listener in listeners {
                attached.subscriptions.push(events.subscribe(listener));
            }
            let completion = Arc::new(Mutex::new(CompletionListener { tx: tx.clone() }));
            attached.subscriptions.push(events.subscribe(completion));
            attached.wake = Some(tx);
        }

        if let Err(err) = self.microscope().run_plan(plan) {
            self.shared.attached.lock().detach();
            return Err(err);
        }

        let end = rx.blocking_recv().unwrap_or(SequenceEnd::Cancelled);
        self.shared.attached.lock().detach();
        if end == SequenceEnd::Cancelled {
            self.cancel_handle().cancel();
        }
        Ok(end)
    }

    /// `Idle -> Scanning -> ScanDone`.
    pub fn scan(&self) -> Result<PhaseEvent> {
        self.transition(Phase::Idle, Phase::Scanning)?;
        self.record_origin();

        let plan = &self.settings.scan.plan;
        self.apply_optics(&self.settings.scan.objective, plan);
        checkpoint::write_json(&self.round.scan_plan(), plan)?;

        let microscope = self.microscope();
        let writer = StoreWriter::new(self.round.scan_store(), Dtype::U16);
        let assembler = FrameAssembler::new(
            &self.settings.analyser,
            self.round.clone(),
            (microscope.image_width(), microscope.image_height()),
            Box::new(writer),
            Arc::clone(&self.queue),
        );

        tracing::info!(
            plan_id = %plan.id(),
            events = plan.event_count(),
            "starting scan"
        );
        let assembler: SharedListener = Arc::new(Mutex::new(assembler));
        let end = self.run_sequence(plan, vec![assembler])?;
        if end == SequenceEnd::Cancelled || self.phase() == Phase::Cancelled {
            return Ok(PhaseEvent::Cancelled);
        }

        if let Some(origin) = *self.origin.lock() {
            microscope.set_z_position(origin.z)?;
        }
        self.transition(Phase::Scanning, Phase::ScanDone)?;
        self.shared.notify(PhaseEvent::ScanFinished);
        Ok(PhaseEvent::ScanFinished)
    }

    /// `ScanDone -> Analyzing -> AnalysisDone`: detection, tile cover and
    /// the acquisition plan.
    pub fn analyse(&self) -> Result<PhaseEvent> {
        self.transition(Phase::ScanDone, Phase::Analyzing)?;

        let engine = DetectionEngine::new(
            &self.settings.analyser,
            self.round.clone(),
            Arc::clone(&self.model),
            Arc::clone(&self.queue),
        );
        let detections = engine.analyse()?;

        let mut interpreter = PositionInterpreter::new(
            &self.settings.acquisition,
            self.settings.analyser.pixel_size_um,
            self.round.clone(),
        );
        for frame in &detections {
            interpreter.add(frame);
        }

        let microscope = self.microscope();
        let plan = interpreter.interpret(microscope.z_position(), microscope.image_width())?;
        checkpoint::write_json(&self.round.acquisition_plan(), &plan)?;
        *self.acquisition_plan.lock() = Some(plan.clone());

        if self.phase() == Phase::Cancelled {
            return Ok(PhaseEvent::Cancelled);
        }
        self.transition(Phase::Analyzing, Phase::AnalysisDone)?;
        let event = PhaseEvent::AnalysisFinished { plan };
        self.shared.notify(event.clone());
        Ok(event)
    }

    /// `AnalysisDone -> Acquiring -> Done`.
    pub fn acquire(&self) -> Result<PhaseEvent> {
        self.transition(Phase::AnalysisDone, Phase::Acquiring)?;
        let plan = self
            .acquisition_plan()
            .ok_or_else(|| Error::Config("no acquisition plan was derived".to_string()))?;

        self.apply_optics(&self.settings.acquisition.objective, &plan);
        checkpoint::write_json(&self.round.acquisition_plan(), &plan)?;

        let writer = Arc::new(Mutex::new(StoreWriter::new(
            self.round.acquisition_store(),
            Dtype::U16,
        )));
        tracing::info!(
            plan_id = %plan.id(),
            positions = plan.stage_positions().len(),
            "starting acquisition"
        );
        let listener: SharedListener = writer.clone();
        let end = self.run_sequence(&plan, vec![listener])?;
        if end == SequenceEnd::Cancelled || self.phase() == Phase::Cancelled {
            return Ok(PhaseEvent::Cancelled);
        }

        writer.lock().finalize_metadata()?;
        checkpoint::write_json(&self.round.acquisition_plan(), &plan)?;

        if let Some(origin) = *self.origin.lock() {
            let microscope = self.microscope();
            microscope.set_xy_position(origin.x, origin.y)?;
            microscope.set_z_position(origin.z)?;
        }
        self.transition(Phase::Acquiring, Phase::Done)?;
        self.shared.notify(PhaseEvent::AcquisitionFinished);
        Ok(PhaseEvent::AcquisitionFinished)
    }

    /// Continues a round whose scan finished earlier, from its checkpoint.
    pub fn resume_analysis(&self) -> Result<()> {
        self.transition(Phase::Idle, Phase::ScanDone)?;
        self.record_origin();
        tracing::info!(round = %self.round.root().display(), "resuming at analysis");
        Ok(())
    }

    /// Continues a round whose acquisition plan was already derived.
    pub fn resume_acquisition(&self) -> Result<()> {
        let plan: AcquisitionPlan = checkpoint::read_json(&self.round.imaging_sequence())?;
        self.transition(Phase::Idle, Phase::AnalysisDone)?;
        self.record_origin();
        *self.acquisition_plan.lock() = Some(plan);
        tracing::info!(round = %self.round.root().display(), "resuming at acquisition");
        Ok(())
    }
}
