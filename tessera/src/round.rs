//! Supervisor running the phases of one round on blocking workers.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use crate::checkpoint::RoundDir;
use crate::config::Settings;
use crate::detection::InferenceModel;
use crate::error::{Error, Result};
use crate::hardware::Microscope;
use crate::sequencer::{AcquisitionSequencer, CancelHandle, Phase, PhaseEvent};

/// Phase a round starts from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResumePoint {
    /// Fresh round: scan, analyse, acquire.
    #[default]
    Scan,
    /// The scan checkpoint exists; analyse and acquire.
    Analysis,
    /// The acquisition plan exists; acquire only.
    Acquisition,
}

pub struct Round {
    sequencer: Arc<AcquisitionSequencer>,
    settings: Settings,
    phase_events: Mutex<Option<UnboundedReceiver<PhaseEvent>>>,
}

impl Round {
    pub fn new(
        settings: Settings,
        microscope: Arc<dyn Microscope>,
        model: Arc<dyn InferenceModel>,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let sequencer = AcquisitionSequencer::new(settings.clone(), microscope, model, Some(tx))?;
        Ok(Self {
            sequencer: Arc::new(sequencer),
            settings,
            phase_events: Mutex::new(Some(rx)),
        })
    }

    pub fn dir(&self) -> &RoundDir {
        self.sequencer.round()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.sequencer.cancel_handle()
    }

    /// Receiver of phase completions. Available once.
    pub fn take_phase_events(&self) -> Option<UnboundedReceiver<PhaseEvent>> {
        self.phase_events.lock().take()
    }

    pub fn phase(&self) -> Phase {
        self.sequencer.phase()
    }

    /// Runs the round from `resume` to the end and returns the final phase.
    ///
    /// Each phase runs on its own blocking worker, started only after the
    /// previous one returned. A failing phase ends the round with its error.
    pub async fn run(&self, resume: ResumePoint) -> Result<Phase> {
        let root = self.dir().root().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|source| Error::Write {
            path: root.clone(),
            source,
        })?;

        match resume {
            ResumePoint::Scan => {
                self.settings.save(&self.dir().settings())?;
                tracing::info!(round = %root.display(), "starting round");
                if self.run_phase(AcquisitionSequencer::scan).await? == PhaseEvent::Cancelled {
                    return Ok(self.phase());
                }
            }
            ResumePoint::Analysis => self.sequencer.resume_analysis()?,
            ResumePoint::Acquisition => self.sequencer.resume_acquisition()?,
        }

        if resume != ResumePoint::Acquisition
            && self.run_phase(AcquisitionSequencer::analyse).await? == PhaseEvent::Cancelled
        {
            return Ok(self.phase());
        }
        if self.sequencer.phase() == Phase::Cancelled {
            return Ok(Phase::Cancelled);
        }

        self.run_phase(AcquisitionSequencer::acquire).await?;
        let phase = self.phase();
        tracing::info!(phase = ?phase, round = %root.display(), "round ended");
        Ok(phase)
    }

    async fn run_phase(
        &self,
        phase: fn(&AcquisitionSequencer) -> Result<PhaseEvent>,
    ) -> Result<PhaseEvent> {
        let sequencer = Arc::clone(&self.sequencer);
        tokio::task::spawn_blocking(move || phase(&sequencer))
            .await
            .map_err(|err| Error::Worker(err.to_string()))?
    }
}
