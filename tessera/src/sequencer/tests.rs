use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;

use super::*;
use crate::config::{AcquisitionSettings, AnalyserSettings, SaveSettings, ScanSettings};
use crate::detection::IdentityModel;
use crate::event::Channel;
use crate::hardware::{SimObject, SimulatedMicroscope, SimulationConfig};
use crate::plan::StagePosition;
use crate::writer::FRAME_METADATA_FILE;

fn sim_config() -> SimulationConfig {
    SimulationConfig {
        image_width: 32,
        image_height: 32,
        pixel_size_um: 1.0,
        objects: vec![SimObject::new(0.0, 0.0, 6.0)],
        ..Default::default()
    }
}

fn settings(dir: &std::path::Path, scan_channel: &str) -> Settings {
    Settings {
        scan: ScanSettings {
            objective: "10x".to_string(),
            plan: AcquisitionPlan::new(
                vec![StagePosition::xy(0.0, 0.0), StagePosition::xy(100.0, 0.0)],
                vec![Channel::new("Channel", scan_channel)],
                vec![-1.0, 0.0, 1.0],
            ),
        },
        analyser: AnalyserSettings {
            tile_size: 32,
            pixel_size_um: 1.0,
            checkpoint_retry_ms: 1,
            ..Default::default()
        },
        acquisition: AcquisitionSettings {
            pixel_size_um: 1.0,
            plan: AcquisitionPlan::new(
                Vec::new(),
                vec![Channel::new("Channel", "GFP")],
                vec![0.0],
            ),
            ..Default::default()
        },
        save: SaveSettings {
            save_dir: dir.to_path_buf(),
            save_name: "round".to_string(),
        },
        ..Default::default()
    }
}

fn sequencer(
    settings: Settings,
    microscope: &SimulatedMicroscope,
) -> (AcquisitionSequencer, UnboundedReceiver<PhaseEvent>) {
    common::log_setup::setup_test_logging();
    let (tx, rx) = mpsc::unbounded_channel();
    let sequencer = AcquisitionSequencer::new(
        settings,
        Arc::new(microscope.clone()),
        Arc::new(IdentityModel::default()),
        Some(tx),
    )
    .unwrap();
    (sequencer, rx)
}

#[test]
fn full_round_restores_the_stage() {
    let dir = tempfile::tempdir().unwrap();
    let microscope = SimulatedMicroscope::new(sim_config());
    microscope.set_xy_position(5.0, 5.0).unwrap();
    microscope.set_z_position(2.0).unwrap();
    let (sequencer, mut rx) = sequencer(settings(dir.path(), "Cy5"), &microscope);

    assert_eq!(sequencer.scan().unwrap(), PhaseEvent::ScanFinished);
    assert_eq!(sequencer.phase(), Phase::ScanDone);
    assert_eq!(microscope.z_position(), 2.0);

    let PhaseEvent::AnalysisFinished { plan } = sequencer.analyse().unwrap() else {
        panic!("analysis did not finish");
    };
    assert_eq!(plan.stage_positions().len(), 1);
    assert_eq!(plan.stage_positions()[0].z, Some(2.0));

    assert_eq!(sequencer.acquire().unwrap(), PhaseEvent::AcquisitionFinished);
    assert_eq!(sequencer.phase(), Phase::Done);
    assert_eq!(microscope.xy_position(), (5.0, 5.0));
    assert_eq!(microscope.z_position(), 2.0);

    let round = sequencer.round();
    assert!(round.positions_csv().exists());
    assert!(round.imaging_positions_csv().exists());
    assert!(round.acquisition_store().join(FRAME_METADATA_FILE).exists());
    let stored: AcquisitionPlan = checkpoint::read_json(&round.acquisition_plan()).unwrap();
    assert_eq!(stored, plan);

    let history = microscope.config_history();
    assert!(history.contains(&("Objective".to_string(), "10x".to_string())));
    assert!(history.contains(&("Objective".to_string(), "60x".to_string())));

    let mut announced = Vec::new();
    while let Ok(event) = rx.try_recv() {
        announced.push(event);
    }
    assert_eq!(announced.len(), 3);
    assert_eq!(announced[0], PhaseEvent::ScanFinished);
    assert_eq!(announced[2], PhaseEvent::AcquisitionFinished);
}

#[test]
fn cancel_during_scanning() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = sim_config();
    config.hang_after = Some(1);
    config.asynchronous = true;
    let microscope = SimulatedMicroscope::new(config);
    let (sequencer, mut rx) = sequencer(settings(dir.path(), "Cy5"), &microscope);
    let sequencer = Arc::new(sequencer);
    let handle = sequencer.cancel_handle();

    let worker = {
        let sequencer = Arc::clone(&sequencer);
        std::thread::spawn(move || sequencer.scan())
    };
    assert!(microscope.wait_for_hang(Duration::from_secs(5)));
    assert_eq!(microscope.events().listener_count(), 2);

    handle.cancel();
    let outcome = worker.join().unwrap().unwrap();
    assert_eq!(outcome, PhaseEvent::Cancelled);
    assert_eq!(sequencer.phase(), Phase::Cancelled);
    assert!(handle.is_cancelled());
    assert_eq!(microscope.events().listener_count(), 0);

    // Second cancel does nothing.
    handle.cancel();
    assert_eq!(rx.try_recv().unwrap(), PhaseEvent::Cancelled);
    assert!(rx.try_recv().is_err());

    // Partial output stays on disk and later phases refuse to run.
    assert!(sequencer.round().scan_plan().exists());
    assert!(matches!(
        sequencer.analyse(),
        Err(Error::InvalidTransition {
            from: Phase::Cancelled,
            to: Phase::Analyzing
        })
    ));
}

#[test]
fn cancel_before_start_skips_the_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let microscope = SimulatedMicroscope::new(sim_config());
    let (sequencer, _rx) = sequencer(settings(dir.path(), "Cy5"), &microscope);

    sequencer.cancel_handle().cancel();
    assert!(matches!(
        sequencer.scan(),
        Err(Error::InvalidTransition { from: Phase::Cancelled, .. })
    ));
    assert_eq!(microscope.plans_run(), 0);
}

#[test]
fn failing_configuration_does_not_stop_the_round() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = sim_config();
    config.failing_preset = Some("10x".to_string());
    let microscope = SimulatedMicroscope::new(config);
    let (sequencer, _rx) = sequencer(settings(dir.path(), "Cy5"), &microscope);

    assert_eq!(sequencer.scan().unwrap(), PhaseEvent::ScanFinished);
    assert!(microscope.active_config("Objective").is_none());
    assert_eq!(microscope.plans_run(), 1);
}

#[test]
fn dual_camera_plans_switch_the_camera_mode() {
    let dir = tempfile::tempdir().unwrap();
    let microscope = SimulatedMicroscope::new(sim_config().dual_camera());
    let (sequencer, _rx) = sequencer(settings(dir.path(), "Dual-GFP-Cy5"), &microscope);

    assert_eq!(sequencer.scan().unwrap(), PhaseEvent::ScanFinished);
    assert_eq!(
        microscope.active_config("Camera").as_deref(),
        Some("Multi Camera")
    );

    // Two positions, one Cy5 projection each after expansion.
    assert_eq!(sequencer.queue().lock().frames.len(), 2);
    let stored: AcquisitionPlan = checkpoint::read_json(&sequencer.round().scan_plan()).unwrap();
    assert_eq!(stored.channels().len(), 2);
}

#[test]
fn phases_run_in_order_only() {
    let dir = tempfile::tempdir().unwrap();
    let microscope = SimulatedMicroscope::new(sim_config());
    let (sequencer, _rx) = sequencer(settings(dir.path(), "Cy5"), &microscope);

    assert!(matches!(
        sequencer.acquire(),
        Err(Error::InvalidTransition {
            from: Phase::Idle,
            to: Phase::Acquiring
        })
    ));
    assert_eq!(sequencer.phase(), Phase::Idle);
}

#[test]
fn analysis_resumes_from_the_scan_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let microscope = SimulatedMicroscope::new(sim_config());

    let (first, _rx) = sequencer(settings(dir.path(), "Cy5"), &microscope);
    first.scan().unwrap();
    let PhaseEvent::AnalysisFinished { plan: expected } = first.analyse().unwrap() else {
        panic!("analysis did not finish");
    };

    let (resumed, _rx) = sequencer(settings(dir.path(), "Cy5"), &microscope);
    resumed.resume_analysis().unwrap();
    let PhaseEvent::AnalysisFinished { plan } = resumed.analyse().unwrap() else {
        panic!("analysis did not finish");
    };
    assert_eq!(plan.stage_positions(), expected.stage_positions());
    assert_eq!(resumed.queue().lock().frames.len(), 2);
}

#[test]
fn acquisition_resumes_from_the_derived_plan() {
    let dir = tempfile::tempdir().unwrap();
    let microscope = SimulatedMicroscope::new(sim_config());

    let (first, _rx) = sequencer(settings(dir.path(), "Cy5"), &microscope);
    first.scan().unwrap();
    first.analyse().unwrap();

    let (resumed, _rx) = sequencer(settings(dir.path(), "Cy5"), &microscope);
    resumed.resume_acquisition().unwrap();
    assert_eq!(resumed.acquisition_plan(), first.acquisition_plan());
    assert_eq!(resumed.acquire().unwrap(), PhaseEvent::AcquisitionFinished);
}

#[test]
fn invalid_settings_are_rejected_before_the_round() {
    let dir = tempfile::tempdir().unwrap();
    let microscope = SimulatedMicroscope::new(sim_config());
    let build = |settings: Settings| {
        AcquisitionSequencer::new(
            settings,
            Arc::new(microscope.clone()),
            Arc::new(IdentityModel::default()),
            None,
        )
    };

    let mut no_subdivisions = settings(dir.path(), "Cy5");
    no_subdivisions.acquisition.cover_subdivisions = 0;
    assert!(matches!(build(no_subdivisions), Err(Error::Config(_))));

    let mut skewed = settings(dir.path(), "Cy5");
    skewed.analyser.orientation.rotation = 45;
    assert!(matches!(build(skewed), Err(Error::Config(_))));

    assert!(build(settings(dir.path(), "Cy5")).is_ok());
    assert_eq!(microscope.plans_run(), 0);
}
