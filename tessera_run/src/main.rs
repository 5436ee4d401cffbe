use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum, ValueHint};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tessera::{
    AcquisitionPlan, Channel, IdentityModel, Phase, PhaseEvent, ResumePoint, Round, Settings,
    SimObject, SimulatedMicroscope, SimulationConfig, StagePosition,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Resume {
    Scan,
    Analysis,
    Acquisition,
}

impl From<Resume> for ResumePoint {
    fn from(resume: Resume) -> Self {
        match resume {
            Resume::Scan => ResumePoint::Scan,
            Resume::Analysis => ResumePoint::Analysis,
            Resume::Acquisition => ResumePoint::Acquisition,
        }
    }
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Scan, analyse and acquire one round on a simulated microscope"
)]
struct Cli {
    /// Round settings (YAML or JSON). A 3x3 demo scan is used when omitted
    #[arg(long, value_hint = ValueHint::FilePath)]
    settings: Option<PathBuf>,

    /// Phase to start from; later phases read the checkpoints of earlier ones
    #[arg(long, value_enum, default_value_t = Resume::Scan)]
    resume: Resume,

    /// Base log level; RUST_LOG overrides it
    #[arg(long, default_value = "info")]
    log_level: String,

    #[arg(long, default_value = "logs", value_hint = ValueHint::DirPath)]
    log_dir: PathBuf,

    /// Bright objects scattered over the simulated sample
    #[arg(long, default_value_t = 6)]
    objects: usize,

    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn demo_settings() -> Settings {
    let mut settings = Settings::default();
    let fov = 512.0 * settings.analyser.pixel_size_um;
    let positions = (0..3)
        .flat_map(|i| (0..3).map(move |j| StagePosition::xy(i as f64 * fov, j as f64 * fov)))
        .collect();

    settings.scan.plan = AcquisitionPlan::new(
        positions,
        vec![Channel::new("Channel", settings.analyser.channel.clone())],
        AcquisitionPlan::z_range(2.0, 1.0),
    );
    settings.acquisition.plan = AcquisitionPlan::new(
        Vec::new(),
        vec![Channel::new("Channel", "GFP")],
        AcquisitionPlan::z_range(4.0, 0.5),
    );
    settings.analyser.binary_mode = true;
    settings
}

/// Scatters objects over the area imaged by the scan plan.
fn simulation(settings: &Settings, objects: usize, seed: u64) -> SimulationConfig {
    let mut config = SimulationConfig {
        pixel_size_um: settings.analyser.pixel_size_um,
        seed,
        asynchronous: true,
        ..Default::default()
    };
    let half_fov = config.image_width as f64 * config.pixel_size_um / 2.0;

    let positions = settings.scan.plan.stage_positions();
    if positions.is_empty() {
        return config;
    }
    let (min_x, min_y, max_x, max_y) = positions.iter().fold(
        (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        |(x0, y0, x1, y1), p| {
            let (x, y) = (p.x.unwrap_or(0.0), p.y.unwrap_or(0.0));
            (x0.min(x), y0.min(y), x1.max(x), y1.max(y))
        },
    );

    let mut rng = StdRng::seed_from_u64(seed);
    config.objects = (0..objects)
        .map(|_| {
            SimObject::new(
                rng.random_range(min_x - half_fov..max_x + half_fov),
                rng.random_range(min_y - half_fov..max_y + half_fov),
                rng.random_range(2.0..6.0),
            )
        })
        .collect();
    config
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    common::log_setup::setup_logging(&cli.log_level, &cli.log_dir);

    let settings = match &cli.settings {
        Some(path) => Settings::load(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => demo_settings(),
    };

    let microscope = SimulatedMicroscope::new(simulation(&settings, cli.objects, cli.seed));
    let round = Round::new(settings, Arc::new(microscope), Arc::new(IdentityModel::default()))
        .context("invalid round settings")?;

    if let Some(mut events) = round.take_phase_events() {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    PhaseEvent::AnalysisFinished { plan } => tracing::info!(
                        tiles = plan.stage_positions().len(),
                        "analysis finished"
                    ),
                    other => tracing::info!(event = ?other, "phase finished"),
                }
            }
        });
    }

    let cancel = round.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling round");
            cancel.cancel();
        }
    });

    let phase = round
        .run(cli.resume.into())
        .await
        .with_context(|| format!("round in {}", round.dir().root().display()))?;

    match phase {
        Phase::Done => tracing::info!(round = %round.dir().root().display(), "round complete"),
        other => tracing::warn!(phase = ?other, "round stopped early"),
    }
    Ok(())
}
